use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Extension, Router};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use compliance_platform::config;
use compliance_platform::evidence::{EvidenceStore, LocalDiskEvidenceStore};
use compliance_platform::routes::api_routes;

async fn root() -> &'static str {
    "compliance platform"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    // Fail fast on missing required secrets before accepting connections.
    let _ = config::AUDIT_CHAIN_KEY.as_str();
    let _ = config::EVIDENCE_URL_SIGNING_KEY.as_str();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config::DATABASE_URL)
        .await
        .context("connecting to the compliance database")?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error).context("running database migrations");
        }
    }

    compliance_platform::db::controls::sync_catalog(&pool, &compliance_platform::catalog::CATALOG)
        .await
        .context("syncing control catalog into the database")?;

    let evidence_store: Arc<dyn EvidenceStore> = Arc::new(LocalDiskEvidenceStore::new(
        config::EVIDENCE_URL_SIGNING_KEY.clone(),
    ));

    let app = Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(pool))
        .layer(Extension(evidence_store));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("parsing BIND_ADDRESS/BIND_PORT")?;
    tracing::info!(%addr, "listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
