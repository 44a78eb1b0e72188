use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

// key: compliance-db -> cloud-account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CloudAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: String,
    pub external_account_id: String,
    pub region: String,
    pub credentials: Value,
    pub account_metadata: Value,
    pub is_active: bool,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_status: String,
    pub version: i64,
}

const COLUMNS: &str = r#"
    id, organization_id, provider, external_account_id, region, credentials,
    account_metadata, is_active, last_scan_at, last_scan_status, version
"#;

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<CloudAccount>, sqlx::Error> {
    sqlx::query_as::<_, CloudAccount>(&format!(
        "SELECT {COLUMNS} FROM cloud_accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Transactionally claims the account for a new scan: fails (returns `None`)
/// if a scan is already in progress, matching the Detection Engine's
/// "at most one active scan per account" rule.
pub async fn begin_scan<'c, E>(executor: E, id: Uuid) -> Result<Option<CloudAccount>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, CloudAccount>(&format!(
        r#"
        UPDATE cloud_accounts
        SET last_scan_status = 'inProgress', version = version + 1
        WHERE id = $1 AND last_scan_status != 'inProgress'
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn complete_scan<'c, E>(
    executor: E,
    id: Uuid,
    status: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE cloud_accounts
        SET last_scan_at = NOW(), last_scan_status = $2, version = version + 1
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .execute(executor)
    .await?;
    Ok(())
}
