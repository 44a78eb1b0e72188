use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Extension, Router,
};
use compliance_platform::evidence::{EvidenceStore, LocalDiskEvidenceStore};
use compliance_platform::routes::api_routes;
use hyper::body;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct Harness {
    app: Router,
    organization_id: Uuid,
    cloud_account_id: Uuid,
}

async fn bootstrap(pool: &PgPool) -> Harness {
    sqlx::migrate!("./migrations").run(pool).await.unwrap();
    std::env::set_var("AUDIT_CHAIN_KEY", "integration-chain-key");
    std::env::set_var("EVIDENCE_URL_SIGNING_KEY", "integration-url-key");

    let organization_id: Uuid = sqlx::query_scalar(
        "INSERT INTO organizations (name, compliance_frameworks, contact_email) \
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind("Acme Corp")
    .bind(vec!["SOC2".to_string()])
    .bind("security@acme.example")
    .fetch_one(pool)
    .await
    .unwrap();

    let cloud_account_id: Uuid = sqlx::query_scalar(
        "INSERT INTO cloud_accounts (organization_id, provider, external_account_id, region) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(organization_id)
    .bind("aws")
    .bind("111122223333")
    .bind("us-east-1")
    .fetch_one(pool)
    .await
    .unwrap();

    let evidence_dir = tempfile::tempdir().unwrap();
    std::env::set_var("EVIDENCE_STORE_ROOT", evidence_dir.path().to_str().unwrap());
    // Keep the tempdir alive for the process; tests run single-threaded per pool.
    std::mem::forget(evidence_dir);

    let evidence_store: Arc<dyn EvidenceStore> =
        Arc::new(LocalDiskEvidenceStore::new("integration-url-key".to_string()));

    let app = api_routes()
        .layer(Extension(pool.clone()))
        .layer(Extension(evidence_store));

    Harness {
        app,
        organization_id,
        cloud_account_id,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    let request = match body {
        Some(payload) => builder.body(Body::from(payload.to_string())).unwrap(),
        None => {
            builder = builder.header("Content-Length", "0");
            builder.body(Body::empty()).unwrap()
        }
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn scan_list_remediate_rollback_export_flow(pool: PgPool) {
    let harness = bootstrap(&pool).await;

    let scan_response = send(
        &harness.app,
        Method::POST,
        &format!("/api/cloud-accounts/{}/scans", harness.cloud_account_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(scan_response.status(), StatusCode::OK);
    let scan = json_body(scan_response).await;
    assert!(scan["summary"]["fail"].as_i64().unwrap() > 0);

    let list_response = send(
        &harness.app,
        Method::GET,
        &format!(
            "/api/findings?account_id={}&status=FAIL",
            harness.cloud_account_id
        ),
        None,
    )
    .await;
    assert_eq!(list_response.status(), StatusCode::OK);
    let findings = json_body(list_response).await;
    let findings = findings.as_array().unwrap();
    assert!(!findings.is_empty());

    let s3_finding = findings
        .iter()
        .find(|f| f["control_id"] == "AWS-S3-001")
        .expect("S3 public access control must have produced a finding");
    let finding_id = s3_finding["id"].as_str().unwrap();

    let remediate_response = send(
        &harness.app,
        Method::POST,
        &format!("/api/findings/{finding_id}/remediate"),
        Some(json!({"dryRun": false, "approvedBy": "security-lead"})),
    )
    .await;
    assert_eq!(remediate_response.status(), StatusCode::OK);
    let remediated = json_body(remediate_response).await;
    assert_eq!(remediated["success"], json!(true));
    assert_eq!(remediated["noop"], json!(false));

    let second_remediate = send(
        &harness.app,
        Method::POST,
        &format!("/api/findings/{finding_id}/remediate"),
        Some(json!({"dryRun": false, "approvedBy": "security-lead"})),
    )
    .await;
    assert_eq!(second_remediate.status(), StatusCode::OK);
    let second_remediated = json_body(second_remediate).await;
    assert_eq!(second_remediated["success"], json!(true));
    assert_eq!(second_remediated["noop"], json!(true));

    let rollback_response = send(
        &harness.app,
        Method::POST,
        &format!("/api/findings/{finding_id}/rollback"),
        Some(json!({"actor": "security-lead"})),
    )
    .await;
    assert_eq!(rollback_response.status(), StatusCode::OK);
    let rolled_back = json_body(rollback_response).await;
    assert_eq!(rolled_back["success"], json!(true));

    let score_response = send(
        &harness.app,
        Method::GET,
        &format!("/api/compliance-score?organization_id={}", harness.organization_id),
        None,
    )
    .await;
    assert_eq!(score_response.status(), StatusCode::OK);

    let report_response = send(
        &harness.app,
        Method::POST,
        "/api/reports",
        Some(json!({"organizationId": harness.organization_id, "format": "json"})),
    )
    .await;
    assert_eq!(report_response.status(), StatusCode::OK);
    let report = json_body(report_response).await;
    assert!(report["reportKey"].is_string() || report["report_key"].is_string());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn remediate_rejects_missing_approver_outside_dry_run(pool: PgPool) {
    let harness = bootstrap(&pool).await;

    send(
        &harness.app,
        Method::POST,
        &format!("/api/cloud-accounts/{}/scans", harness.cloud_account_id),
        Some(json!({})),
    )
    .await;

    let list_response = send(
        &harness.app,
        Method::GET,
        &format!(
            "/api/findings?account_id={}&status=FAIL",
            harness.cloud_account_id
        ),
        None,
    )
    .await;
    let findings = json_body(list_response).await;
    let finding_id = findings[0]["id"].as_str().unwrap().to_string();

    let response = send(
        &harness.app,
        Method::POST,
        &format!("/api/findings/{finding_id}/remediate"),
        Some(json!({"dryRun": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
