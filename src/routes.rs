//! HTTP surface: thin axum handlers over the engines in `detection`,
//! `remediation`, `db::findings`, and `report`. Handler bodies stay free of
//! business logic — the source crate's `governance::routes` module is the
//! grounding for this shape (`Extension` state, a handler per operation,
//! errors mapped once at the boundary).

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::CATALOG;
use crate::db::audit_logs::{self, AuditLogFilter};
use crate::db::controls;
use crate::db::findings::{self, ListFilter};
use crate::db::organizations;
use crate::detection;
use crate::error::{AppError, AppResult, DomainError};
use crate::evidence::{self, EvidenceStore};
use crate::remediation::{self, RemediateRequest, RollbackRequest};
use crate::report;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/cloud-accounts/:id/scans", post(start_scan))
        .route("/api/controls", get(list_controls))
        .route("/api/compliance-score", get(get_compliance_score))
        .route("/api/findings", get(list_findings))
        .route("/api/findings/:id/remediate", post(remediate_finding))
        .route("/api/findings/:id/rollback", post(rollback_finding))
        .route("/api/reports", post(export_report))
}

#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    #[serde(default)]
    pub control_ids: Option<Vec<String>>,
}

async fn start_scan(
    Extension(pool): Extension<PgPool>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<StartScanRequest>,
) -> AppResult<Json<detection::ScanResult>> {
    let result = detection::start_scan(&pool, &CATALOG, account_id, payload.control_ids).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ListControlsQuery {
    pub provider: String,
}

/// Lists the catalog mirror for a provider, filtered/paged the same way
/// Findings and Accounts are. Backed by the `controls` table populated at
/// startup from the in-memory Catalog, never by the Catalog directly.
async fn list_controls(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<ListControlsQuery>,
) -> AppResult<Json<Vec<controls::ControlRow>>> {
    let rows = controls::list_by_provider(&pool, &query.provider).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ComplianceScoreQuery {
    pub account_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ComplianceScoreResponse {
    pub score: f64,
    pub total: i64,
    pub pass: i64,
    pub fail: i64,
    pub fixed: i64,
    pub by_severity: SeverityBreakdownResponse,
}

#[derive(Debug, Serialize)]
pub struct SeverityBreakdownResponse {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

async fn get_compliance_score(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<ComplianceScoreQuery>,
) -> AppResult<Json<ComplianceScoreResponse>> {
    let score =
        findings::compliance_score(&pool, query.account_id, query.organization_id).await?;
    Ok(Json(ComplianceScoreResponse {
        score: score.score,
        total: score.total,
        pass: score.pass,
        fail: score.fail,
        fixed: score.fixed,
        by_severity: SeverityBreakdownResponse {
            critical: score.by_severity.critical,
            high: score.by_severity.high,
            medium: score.by_severity.medium,
            low: score.by_severity.low,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListFindingsQuery {
    pub account_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub status: Option<String>,
    pub severity: Option<String>,
}

async fn list_findings(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<ListFindingsQuery>,
) -> AppResult<Json<Vec<findings::Finding>>> {
    let rows = findings::list(
        &pool,
        ListFilter {
            cloud_account_id: query.account_id,
            organization_id: query.organization_id,
            status: query.status,
            severity: query.severity,
        },
    )
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct RemediateBody {
    #[serde(default)]
    pub dry_run: bool,
    pub approved_by: Option<String>,
    #[serde(default)]
    pub verify: bool,
}

async fn remediate_finding(
    Extension(pool): Extension<PgPool>,
    Extension(evidence_store): Extension<Arc<dyn EvidenceStore>>,
    Path(finding_id): Path<Uuid>,
    Json(body): Json<RemediateBody>,
) -> AppResult<Json<remediation::RemediateResponse>> {
    let response = remediation::remediate(
        &pool,
        &CATALOG,
        evidence_store.as_ref(),
        RemediateRequest {
            finding_id,
            dry_run: body.dry_run,
            approved_by: body.approved_by,
            verify: body.verify,
        },
    )
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    pub actor: String,
}

async fn rollback_finding(
    Extension(pool): Extension<PgPool>,
    Path(finding_id): Path<Uuid>,
    Json(body): Json<RollbackBody>,
) -> AppResult<Json<remediation::RollbackResponse>> {
    let response = remediation::rollback(
        &pool,
        &CATALOG,
        RollbackRequest {
            finding_id,
            actor: body.actor,
        },
    )
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ExportReportRequest {
    pub organization_id: Uuid,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExportReportResponse {
    pub report_key: Option<String>,
    pub download_url: Option<String>,
    pub format: String,
    pub generated_at: DateTime<Utc>,
    pub totals: report::ReportTotals,
    /// Populated only when the Evidence Store write failed — the report body
    /// inline rather than silently dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_report: Option<serde_json::Value>,
}

async fn export_report(
    Extension(pool): Extension<PgPool>,
    Extension(evidence_store): Extension<Arc<dyn EvidenceStore>>,
    Json(body): Json<ExportReportRequest>,
) -> AppResult<Json<ExportReportResponse>> {
    if !matches!(body.format.as_str(), "pdf" | "json") {
        return Err(AppError::BadRequest(format!(
            "unsupported report format {}",
            body.format
        )));
    }

    let organization = organizations::get_by_id(&pool, body.organization_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("organization not found".to_string()))?;

    let score = findings::compliance_score(&pool, None, Some(body.organization_id)).await?;
    let mut rows = findings::list(
        &pool,
        ListFilter {
            cloud_account_id: None,
            organization_id: Some(body.organization_id),
            status: Some("FAIL".to_string()),
            severity: None,
        },
    )
    .await?;
    if let Some(start) = body.start_date {
        rows.retain(|f| f.detected_at >= start);
    }
    if let Some(end) = body.end_date {
        rows.retain(|f| f.detected_at <= end);
    }

    let audit_event_count = audit_logs::count(
        &pool,
        AuditLogFilter {
            organization_id: Some(body.organization_id),
            event_type: None,
            start: body.start_date,
            end: body.end_date,
            limit: None,
        },
    )
    .await?;

    let generated_at = Utc::now();
    let built = report::build_report(&organization, &score, &rows, generated_at, audit_event_count);

    let (bytes, content_type) = match body.format.as_str() {
        "pdf" => (report::render_pdf(&built), report::content_type_for("pdf")),
        _ => (report::render_json(&built), report::content_type_for("json")),
    };
    let key = evidence::report_key(
        body.organization_id,
        generated_at,
        report::file_extension_for(&body.format),
    );

    match evidence_store.put(&key, content_type, &bytes).await {
        Ok(stored_key) => Ok(Json(ExportReportResponse {
            report_key: Some(stored_key.clone()),
            download_url: Some(evidence_store.signed_url(&stored_key)),
            format: body.format,
            generated_at,
            totals: built.totals,
            inline_report: None,
        })),
        Err(err) => {
            tracing::error!(error = %err, "evidence store unavailable, returning report inline");
            let inline = report::degraded_response(&built);
            Ok(Json(ExportReportResponse {
                report_key: None,
                download_url: None,
                format: body.format,
                generated_at,
                totals: built.totals,
                inline_report: Some(inline),
            }))
        }
    }
}
