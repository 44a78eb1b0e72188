//! Detection Engine: orchestrates a scan — selects controls, fans them out
//! over a bounded worker pool, persists Findings, and emits audit events.
//! The fan-out/bounded-concurrency shape is grounded in the source crate's
//! job queue and the remediation worker's `tokio::select!`-based timeout
//! handling; the "one Finding per (scan, control, resource)" constraint is
//! enforced by `db::findings::insert`'s unique-index upsert.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::adapter::{CloudAdapter, InMemoryCloudAdapter};
use crate::catalog::{Catalog, Control, FindingSeed};
use crate::config::{
    CONTROL_TIMEOUT_SECS, GLOBAL_SCAN_CONCURRENCY, SCAN_CONCURRENCY, SCAN_TIMEOUT_SECS,
};
use crate::db::{audit_logs, cloud_accounts, findings};
use crate::error::DomainError;

/// Process-wide cap on scans running concurrently across all accounts.
/// Distinct from the per-scan `Semaphore` in `run_scan_body`, which bounds
/// control fan-out within a single scan.
static GLOBAL_SCAN_SEMAPHORE: Lazy<Semaphore> =
    Lazy::new(|| Semaphore::new(*GLOBAL_SCAN_CONCURRENCY));

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub total: i64,
    pub pass: i64,
    pub fail: i64,
    pub error: i64,
    pub total_findings: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub summary: ScanSummary,
    pub started_at: chrono::DateTime<Utc>,
    pub completed_at: chrono::DateTime<Utc>,
}

enum ControlOutcome {
    Pass,
    Fail(Vec<FindingSeed>),
    Error(String),
}

async fn run_control(
    control: Arc<dyn Control>,
    adapter: Arc<dyn CloudAdapter>,
) -> ControlOutcome {
    let timeout = std::time::Duration::from_secs(*CONTROL_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, control.detect(adapter.as_ref())).await {
        Ok(Ok(seeds)) if seeds.is_empty() => ControlOutcome::Pass,
        Ok(Ok(seeds)) => ControlOutcome::Fail(seeds),
        Ok(Err(err)) => ControlOutcome::Error(err.to_string()),
        Err(_) => ControlOutcome::Error(format!(
            "control detection exceeded {}s timeout",
            *CONTROL_TIMEOUT_SECS
        )),
    }
}

/// Runs a scan against `cloud_account_id`. `control_ids` narrows the
/// provider's catalog; `None`/empty means "all registered controls for this
/// provider". The Cloud Adapter used for this scan is constructed fresh and
/// dropped at the end — never shared across scans.
pub async fn start_scan(
    pool: &PgPool,
    catalog: &Catalog,
    cloud_account_id: Uuid,
    control_ids: Option<Vec<String>>,
) -> Result<ScanResult, DomainError> {
    let scan_id = Uuid::new_v4();
    let started_at = Utc::now();
    let start_instant = Instant::now();

    // Block until a global scan slot is free; held for the entire scan so at
    // most GLOBAL_SCAN_CONCURRENCY scans run across all accounts at once.
    let _global_permit = GLOBAL_SCAN_SEMAPHORE
        .acquire()
        .await
        .expect("global scan semaphore not closed");

    let account = cloud_accounts::begin_scan(pool, cloud_account_id)
        .await?
        .ok_or_else(|| {
            DomainError::ConflictState(
                "a scan is already in progress for this cloud account".to_string(),
            )
        })?;

    let scan_timeout = std::time::Duration::from_secs(*SCAN_TIMEOUT_SECS);
    let outcome = tokio::time::timeout(
        scan_timeout,
        run_scan_body(pool, catalog, &account, scan_id, control_ids, started_at),
    )
    .await;

    let summary = match outcome {
        Ok(Ok(summary)) => {
            cloud_accounts::complete_scan(pool, cloud_account_id, "success").await?;
            record_scan_audit(pool, &account, scan_id, &summary, "success", None, start_instant)
                .await?;
            summary
        }
        Ok(Err(err)) => {
            cloud_accounts::complete_scan(pool, cloud_account_id, "failed").await?;
            let empty = ScanSummary {
                total: 0,
                pass: 0,
                fail: 0,
                error: 0,
                total_findings: 0,
            };
            record_scan_audit(
                pool,
                &account,
                scan_id,
                &empty,
                "failure",
                Some(err.to_string()),
                start_instant,
            )
            .await?;
            return Err(err);
        }
        Err(_) => {
            cloud_accounts::complete_scan(pool, cloud_account_id, "failed").await?;
            let empty = ScanSummary {
                total: 0,
                pass: 0,
                fail: 0,
                error: 0,
                total_findings: 0,
            };
            record_scan_audit(
                pool,
                &account,
                scan_id,
                &empty,
                "failure",
                Some("scan exceeded overall timeout".to_string()),
                start_instant,
            )
            .await?;
            return Err(DomainError::Internal("scan exceeded overall timeout".to_string()));
        }
    };

    Ok(ScanResult {
        scan_id,
        summary,
        started_at,
        completed_at: Utc::now(),
    })
}

async fn run_scan_body(
    pool: &PgPool,
    catalog: &Catalog,
    account: &crate::db::CloudAccount,
    scan_id: Uuid,
    control_ids: Option<Vec<String>>,
    detected_at: chrono::DateTime<Utc>,
) -> Result<ScanSummary, DomainError> {
    let adapter: Arc<dyn CloudAdapter> = Arc::new(InMemoryCloudAdapter::with_sample_fixture());

    let controls = catalog.by_provider_filtered(&account.provider, control_ids.as_deref());
    if controls.is_empty() {
        return Err(DomainError::Validation(format!(
            "no controls registered for provider {}",
            account.provider
        )));
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(*SCAN_CONCURRENCY));
    let mut handles = Vec::with_capacity(controls.len());
    for control in controls {
        let semaphore = semaphore.clone();
        let adapter = adapter.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let control_id = control.descriptor().control_id;
            let outcome = run_control(control, adapter).await;
            (control_id, outcome)
        }));
    }

    let mut pass = 0i64;
    let mut fail = 0i64;
    let mut error = 0i64;
    let mut total_findings = 0i64;
    let total = handles.len() as i64;

    for handle in handles {
        let (control_id, outcome) = handle
            .await
            .map_err(|err| DomainError::Internal(format!("control task panicked: {err}")))?;

        let mut tx = pool.begin().await?;
        match outcome {
            ControlOutcome::Pass => {
                pass += 1;
                let finding = findings::insert(
                    &mut *tx,
                    findings::NewFinding {
                        scan_id,
                        cloud_account_id: account.id,
                        control_id,
                        status: "PASS",
                        risk_level: None,
                        resource_id: None,
                        resource_type: None,
                        finding_details: json!({}),
                        evidence_before: None,
                        metadata: json!({}),
                        detected_at,
                    },
                )
                .await?;
                total_findings += 1;
                emit_detection_audit(&mut tx, account, &finding, "success").await?;
            }
            ControlOutcome::Fail(seeds) => {
                for seed in seeds {
                    fail += 1;
                    let descriptor = catalog
                        .get(control_id)
                        .expect("control_id came from this catalog")
                        .descriptor()
                        .clone();
                    let finding = findings::insert(
                        &mut *tx,
                        findings::NewFinding {
                            scan_id,
                            cloud_account_id: account.id,
                            control_id,
                            status: "FAIL",
                            risk_level: Some(descriptor.severity.as_str()),
                            resource_id: seed.resource_id.as_deref(),
                            resource_type: seed.resource_type.as_deref(),
                            finding_details: seed.finding_details,
                            evidence_before: seed.evidence_before,
                            metadata: json!({
                                "control_title": descriptor.title,
                                "control_description": descriptor.description,
                                "category": descriptor.category,
                            }),
                            detected_at,
                        },
                    )
                    .await?;
                    total_findings += 1;
                    emit_detection_audit(&mut tx, account, &finding, "success").await?;
                }
            }
            ControlOutcome::Error(message) => {
                error += 1;
                let finding = findings::insert(
                    &mut *tx,
                    findings::NewFinding {
                        scan_id,
                        cloud_account_id: account.id,
                        control_id,
                        status: "ERROR",
                        risk_level: None,
                        resource_id: None,
                        resource_type: None,
                        finding_details: json!({"error": message}),
                        evidence_before: None,
                        metadata: json!({}),
                        detected_at,
                    },
                )
                .await?;
                total_findings += 1;
                emit_detection_audit(&mut tx, account, &finding, "failure").await?;
            }
        }
        tx.commit().await?;
    }

    Ok(ScanSummary {
        total,
        pass,
        fail,
        error,
        total_findings,
    })
}

async fn emit_detection_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account: &crate::db::CloudAccount,
    finding: &findings::Finding,
    outcome: &str,
) -> Result<(), DomainError> {
    audit_logs::append(
        tx,
        &crate::config::AUDIT_CHAIN_KEY,
        audit_logs::NewAuditLog {
            event_type: "detection",
            action: "control evaluated",
            actor: "system",
            organization_id: account.organization_id,
            cloud_account_id: Some(account.id),
            control_id: Some(&finding.control_id),
            resource_id: finding.resource_id.as_deref(),
            control_result_id: Some(finding.id),
            event_data: json!({"status": finding.status}),
            before_state: None,
            after_state: None,
            ip_address: None,
            user_agent: None,
            outcome,
            error_message: finding.finding_details.get("error").and_then(|v| v.as_str()),
        },
    )
    .await?;
    Ok(())
}

async fn record_scan_audit(
    pool: &PgPool,
    account: &crate::db::CloudAccount,
    scan_id: Uuid,
    summary: &ScanSummary,
    outcome: &str,
    error_message: Option<String>,
    start_instant: Instant,
) -> Result<(), DomainError> {
    let mut tx = pool.begin().await?;
    audit_logs::append(
        &mut tx,
        &crate::config::AUDIT_CHAIN_KEY,
        audit_logs::NewAuditLog {
            event_type: "scan",
            action: "scan completed",
            actor: "system",
            organization_id: account.organization_id,
            cloud_account_id: Some(account.id),
            control_id: None,
            resource_id: None,
            control_result_id: None,
            event_data: json!({
                "scan_id": scan_id,
                "summary": summary,
                "duration_ms": start_instant.elapsed().as_millis() as i64,
            }),
            before_state: None,
            after_state: None,
            ip_address: None,
            user_agent: None,
            outcome,
            error_message: error_message.as_deref(),
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
