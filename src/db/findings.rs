use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

// key: compliance-db -> finding
//
// The central per-(scan, control, resource) record described by the
// Remediation Engine's state machine. `version` backs optimistic
// concurrency for `remediate`/`rollback`, the same pattern the runtime-vm
// remediation run table uses for its `approval_state` transitions.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Finding {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub cloud_account_id: Uuid,
    pub control_id: String,
    pub status: String,
    pub risk_level: Option<String>,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub finding_details: Value,
    pub evidence_before: Option<Value>,
    pub evidence_after: Option<Value>,
    pub evidence_key: Option<String>,
    pub remediation_status: String,
    pub remediation_approved_by: Option<String>,
    pub remediation_executed_at: Option<DateTime<Utc>>,
    pub remediation_details: Value,
    pub rollback_data: Option<Value>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = r#"
    id, scan_id, cloud_account_id, control_id, status, risk_level, resource_id,
    resource_type, finding_details, evidence_before, evidence_after, evidence_key,
    remediation_status, remediation_approved_by, remediation_executed_at,
    remediation_details, rollback_data, detected_at, resolved_at, metadata,
    version, updated_at
"#;

pub struct NewFinding<'a> {
    pub scan_id: Uuid,
    pub cloud_account_id: Uuid,
    pub control_id: &'a str,
    pub status: &'a str,
    pub risk_level: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub resource_type: Option<&'a str>,
    pub finding_details: Value,
    pub evidence_before: Option<Value>,
    pub metadata: Value,
    pub detected_at: DateTime<Utc>,
}

/// Inserts a Finding, enforcing "exactly one Finding row per
/// `(scanId, controlId, resourceId)` triple" at the database level via a
/// unique index; a duplicate is a no-op and the existing row is returned.
pub async fn insert<'c, E>(executor: E, new: NewFinding<'_>) -> Result<Finding, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Finding>(&format!(
        r#"
        INSERT INTO control_results (
            scan_id, cloud_account_id, control_id, status, risk_level, resource_id,
            resource_type, finding_details, evidence_before, remediation_status,
            remediation_details, metadata, detected_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'none', '{{}}'::jsonb, $10, $11)
        ON CONFLICT (scan_id, control_id, resource_id) DO UPDATE SET
            control_id = control_results.control_id
        RETURNING {COLUMNS}
        "#
    ))
    .bind(new.scan_id)
    .bind(new.cloud_account_id)
    .bind(new.control_id)
    .bind(new.status)
    .bind(new.risk_level)
    .bind(new.resource_id)
    .bind(new.resource_type)
    .bind(new.finding_details)
    .bind(new.evidence_before)
    .bind(new.metadata)
    .bind(new.detected_at)
    .fetch_one(executor)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Finding>, sqlx::Error> {
    sqlx::query_as::<_, Finding>(&format!("SELECT {COLUMNS} FROM control_results WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Locks the row for the duration of the enclosing transaction so a
/// concurrent `remediate`/`rollback` on the same Finding blocks rather than
/// racing; the caller still must re-check `status`/`remediation_status`
/// after acquiring the lock.
pub async fn lock_for_transition(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Finding>, sqlx::Error> {
    sqlx::query_as::<_, Finding>(&format!(
        "SELECT {COLUMNS} FROM control_results WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

#[derive(Default)]
pub struct ListFilter {
    pub cloud_account_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub status: Option<String>,
    pub severity: Option<String>,
}

const LIST_COLUMNS: &str = r#"
    cr.id, cr.scan_id, cr.cloud_account_id, cr.control_id, cr.status, cr.risk_level,
    cr.resource_id, cr.resource_type, cr.finding_details, cr.evidence_before,
    cr.evidence_after, cr.evidence_key, cr.remediation_status, cr.remediation_approved_by,
    cr.remediation_executed_at, cr.remediation_details, cr.rollback_data, cr.detected_at,
    cr.resolved_at, cr.metadata, cr.version, cr.updated_at
"#;

pub async fn list(pool: &PgPool, filter: ListFilter) -> Result<Vec<Finding>, sqlx::Error> {
    let mut builder =
        QueryBuilder::new(format!("SELECT {LIST_COLUMNS} FROM control_results cr"));
    if filter.organization_id.is_some() {
        builder.push(" JOIN cloud_accounts ca ON ca.id = cr.cloud_account_id");
    }
    builder.push(" WHERE 1=1");

    if let Some(account_id) = filter.cloud_account_id {
        builder.push(" AND cr.cloud_account_id = ");
        builder.push_bind(account_id);
    }
    if let Some(org_id) = filter.organization_id {
        builder.push(" AND ca.organization_id = ");
        builder.push_bind(org_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND cr.status = ");
        builder.push_bind(status);
    }
    if let Some(severity) = filter.severity {
        builder.push(" AND cr.risk_level = ");
        builder.push_bind(severity);
    }
    builder.push(" ORDER BY cr.detected_at DESC");

    builder.build_query_as::<Finding>().fetch_all(pool).await
}

pub struct RemediationSuccess<'a> {
    pub id: Uuid,
    pub expected_version: i64,
    pub approved_by: &'a str,
    pub evidence_after: Value,
    pub rollback_data: Value,
    pub evidence_key: Option<&'a str>,
}

/// CAS transition `FAIL|ERROR -> FIXED`. Returns `None` if the version
/// didn't match (lost the race) or the row wasn't in a legal source state.
pub async fn finalize_remediation_success(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    update: RemediationSuccess<'_>,
) -> Result<Option<Finding>, sqlx::Error> {
    sqlx::query_as::<_, Finding>(&format!(
        r#"
        UPDATE control_results
        SET status = 'FIXED',
            remediation_status = 'executed',
            remediation_approved_by = $3,
            remediation_executed_at = NOW(),
            evidence_after = $4,
            rollback_data = $5,
            evidence_key = COALESCE($6, evidence_key),
            resolved_at = NOW(),
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1
          AND version = $2
          AND status IN ('FAIL', 'ERROR')
          AND remediation_status NOT IN ('pending', 'executed')
        RETURNING {COLUMNS}
        "#
    ))
    .bind(update.id)
    .bind(update.expected_version)
    .bind(update.approved_by)
    .bind(update.evidence_after)
    .bind(update.rollback_data)
    .bind(update.evidence_key)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn finalize_remediation_failure(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: Uuid,
    expected_version: i64,
    error: &str,
) -> Result<Option<Finding>, sqlx::Error> {
    sqlx::query_as::<_, Finding>(&format!(
        r#"
        UPDATE control_results
        SET remediation_status = 'failed',
            remediation_details = remediation_details || jsonb_build_object('error', $3::text),
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1 AND version = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected_version)
    .bind(error)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn finalize_rollback_success(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: Uuid,
    expected_version: i64,
    actor: &str,
) -> Result<Option<Finding>, sqlx::Error> {
    sqlx::query_as::<_, Finding>(&format!(
        r#"
        UPDATE control_results
        SET status = 'FAIL',
            remediation_status = 'rolledBack',
            remediation_details = remediation_details
                || jsonb_build_object('rolledBackAt', NOW(), 'rolledBackBy', $3::text),
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1
          AND version = $2
          AND status = 'FIXED'
          AND rollback_data IS NOT NULL
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected_version)
    .bind(actor)
    .fetch_optional(&mut **tx)
    .await
}

pub struct SeverityBreakdown {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

pub struct ComplianceScore {
    pub score: f64,
    pub total: i64,
    pub pass: i64,
    pub fail: i64,
    pub fixed: i64,
    pub by_severity: SeverityBreakdown,
}

/// `score = (PASS + FIXED) / (PASS + FAIL + FIXED)`; ERROR and MANUAL are
/// excluded from the denominator entirely.
pub async fn compliance_score(
    pool: &PgPool,
    cloud_account_id: Option<Uuid>,
    organization_id: Option<Uuid>,
) -> Result<ComplianceScore, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT cr.status, cr.risk_level, COUNT(*) as cnt FROM control_results cr",
    );
    if organization_id.is_some() {
        builder.push(" JOIN cloud_accounts ca ON ca.id = cr.cloud_account_id");
    }
    builder.push(" WHERE 1=1");
    if let Some(account_id) = cloud_account_id {
        builder.push(" AND cr.cloud_account_id = ");
        builder.push_bind(account_id);
    }
    if let Some(org_id) = organization_id {
        builder.push(" AND ca.organization_id = ");
        builder.push_bind(org_id);
    }
    builder.push(" GROUP BY cr.status, cr.risk_level");

    #[derive(sqlx::FromRow)]
    struct Row {
        status: String,
        risk_level: Option<String>,
        cnt: i64,
    }

    let rows = builder.build_query_as::<Row>().fetch_all(pool).await?;

    let mut pass = 0i64;
    let mut fail = 0i64;
    let mut fixed = 0i64;
    let mut by = SeverityBreakdown {
        critical: 0,
        high: 0,
        medium: 0,
        low: 0,
    };

    for row in &rows {
        match row.status.as_str() {
            "PASS" => pass += row.cnt,
            "FAIL" => {
                fail += row.cnt;
                match row.risk_level.as_deref() {
                    Some("critical") => by.critical += row.cnt,
                    Some("high") => by.high += row.cnt,
                    Some("medium") => by.medium += row.cnt,
                    Some("low") => by.low += row.cnt,
                    _ => {}
                }
            }
            "FIXED" => fixed += row.cnt,
            _ => {}
        }
    }

    let total = pass + fail + fixed;
    let score = if total == 0 {
        1.0
    } else {
        (pass + fixed) as f64 / total as f64
    };

    Ok(ComplianceScore {
        score,
        total,
        pass,
        fail,
        fixed,
        by_severity: by,
    })
}
