use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

// key: compliance-db -> audit-log
//
// Append-only, hash-chained event sink. Rows are never updated or deleted;
// a "correction" is a new compensating entry, same discipline the
// provider-key audit log follows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub action: String,
    pub actor: String,
    pub organization_id: Uuid,
    pub cloud_account_id: Option<Uuid>,
    pub control_id: Option<String>,
    pub resource_id: Option<String>,
    pub control_result_id: Option<Uuid>,
    pub event_data: Value,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: String,
    pub error_message: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

const SEED_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub struct NewAuditLog<'a> {
    pub event_type: &'a str,
    pub action: &'a str,
    pub actor: &'a str,
    pub organization_id: Uuid,
    pub cloud_account_id: Option<Uuid>,
    pub control_id: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub control_result_id: Option<Uuid>,
    pub event_data: Value,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub outcome: &'a str,
    pub error_message: Option<&'a str>,
}

/// Deterministically serializes the fields that participate in the hash so
/// the same logical entry always canonicalizes identically, regardless of
/// any `HashMap` iteration order upstream.
fn canonical_encoding(prev_hash: &str, timestamp: DateTime<Utc>, new: &NewAuditLog<'_>) -> String {
    let mut buf = String::new();
    buf.push_str(prev_hash);
    buf.push('|');
    buf.push_str(&timestamp.to_rfc3339());
    buf.push('|');
    buf.push_str(new.event_type);
    buf.push('|');
    buf.push_str(new.action);
    buf.push('|');
    buf.push_str(new.actor);
    buf.push('|');
    buf.push_str(&new.organization_id.to_string());
    buf.push('|');
    buf.push_str(&new.cloud_account_id.map(|v| v.to_string()).unwrap_or_default());
    buf.push('|');
    buf.push_str(new.control_id.unwrap_or_default());
    buf.push('|');
    buf.push_str(new.resource_id.unwrap_or_default());
    buf.push('|');
    buf.push_str(
        &new.control_result_id
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    buf.push('|');
    buf.push_str(&new.event_data.to_string());
    buf.push('|');
    buf.push_str(
        &new.before_state
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    buf.push('|');
    buf.push_str(
        &new.after_state
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    buf.push('|');
    buf.push_str(new.outcome);
    buf.push('|');
    buf.push_str(new.error_message.unwrap_or_default());
    buf
}

pub fn compute_hash(chain_key: &str, prev_hash: &str, timestamp: DateTime<Utc>, new: &NewAuditLog<'_>) -> String {
    let encoded = canonical_encoding(prev_hash, timestamp, new);
    let mut mac =
        Hmac::<Sha256>::new_from_slice(chain_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(encoded.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

async fn latest_hash_for_org<'c, E>(executor: E, organization_id: Uuid) -> Result<String, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT hash FROM audit_logs
        WHERE organization_id = $1
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(h,)| h).unwrap_or_else(|| SEED_HASH.to_string()))
}

/// Appends one entry, chaining it off the latest entry for the same
/// organization. Must run inside the same transaction as the domain write
/// it documents so both commit or neither does.
pub async fn append(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    chain_key: &str,
    new: NewAuditLog<'_>,
) -> Result<AuditLog, sqlx::Error> {
    let prev_hash = latest_hash_for_org(&mut **tx, new.organization_id).await?;
    let timestamp = Utc::now();
    let hash = compute_hash(chain_key, &prev_hash, timestamp, &new);

    sqlx::query_as::<_, AuditLog>(
        r#"
        INSERT INTO audit_logs (
            timestamp, event_type, action, actor, organization_id, cloud_account_id,
            control_id, resource_id, control_result_id, event_data, before_state,
            after_state, ip_address, user_agent, outcome, error_message, prev_hash, hash
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING
            id, timestamp, event_type, action, actor, organization_id, cloud_account_id,
            control_id, resource_id, control_result_id, event_data, before_state,
            after_state, ip_address, user_agent, outcome, error_message, prev_hash, hash
        "#,
    )
    .bind(timestamp)
    .bind(new.event_type)
    .bind(new.action)
    .bind(new.actor)
    .bind(new.organization_id)
    .bind(new.cloud_account_id)
    .bind(new.control_id)
    .bind(new.resource_id)
    .bind(new.control_result_id)
    .bind(&new.event_data)
    .bind(&new.before_state)
    .bind(&new.after_state)
    .bind(new.ip_address)
    .bind(new.user_agent)
    .bind(new.outcome)
    .bind(new.error_message)
    .bind(&prev_hash)
    .bind(&hash)
    .fetch_one(&mut **tx)
    .await
}

#[derive(Clone, Default)]
pub struct AuditLogFilter {
    pub organization_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn query(pool: &PgPool, filter: AuditLogFilter) -> Result<Vec<AuditLog>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT id, timestamp, event_type, action, actor, organization_id, cloud_account_id,
               control_id, resource_id, control_result_id, event_data, before_state,
               after_state, ip_address, user_agent, outcome, error_message, prev_hash, hash
        FROM audit_logs
        WHERE 1=1
        "#,
    );
    if let Some(org_id) = filter.organization_id {
        builder.push(" AND organization_id = ");
        builder.push_bind(org_id);
    }
    if let Some(event_type) = filter.event_type {
        builder.push(" AND event_type = ");
        builder.push_bind(event_type);
    }
    if let Some(start) = filter.start {
        builder.push(" AND timestamp >= ");
        builder.push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND timestamp <= ");
        builder.push_bind(end);
    }
    builder.push(" ORDER BY timestamp ASC, id ASC");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }

    builder.build_query_as::<AuditLog>().fetch_all(pool).await
}

/// Counts entries matching the same filters `query` accepts, without
/// materializing the rows — used by the Report Builder for the report's
/// audit event count.
pub async fn count(pool: &PgPool, filter: AuditLogFilter) -> Result<i64, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
    if let Some(org_id) = filter.organization_id {
        builder.push(" AND organization_id = ");
        builder.push_bind(org_id);
    }
    if let Some(event_type) = filter.event_type {
        builder.push(" AND event_type = ");
        builder.push_bind(event_type);
    }
    if let Some(start) = filter.start {
        builder.push(" AND timestamp >= ");
        builder.push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND timestamp <= ");
        builder.push_bind(end);
    }
    let (count,): (i64,) = builder.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

/// Replays the chain for one organization and confirms every stored `hash`
/// is reproduced from `(prevHash, fields)` — the property test for
/// tamper-evidence.
pub fn verify_chain(chain_key: &str, entries: &[AuditLog]) -> Result<(), String> {
    let mut expected_prev = SEED_HASH.to_string();
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return Err(format!(
                "audit log {} has prev_hash {} but chain expected {}",
                entry.id, entry.prev_hash, expected_prev
            ));
        }
        let new = NewAuditLog {
            event_type: &entry.event_type,
            action: &entry.action,
            actor: &entry.actor,
            organization_id: entry.organization_id,
            cloud_account_id: entry.cloud_account_id,
            control_id: entry.control_id.as_deref(),
            resource_id: entry.resource_id.as_deref(),
            control_result_id: entry.control_result_id,
            event_data: entry.event_data.clone(),
            before_state: entry.before_state.clone(),
            after_state: entry.after_state.clone(),
            ip_address: entry.ip_address.as_deref(),
            user_agent: entry.user_agent.as_deref(),
            outcome: &entry.outcome,
            error_message: entry.error_message.as_deref(),
        };
        let recomputed = compute_hash(chain_key, &entry.prev_hash, entry.timestamp, &new);
        if recomputed != entry.hash {
            return Err(format!("audit log {} hash mismatch", entry.id));
        }
        expected_prev = entry.hash.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(organization_id: Uuid) -> NewAuditLog<'static> {
        NewAuditLog {
            event_type: "detection",
            action: "control evaluated",
            actor: "system",
            organization_id,
            cloud_account_id: None,
            control_id: Some("AWS-S3-001"),
            resource_id: None,
            control_result_id: None,
            event_data: serde_json::json!({"k": "v"}),
            before_state: None,
            after_state: None,
            ip_address: None,
            user_agent: None,
            outcome: "success",
            error_message: None,
        }
    }

    #[test]
    fn canonical_encoding_is_deterministic() {
        let org = Uuid::nil();
        let a = sample(org);
        let b = sample(org);
        let ts = Utc::now();
        assert_eq!(
            canonical_encoding(SEED_HASH, ts, &a),
            canonical_encoding(SEED_HASH, ts, &b)
        );
    }

    #[test]
    fn hash_changes_if_prev_hash_changes() {
        let org = Uuid::nil();
        let ts = Utc::now();
        let new = sample(org);
        let h1 = compute_hash("key", SEED_HASH, ts, &new);
        let h2 = compute_hash("key", "different-prev", ts, &new);
        assert_ne!(h1, h2);
    }

    #[test]
    fn verify_chain_detects_tampering() {
        let org = Uuid::new_v4();
        let new = sample(org);
        let ts = Utc::now();
        let hash = compute_hash("key", SEED_HASH, ts, &new);
        let mut entry = AuditLog {
            id: 1,
            timestamp: ts,
            event_type: new.event_type.to_string(),
            action: new.action.to_string(),
            actor: new.actor.to_string(),
            organization_id: org,
            cloud_account_id: None,
            control_id: new.control_id.map(str::to_string),
            resource_id: None,
            control_result_id: None,
            event_data: new.event_data.clone(),
            before_state: None,
            after_state: None,
            ip_address: None,
            user_agent: None,
            outcome: new.outcome.to_string(),
            error_message: None,
            prev_hash: SEED_HASH.to_string(),
            hash,
        };
        assert!(verify_chain("key", std::slice::from_ref(&entry)).is_ok());

        entry.action = "tampered".to_string();
        assert!(verify_chain("key", std::slice::from_ref(&entry)).is_err());
    }
}
