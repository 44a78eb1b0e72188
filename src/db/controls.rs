use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::catalog::Catalog;

// key: compliance-db -> control-catalog-mirror
//
// Persisted mirror of the in-memory Catalog (see `crate::catalog`), kept so
// catalog entries are queryable the same way Findings and Accounts are.
// The Catalog itself remains the source of truth for execution; this table
// exists for listing/filtering, never for dispatch.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ControlRow {
    pub control_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub severity: String,
    pub frameworks: Value,
    pub provider: String,
    pub can_auto_remediate: bool,
    pub remediation_risk: String,
    pub references: Vec<String>,
    pub is_active: bool,
}

pub async fn list_by_provider(
    pool: &PgPool,
    provider: &str,
) -> Result<Vec<ControlRow>, sqlx::Error> {
    sqlx::query_as::<_, ControlRow>(
        r#"
        SELECT control_id, title, description, category, severity, frameworks,
               provider, can_auto_remediate, remediation_risk, "references", is_active
        FROM controls
        WHERE provider = $1 AND is_active
        ORDER BY control_id
        "#,
    )
    .bind(provider)
    .fetch_all(pool)
    .await
}

/// Mirrors every control in `catalog` into the `controls` table. Run once at
/// startup, after migrations and before the server accepts traffic, so the
/// catalog listing route can query Postgres instead of walking the in-memory
/// registry. The Catalog stays the source of truth for execution; this is a
/// read-side projection of it.
pub async fn sync_catalog(pool: &PgPool, catalog: &Catalog) -> Result<(), sqlx::Error> {
    for control in catalog.all() {
        let descriptor = control.descriptor();
        let frameworks: Value = json!(descriptor
            .frameworks
            .iter()
            .map(|(name, clauses)| (name.to_string(), clauses.to_vec()))
            .collect::<std::collections::HashMap<String, Vec<&'static str>>>());
        upsert(
            pool,
            &ControlRow {
                control_id: descriptor.control_id.to_string(),
                title: descriptor.title.to_string(),
                description: descriptor.description.to_string(),
                category: descriptor.category.to_string(),
                severity: descriptor.severity.as_str().to_string(),
                frameworks,
                provider: descriptor.provider.to_string(),
                can_auto_remediate: descriptor.can_auto_remediate,
                remediation_risk: descriptor.remediation_risk.as_str().to_string(),
                references: descriptor.references.iter().map(|s| s.to_string()).collect(),
                is_active: true,
            },
        )
        .await?;
    }
    Ok(())
}

pub async fn upsert(pool: &PgPool, row: &ControlRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO controls (
            control_id, title, description, category, severity, frameworks,
            provider, can_auto_remediate, remediation_risk, "references", is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (control_id) DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            category = EXCLUDED.category,
            severity = EXCLUDED.severity,
            frameworks = EXCLUDED.frameworks,
            provider = EXCLUDED.provider,
            can_auto_remediate = EXCLUDED.can_auto_remediate,
            remediation_risk = EXCLUDED.remediation_risk,
            "references" = EXCLUDED."references",
            is_active = EXCLUDED.is_active
        "#,
    )
    .bind(&row.control_id)
    .bind(&row.title)
    .bind(&row.description)
    .bind(&row.category)
    .bind(&row.severity)
    .bind(&row.frameworks)
    .bind(&row.provider)
    .bind(row.can_auto_remediate)
    .bind(&row.remediation_risk)
    .bind(&row.references)
    .bind(row.is_active)
    .execute(pool)
    .await?;
    Ok(())
}
