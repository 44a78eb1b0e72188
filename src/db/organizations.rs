use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

// key: compliance-db -> organization
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub compliance_frameworks: Vec<String>,
    pub contact_email: String,
    pub industry: Option<String>,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(
        r#"
        SELECT id, name, compliance_frameworks, contact_email, industry, settings, created_at
        FROM organizations
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
