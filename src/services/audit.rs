use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::tenant::schema_name;

/// An audit log entry to record.
pub struct AuditEntry {
    pub user_id:        Option<Uuid>,
    pub action:         &'static str,
    pub resource_type:  Option<&'static str>,
    pub resource_id:    Option<String>,
    pub resource_label: Option<String>,
}

impl AuditEntry {
    pub fn new(user_id: Uuid, action: &'static str, resource_type: &'static str) -> Self {
        Self {
            user_id: Some(user_id),
            action,
            resource_type: Some(resource_type),
            resource_id: None,
            resource_label: None,
        }
    }

    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.resource_label = Some(label.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id:             Uuid,
    pub user_id:        Option<Uuid>,
    pub action:         String,
    pub resource_type:  Option<String>,
    pub resource_id:    Option<String>,
    pub resource_label: Option<String>,
    pub created_at:     chrono::DateTime<chrono::Utc>,
}

/// Fire-and-forget audit log entry.
/// Spawns a background task; never blocks the request handler and
/// never propagates errors (logs a warning on failure).
pub fn log(pool: PgPool, tenant: &str, entry: AuditEntry) {
    let schema = schema_name(tenant);

    tokio::spawn(async move {
        let res = sqlx::query(&format!(
            "INSERT INTO {schema}.audit_log
                (user_id, action, resource_type, resource_id, resource_label)
             VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.resource_type)
        .bind(entry.resource_id)
        .bind(entry.resource_label)
        .execute(&pool)
        .await;

        if let Err(e) = res {
            tracing::warn!("audit log insert failed for schema {schema}: {e}");
        }
    });
}

pub async fn list(
    pool: &PgPool,
    tenant: &str,
    action_prefix: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<AuditLogRow>, i64), sqlx::Error> {
    let schema = schema_name(tenant);
    let pattern = format!("{}%", action_prefix.unwrap_or(""));

    let rows: Vec<AuditLogRow> = sqlx::query_as(&format!(
        "SELECT id, user_id, action, resource_type, resource_id, resource_label, created_at
         FROM {schema}.audit_log
         WHERE action LIKE $1
         ORDER BY created_at DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(&pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {schema}.audit_log WHERE action LIKE $1"
    ))
    .bind(&pattern)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}
