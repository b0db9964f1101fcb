use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::subject::{CreateSubjectRequest, Subject, UpdateSubjectRequest},
};

pub struct SubjectService;

impl SubjectService {
    pub async fn list(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<Subject>> {
        let schema = schema_name(tenant);
        let subjects = sqlx::query_as::<_, Subject>(&format!(
            "SELECT * FROM {schema}.subjects ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;
        Ok(subjects)
    }

    pub async fn create(
        pool: &PgPool,
        tenant: &str,
        req: &CreateSubjectRequest,
    ) -> ServiceResult<Subject> {
        if req.name.trim().is_empty() || req.code.trim().is_empty() {
            return Err(ServiceError::validation("name and code are required"));
        }
        check_fee(req.monthly_fee_cents)?;

        let schema = schema_name(tenant);
        let subject = sqlx::query_as::<_, Subject>(&format!(
            "INSERT INTO {schema}.subjects (name, code, monthly_fee_cents, description)
             VALUES ($1, UPPER($2), $3, $4)
             RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(req.code.trim())
        .bind(req.monthly_fee_cents)
        .bind(&req.description)
        .fetch_one(pool)
        .await?;
        Ok(subject)
    }

    pub async fn update(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateSubjectRequest,
    ) -> ServiceResult<Subject> {
        if let Some(fee) = req.monthly_fee_cents {
            check_fee(fee)?;
        }
        let schema = schema_name(tenant);
        sqlx::query_as::<_, Subject>(&format!(
            "UPDATE {schema}.subjects
             SET name              = COALESCE($1, name),
                 code              = COALESCE(UPPER($2), code),
                 monthly_fee_cents = COALESCE($3, monthly_fee_cents),
                 description       = COALESCE($4, description)
             WHERE id = $5
             RETURNING *"
        ))
        .bind(&req.name)
        .bind(&req.code)
        .bind(req.monthly_fee_cents)
        .bind(&req.description)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("subject"))
    }

    pub async fn delete(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!("DELETE FROM {schema}.subjects WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("subject"));
        }
        Ok(())
    }
}

fn check_fee(cents: i64) -> ServiceResult<()> {
    if cents < 0 {
        return Err(ServiceError::validation("monthly_fee_cents must not be negative"));
    }
    Ok(())
}
