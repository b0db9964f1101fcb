use std::collections::HashSet;

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::grading::{
        Assessment, AssessmentQuery, CreateAssessmentRequest, Grade, GradeInput,
        UpdateAssessmentRequest,
    },
};

pub struct GradingService;

impl GradingService {
    pub async fn list(
        pool: &PgPool,
        tenant: &str,
        q: &AssessmentQuery,
    ) -> ServiceResult<Vec<Assessment>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {schema}.assessments WHERE TRUE"));
        if let Some(class) = &q.class_name {
            qb.push(" AND class_name = ").push_bind(class);
        }
        if let Some(subject_id) = q.subject_id {
            qb.push(" AND subject_id = ").push_bind(subject_id);
        }
        if let Some(from) = q.from {
            qb.push(" AND assessment_date >= ").push_bind(from);
        }
        if let Some(to) = q.to {
            qb.push(" AND assessment_date <= ").push_bind(to);
        }
        qb.push(" ORDER BY assessment_date DESC, title");

        let rows = qb.build_query_as::<Assessment>().fetch_all(pool).await?;
        Ok(rows)
    }

    pub async fn get(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<Assessment> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, Assessment>(&format!(
            "SELECT * FROM {schema}.assessments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("assessment"))
    }

    pub async fn create(
        pool: &PgPool,
        tenant: &str,
        req: &CreateAssessmentRequest,
    ) -> ServiceResult<Assessment> {
        if req.title.trim().is_empty() || req.class_name.trim().is_empty() {
            return Err(ServiceError::validation("title and class_name are required"));
        }
        check_positive("max_score", req.max_score)?;
        let weight = req.weight.unwrap_or(1.0);
        check_positive("weight", weight)?;

        let schema = schema_name(tenant);
        let assessment = sqlx::query_as::<_, Assessment>(&format!(
            "INSERT INTO {schema}.assessments
                (title, subject_id, class_name, assessment_date, max_score, weight)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *"
        ))
        .bind(req.title.trim())
        .bind(req.subject_id)
        .bind(req.class_name.trim())
        .bind(req.assessment_date)
        .bind(req.max_score)
        .bind(weight)
        .fetch_one(pool)
        .await?;
        Ok(assessment)
    }

    pub async fn update(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateAssessmentRequest,
    ) -> ServiceResult<Assessment> {
        if let Some(weight) = req.weight {
            check_positive("weight", weight)?;
        }
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        if let Some(max) = req.max_score {
            check_positive("max_score", max)?;
            // Existing grades must still fit under the new maximum.
            let highest: Option<f64> = sqlx::query_scalar(&format!(
                "SELECT MAX(score) FROM {schema}.grades WHERE assessment_id = $1"
            ))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if highest.is_some_and(|h| h > max) {
                return Err(ServiceError::conflict(
                    "max_score is below an existing grade",
                ));
            }
        }

        let assessment = sqlx::query_as::<_, Assessment>(&format!(
            "UPDATE {schema}.assessments
             SET title           = COALESCE($1, title),
                 subject_id      = COALESCE($2, subject_id),
                 class_name      = COALESCE($3, class_name),
                 assessment_date = COALESCE($4, assessment_date),
                 max_score       = COALESCE($5, max_score),
                 weight          = COALESCE($6, weight)
             WHERE id = $7
             RETURNING *"
        ))
        .bind(&req.title)
        .bind(req.subject_id)
        .bind(&req.class_name)
        .bind(req.assessment_date)
        .bind(req.max_score)
        .bind(req.weight)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("assessment"))?;

        tx.commit().await?;
        Ok(assessment)
    }

    pub async fn delete(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!("DELETE FROM {schema}.assessments WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("assessment"));
        }
        Ok(())
    }

    /// Replace every grade of an assessment and refresh its aggregates.
    pub async fn save_grades(
        pool: &PgPool,
        tenant: &str,
        assessment_id: Uuid,
        grades: &[GradeInput],
    ) -> ServiceResult<Assessment> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        // Row lock serialises concurrent grade saves for one assessment.
        let max_score: f64 = sqlx::query_scalar(&format!(
            "SELECT max_score FROM {schema}.assessments WHERE id = $1 FOR UPDATE"
        ))
        .bind(assessment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("assessment"))?;

        validate_grades(grades, max_score)?;

        sqlx::query(&format!("DELETE FROM {schema}.grades WHERE assessment_id = $1"))
            .bind(assessment_id)
            .execute(&mut *tx)
            .await?;

        for g in grades {
            sqlx::query(&format!(
                "INSERT INTO {schema}.grades (assessment_id, student_id, score, remarks)
                 VALUES ($1, $2, $3, $4)"
            ))
            .bind(assessment_id)
            .bind(g.student_id)
            .bind(g.score)
            .bind(&g.remarks)
            .execute(&mut *tx)
            .await?;
        }

        let assessment = sqlx::query_as::<_, Assessment>(&format!(
            "UPDATE {schema}.assessments a
             SET graded_count  = g.cnt,
                 average_score = g.avg
             FROM (SELECT COUNT(*)::INT AS cnt, AVG(score) AS avg
                   FROM {schema}.grades WHERE assessment_id = $1) g
             WHERE a.id = $1
             RETURNING a.*"
        ))
        .bind(assessment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(assessment)
    }

    pub async fn list_grades(
        pool: &PgPool,
        tenant: &str,
        assessment_id: Uuid,
    ) -> ServiceResult<Vec<Grade>> {
        Self::get(pool, tenant, assessment_id).await?;
        let schema = schema_name(tenant);
        let grades = sqlx::query_as::<_, Grade>(&format!(
            "SELECT g.* FROM {schema}.grades g
             JOIN {schema}.students s ON s.id = g.student_id
             WHERE g.assessment_id = $1
             ORDER BY s.last_name, s.first_name"
        ))
        .bind(assessment_id)
        .fetch_all(pool)
        .await?;
        Ok(grades)
    }
}

fn check_positive(field: &str, value: f64) -> ServiceResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ServiceError::validation(format!("{field} must be greater than 0")));
    }
    Ok(())
}

/// Every score within `0..=max_score`, one grade per student.
fn validate_grades(grades: &[GradeInput], max_score: f64) -> ServiceResult<()> {
    let mut seen = HashSet::new();
    for g in grades {
        if !g.score.is_finite() || g.score < 0.0 || g.score > max_score {
            return Err(ServiceError::validation(format!(
                "score {} for student {} is outside 0..={max_score}",
                g.score, g.student_id
            )));
        }
        if !seen.insert(g.student_id) {
            return Err(ServiceError::validation(format!(
                "student {} is graded more than once",
                g.student_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(score: f64) -> GradeInput {
        GradeInput { student_id: Uuid::new_v4(), score, remarks: None }
    }

    #[test]
    fn scores_must_lie_within_max() {
        assert!(validate_grades(&[grade(0.0), grade(50.0)], 50.0).is_ok());
        assert!(validate_grades(&[grade(50.5)], 50.0).is_err());
        assert!(validate_grades(&[grade(-1.0)], 50.0).is_err());
        assert!(validate_grades(&[grade(f64::NAN)], 50.0).is_err());
    }

    #[test]
    fn student_cannot_be_graded_twice() {
        let g = grade(10.0);
        let dup = GradeInput { student_id: g.student_id, score: 12.0, remarks: None };
        assert!(validate_grades(&[g, dup], 20.0).is_err());
    }

    #[test]
    fn non_positive_max_score_is_rejected() {
        assert!(check_positive("max_score", 0.0).is_err());
        assert!(check_positive("max_score", 100.0).is_ok());
    }
}
