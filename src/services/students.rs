use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::{
        student::{
            CreateStudentRequest, ImportRowError, ImportSummary, Student, StudentBalance,
            StudentImportRow, StudentQuery, UpdateStudentRequest,
        },
        subject::Subject,
    },
};

pub struct StudentService;

impl StudentService {
    pub async fn list(
        pool: &PgPool,
        tenant: &str,
        q: &StudentQuery,
    ) -> ServiceResult<Vec<Student>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {schema}.students WHERE TRUE"));

        if let Some(grade) = &q.grade_level {
            qb.push(" AND grade_level = ").push_bind(grade);
        }
        if let Some(class) = &q.class_name {
            qb.push(" AND class_name = ").push_bind(class);
        }
        qb.push(" AND is_active = ").push_bind(q.active.unwrap_or(true));
        if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{search}%");
            qb.push(" AND (first_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR last_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR admission_no ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY last_name, first_name LIMIT ")
            .push_bind(q.per_page())
            .push(" OFFSET ")
            .push_bind(q.offset());

        let students = qb.build_query_as::<Student>().fetch_all(pool).await?;
        Ok(students)
    }

    pub async fn get(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<Student> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, Student>(&format!("SELECT * FROM {schema}.students WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::NotFound("student"))
    }

    pub async fn create(
        pool: &PgPool,
        tenant: &str,
        req: &CreateStudentRequest,
    ) -> ServiceResult<Student> {
        validate_names(&req.admission_no, &req.first_name, &req.last_name)?;
        let schema = schema_name(tenant);
        let student = sqlx::query_as::<_, Student>(&format!(
            "INSERT INTO {schema}.students
                (admission_no, first_name, last_name, grade_level, class_name,
                 guardian_name, guardian_phone, guardian_email, address,
                 enrollment_date, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, CURRENT_DATE), $11)
             RETURNING *"
        ))
        .bind(req.admission_no.trim())
        .bind(req.first_name.trim())
        .bind(req.last_name.trim())
        .bind(&req.grade_level)
        .bind(&req.class_name)
        .bind(&req.guardian_name)
        .bind(&req.guardian_phone)
        .bind(&req.guardian_email)
        .bind(&req.address)
        .bind(req.enrollment_date)
        .bind(&req.notes)
        .fetch_one(pool)
        .await?;
        Ok(student)
    }

    pub async fn update(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdateStudentRequest,
    ) -> ServiceResult<Student> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, Student>(&format!(
            "UPDATE {schema}.students
             SET first_name     = COALESCE($1, first_name),
                 last_name      = COALESCE($2, last_name),
                 grade_level    = COALESCE($3, grade_level),
                 class_name     = COALESCE($4, class_name),
                 guardian_name  = COALESCE($5, guardian_name),
                 guardian_phone = COALESCE($6, guardian_phone),
                 guardian_email = COALESCE($7, guardian_email),
                 address        = COALESCE($8, address),
                 notes          = COALESCE($9, notes),
                 is_active      = COALESCE($10, is_active)
             WHERE id = $11
             RETURNING *"
        ))
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(&req.grade_level)
        .bind(&req.class_name)
        .bind(&req.guardian_name)
        .bind(&req.guardian_phone)
        .bind(&req.guardian_email)
        .bind(&req.address)
        .bind(&req.notes)
        .bind(req.is_active)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("student"))
    }

    /// Hard-delete a student with no payment history, otherwise deactivate.
    /// Returns true when the row was removed.
    pub async fn delete(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<bool> {
        let schema = schema_name(tenant);
        let has_payments: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {schema}.payments WHERE student_id = $1)"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;

        let result = if has_payments {
            sqlx::query(&format!(
                "UPDATE {schema}.students SET is_active = FALSE WHERE id = $1"
            ))
            .bind(id)
            .execute(pool)
            .await?
        } else {
            sqlx::query(&format!("DELETE FROM {schema}.students WHERE id = $1"))
                .bind(id)
                .execute(pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("student"));
        }
        Ok(!has_payments)
    }

    pub async fn list_subjects(
        pool: &PgPool,
        tenant: &str,
        student_id: Uuid,
    ) -> ServiceResult<Vec<Subject>> {
        let schema = schema_name(tenant);
        let subjects = sqlx::query_as::<_, Subject>(&format!(
            "SELECT s.* FROM {schema}.subjects s
             JOIN {schema}.student_subjects ss ON ss.subject_id = s.id
             WHERE ss.student_id = $1
             ORDER BY s.name"
        ))
        .bind(student_id)
        .fetch_all(pool)
        .await?;
        Ok(subjects)
    }

    /// Replace the enrolled subjects of a student.
    pub async fn set_subjects(
        pool: &PgPool,
        tenant: &str,
        student_id: Uuid,
        subject_ids: &[Uuid],
    ) -> ServiceResult<Vec<Subject>> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "DELETE FROM {schema}.student_subjects WHERE student_id = $1"
        ))
        .bind(student_id)
        .execute(&mut *tx)
        .await?;

        if !subject_ids.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {schema}.student_subjects (student_id, subject_id)
                 SELECT $1, UNNEST($2::uuid[])
                 ON CONFLICT DO NOTHING"
            ))
            .bind(student_id)
            .bind(subject_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Self::list_subjects(pool, tenant, student_id).await
    }

    pub async fn balance(
        pool: &PgPool,
        tenant: &str,
        student_id: Uuid,
    ) -> ServiceResult<StudentBalance> {
        let schema = schema_name(tenant);
        let balance = sqlx::query_as::<_, StudentBalance>(&format!(
            "SELECT $1::uuid AS student_id,
                    COALESCE(SUM(amount_cents), 0)::BIGINT AS total_due_cents,
                    COALESCE(SUM(paid_cents), 0)::BIGINT AS total_paid_cents,
                    COALESCE(SUM(amount_cents - paid_cents), 0)::BIGINT AS outstanding_cents
             FROM {schema}.fees
             WHERE student_id = $1 AND status <> 'waived'"
        ))
        .bind(student_id)
        .fetch_one(pool)
        .await?;
        Ok(balance)
    }

    /// Upsert parsed import rows keyed by admission number. Each row carries
    /// its sheet row number for error reporting; `summary` may already hold
    /// parse errors.
    pub async fn import(
        pool: &PgPool,
        tenant: &str,
        rows: Vec<(usize, StudentImportRow)>,
        mut summary: ImportSummary,
    ) -> ServiceResult<ImportSummary> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        for (row_no, row) in &rows {
            if let Err(e) = validate_names(&row.admission_no, &row.first_name, &row.last_name) {
                summary.errors.push(ImportRowError { row: *row_no, error: e.to_string() });
                continue;
            }

            // Savepoint per row: a rejected row must not abort the rest.
            let mut row_tx = Connection::begin(&mut *tx).await?;
            // xmax = 0 only for freshly inserted tuples
            let upserted: Result<bool, sqlx::Error> = sqlx::query_scalar(&format!(
                "INSERT INTO {schema}.students AS s
                    (admission_no, first_name, last_name, grade_level, class_name,
                     guardian_name, guardian_phone, guardian_email)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (admission_no) DO UPDATE SET
                     first_name     = EXCLUDED.first_name,
                     last_name      = EXCLUDED.last_name,
                     grade_level    = COALESCE(EXCLUDED.grade_level, s.grade_level),
                     class_name     = COALESCE(EXCLUDED.class_name, s.class_name),
                     guardian_name  = COALESCE(EXCLUDED.guardian_name, s.guardian_name),
                     guardian_phone = COALESCE(EXCLUDED.guardian_phone, s.guardian_phone),
                     guardian_email = COALESCE(EXCLUDED.guardian_email, s.guardian_email)
                 RETURNING (s.xmax = 0)"
            ))
            .bind(row.admission_no.trim())
            .bind(row.first_name.trim())
            .bind(row.last_name.trim())
            .bind(&row.grade_level)
            .bind(&row.class_name)
            .bind(&row.guardian_name)
            .bind(&row.guardian_phone)
            .bind(&row.guardian_email)
            .fetch_one(&mut *row_tx)
            .await;

            match upserted {
                Ok(inserted) => {
                    row_tx.commit().await?;
                    if inserted {
                        summary.imported += 1;
                    } else {
                        summary.updated += 1;
                    }
                }
                Err(sqlx::Error::Database(db_err)) => {
                    row_tx.rollback().await?;
                    warn!("Student import ({tenant}) row {row_no} rejected: {db_err}");
                    summary.errors.push(ImportRowError {
                        row: *row_no,
                        error: db_err.message().to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(summary)
    }
}

fn validate_names(admission_no: &str, first_name: &str, last_name: &str) -> ServiceResult<()> {
    if admission_no.trim().is_empty() {
        return Err(ServiceError::validation("admission_no is required"));
    }
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(ServiceError::validation("first_name and last_name are required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        assert!(validate_names("A-1", "Ada", "Lovelace").is_ok());
        assert!(validate_names("  ", "Ada", "Lovelace").is_err());
        assert!(validate_names("A-1", "", "Lovelace").is_err());
        assert!(validate_names("A-1", "Ada", " ").is_err());
    }
}
