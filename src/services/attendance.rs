use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::attendance::{
        AttendanceRecord, AttendanceSession, SaveSessionRequest, SessionQuery, SessionWithRecords,
        StatusCounts, StudentAttendanceSummary,
    },
};

pub struct AttendanceService;

impl AttendanceService {
    /// Save a session and its records in one transaction. An existing session
    /// for the same (date, class, subject) has its records replaced.
    pub async fn save_session(
        pool: &PgPool,
        tenant: &str,
        taken_by: Uuid,
        req: &SaveSessionRequest,
    ) -> ServiceResult<SessionWithRecords> {
        if req.class_name.trim().is_empty() {
            return Err(ServiceError::validation("class_name is required"));
        }
        check_unique_students(req.records.iter().map(|r| r.student_id))?;

        let schema = schema_name(tenant);
        let counts = StatusCounts::tally(req.records.iter().map(|r| &r.status));
        let mut tx = pool.begin().await?;

        let session = sqlx::query_as::<_, AttendanceSession>(&format!(
            "INSERT INTO {schema}.attendance_sessions
                (session_date, class_name, subject_id, taken_by, notes,
                 present_count, absent_count, late_count, excused_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (session_date, class_name,
                          COALESCE(subject_id, '00000000-0000-0000-0000-000000000000'::uuid))
             DO UPDATE SET
                 taken_by      = EXCLUDED.taken_by,
                 notes         = EXCLUDED.notes,
                 present_count = EXCLUDED.present_count,
                 absent_count  = EXCLUDED.absent_count,
                 late_count    = EXCLUDED.late_count,
                 excused_count = EXCLUDED.excused_count
             RETURNING *"
        ))
        .bind(req.session_date)
        .bind(req.class_name.trim())
        .bind(req.subject_id)
        .bind(taken_by)
        .bind(&req.notes)
        .bind(counts.present)
        .bind(counts.absent)
        .bind(counts.late)
        .bind(counts.excused)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "DELETE FROM {schema}.attendance_records WHERE session_id = $1"
        ))
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        let mut records = Vec::with_capacity(req.records.len());
        for r in &req.records {
            let record = sqlx::query_as::<_, AttendanceRecord>(&format!(
                "INSERT INTO {schema}.attendance_records (session_id, student_id, status, remarks)
                 VALUES ($1, $2, $3, $4)
                 RETURNING *"
            ))
            .bind(session.id)
            .bind(r.student_id)
            .bind(r.status.as_str())
            .bind(&r.remarks)
            .fetch_one(&mut *tx)
            .await?;
            records.push(record);
        }

        tx.commit().await?;
        Ok(SessionWithRecords { session, records })
    }

    pub async fn list_sessions(
        pool: &PgPool,
        tenant: &str,
        q: &SessionQuery,
    ) -> ServiceResult<Vec<AttendanceSession>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT * FROM {schema}.attendance_sessions WHERE TRUE"
        ));
        if let Some(from) = q.from {
            qb.push(" AND session_date >= ").push_bind(from);
        }
        if let Some(to) = q.to {
            qb.push(" AND session_date <= ").push_bind(to);
        }
        if let Some(class) = &q.class_name {
            qb.push(" AND class_name = ").push_bind(class);
        }
        qb.push(" ORDER BY session_date DESC, class_name LIMIT 500");

        let sessions = qb.build_query_as::<AttendanceSession>().fetch_all(pool).await?;
        Ok(sessions)
    }

    pub async fn get_session(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
    ) -> ServiceResult<SessionWithRecords> {
        let schema = schema_name(tenant);
        let session = sqlx::query_as::<_, AttendanceSession>(&format!(
            "SELECT * FROM {schema}.attendance_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("attendance session"))?;

        let records = sqlx::query_as::<_, AttendanceRecord>(&format!(
            "SELECT r.* FROM {schema}.attendance_records r
             JOIN {schema}.students s ON s.id = r.student_id
             WHERE r.session_id = $1
             ORDER BY s.last_name, s.first_name"
        ))
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(SessionWithRecords { session, records })
    }

    pub async fn delete_session(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!(
            "DELETE FROM {schema}.attendance_sessions WHERE id = $1"
        ))
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("attendance session"));
        }
        Ok(())
    }

    pub async fn student_summary(
        pool: &PgPool,
        tenant: &str,
        student_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ServiceResult<StudentAttendanceSummary> {
        if from > to {
            return Err(ServiceError::validation("from must not be after to"));
        }
        let schema = schema_name(tenant);
        let (present, absent, late, excused): (i64, i64, i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FILTER (WHERE r.status = 'present'),
                    COUNT(*) FILTER (WHERE r.status = 'absent'),
                    COUNT(*) FILTER (WHERE r.status = 'late'),
                    COUNT(*) FILTER (WHERE r.status = 'excused')
             FROM {schema}.attendance_records r
             JOIN {schema}.attendance_sessions s ON s.id = r.session_id
             WHERE r.student_id = $1 AND s.session_date BETWEEN $2 AND $3"
        ))
        .bind(student_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await?;

        let total = present + absent + late + excused;
        Ok(StudentAttendanceSummary {
            student_id,
            from,
            to,
            present,
            absent,
            late,
            excused,
            total,
            attendance_rate: attendance_rate(present + late, total),
        })
    }
}

/// Percentage attended, rounded to two decimals. 0 when there are no records.
pub fn attendance_rate(attended: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((attended as f64 / total as f64) * 10_000.0).round() / 100.0
}

fn check_unique_students(ids: impl Iterator<Item = Uuid>) -> ServiceResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ServiceError::validation(format!(
                "student {id} appears more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counts_attended_over_all_records() {
        assert_eq!(attendance_rate(0, 0), 0.0);
        assert_eq!(attendance_rate(3, 4), 75.0);
        assert_eq!(attendance_rate(2, 3), 66.67);
        assert_eq!(attendance_rate(5, 5), 100.0);
    }

    #[test]
    fn duplicate_student_in_session_is_rejected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(check_unique_students([a, b].into_iter()).is_ok());
        assert!(check_unique_students([a, b, a].into_iter()).is_err());
    }
}
