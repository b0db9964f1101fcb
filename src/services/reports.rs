use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::report::{
        CreatePeriodRequest, GenerationSummary, ReportCard, ReportPeriod, UpdatePeriodRequest,
    },
    services::{email::EmailService, metrics::REPORT_CARDS_COUNTER},
};

pub struct ReportService;

/// Letter grade for a percentage on the 7-bucket scale.
pub fn grade_letter(percentage: f64) -> &'static str {
    match percentage {
        p if p >= 90.0 => "A+",
        p if p >= 80.0 => "A",
        p if p >= 70.0 => "B+",
        p if p >= 60.0 => "B",
        p if p >= 50.0 => "C",
        p if p >= 40.0 => "D",
        _ => "F",
    }
}

/// Competition ranking (1, 2, 2, 4) of `scores`, highest first.
/// The result is index-aligned with the input.
pub fn competition_ranks(scores: &[f64]) -> Vec<i32> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ranks = vec![0; scores.len()];
    for (pos, &idx) in order.iter().enumerate() {
        ranks[idx] = if pos > 0 && scores[order[pos - 1]] == scores[idx] {
            ranks[order[pos - 1]]
        } else {
            pos as i32 + 1
        };
    }
    ranks
}

fn percentage(total: f64, max_total: f64) -> f64 {
    if max_total <= 0.0 {
        return 0.0;
    }
    ((total / max_total) * 10_000.0).round() / 100.0
}

#[derive(sqlx::FromRow)]
struct StudentTotals {
    student_id: Uuid,
    total_score: f64,
    attendance_present: i64,
    attendance_total: i64,
}

#[derive(sqlx::FromRow)]
struct PublishedCard {
    first_name: String,
    last_name: String,
    guardian_name: Option<String>,
    guardian_email: Option<String>,
}

impl ReportService {
    pub async fn list_periods(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<ReportPeriod>> {
        let schema = schema_name(tenant);
        let periods = sqlx::query_as::<_, ReportPeriod>(&format!(
            "SELECT * FROM {schema}.report_periods ORDER BY start_date DESC"
        ))
        .fetch_all(pool)
        .await?;
        Ok(periods)
    }

    pub async fn get_period(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<ReportPeriod> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, ReportPeriod>(&format!(
            "SELECT * FROM {schema}.report_periods WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("report period"))
    }

    pub async fn create_period(
        pool: &PgPool,
        tenant: &str,
        req: &CreatePeriodRequest,
    ) -> ServiceResult<ReportPeriod> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        if req.start_date > req.end_date {
            return Err(ServiceError::validation("start_date must not be after end_date"));
        }
        let schema = schema_name(tenant);
        let period = sqlx::query_as::<_, ReportPeriod>(&format!(
            "INSERT INTO {schema}.report_periods (name, start_date, end_date)
             VALUES ($1, $2, $3)
             RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(req.start_date)
        .bind(req.end_date)
        .fetch_one(pool)
        .await?;
        Ok(period)
    }

    /// Returns the updated period and whether this call published it.
    pub async fn update_period(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &UpdatePeriodRequest,
    ) -> ServiceResult<(ReportPeriod, bool)> {
        let current = Self::get_period(pool, tenant, id).await?;
        let start = req.start_date.unwrap_or(current.start_date);
        let end = req.end_date.unwrap_or(current.end_date);
        if start > end {
            return Err(ServiceError::validation("start_date must not be after end_date"));
        }

        let schema = schema_name(tenant);
        let period = sqlx::query_as::<_, ReportPeriod>(&format!(
            "UPDATE {schema}.report_periods
             SET name         = COALESCE($1, name),
                 start_date   = $2,
                 end_date     = $3,
                 is_published = COALESCE($4, is_published)
             WHERE id = $5
             RETURNING *"
        ))
        .bind(&req.name)
        .bind(start)
        .bind(end)
        .bind(req.is_published)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("report period"))?;

        let newly_published = !current.is_published && period.is_published;
        Ok((period, newly_published))
    }

    pub async fn delete_period(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!("DELETE FROM {schema}.report_periods WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("report period"));
        }
        Ok(())
    }

    /// Compute report cards for every active student of `class_name`.
    /// Totals are plain sums of scores and of `max_score` over the class's
    /// assessments in the period. Ungraded assessments count as 0.
    pub async fn generate(
        pool: &PgPool,
        tenant: &str,
        period_id: Uuid,
        class_name: &str,
    ) -> ServiceResult<GenerationSummary> {
        let class_name = class_name.trim();
        if class_name.is_empty() {
            return Err(ServiceError::validation("class_name is required"));
        }
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let period = sqlx::query_as::<_, ReportPeriod>(&format!(
            "SELECT * FROM {schema}.report_periods WHERE id = $1 FOR UPDATE"
        ))
        .bind(period_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("report period"))?;

        let max_total: f64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(max_score), 0)::DOUBLE PRECISION
             FROM {schema}.assessments
             WHERE class_name = $1 AND assessment_date BETWEEN $2 AND $3"
        ))
        .bind(class_name)
        .bind(period.start_date)
        .bind(period.end_date)
        .fetch_one(&mut *tx)
        .await?;

        let totals = sqlx::query_as::<_, StudentTotals>(&format!(
            "SELECT st.id AS student_id,
                    COALESCE((
                        SELECT SUM(g.score)
                        FROM {schema}.grades g
                        JOIN {schema}.assessments a ON a.id = g.assessment_id
                        WHERE g.student_id = st.id
                          AND a.class_name = $1
                          AND a.assessment_date BETWEEN $2 AND $3
                    ), 0)::DOUBLE PRECISION AS total_score,
                    (SELECT COUNT(*) FROM {schema}.attendance_records r
                     JOIN {schema}.attendance_sessions s ON s.id = r.session_id
                     WHERE r.student_id = st.id
                       AND s.class_name = $1
                       AND s.session_date BETWEEN $2 AND $3
                       AND r.status IN ('present', 'late')) AS attendance_present,
                    (SELECT COUNT(*) FROM {schema}.attendance_records r
                     JOIN {schema}.attendance_sessions s ON s.id = r.session_id
                     WHERE r.student_id = st.id
                       AND s.class_name = $1
                       AND s.session_date BETWEEN $2 AND $3) AS attendance_total
             FROM {schema}.students st
             WHERE st.class_name = $1 AND st.is_active = TRUE
             ORDER BY st.id"
        ))
        .bind(class_name)
        .bind(period.start_date)
        .bind(period.end_date)
        .fetch_all(&mut *tx)
        .await?;

        let percentages: Vec<f64> = totals
            .iter()
            .map(|t| percentage(t.total_score, max_total))
            .collect();
        let ranks = competition_ranks(&percentages);

        for ((t, pct), rank) in totals.iter().zip(&percentages).zip(&ranks) {
            let rate = crate::services::attendance::attendance_rate(
                t.attendance_present,
                t.attendance_total,
            );
            sqlx::query(&format!(
                "INSERT INTO {schema}.report_cards
                    (period_id, student_id, class_name, total_score, max_total, percentage,
                     grade_letter, attendance_present, attendance_total, attendance_rate,
                     class_rank)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (period_id, student_id) DO UPDATE SET
                     class_name         = EXCLUDED.class_name,
                     total_score        = EXCLUDED.total_score,
                     max_total          = EXCLUDED.max_total,
                     percentage         = EXCLUDED.percentage,
                     grade_letter       = EXCLUDED.grade_letter,
                     attendance_present = EXCLUDED.attendance_present,
                     attendance_total   = EXCLUDED.attendance_total,
                     attendance_rate    = EXCLUDED.attendance_rate,
                     class_rank         = EXCLUDED.class_rank,
                     generated_at       = NOW()"
            ))
            .bind(period_id)
            .bind(t.student_id)
            .bind(class_name)
            .bind(t.total_score)
            .bind(max_total)
            .bind(pct)
            .bind(grade_letter(*pct))
            .bind(t.attendance_present as i32)
            .bind(t.attendance_total as i32)
            .bind(rate)
            .bind(rank)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        REPORT_CARDS_COUNTER
            .with_label_values(&[tenant])
            .inc_by(totals.len() as f64);
        info!(
            "Reports: generated {} card(s) for {tenant}/{class_name} period {period_id}",
            totals.len()
        );

        Ok(GenerationSummary {
            period_id,
            class_name: class_name.to_string(),
            generated: totals.len(),
        })
    }

    pub async fn list_cards(
        pool: &PgPool,
        tenant: &str,
        period_id: Uuid,
        class_name: Option<&str>,
    ) -> ServiceResult<Vec<ReportCard>> {
        let schema = schema_name(tenant);
        let cards = sqlx::query_as::<_, ReportCard>(&format!(
            "SELECT * FROM {schema}.report_cards
             WHERE period_id = $1 AND ($2::TEXT IS NULL OR class_name = $2)
             ORDER BY class_name, class_rank NULLS LAST"
        ))
        .bind(period_id)
        .bind(class_name)
        .fetch_all(pool)
        .await?;
        Ok(cards)
    }

    pub async fn get_card(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<ReportCard> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, ReportCard>(&format!(
            "SELECT * FROM {schema}.report_cards WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("report card"))
    }

    pub async fn update_remarks(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        remarks: Option<&str>,
    ) -> ServiceResult<ReportCard> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, ReportCard>(&format!(
            "UPDATE {schema}.report_cards SET remarks = $1 WHERE id = $2 RETURNING *"
        ))
        .bind(remarks)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("report card"))
    }

    /// Email every guardian with a card in a freshly published period.
    /// Runs in the background; failures are logged per recipient.
    pub fn notify_published(
        pool: PgPool,
        email: Arc<EmailService>,
        tenant: String,
        period: ReportPeriod,
        center_name: String,
        logo_url: String,
    ) {
        tokio::spawn(async move {
            let schema = schema_name(&tenant);
            let rows = match sqlx::query_as::<_, PublishedCard>(&format!(
                "SELECT s.first_name, s.last_name, s.guardian_name, s.guardian_email
                 FROM {schema}.report_cards c
                 JOIN {schema}.students s ON s.id = c.student_id
                 WHERE c.period_id = $1 AND s.guardian_email IS NOT NULL"
            ))
            .bind(period.id)
            .fetch_all(&pool)
            .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Reports: failed to load guardians for {tenant}: {e}");
                    return;
                }
            };

            let mut sent = 0;
            for row in &rows {
                let Some(addr) = row.guardian_email.as_deref() else { continue };
                let student = format!("{} {}", row.first_name, row.last_name);
                let guardian = row.guardian_name.as_deref().unwrap_or("Parent/Guardian");
                match email
                    .send_report_card_notice(
                        addr, guardian, &student, &period.name, &center_name, &logo_url,
                    )
                    .await
                {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("Reports: notice to {addr} failed: {e:#}"),
                }
            }
            info!(
                "Reports: sent {sent}/{} publication notice(s) for {tenant} period {}",
                rows.len(),
                period.id
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_buckets() {
        assert_eq!(grade_letter(100.0), "A+");
        assert_eq!(grade_letter(90.0), "A+");
        assert_eq!(grade_letter(89.99), "A");
        assert_eq!(grade_letter(80.0), "A");
        assert_eq!(grade_letter(70.0), "B+");
        assert_eq!(grade_letter(60.0), "B");
        assert_eq!(grade_letter(50.0), "C");
        assert_eq!(grade_letter(40.0), "D");
        assert_eq!(grade_letter(39.9), "F");
        assert_eq!(grade_letter(0.0), "F");
    }

    #[test]
    fn ties_share_rank_and_skip_the_next() {
        assert_eq!(competition_ranks(&[70.0, 90.0, 90.0, 50.0]), vec![3, 1, 1, 4]);
        assert_eq!(competition_ranks(&[80.0, 80.0, 80.0]), vec![1, 1, 1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn percentage_is_zero_without_assessments() {
        assert_eq!(percentage(0.0, 0.0), 0.0);
        assert_eq!(percentage(45.0, 60.0), 75.0);
        assert_eq!(percentage(1.0, 3.0), 33.33);
    }
}
