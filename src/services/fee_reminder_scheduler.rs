use chrono::{Local, NaiveDate, Timelike};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{active_center_slugs, tenant::schema_name};
use crate::services::centers::public_logo_url;
use crate::services::email::{EmailService, FeeReminder};
use crate::services::fees::format_cents;

/// Days past the due date on which a reminder goes out.
const OVERDUE_WINDOWS: &[i64] = &[1, 7, 14];

/// Seconds from `secs_today` (seconds since local midnight) until the next `hour`:00.
fn secs_until(hour: u32, secs_today: u32) -> u64 {
    let target = hour * 3600;
    if secs_today < target {
        (target - secs_today) as u64
    } else {
        (86_400 - secs_today + target) as u64
    }
}

#[derive(sqlx::FromRow)]
struct OverdueFee {
    fee_id: Uuid,
    fee_month: NaiveDate,
    due_date: NaiveDate,
    outstanding_cents: i64,
    first_name: String,
    last_name: String,
    guardian_name: Option<String>,
    guardian_email: String,
}

/// Spawn a background task that wakes daily at 9:00 and emails guardians of
/// overdue fees. Redis keys (TTL 2 days) stop duplicate sends after a restart.
pub fn start(
    pool: PgPool,
    email: Option<Arc<EmailService>>,
    redis: redis::Client,
    app_base_url: String,
) {
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let secs_today = now.hour() * 3600 + now.minute() * 60 + now.second();
            tokio::time::sleep(tokio::time::Duration::from_secs(secs_until(9, secs_today))).await;

            let Some(ref email_svc) = email else {
                continue;
            };

            let mut redis_conn = match redis.get_multiplexed_async_connection().await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Fee reminders: Redis unavailable: {e}");
                    continue;
                }
            };

            let slugs = match active_center_slugs(&pool).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Fee reminders: could not list centers: {e}");
                    continue;
                }
            };

            for slug in &slugs {
                for days in OVERDUE_WINDOWS {
                    remind_center(&pool, email_svc, &mut redis_conn, slug, *days, &app_base_url)
                        .await;
                }
            }
        }
    });
}

async fn remind_center(
    pool: &PgPool,
    email_svc: &EmailService,
    redis: &mut redis::aio::MultiplexedConnection,
    slug: &str,
    days: i64,
    app_base_url: &str,
) {
    let center: Option<(String, String, Option<String>)> =
        sqlx::query_as("SELECT name, currency, logo_url FROM public.centers WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);
    let Some((center_name, currency, logo_url)) = center else {
        return;
    };
    let logo_url = logo_url
        .map(|_| public_logo_url(app_base_url, slug))
        .unwrap_or_default();

    let schema = schema_name(slug);
    let rows: Vec<OverdueFee> = match sqlx::query_as(&format!(
        "SELECT f.id AS fee_id, f.fee_month, f.due_date,
                (f.amount_cents - f.paid_cents) AS outstanding_cents,
                s.first_name, s.last_name, s.guardian_name, s.guardian_email
         FROM {schema}.fees f
         JOIN {schema}.students s ON s.id = f.student_id
         WHERE f.status IN ('due', 'partial')
           AND s.is_active = TRUE
           AND s.guardian_email IS NOT NULL
           AND f.due_date = CURRENT_DATE - $1::INT"
    ))
    .bind(days as i32)
    .fetch_all(pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!("Fee reminders ({slug}, +{days}d): DB query failed: {e}");
            return;
        }
    };

    for fee in rows {
        let redis_key = format!("fees:reminder:{days}d:{}", fee.fee_id);
        let already: bool = redis::cmd("EXISTS")
            .arg(&redis_key)
            .query_async(redis)
            .await
            .unwrap_or(false);
        if already {
            continue;
        }

        let _: Result<(), _> = redis::cmd("SETEX")
            .arg(&redis_key)
            .arg(172_800u64)
            .arg(1)
            .query_async(redis)
            .await;

        let student_name = format!("{} {}", fee.first_name, fee.last_name);
        let month_label = fee.fee_month.format("%B %Y").to_string();
        let outstanding = format_cents(fee.outstanding_cents, currency.trim());
        let due = fee.due_date.format("%Y-%m-%d").to_string();
        let reminder = FeeReminder {
            guardian_email: &fee.guardian_email,
            guardian_name: fee.guardian_name.as_deref().unwrap_or("Parent/Guardian"),
            student_name: &student_name,
            center_name: &center_name,
            logo_url: &logo_url,
            month_label: &month_label,
            outstanding: &outstanding,
            due_date: &due,
        };

        match email_svc.send_fee_reminder(&reminder).await {
            Ok(()) => info!(
                "Fee reminders: +{days}d reminder for '{slug}' fee {} sent to {}",
                fee.fee_id, fee.guardian_email
            ),
            Err(e) => warn!(
                "Fee reminders: +{days}d reminder for '{slug}' fee {} failed: {e}",
                fee.fee_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_until_next_nine_am() {
        assert_eq!(secs_until(9, 0), 9 * 3600);
        assert_eq!(secs_until(9, 8 * 3600 + 59 * 60), 60);
        assert_eq!(secs_until(9, 9 * 3600), 86_400);
        assert_eq!(secs_until(9, 23 * 3600), 10 * 3600);
    }
}
