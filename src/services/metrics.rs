use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::{active_center_slugs, tenant::schema_name};

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref SMS_COUNTER: CounterVec = register_counter_vec!(
        "api_sms_total",
        "SMS dispatched to the gateway by tenant and outcome",
        &["tenant", "status"]
    ).unwrap();

    pub static ref FEES_GENERATED_COUNTER: CounterVec = register_counter_vec!(
        "api_fees_generated_total",
        "Fee records created by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref PAYMENTS_COUNTER: CounterVec = register_counter_vec!(
        "api_payments_total",
        "Payments recorded by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref REPORT_CARDS_COUNTER: CounterVec = register_counter_vec!(
        "api_report_cards_generated_total",
        "Report cards generated by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref BOOK_ISSUES_COUNTER: CounterVec = register_counter_vec!(
        "api_book_issues_total",
        "Library books issued by tenant",
        &["tenant"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref STUDENTS_GAUGE: GaugeVec = register_gauge_vec!(
        "center_students_active_total",
        "Active students per tenant",
        &["tenant"]
    ).unwrap();

    pub static ref OUTSTANDING_GAUGE: GaugeVec = register_gauge_vec!(
        "center_fees_outstanding_cents",
        "Outstanding (unpaid, not waived) fee balance per tenant",
        &["tenant"]
    ).unwrap();

    pub static ref OVERDUE_BORROWINGS_GAUGE: GaugeVec = register_gauge_vec!(
        "center_borrowings_overdue_total",
        "Library loans past their due date per tenant",
        &["tenant"]
    ).unwrap();

    pub static ref TENANTS_GAUGE: Gauge = register_gauge!(
        "center_tenants_active_total",
        "Number of active tenants"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let tenants = active_center_slugs(pool).await?;
    TENANTS_GAUGE.set(tenants.len() as f64);

    for slug in &tenants {
        let schema = schema_name(slug);

        let students: i64 = sqlx::query_scalar(&format!(
            r#"SELECT COUNT(*)::BIGINT FROM "{schema}".students WHERE is_active = TRUE"#
        ))
        .fetch_one(pool)
        .await
        .unwrap_or(0);
        STUDENTS_GAUGE.with_label_values(&[slug.as_str()]).set(students as f64);

        let outstanding: i64 = sqlx::query_scalar(&format!(
            r#"SELECT COALESCE(SUM(amount_cents - paid_cents), 0)::BIGINT
               FROM "{schema}".fees WHERE status IN ('due', 'partial')"#
        ))
        .fetch_one(pool)
        .await
        .unwrap_or(0);
        OUTSTANDING_GAUGE.with_label_values(&[slug.as_str()]).set(outstanding as f64);

        let overdue: i64 = sqlx::query_scalar(&format!(
            r#"SELECT COUNT(*)::BIGINT FROM "{schema}".borrowings
               WHERE status = 'issued' AND due_on < CURRENT_DATE"#
        ))
        .fetch_one(pool)
        .await
        .unwrap_or(0);
        OVERDUE_BORROWINGS_GAUGE.with_label_values(&[slug.as_str()]).set(overdue as f64);
    }

    info!("Metrics: collected for {} tenant(s)", tenants.len());
    Ok(())
}
