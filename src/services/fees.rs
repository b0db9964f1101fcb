use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::{
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::fee::{
        Fee, FeeQuery, FeeStatus, GenerationResult, Payment, PaymentAllocation, PaymentQuery,
        PaymentReceipt, RecordPaymentRequest, Refund, RefundRequest,
    },
    services::metrics::{FEES_GENERATED_COUNTER, PAYMENTS_COUNTER},
};

/// Longest range a single generation run may cover.
const MAX_GENERATION_MONTHS: usize = 24;

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First days of every month from `from` to `to`, both inclusive.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> ServiceResult<Vec<NaiveDate>> {
    let (from, to) = (first_of_month(from), first_of_month(to));
    if from > to {
        return Err(ServiceError::validation("from_month must not be after to_month"));
    }
    let mut months = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        if months.len() == MAX_GENERATION_MONTHS {
            return Err(ServiceError::validation(format!(
                "at most {MAX_GENERATION_MONTHS} months can be generated at once"
            )));
        }
        months.push(cursor);
        cursor = cursor
            .checked_add_months(Months::new(1))
            .ok_or_else(|| ServiceError::validation("month out of range"))?;
    }
    Ok(months)
}

/// Due date of a fee month given the center's due day (1..=28).
pub fn due_date(month: NaiveDate, due_day: i16) -> ServiceResult<NaiveDate> {
    let offset = u64::from(due_day.clamp(1, 28).unsigned_abs()) - 1;
    first_of_month(month)
        .checked_add_days(Days::new(offset))
        .ok_or_else(|| ServiceError::validation("month out of range"))
}

/// Spread `amount` over outstanding fees in the given (oldest first) order.
/// Returns `(fee_id, applied)` pairs; rejects amounts above the total outstanding.
pub fn allocate(amount: i64, outstanding: &[(Uuid, i64)]) -> ServiceResult<Vec<(Uuid, i64)>> {
    if amount <= 0 {
        return Err(ServiceError::validation("amount_cents must be greater than 0"));
    }
    let total: i64 = outstanding.iter().map(|(_, o)| o.max(&0)).sum();
    if amount > total {
        return Err(ServiceError::validation(format!(
            "payment of {amount} exceeds outstanding balance of {total}"
        )));
    }

    let mut remaining = amount;
    let mut applied = Vec::new();
    for &(fee_id, owed) in outstanding {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(owed.max(0));
        if take > 0 {
            applied.push((fee_id, take));
            remaining -= take;
        }
    }
    Ok(applied)
}

/// Take `amount` back out of allocations ordered newest fee first.
pub fn reverse_allocations(amount: i64, allocations: &[(Uuid, i64)]) -> Vec<(Uuid, i64)> {
    let mut remaining = amount;
    let mut reversed = Vec::new();
    for &(fee_id, allocated) in allocations {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(allocated);
        if take > 0 {
            reversed.push((fee_id, take));
            remaining -= take;
        }
    }
    reversed
}

/// Human-readable amount, e.g. `USD 1,250.00`.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();
    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{currency} {sign}{grouped}.{:02}", abs % 100)
}

#[derive(sqlx::FromRow)]
struct StudentCharge {
    student_id: Uuid,
    amount_cents: i64,
}

#[derive(sqlx::FromRow)]
struct ExportRow {
    paid_on: NaiveDate,
    admission_no: String,
    first_name: String,
    last_name: String,
    amount_cents: i64,
    method: String,
    reference: Option<String>,
    refunded_cents: i64,
}

pub struct FeeService;

impl FeeService {
    /// Create monthly fee rows. Amount per student is the sum of enrolled
    /// subject fees plus the assigned transport route fee.
    pub async fn generate(
        pool: &PgPool,
        tenant: &str,
        from_month: NaiveDate,
        to_month: NaiveDate,
        student_ids: Option<&[Uuid]>,
    ) -> ServiceResult<GenerationResult> {
        let months = months_between(from_month, to_month)?;
        let schema = schema_name(tenant);

        let due_day: i16 = sqlx::query_scalar("SELECT fee_due_day FROM public.centers WHERE slug = $1")
            .bind(tenant)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::NotFound("center"))?;

        let mut tx = pool.begin().await?;

        let charges = sqlx::query_as::<_, StudentCharge>(&format!(
            "SELECT st.id AS student_id,
                    (COALESCE((SELECT SUM(sub.monthly_fee_cents)
                               FROM {schema}.student_subjects ss
                               JOIN {schema}.subjects sub ON sub.id = ss.subject_id
                               WHERE ss.student_id = st.id), 0)
                   + COALESCE((SELECT r.monthly_fee_cents
                               FROM {schema}.transport_assignments ta
                               JOIN {schema}.transport_routes r ON r.id = ta.route_id
                               WHERE ta.student_id = st.id), 0))::BIGINT AS amount_cents
             FROM {schema}.students st
             WHERE st.is_active = TRUE
               AND ($1::uuid[] IS NULL OR st.id = ANY($1))"
        ))
        .bind(student_ids)
        .fetch_all(&mut *tx)
        .await?;

        let billable: Vec<&StudentCharge> = charges.iter().filter(|c| c.amount_cents > 0).collect();
        let zero_amount = (charges.len() - billable.len()) * months.len();

        let mut ids = Vec::with_capacity(billable.len() * months.len());
        let mut fee_months = Vec::with_capacity(ids.capacity());
        let mut amounts = Vec::with_capacity(ids.capacity());
        let mut due_dates = Vec::with_capacity(ids.capacity());
        for month in &months {
            for charge in &billable {
                ids.push(charge.student_id);
                fee_months.push(*month);
                amounts.push(charge.amount_cents);
                due_dates.push(due_date(*month, due_day)?);
            }
        }

        let created = if ids.is_empty() {
            0
        } else {
            sqlx::query(&format!(
                "INSERT INTO {schema}.fees (student_id, fee_month, amount_cents, due_date)
                 SELECT * FROM UNNEST($1::uuid[], $2::date[], $3::bigint[], $4::date[])
                 ON CONFLICT (student_id, fee_month) DO NOTHING"
            ))
            .bind(&ids)
            .bind(&fee_months)
            .bind(&amounts)
            .bind(&due_dates)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize
        };

        tx.commit().await?;

        FEES_GENERATED_COUNTER
            .with_label_values(&[tenant])
            .inc_by(created as f64);
        let result = GenerationResult {
            created,
            skipped: ids.len() - created + zero_amount,
        };
        info!(
            "Fees: {tenant} {}..{} created={} skipped={}",
            months[0],
            months[months.len() - 1],
            result.created,
            result.skipped
        );
        Ok(result)
    }

    pub async fn list(pool: &PgPool, tenant: &str, q: &FeeQuery) -> ServiceResult<Vec<Fee>> {
        let schema = schema_name(tenant);
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {schema}.fees WHERE TRUE"));
        if let Some(month) = q.month {
            qb.push(" AND fee_month = ").push_bind(first_of_month(month));
        }
        if let Some(status) = q.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(student_id) = q.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        qb.push(" ORDER BY fee_month DESC, due_date LIMIT 2000");

        let fees = qb.build_query_as::<Fee>().fetch_all(pool).await?;
        Ok(fees)
    }

    pub async fn waive(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<Fee> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;
        let fee = lock_fee(&mut tx, &schema, id).await?;
        if fee.status == FeeStatus::Paid.as_str() {
            return Err(ServiceError::conflict("a paid fee cannot be waived"));
        }

        let fee = sqlx::query_as::<_, Fee>(&format!(
            "UPDATE {schema}.fees SET status = 'waived' WHERE id = $1 RETURNING *"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(fee)
    }

    /// Record a payment and apply it to one fee or, without `fee_id`,
    /// to the student's oldest outstanding fees first.
    pub async fn record_payment(
        pool: &PgPool,
        tenant: &str,
        received_by: Uuid,
        req: &RecordPaymentRequest,
    ) -> ServiceResult<PaymentReceipt> {
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let open = sqlx::query_as::<_, Fee>(&format!(
            "SELECT * FROM {schema}.fees
             WHERE student_id = $1 AND status IN ('due', 'partial')
               AND ($2::uuid IS NULL OR id = $2)
             ORDER BY fee_month, created_at
             FOR UPDATE"
        ))
        .bind(req.student_id)
        .bind(req.fee_id)
        .fetch_all(&mut *tx)
        .await?;

        if req.fee_id.is_some() && open.is_empty() {
            return Err(ServiceError::conflict("fee is not open for payment"));
        }
        let outstanding: Vec<(Uuid, i64)> =
            open.iter().map(|f| (f.id, f.outstanding_cents())).collect();
        let plan = allocate(req.amount_cents, &outstanding)?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO {schema}.payments
                (student_id, amount_cents, method, reference, paid_on, received_by, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *"
        ))
        .bind(req.student_id)
        .bind(req.amount_cents)
        .bind(req.method.as_str())
        .bind(&req.reference)
        .bind(req.paid_on.unwrap_or_else(|| Utc::now().date_naive()))
        .bind(received_by)
        .bind(&req.notes)
        .fetch_one(&mut *tx)
        .await?;

        let mut allocations = Vec::with_capacity(plan.len());
        for (fee_id, amount) in plan {
            apply_to_fee(&mut tx, &schema, fee_id, amount).await?;
            let allocation = sqlx::query_as::<_, PaymentAllocation>(&format!(
                "INSERT INTO {schema}.payment_allocations (payment_id, fee_id, amount_cents)
                 VALUES ($1, $2, $3)
                 RETURNING payment_id, fee_id, amount_cents"
            ))
            .bind(payment.id)
            .bind(fee_id)
            .bind(amount)
            .fetch_one(&mut *tx)
            .await?;
            allocations.push(allocation);
        }

        tx.commit().await?;
        PAYMENTS_COUNTER.with_label_values(&[tenant]).inc();
        Ok(PaymentReceipt { payment, allocations })
    }

    pub async fn get_payment(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<PaymentReceipt> {
        let schema = schema_name(tenant);
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT * FROM {schema}.payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("payment"))?;

        let allocations = sqlx::query_as::<_, PaymentAllocation>(&format!(
            "SELECT payment_id, fee_id, amount_cents FROM {schema}.payment_allocations
             WHERE payment_id = $1"
        ))
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(PaymentReceipt { payment, allocations })
    }

    pub async fn list_payments(
        pool: &PgPool,
        tenant: &str,
        q: &PaymentQuery,
    ) -> ServiceResult<Vec<Payment>> {
        let schema = schema_name(tenant);
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT * FROM {schema}.payments
             WHERE ($1::date IS NULL OR paid_on >= $1)
               AND ($2::date IS NULL OR paid_on <= $2)
               AND ($3::uuid IS NULL OR student_id = $3)
             ORDER BY paid_on DESC, created_at DESC
             LIMIT 2000"
        ))
        .bind(q.from)
        .bind(q.to)
        .bind(q.student_id)
        .fetch_all(pool)
        .await?;
        Ok(payments)
    }

    /// Payments in CSV form for spreadsheet reconciliation.
    pub async fn export_csv(pool: &PgPool, tenant: &str, q: &PaymentQuery) -> ServiceResult<Vec<u8>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, ExportRow>(&format!(
            "SELECT p.paid_on, s.admission_no, s.first_name, s.last_name,
                    p.amount_cents, p.method, p.reference,
                    COALESCE((SELECT SUM(amount_cents) FROM {schema}.refunds r
                              WHERE r.payment_id = p.id), 0)::BIGINT AS refunded_cents
             FROM {schema}.payments p
             JOIN {schema}.students s ON s.id = p.student_id
             WHERE ($1::date IS NULL OR p.paid_on >= $1)
               AND ($2::date IS NULL OR p.paid_on <= $2)
               AND ($3::uuid IS NULL OR p.student_id = $3)
             ORDER BY p.paid_on, s.admission_no"
        ))
        .bind(q.from)
        .bind(q.to)
        .bind(q.student_id)
        .fetch_all(pool)
        .await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "paid_on", "admission_no", "student", "amount", "method", "reference", "refunded",
            ])
            .map_err(anyhow::Error::from)?;
        for r in &rows {
            writer
                .write_record([
                    r.paid_on.to_string(),
                    r.admission_no.clone(),
                    format!("{} {}", r.first_name, r.last_name),
                    cents_to_decimal(r.amount_cents),
                    r.method.clone(),
                    r.reference.clone().unwrap_or_default(),
                    cents_to_decimal(r.refunded_cents),
                ])
                .map_err(anyhow::Error::from)?;
        }
        let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("CSV flush failed: {e}"))?;
        Ok(bytes)
    }

    /// Refund part or all of a payment, taking the money back out of the
    /// most recent fees it paid.
    pub async fn refund(
        pool: &PgPool,
        tenant: &str,
        payment_id: Uuid,
        processed_by: Uuid,
        req: &RefundRequest,
    ) -> ServiceResult<Refund> {
        if req.amount_cents <= 0 {
            return Err(ServiceError::validation("amount_cents must be greater than 0"));
        }
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;

        let paid: i64 = sqlx::query_scalar(&format!(
            "SELECT amount_cents FROM {schema}.payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("payment"))?;

        let refunded: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM {schema}.refunds WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;

        let refundable = paid - refunded;
        if req.amount_cents > refundable {
            return Err(ServiceError::validation(format!(
                "refund of {} exceeds refundable amount of {refundable}",
                req.amount_cents
            )));
        }

        let allocations: Vec<(Uuid, i64)> = sqlx::query_as(&format!(
            "SELECT a.fee_id, a.amount_cents
             FROM {schema}.payment_allocations a
             JOIN {schema}.fees f ON f.id = a.fee_id
             WHERE a.payment_id = $1 AND a.amount_cents > 0
             ORDER BY f.fee_month DESC
             FOR UPDATE OF a, f"
        ))
        .bind(payment_id)
        .fetch_all(&mut *tx)
        .await?;

        for (fee_id, amount) in reverse_allocations(req.amount_cents, &allocations) {
            apply_to_fee(&mut tx, &schema, fee_id, -amount).await?;
            sqlx::query(&format!(
                "UPDATE {schema}.payment_allocations SET amount_cents = amount_cents - $1
                 WHERE payment_id = $2 AND fee_id = $3"
            ))
            .bind(amount)
            .bind(payment_id)
            .bind(fee_id)
            .execute(&mut *tx)
            .await?;
        }

        let refund = sqlx::query_as::<_, Refund>(&format!(
            "INSERT INTO {schema}.refunds (payment_id, amount_cents, reason, processed_by)
             VALUES ($1, $2, $3, $4)
             RETURNING *"
        ))
        .bind(payment_id)
        .bind(req.amount_cents)
        .bind(&req.reason)
        .bind(processed_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(refund)
    }

    pub async fn list_refunds(
        pool: &PgPool,
        tenant: &str,
        payment_id: Uuid,
    ) -> ServiceResult<Vec<Refund>> {
        let schema = schema_name(tenant);
        let refunds = sqlx::query_as::<_, Refund>(&format!(
            "SELECT * FROM {schema}.refunds WHERE payment_id = $1 ORDER BY created_at"
        ))
        .bind(payment_id)
        .fetch_all(pool)
        .await?;
        Ok(refunds)
    }
}

async fn lock_fee(tx: &mut Transaction<'_, Postgres>, schema: &str, id: Uuid) -> ServiceResult<Fee> {
    sqlx::query_as::<_, Fee>(&format!("SELECT * FROM {schema}.fees WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ServiceError::NotFound("fee"))
}

/// Add `delta` (negative for refunds) to a fee's paid amount and recompute its status.
/// Waived fees stay waived.
async fn apply_to_fee(
    tx: &mut Transaction<'_, Postgres>,
    schema: &str,
    fee_id: Uuid,
    delta: i64,
) -> ServiceResult<()> {
    let fee = lock_fee(tx, schema, fee_id).await?;
    let paid = fee.paid_cents + delta;
    let status = if fee.status == FeeStatus::Waived.as_str() {
        FeeStatus::Waived
    } else {
        FeeStatus::from_amounts(fee.amount_cents, paid)
    };
    sqlx::query(&format!(
        "UPDATE {schema}.fees SET paid_cents = $1, status = $2 WHERE id = $3"
    ))
    .bind(paid)
    .bind(status.as_str())
    .bind(fee_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Plain decimal amount without currency, e.g. `1250.05`.
pub fn cents_to_decimal(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn months_are_inclusive_and_normalised() {
        let months = months_between(d(2026, 11, 15), d(2027, 2, 3)).unwrap();
        assert_eq!(
            months,
            vec![d(2026, 11, 1), d(2026, 12, 1), d(2027, 1, 1), d(2027, 2, 1)]
        );
        assert_eq!(months_between(d(2026, 5, 31), d(2026, 5, 1)).unwrap(), vec![d(2026, 5, 1)]);
    }

    #[test]
    fn reversed_or_oversized_ranges_are_rejected() {
        assert!(months_between(d(2026, 6, 1), d(2026, 5, 1)).is_err());
        assert!(months_between(d(2026, 1, 1), d(2028, 1, 1)).is_err());
    }

    #[test]
    fn due_date_offsets_from_first_of_month() {
        assert_eq!(due_date(d(2026, 2, 1), 10).unwrap(), d(2026, 2, 10));
        assert_eq!(due_date(d(2026, 2, 1), 1).unwrap(), d(2026, 2, 1));
        assert_eq!(due_date(d(2026, 2, 1), 28).unwrap(), d(2026, 2, 28));
        assert_eq!(
            due_date(NaiveDate::MAX, 28).unwrap(),
            NaiveDate::MAX.with_day(28).unwrap()
        );
    }

    #[test]
    fn allocation_pays_oldest_first() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let plan = allocate(7000, &[(a, 3000), (b, 3000), (c, 3000)]).unwrap();
        assert_eq!(plan, vec![(a, 3000), (b, 3000), (c, 1000)]);
    }

    #[test]
    fn allocation_rejects_overpayment_and_zero() {
        let a = Uuid::new_v4();
        assert!(allocate(3001, &[(a, 3000)]).is_err());
        assert!(allocate(0, &[(a, 3000)]).is_err());
        assert!(allocate(100, &[]).is_err());
    }

    #[test]
    fn refunds_unwind_newest_allocation_first() {
        let (newer, older) = (Uuid::new_v4(), Uuid::new_v4());
        let reversed = reverse_allocations(4500, &[(newer, 3000), (older, 3000)]);
        assert_eq!(reversed, vec![(newer, 3000), (older, 1500)]);
    }

    #[test]
    fn amounts_format_with_grouping() {
        assert_eq!(format_cents(125000, "USD"), "USD 1,250.00");
        assert_eq!(format_cents(5, "EUR"), "EUR 0.05");
        assert_eq!(format_cents(123456789, "KES"), "KES 1,234,567.89");
        assert_eq!(cents_to_decimal(-250), "-2.50");
    }
}
