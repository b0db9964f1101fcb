use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::tenant::TenantSlug,
    models::{
        auth::AuthenticatedUser,
        fee::{
            Fee, FeeQuery, GenerateFeesRequest, GenerationResult, Payment, PaymentQuery,
            PaymentReceipt, RecordPaymentRequest, Refund, RefundRequest,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        fees::{cents_to_decimal, FeeService},
    },
    AppState,
};

// ─── Fees ─────────────────────────────────────────────────────────────────────

pub async fn generate_fees(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<GenerateFeesRequest>,
) -> Result<Json<GenerationResult>, ApiError> {
    require_admin(&user)?;
    let result = FeeService::generate(
        &state.db,
        &tenant,
        body.from_month,
        body.to_month,
        body.student_ids.as_deref(),
    )
    .await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "fee.generate", "fee").label(format!(
            "{} to {}: {} created, {} skipped",
            body.from_month, body.to_month, result.created, result.skipped
        )),
    );
    Ok(Json(result))
}

pub async fn list_fees(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<FeeQuery>,
) -> Result<Json<Vec<Fee>>, ApiError> {
    Ok(Json(FeeService::list(&state.db, &tenant, &q).await?))
}

pub async fn waive_fee(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Fee>, ApiError> {
    require_admin(&user)?;
    let fee = FeeService::waive(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "fee.waive", "fee")
            .resource(id)
            .label(fee.fee_month.format("%Y-%m").to_string()),
    );
    Ok(Json(fee))
}

// ─── Payments ─────────────────────────────────────────────────────────────────

pub async fn record_payment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentReceipt>), ApiError> {
    require_admin(&user)?;
    let receipt = FeeService::record_payment(&state.db, &tenant, user.user_id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "payment.record", "payment")
            .resource(receipt.payment.id)
            .label(cents_to_decimal(receipt.payment.amount_cents)),
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<PaymentQuery>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    Ok(Json(FeeService::list_payments(&state.db, &tenant, &q).await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentReceipt>, ApiError> {
    Ok(Json(FeeService::get_payment(&state.db, &tenant, id).await?))
}

/// GET /payments/export.csv
pub async fn export_payments(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Query(q): Query<PaymentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    let csv = FeeService::export_csv(&state.db, &tenant, &q).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"payments-{tenant}.csv\""),
            ),
        ],
        csv,
    ))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Refund>), ApiError> {
    require_admin(&user)?;
    let refund = FeeService::refund(&state.db, &tenant, id, user.user_id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "payment.refund", "payment")
            .resource(id)
            .label(cents_to_decimal(refund.amount_cents)),
    );
    Ok((StatusCode::CREATED, Json(refund)))
}

pub async fn list_refunds(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Refund>>, ApiError> {
    Ok(Json(FeeService::list_refunds(&state.db, &tenant, id).await?))
}
