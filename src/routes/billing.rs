use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::{
    error::{bad_request, ApiError, ServiceError},
    middleware::tenant::TenantSlug,
    models::{
        auth::AuthenticatedUser,
        billing::{BillingEvent, CheckoutRequest, RedirectUrl},
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        billing::{verify_signature, BillingService},
        centers::CenterService,
    },
    AppState,
};

pub const SIGNATURE_HEADER: &str = "X-Billing-Signature";

pub async fn checkout(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<RedirectUrl>, ApiError> {
    require_admin(&user)?;
    let center = CenterService::get(&state.db, &tenant).await?;
    let url = state.billing.checkout(&center, &body.plan).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "billing.checkout", "center")
            .resource(&tenant)
            .label(format!("{:?}", body.plan)),
    );
    Ok(Json(url))
}

pub async fn portal(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
) -> Result<Json<RedirectUrl>, ApiError> {
    require_admin(&user)?;
    let center = CenterService::get(&state.db, &tenant).await?;
    Ok(Json(state.billing.portal(&center).await?))
}

/// Provider callback. The signature covers the raw body, so it is checked
/// before any JSON parsing.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let secret = state
        .billing
        .webhook_secret()
        .ok_or(ServiceError::NotConfigured("billing webhook secret"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(secret, &body, signature) {
        tracing::warn!("Billing webhook rejected: bad signature");
        return Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid signature" }))));
    }

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("Invalid event payload: {e}")))?;
    BillingService::apply_event(&state.db, &event).await?;
    Ok(Json(json!({ "received": true })))
}
