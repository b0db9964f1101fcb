use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    middleware::{super_admin::SuperAdminAuth, tenant::TenantSlug},
    models::{
        auth::AuthenticatedUser,
        center::{Center, CenterSettings, CreateCenterRequest, UpdateCenterRequest},
    },
    services::centers::CenterService,
    AppState,
};

// ─── Super-admin registry ─────────────────────────────────────────────────────

pub async fn list_centers(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
) -> Result<Json<Vec<Center>>, ApiError> {
    Ok(Json(CenterService::list(&state.db).await?))
}

pub async fn create_center(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateCenterRequest>,
) -> Result<(StatusCode, Json<Center>), ApiError> {
    let center = CenterService::create(&state.db, &body).await?;
    Ok((StatusCode::CREATED, Json(center)))
}

pub async fn update_center(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(slug): Path<String>,
    Json(body): Json<UpdateCenterRequest>,
) -> Result<Json<Center>, ApiError> {
    Ok(Json(CenterService::update(&state.db, &slug, &body).await?))
}

pub async fn delete_center(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ApiError> {
    CenterService::delete(&state.db, &state.config.media_dir, &slug).await?;
    Ok(Json(json!({ "deleted": slug })))
}

// ─── Tenant view ──────────────────────────────────────────────────────────────

/// GET /center, profile and subscription state of the caller's center.
pub async fn current_center(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<CenterSettings>, ApiError> {
    let center = CenterService::get(&state.db, &tenant).await?;
    Ok(Json(center.into()))
}
