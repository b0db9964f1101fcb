use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ServiceError},
    middleware::tenant::TenantSlug,
    models::auth::AuthenticatedUser,
    routes::require_admin,
    services::audit,
    AppState,
};

#[derive(Deserialize)]
pub struct AuditQuery {
    pub page:   Option<i64>,
    pub limit:  Option<i64>,
    pub action: Option<String>,
}

pub async fn list_audit_log(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let page = params.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let (entries, total) =
        audit::list(&state.db, &tenant, params.action.as_deref(), limit, offset)
            .await
            .map_err(ServiceError::from)?;

    Ok(Json(json!({
        "entries": entries,
        "total":   total,
        "page":    page,
        "limit":   limit,
    })))
}
