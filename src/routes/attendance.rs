use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::tenant::TenantSlug,
    models::{
        attendance::{AttendanceSession, SaveSessionRequest, SessionQuery, SessionWithRecords},
        auth::AuthenticatedUser,
    },
    routes::require_admin,
    services::{
        attendance::AttendanceService,
        audit::{self, AuditEntry},
    },
    AppState,
};

/// PUT /attendance/sessions. Staff may take attendance.
pub async fn save_session(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<SaveSessionRequest>,
) -> Result<Json<SessionWithRecords>, ApiError> {
    let saved = AttendanceService::save_session(&state.db, &tenant, user.user_id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "attendance.save", "attendance_session")
            .resource(saved.session.id)
            .label(format!("{} {}", body.class_name, body.session_date)),
    );
    Ok(Json(saved))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<SessionQuery>,
) -> Result<Json<Vec<AttendanceSession>>, ApiError> {
    Ok(Json(AttendanceService::list_sessions(&state.db, &tenant, &q).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionWithRecords>, ApiError> {
    Ok(Json(AttendanceService::get_session(&state.db, &tenant, id).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    AttendanceService::delete_session(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "attendance.delete", "attendance_session").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}
