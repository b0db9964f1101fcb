use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::tenant::TenantSlug,
    models::{
        auth::AuthenticatedUser,
        subject::{CreateSubjectRequest, Subject, UpdateSubjectRequest},
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        subjects::SubjectService,
    },
    AppState,
};

pub async fn list_subjects(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Subject>>, ApiError> {
    Ok(Json(SubjectService::list(&state.db, &tenant).await?))
}

pub async fn create_subject(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateSubjectRequest>,
) -> Result<(StatusCode, Json<Subject>), ApiError> {
    require_admin(&user)?;
    let subject = SubjectService::create(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "subject.create", "subject")
            .resource(subject.id)
            .label(&subject.code),
    );
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn update_subject(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSubjectRequest>,
) -> Result<Json<Subject>, ApiError> {
    require_admin(&user)?;
    let subject = SubjectService::update(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "subject.update", "subject")
            .resource(id)
            .label(&subject.code),
    );
    Ok(Json(subject))
}

pub async fn delete_subject(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    SubjectService::delete(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "subject.delete", "subject").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}
