use axum::{
    extract::{Path, Query, State},
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
        grading::{
            Assessment, AssessmentQuery, CreateAssessmentRequest, Grade, SaveGradesRequest,
            UpdateAssessmentRequest,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        grading::GradingService,
    },
    AppState,
};

pub async fn list_assessments(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Query(q): Query<AssessmentQuery>,
) -> Result<Json<Vec<Assessment>>, ApiError> {
    Ok(Json(GradingService::list(&state.db, &tenant, &q).await?))
}

pub async fn get_assessment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Assessment>, ApiError> {
    Ok(Json(GradingService::get(&state.db, &tenant, id).await?))
}

pub async fn create_assessment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateAssessmentRequest>,
) -> Result<(StatusCode, Json<Assessment>), ApiError> {
    require_admin(&user)?;
    let assessment = GradingService::create(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "assessment.create", "assessment")
            .resource(assessment.id)
            .label(&assessment.title),
    );
    Ok((StatusCode::CREATED, Json(assessment)))
}

pub async fn update_assessment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAssessmentRequest>,
) -> Result<Json<Assessment>, ApiError> {
    require_admin(&user)?;
    let assessment = GradingService::update(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "assessment.update", "assessment")
            .resource(id)
            .label(&assessment.title),
    );
    Ok(Json(assessment))
}

pub async fn delete_assessment(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    GradingService::delete(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "assessment.delete", "assessment").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

/// PUT /assessments/{id}/grades replaces the whole grade sheet. Staff may grade.
pub async fn save_grades(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SaveGradesRequest>,
) -> Result<Json<Assessment>, ApiError> {
    let assessment = GradingService::save_grades(&state.db, &tenant, id, &body.grades).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "assessment.grades", "assessment")
            .resource(id)
            .label(format!("{} grades", body.grades.len())),
    );
    Ok(Json(assessment))
}

pub async fn list_grades(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Grade>>, ApiError> {
    Ok(Json(GradingService::list_grades(&state.db, &tenant, id).await?))
}
