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
        report::{
            CardQuery, CreatePeriodRequest, GenerateCardsRequest, GenerationSummary, ReportCard,
            ReportPeriod, UpdatePeriodRequest, UpdateRemarksRequest,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        centers::{public_logo_url, CenterService},
        reports::ReportService,
    },
    AppState,
};

pub async fn list_periods(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<ReportPeriod>>, ApiError> {
    Ok(Json(ReportService::list_periods(&state.db, &tenant).await?))
}

pub async fn get_period(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportPeriod>, ApiError> {
    Ok(Json(ReportService::get_period(&state.db, &tenant, id).await?))
}

pub async fn create_period(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreatePeriodRequest>,
) -> Result<(StatusCode, Json<ReportPeriod>), ApiError> {
    require_admin(&user)?;
    let period = ReportService::create_period(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "report_period.create", "report_period")
            .resource(period.id)
            .label(&period.name),
    );
    Ok((StatusCode::CREATED, Json(period)))
}

/// Publishing a period emails guardians once, when SMTP is configured.
pub async fn update_period(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePeriodRequest>,
) -> Result<Json<ReportPeriod>, ApiError> {
    require_admin(&user)?;
    let (period, newly_published) =
        ReportService::update_period(&state.db, &tenant, id, &body).await?;

    if newly_published {
        audit::log(
            state.db.clone(),
            &tenant,
            AuditEntry::new(user.user_id, "report_period.publish", "report_period")
                .resource(id)
                .label(&period.name),
        );
        if let Some(email) = state.email.clone() {
            let center = CenterService::get(&state.db, &tenant).await?;
            let logo_url = center
                .logo_url
                .as_ref()
                .map(|_| public_logo_url(&state.config.app_base_url, &tenant))
                .unwrap_or_default();
            ReportService::notify_published(
                state.db.clone(),
                email,
                tenant.clone(),
                period.clone(),
                center.name,
                logo_url,
            );
        }
    } else {
        audit::log(
            state.db.clone(),
            &tenant,
            AuditEntry::new(user.user_id, "report_period.update", "report_period")
                .resource(id)
                .label(&period.name),
        );
    }
    Ok(Json(period))
}

pub async fn delete_period(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    ReportService::delete_period(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "report_period.delete", "report_period").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

pub async fn generate_cards(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateCardsRequest>,
) -> Result<Json<GenerationSummary>, ApiError> {
    require_admin(&user)?;
    let summary = ReportService::generate(&state.db, &tenant, id, &body.class_name).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "report_card.generate", "report_period")
            .resource(id)
            .label(format!("{}: {} cards", summary.class_name, summary.generated)),
    );
    Ok(Json(summary))
}

pub async fn list_cards(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(q): Query<CardQuery>,
) -> Result<Json<Vec<ReportCard>>, ApiError> {
    let cards = ReportService::list_cards(&state.db, &tenant, id, q.class_name.as_deref()).await?;
    Ok(Json(cards))
}

pub async fn get_card(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportCard>, ApiError> {
    Ok(Json(ReportService::get_card(&state.db, &tenant, id).await?))
}

pub async fn update_remarks(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRemarksRequest>,
) -> Result<Json<ReportCard>, ApiError> {
    require_admin(&user)?;
    let card =
        ReportService::update_remarks(&state.db, &tenant, id, body.remarks.as_deref()).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "report_card.remarks", "report_card").resource(id),
    );
    Ok(Json(card))
}
