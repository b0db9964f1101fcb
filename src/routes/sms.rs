use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{rate_limit::check_rate_limit, tenant::TenantSlug},
    models::{
        auth::AuthenticatedUser,
        sms::{
            CreateCampaignRequest, RecipientQuery, SmsCampaign, SmsRecipient, SmsTemplate,
            TemplateRequest, TestSmsRequest,
        },
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        centers::CenterService,
        sms::SmsService,
    },
    AppState,
};

const SEND_WINDOW_SECS: u64 = 3600;

async fn limit_sends(state: &AppState, tenant: &str) -> Result<(), ApiError> {
    check_rate_limit(
        &state.redis,
        &format!("rl:sms:{tenant}"),
        state.config.sms_rate_limit_per_hour,
        SEND_WINDOW_SECS,
    )
    .await
}

// ─── Templates ────────────────────────────────────────────────────────────────

pub async fn list_templates(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<SmsTemplate>>, ApiError> {
    Ok(Json(SmsService::list_templates(&state.db, &tenant).await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<SmsTemplate>), ApiError> {
    require_admin(&user)?;
    let template = SmsService::create_template(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.template_create", "sms_template")
            .resource(template.id)
            .label(&template.name),
    );
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn update_template(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<TemplateRequest>,
) -> Result<Json<SmsTemplate>, ApiError> {
    require_admin(&user)?;
    let template = SmsService::update_template(&state.db, &tenant, id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.template_update", "sms_template")
            .resource(id)
            .label(&template.name),
    );
    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    SmsService::delete_template(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.template_delete", "sms_template").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

// ─── Campaigns ────────────────────────────────────────────────────────────────

pub async fn list_campaigns(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<SmsCampaign>>, ApiError> {
    Ok(Json(SmsService::list_campaigns(&state.db, &tenant).await?))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SmsCampaign>, ApiError> {
    Ok(Json(SmsService::get_campaign(&state.db, &tenant, id).await?))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<SmsCampaign>), ApiError> {
    require_admin(&user)?;
    let campaign = SmsService::create_campaign(&state.db, &tenant, user.user_id, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.campaign_create", "sms_campaign")
            .resource(campaign.id)
            .label(format!("{} ({} recipients)", campaign.name, campaign.total_recipients)),
    );
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    SmsService::delete_campaign(&state.db, &tenant, id).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.campaign_delete", "sms_campaign").resource(id),
    );
    Ok(Json(json!({ "ok": true })))
}

pub async fn list_recipients(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(q): Query<RecipientQuery>,
) -> Result<Json<Vec<SmsRecipient>>, ApiError> {
    Ok(Json(SmsService::list_recipients(&state.db, &tenant, id, q.status).await?))
}

/// POST /sms/campaigns/{id}/send. Delivery runs in the background; poll the
/// campaign for progress.
pub async fn send_campaign(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SmsCampaign>), ApiError> {
    require_admin(&user)?;
    limit_sends(&state, &tenant).await?;

    let center = CenterService::get(&state.db, &tenant).await?;
    let creds = state.sms.credentials_for(&center)?;
    let campaign = SmsService::begin_send(&state.db, &tenant, id).await?;
    SmsService::dispatch(state.db.clone(), state.sms.clone(), tenant.clone(), id, creds);

    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.campaign_send", "sms_campaign")
            .resource(id)
            .label(&campaign.name),
    );
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

pub async fn retry_failed(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SmsCampaign>), ApiError> {
    require_admin(&user)?;
    limit_sends(&state, &tenant).await?;

    let center = CenterService::get(&state.db, &tenant).await?;
    let creds = state.sms.credentials_for(&center)?;
    let reset = SmsService::reset_failed(&state.db, &tenant, id).await?;
    let campaign = SmsService::begin_send(&state.db, &tenant, id).await?;
    SmsService::dispatch(state.db.clone(), state.sms.clone(), tenant.clone(), id, creds);

    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "sms.campaign_retry", "sms_campaign")
            .resource(id)
            .label(format!("{reset} recipients retried")),
    );
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

pub async fn send_test(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<TestSmsRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    limit_sends(&state, &tenant).await?;

    let center = CenterService::get(&state.db, &tenant).await?;
    let creds = state.sms.credentials_for(&center)?;
    let message_id = state.sms.send_test(&creds, &body.to, &body.message).await?;
    Ok(Json(json!({ "sent": true, "message_id": message_id })))
}
