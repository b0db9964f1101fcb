use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{bad_request, ApiError, ServiceError},
    middleware::tenant::{is_valid_slug, TenantSlug},
    models::{
        auth::AuthenticatedUser,
        center::{CenterSettings, SmsCredentialsRequest, UpdateSettingsRequest},
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        centers::{
            detect_image_ext, logo_path, prepare_logo, public_logo_url, CenterService,
            LOGO_MAX_BYTES,
        },
    },
    AppState,
};

pub async fn get_settings(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    _user: AuthenticatedUser,
) -> Result<Json<CenterSettings>, ApiError> {
    let center = CenterService::get(&state.db, &tenant).await?;
    Ok(Json(center.into()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<CenterSettings>, ApiError> {
    require_admin(&user)?;
    let center = CenterService::update_settings(&state.db, &tenant, &body).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "settings.update", "center").resource(&tenant),
    );
    Ok(Json(center.into()))
}

/// The key is write-only: the response only says whether one is stored.
pub async fn set_sms_credentials(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    Json(body): Json<SmsCredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    let center = CenterService::set_sms_credentials(
        &state.db,
        state.config.encryption_master_key.as_ref(),
        &tenant,
        &body.api_key,
    )
    .await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "settings.sms_credentials", "center").resource(&tenant),
    );
    Ok(Json(json!({ "sms_configured": center.sms_configured() })))
}

// ─── Logo ─────────────────────────────────────────────────────────────────────

pub async fn upload_logo(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let ct = field.content_type().unwrap_or("").to_string();
        let fname = field.file_name().unwrap_or("").to_string();

        if detect_image_ext(&ct, &fname).is_none() {
            return Err(bad_request("Unsupported format. Use PNG, JPG, WebP or GIF."));
        }

        let data = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
        if data.len() > LOGO_MAX_BYTES {
            return Err(bad_request("File too large (max 5 MB)"));
        }

        let png = tokio::task::spawn_blocking(move || prepare_logo(&data))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?
            .map_err(|e| bad_request(format!("Could not read image: {e}")))?;

        let path = logo_path(&state.config.media_dir, &tenant);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ServiceError::Internal(e.into()))?;
        }
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        let logo_url = public_logo_url(&state.config.app_base_url, &tenant);
        CenterService::set_logo_url(&state.db, &tenant, Some(&logo_url)).await?;
        audit::log(
            state.db.clone(),
            &tenant,
            AuditEntry::new(user.user_id, "settings.logo_upload", "center").resource(&tenant),
        );
        return Ok(Json(json!({ "logo_url": logo_url })));
    }

    Err(bad_request("No file provided"))
}

pub async fn delete_logo(
    State(state): State<AppState>,
    TenantSlug(tenant): TenantSlug,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;

    let path = logo_path(&state.config.media_dir, &tenant);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not delete logo {:?}: {}", path, e);
        }
    }
    CenterService::set_logo_url(&state.db, &tenant, None).await?;
    audit::log(
        state.db.clone(),
        &tenant,
        AuditEntry::new(user.user_id, "settings.logo_delete", "center").resource(&tenant),
    );
    Ok(Json(json!({ "ok": true })))
}

/// Public: logos are embedded in emails and the login page.
pub async fn serve_logo(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response<Body>, StatusCode> {
    if !is_valid_slug(&slug) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let data = tokio::fs::read(logo_path(&state.config.media_dir, &slug))
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(Body::from(data))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
