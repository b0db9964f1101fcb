use std::path::{Path, PathBuf};

use image::{imageops::FilterType, ImageFormat};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    db::tenant::{provision_tenant_schema, schema_name},
    error::{ServiceError, ServiceResult},
    middleware::tenant::is_valid_slug,
    models::center::{
        Center, CreateCenterRequest, PlanType, UpdateCenterRequest, UpdateSettingsRequest,
    },
    services::encryption,
};

pub const LOGO_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const LOGO_MAX_DIMENSION: u32 = 512;
const DEFAULT_TRIAL_DAYS: i64 = 30;

/// Image extension for an upload, from its content type or file name.
pub fn detect_image_ext(content_type: &str, filename: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => return Some("png"),
        "image/jpeg" | "image/jpg" => return Some("jpg"),
        "image/webp" => return Some("webp"),
        "image/gif" => return Some("gif"),
        _ => {}
    }
    let guessed = mime_guess::from_path(filename).first()?;
    match guessed.essence_str() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Decode the upload and shrink it to fit `LOGO_MAX_DIMENSION`, keeping the
/// aspect ratio. The result is always PNG.
pub fn prepare_logo(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let img = if img.width() > LOGO_MAX_DIMENSION || img.height() > LOGO_MAX_DIMENSION {
        img.resize(LOGO_MAX_DIMENSION, LOGO_MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

pub fn logo_path(media_dir: &str, slug: &str) -> PathBuf {
    PathBuf::from(media_dir).join(slug).join("logo.png")
}

/// Absolute URL under which a center's logo is served.
pub fn public_logo_url(app_base_url: &str, slug: &str) -> String {
    format!("{}/api/logos/{slug}", app_base_url.trim_end_matches('/'))
}

fn validate_settings(req: &UpdateSettingsRequest) -> ServiceResult<()> {
    if let Some(currency) = &req.currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ServiceError::validation(
                "currency must be a 3-letter uppercase code",
            ));
        }
    }
    if let Some(day) = req.fee_due_day {
        if !(1..=28).contains(&day) {
            return Err(ServiceError::validation("fee_due_day must be between 1 and 28"));
        }
    }
    if let Some(sender) = &req.sms_sender_id {
        if sender.is_empty()
            || sender.len() > 11
            || !sender.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ServiceError::validation(
                "sms_sender_id must be 1 to 11 letters or digits",
            ));
        }
    }
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ServiceError::validation("name must not be empty"));
        }
    }
    Ok(())
}

pub struct CenterService;

impl CenterService {
    pub async fn list(pool: &PgPool) -> ServiceResult<Vec<Center>> {
        let centers = sqlx::query_as::<_, Center>("SELECT * FROM public.centers ORDER BY name")
            .fetch_all(pool)
            .await?;
        Ok(centers)
    }

    pub async fn get(pool: &PgPool, slug: &str) -> ServiceResult<Center> {
        sqlx::query_as::<_, Center>("SELECT * FROM public.centers WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::NotFound("center"))
    }

    /// Register a center and provision its schema. The registry row is
    /// removed again if provisioning fails.
    pub async fn create(pool: &PgPool, req: &CreateCenterRequest) -> ServiceResult<Center> {
        let slug = req.slug.trim().to_lowercase();
        if !is_valid_slug(&slug) {
            return Err(ServiceError::validation(
                "slug must be 2-63 characters of a-z, 0-9 and inner hyphens",
            ));
        }
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        let trial_days = req.trial_days.unwrap_or(DEFAULT_TRIAL_DAYS);
        if trial_days < 0 {
            return Err(ServiceError::validation("trial_days must not be negative"));
        }

        let center = sqlx::query_as::<_, Center>(
            "INSERT INTO public.centers (slug, name, address, phone, email, plan, trial_expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW() + $7 * INTERVAL '1 day')
             RETURNING *",
        )
        .bind(&slug)
        .bind(req.name.trim())
        .bind(&req.address)
        .bind(&req.phone)
        .bind(&req.email)
        .bind(req.plan.clone().unwrap_or(PlanType::Free))
        .bind(trial_days as f64)
        .fetch_one(pool)
        .await?;

        if let Err(e) = provision_tenant_schema(pool, &slug).await {
            let _ = sqlx::query("DELETE FROM public.centers WHERE slug = $1")
                .bind(&slug)
                .execute(pool)
                .await;
            return Err(ServiceError::Internal(e.context("schema provisioning failed")));
        }

        info!("Centers: created '{slug}'");
        Ok(center)
    }

    pub async fn update(
        pool: &PgPool,
        slug: &str,
        req: &UpdateCenterRequest,
    ) -> ServiceResult<Center> {
        sqlx::query_as::<_, Center>(
            "UPDATE public.centers SET
                name             = COALESCE($2, name),
                address          = COALESCE($3, address),
                phone            = COALESCE($4, phone),
                email            = COALESCE($5, email),
                plan             = COALESCE($6, plan),
                is_active        = COALESCE($7, is_active),
                trial_expires_at = COALESCE($8, trial_expires_at),
                updated_at       = NOW()
             WHERE slug = $1
             RETURNING *",
        )
        .bind(slug)
        .bind(&req.name)
        .bind(&req.address)
        .bind(&req.phone)
        .bind(&req.email)
        .bind(&req.plan)
        .bind(req.is_active)
        .bind(req.trial_expires_at)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("center"))
    }

    /// Drop the center's schema, registry row and media directory.
    pub async fn delete(pool: &PgPool, media_dir: &str, slug: &str) -> ServiceResult<()> {
        let mut tx = pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM public.centers WHERE slug = $1")
            .bind(slug)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(ServiceError::NotFound("center"));
        }
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema_name(slug)))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let dir = Path::new(media_dir).join(slug);
        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Could not delete media directory {:?}: {}", dir, e);
            }
        }
        info!("Centers: deleted '{slug}'");
        Ok(())
    }

    pub async fn update_settings(
        pool: &PgPool,
        slug: &str,
        req: &UpdateSettingsRequest,
    ) -> ServiceResult<Center> {
        validate_settings(req)?;
        sqlx::query_as::<_, Center>(
            "UPDATE public.centers SET
                name          = COALESCE($2, name),
                address       = COALESCE($3, address),
                phone         = COALESCE($4, phone),
                email         = COALESCE($5, email),
                currency      = COALESCE($6, currency),
                fee_due_day   = COALESCE($7, fee_due_day),
                sms_sender_id = COALESCE($8, sms_sender_id),
                updated_at    = NOW()
             WHERE slug = $1
             RETURNING *",
        )
        .bind(slug)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.address)
        .bind(&req.phone)
        .bind(&req.email)
        .bind(&req.currency)
        .bind(req.fee_due_day)
        .bind(&req.sms_sender_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("center"))
    }

    /// Store the center's own SMS gateway key, sealed under its derived key.
    /// An empty key clears it.
    pub async fn set_sms_credentials(
        pool: &PgPool,
        master_key: Option<&[u8; 32]>,
        slug: &str,
        api_key: &str,
    ) -> ServiceResult<Center> {
        let api_key = api_key.trim();
        let (ciphertext, iv, tag) = if api_key.is_empty() {
            (None, None, None)
        } else {
            let master = master_key.ok_or(ServiceError::NotConfigured("encryption master key"))?;
            let sealed = encryption::seal_secret(master, slug, api_key)?;
            (Some(sealed.ciphertext), Some(sealed.iv), Some(sealed.tag))
        };

        sqlx::query_as::<_, Center>(
            "UPDATE public.centers SET
                sms_api_key_enc = $2, sms_api_key_iv = $3, sms_api_key_tag = $4,
                updated_at = NOW()
             WHERE slug = $1
             RETURNING *",
        )
        .bind(slug)
        .bind(ciphertext)
        .bind(iv)
        .bind(tag)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("center"))
    }

    pub async fn set_logo_url(pool: &PgPool, slug: &str, logo_url: Option<&str>) -> ServiceResult<()> {
        sqlx::query("UPDATE public.centers SET logo_url = $1, updated_at = NOW() WHERE slug = $2")
            .bind(logo_url)
            .bind(slug)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> UpdateSettingsRequest {
        UpdateSettingsRequest {
            name: None,
            address: None,
            phone: None,
            email: None,
            currency: None,
            fee_due_day: None,
            sms_sender_id: None,
        }
    }

    #[test]
    fn due_day_must_exist_in_every_month() {
        let mut req = settings();
        req.fee_due_day = Some(28);
        assert!(validate_settings(&req).is_ok());
        req.fee_due_day = Some(29);
        assert!(validate_settings(&req).is_err());
        req.fee_due_day = Some(0);
        assert!(validate_settings(&req).is_err());
    }

    #[test]
    fn currency_and_sender_are_checked() {
        let mut req = settings();
        req.currency = Some("usd".into());
        assert!(validate_settings(&req).is_err());
        req.currency = Some("KES".into());
        req.sms_sender_id = Some("BRIGHTMINDS1".into());
        assert!(validate_settings(&req).is_err());
        req.sms_sender_id = Some("BRIGHT".into());
        assert!(validate_settings(&req).is_ok());
    }

    #[test]
    fn image_ext_from_type_or_name() {
        assert_eq!(detect_image_ext("image/png", "x"), Some("png"));
        assert_eq!(detect_image_ext("application/octet-stream", "logo.JPEG"), Some("jpg"));
        assert_eq!(detect_image_ext("", "logo.webp"), Some("webp"));
        assert_eq!(detect_image_ext("", "logo.svg"), None);
    }

    #[test]
    fn large_logo_is_downscaled() {
        let img = image::DynamicImage::new_rgb8(1024, 256);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let out = prepare_logo(&png).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 128));
    }

    #[test]
    fn garbage_is_not_a_logo() {
        assert!(prepare_logo(b"definitely not an image").is_err());
    }
}
