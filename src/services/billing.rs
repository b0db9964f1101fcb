use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::info;

use crate::{
    config::Config,
    error::{ServiceError, ServiceResult},
    models::{
        billing::{BillingEvent, RedirectUrl},
        center::{Center, PlanType, SubscriptionStatus},
    },
};

/// True when `signature_hex` is the HMAC-SHA256 of `body` under `secret`.
/// Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Serialize)]
struct CheckoutBody<'a> {
    center_slug: &'a str,
    customer_id: Option<&'a str>,
    customer_email: Option<&'a str>,
    plan: &'a PlanType,
    success_url: String,
    cancel_url: String,
}

#[derive(Serialize)]
struct PortalBody<'a> {
    customer_id: &'a str,
    return_url: String,
}

/// Client for the hosted billing provider (checkout and customer portal).
pub struct BillingService {
    http: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    webhook_secret: Option<String>,
    app_base_url: String,
}

impl BillingService {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url: config.billing_api_url.clone(),
            api_key: config.billing_api_key.clone(),
            webhook_secret: config.billing_webhook_secret.clone(),
            app_base_url: config.app_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    fn endpoint(&self, path: &str) -> ServiceResult<(String, &str)> {
        match (&self.api_url, &self.api_key) {
            (Some(url), Some(key)) => Ok((format!("{}/{path}", url.trim_end_matches('/')), key)),
            _ => Err(ServiceError::NotConfigured("billing provider")),
        }
    }

    async fn post_for_url<T: Serialize>(&self, path: &str, body: &T) -> ServiceResult<RedirectUrl> {
        let (url, key) = self.endpoint(path)?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("billing provider unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream(format!(
                "billing provider returned {status}: {text}"
            )));
        }
        resp.json::<RedirectUrl>()
            .await
            .map_err(|e| ServiceError::Upstream(format!("invalid billing provider response: {e}")))
    }

    pub async fn checkout(&self, center: &Center, plan: &PlanType) -> ServiceResult<RedirectUrl> {
        if *plan == PlanType::Free {
            return Err(ServiceError::validation("the free plan needs no checkout"));
        }
        let base = &self.app_base_url;
        let body = CheckoutBody {
            center_slug: &center.slug,
            customer_id: center.billing_customer_id.as_deref(),
            customer_email: center.email.as_deref(),
            plan,
            success_url: format!("{base}/billing?status=success"),
            cancel_url: format!("{base}/billing?status=canceled"),
        };
        self.post_for_url("checkout-sessions", &body).await
    }

    pub async fn portal(&self, center: &Center) -> ServiceResult<RedirectUrl> {
        let customer_id = center
            .billing_customer_id
            .as_deref()
            .ok_or_else(|| ServiceError::conflict("center has no billing account yet"))?;
        let body = PortalBody {
            customer_id,
            return_url: format!("{}/billing", self.app_base_url),
        };
        self.post_for_url("portal-sessions", &body).await
    }

    /// Apply a provider event to the center's subscription fields.
    pub async fn apply_event(pool: &PgPool, event: &BillingEvent) -> ServiceResult<()> {
        let status = match event.event_type.as_str() {
            "subscription.deleted" => Some(SubscriptionStatus::Canceled),
            _ => event.status,
        };

        let result = sqlx::query(
            "UPDATE public.centers
             SET billing_customer_id = COALESCE($1, billing_customer_id),
                 subscription_status = COALESCE($2, subscription_status),
                 plan                = COALESCE($3, plan),
                 current_period_end  = COALESCE($4, current_period_end),
                 updated_at          = NOW()
             WHERE slug = $5",
        )
        .bind(&event.customer_id)
        .bind(status)
        .bind(&event.plan)
        .bind(event.current_period_end)
        .bind(&event.center_slug)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("center"));
        }
        info!(
            "Billing: {} applied to '{}' (status={:?}, plan={:?})",
            event.event_type, event.center_slug, status, event.plan
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"subscription.updated","center_slug":"alpha"}"#;
        let sig = sign("whsec_test", body).unwrap();
        assert!(verify_signature("whsec_test", body, &sig));
        assert!(verify_signature("whsec_test", body, &sig.to_uppercase()));
    }

    #[test]
    fn tampered_body_or_wrong_secret_is_rejected() {
        let body = br#"{"type":"subscription.updated","center_slug":"alpha"}"#;
        let sig = sign("whsec_test", body).unwrap();
        assert!(!verify_signature("whsec_other", body, &sig));
        assert!(!verify_signature("whsec_test", b"{}", &sig));
        assert!(!verify_signature("whsec_test", body, "not-hex"));
        assert!(!verify_signature("whsec_test", body, ""));
    }
}
