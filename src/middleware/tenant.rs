use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::{models::center::SubscriptionStatus, AppState};

/// Validates that a slug only contains lowercase ASCII letters, digits and hyphens,
/// does not start or end with a hyphen, and is between 2 and 63 characters.
/// The slug is interpolated into schema names, so this is the injection guard.
pub fn is_valid_slug(s: &str) -> bool {
    let len = s.len();
    (2..=63).contains(&len)
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Extracts the center slug from the `X-Tenant` header or first subdomain,
/// then validates the center is active and its subscription allows access.
#[derive(Debug, Clone)]
pub struct TenantSlug(pub String);

impl FromRequestParts<AppState> for TenantSlug {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let slug = extract_slug(parts)?;

        let row: Option<(bool, SubscriptionStatus, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                "SELECT is_active, subscription_status, trial_expires_at, current_period_end
                 FROM public.centers WHERE slug = $1",
        )
        .bind(&slug)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("tenant lookup failed for '{slug}': {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Database error" })))
        })?;

        match row {
            None => Err((StatusCode::NOT_FOUND, Json(json!({ "error": "Tenant not found" })))),
            Some((false, _, _, _)) => {
                Err((StatusCode::FORBIDDEN, Json(json!({ "error": "Account is inactive" }))))
            }
            Some((true, status, trial_expires_at, current_period_end)) => {
                let window = SubscriptionWindow {
                    trial_expires_at,
                    current_period_end,
                    past_due_grace: Duration::try_days(state.config.past_due_grace_days)
                        .unwrap_or_else(Duration::zero),
                };
                match subscription_block(status, &window, Utc::now()) {
                    Some(code) => Err((
                        StatusCode::PAYMENT_REQUIRED,
                        Json(json!({
                            "error": "Subscription required. Please update billing in settings.",
                            "code": code
                        })),
                    )),
                    None => Ok(TenantSlug(slug)),
                }
            }
        }
    }
}

pub struct SubscriptionWindow {
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub past_due_grace: Duration,
}

/// Returns the reason code when the subscription state blocks tenant access.
/// A `past_due` center without a known period end gets no grace.
pub fn subscription_block(
    status: SubscriptionStatus,
    window: &SubscriptionWindow,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    match status {
        SubscriptionStatus::Active => None,
        SubscriptionStatus::Canceled => Some("subscription_canceled"),
        SubscriptionStatus::PastDue => match window.current_period_end {
            Some(end)
                if end
                    .checked_add_signed(window.past_due_grace)
                    .is_some_and(|until| until >= now) =>
            {
                None
            }
            _ => Some("subscription_past_due"),
        },
        SubscriptionStatus::Trialing => match window.trial_expires_at {
            Some(expires_at) if expires_at < now => Some("trial_expired"),
            _ => None,
        },
    }
}

fn extract_slug(parts: &Parts) -> Result<String, (StatusCode, Json<Value>)> {
    // 1. X-Tenant header
    if let Some(tenant) = parts
        .headers
        .get("X-Tenant")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
    {
        if !is_valid_slug(&tenant) {
            return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid tenant identifier" }))));
        }
        return Ok(tenant);
    }

    // 2. Subdomain from Host header
    if let Some(host) = parts.headers.get("Host").and_then(|v| v.to_str().ok()) {
        let domain = host.split(':').next().unwrap_or(host);
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() >= 3 {
            let subdomain = labels[0].to_lowercase();
            if subdomain != "www" && subdomain != "api" {
                if !is_valid_slug(&subdomain) {
                    return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid tenant identifier" }))));
                }
                return Ok(subdomain);
            }
        }
    }

    Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing X-Tenant header" }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/students");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn slug_rules() {
        assert!(is_valid_slug("bright-minds"));
        assert!(is_valid_slug("a1"));
        assert!(!is_valid_slug("a"));
        assert!(!is_valid_slug("-abc"));
        assert!(!is_valid_slug("abc-"));
        assert!(!is_valid_slug("ab_c"));
        assert!(!is_valid_slug("ab\"; DROP SCHEMA x; --"));
        assert!(!is_valid_slug(&"a".repeat(64)));
    }

    #[test]
    fn header_wins_over_subdomain() {
        let parts = parts_with(&[("X-Tenant", "Alpha"), ("Host", "beta.tutor.app")]);
        assert_eq!(extract_slug(&parts).unwrap(), "alpha");
    }

    #[test]
    fn subdomain_is_used_when_header_missing() {
        let parts = parts_with(&[("Host", "beta.tutor.app:443")]);
        assert_eq!(extract_slug(&parts).unwrap(), "beta");
    }

    #[test]
    fn www_and_bare_domains_are_rejected() {
        let parts = parts_with(&[("Host", "www.tutor.app")]);
        assert_eq!(extract_slug(&parts).unwrap_err().0, StatusCode::BAD_REQUEST);
        let parts = parts_with(&[("Host", "tutor.app")]);
        assert_eq!(extract_slug(&parts).unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    fn window(trial: Option<DateTime<Utc>>, period_end: Option<DateTime<Utc>>) -> SubscriptionWindow {
        SubscriptionWindow {
            trial_expires_at: trial,
            current_period_end: period_end,
            past_due_grace: Duration::days(7),
        }
    }

    #[test]
    fn subscription_gate() {
        let now = Utc::now();
        let open = window(None, None);
        assert_eq!(subscription_block(SubscriptionStatus::Active, &open, now), None);
        assert_eq!(
            subscription_block(SubscriptionStatus::Canceled, &open, now),
            Some("subscription_canceled")
        );
        assert_eq!(
            subscription_block(SubscriptionStatus::Trialing, &window(Some(now - Duration::days(1)), None), now),
            Some("trial_expired")
        );
        assert_eq!(
            subscription_block(SubscriptionStatus::Trialing, &window(Some(now + Duration::days(1)), None), now),
            None
        );
    }

    #[test]
    fn past_due_is_allowed_only_within_grace() {
        let now = Utc::now();
        let inside = window(None, Some(now - Duration::days(6)));
        assert_eq!(subscription_block(SubscriptionStatus::PastDue, &inside, now), None);

        let at_edge = window(None, Some(now - Duration::days(7)));
        assert_eq!(subscription_block(SubscriptionStatus::PastDue, &at_edge, now), None);

        let beyond = window(None, Some(now - Duration::days(7) - Duration::seconds(1)));
        assert_eq!(
            subscription_block(SubscriptionStatus::PastDue, &beyond, now),
            Some("subscription_past_due")
        );

        assert_eq!(
            subscription_block(SubscriptionStatus::PastDue, &window(None, None), now),
            Some("subscription_past_due")
        );
    }
}
