use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::{error::ApiError, AppState};

pub const SUPER_ADMIN_HEADER: &str = "X-Super-Admin-Key";

/// Both keys are MACed first so the comparison runs over equal-length
/// digests in constant time.
pub fn key_matches(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let digest = |key: &str| -> Option<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"super-admin-key").ok()?;
        mac.update(key.as_bytes());
        Some(mac)
    };
    let (Some(presented), Some(expected)) = (digest(presented), digest(expected)) else {
        return false;
    };
    expected.verify_slice(&presented.finalize().into_bytes()).is_ok()
}

/// Platform operator access for center provisioning.
pub struct SuperAdminAuth;

impl FromRequestParts<AppState> for SuperAdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let unauthorized =
            |msg: &str| (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg })));

        let key = parts
            .headers
            .get(SUPER_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing X-Super-Admin-Key header"))?;

        if !key_matches(key, &state.config.super_admin_key) {
            tracing::warn!("Rejected super-admin request with an invalid key");
            return Err(unauthorized("Invalid super-admin key"));
        }

        Ok(SuperAdminAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_configured_key_matches() {
        assert!(key_matches("super-key", "super-key"));
        assert!(!key_matches("super-kez", "super-key"));
        assert!(!key_matches("super-key-and-more", "super-key"));
        assert!(!key_matches("", "super-key"));
    }

    #[test]
    fn an_unset_key_never_matches() {
        assert!(!key_matches("", ""));
        assert!(!key_matches("anything", ""));
    }
}
