use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::models::auth::{AuthenticatedUser, Claims, UserRole};

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid Authorization header format"))?;

        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "JWT secret not configured"))?;

        let user = decode_access_token(token, &secret.0)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

        // Cross-tenant access: unless super-admin, the token tenant must match the requested tenant.
        if user.role != UserRole::SuperAdmin {
            if let Some(x_tenant) = parts
                .headers
                .get("X-Tenant")
                .and_then(|v| v.to_str().ok())
            {
                if user.tenant != x_tenant.to_lowercase() {
                    return Err((StatusCode::FORBIDDEN, "Tenant mismatch"));
                }
            }
        }

        Ok(user)
    }
}

/// Extension type to carry the JWT secret through request extensions.
#[derive(Clone)]
pub struct JwtSecret(pub String);

/// Verify an access token issued by the auth provider.
pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        tenant: claims.tenant.to_lowercase(),
        role: claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn token(secret: &str, sub: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            tenant: "Bright-Minds".into(),
            role: UserRole::Staff,
            exp: (now + exp_offset) as usize,
            iat: now as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn decodes_valid_token_and_lowercases_tenant() {
        let id = Uuid::new_v4();
        let user = decode_access_token(&token("s3cret", &id.to_string(), 600), "s3cret").unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.tenant, "bright-minds");
        assert_eq!(user.role, UserRole::Staff);
    }

    #[test]
    fn rejects_wrong_secret_expired_and_bad_subject() {
        let id = Uuid::new_v4().to_string();
        assert!(decode_access_token(&token("s3cret", &id, 600), "other").is_err());
        assert!(decode_access_token(&token("s3cret", &id, -3600), "s3cret").is_err());
        assert!(decode_access_token(&token("s3cret", "not-a-uuid", 600), "s3cret").is_err());
    }
}
