use axum::Json;
use serde_json::{json, Value};

use crate::{middleware::tenant::TenantSlug, models::auth::AuthenticatedUser};

/// Identity carried by the caller's token.
pub async fn me(TenantSlug(tenant): TenantSlug, user: AuthenticatedUser) -> Json<Value> {
    Json(json!({
        "user_id": user.user_id,
        "tenant":  tenant,
        "role":    user.role,
        "is_admin": user.is_admin(),
    }))
}
