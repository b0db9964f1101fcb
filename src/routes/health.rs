use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Database ping plus a best-effort Redis ping. Only the database decides the status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let redis = match state.redis.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            match pong {
                Ok(_) => "connected".to_string(),
                Err(e) => e.to_string(),
            }
        }
        Err(e) => e.to_string(),
    };

    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "db": "connected", "redis": redis })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "db": e.to_string(), "redis": redis })),
        ),
    }
}
