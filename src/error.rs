use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("service not configured: {0}")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ServiceError::Database(e) => {
                constraint_violation(e).map_or(StatusCode::INTERNAL_SERVER_ERROR, |(s, _)| s)
            }
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Status and client message for SQLSTATEs caused by the request's data.
fn sqlstate_response(code: &str) -> Option<(StatusCode, &'static str)> {
    match code {
        "23505" => Some((
            StatusCode::CONFLICT,
            "A record with the same unique value already exists",
        )),
        "23503" => Some((
            StatusCode::UNPROCESSABLE_ENTITY,
            "A referenced record does not exist or is still in use",
        )),
        "23514" => Some((StatusCode::UNPROCESSABLE_ENTITY, "A value is out of the allowed range")),
        "22001" => Some((StatusCode::UNPROCESSABLE_ENTITY, "A value is too long")),
        _ => None,
    }
}

fn constraint_violation(e: &sqlx::Error) -> Option<(StatusCode, &'static str)> {
    e.as_database_error()
        .and_then(|d| d.code())
        .and_then(|code| sqlstate_response(&code))
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = err.status();
        let message = match &err {
            ServiceError::Database(sqlx::Error::RowNotFound) => "Record not found".to_string(),
            ServiceError::Database(e) => match constraint_violation(e) {
                Some((_, msg)) => {
                    tracing::warn!("rejected write: {e}");
                    msg.to_string()
                }
                None => {
                    tracing::error!("database error: {e}");
                    "Database error".to_string()
                }
            },
            ServiceError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message })))
    }
}

pub fn forbidden() -> ApiError {
    (StatusCode::FORBIDDEN, Json(json!({ "error": "Access denied" })))
}

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_variant() {
        assert_eq!(ServiceError::NotFound("student").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::validation("bad").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ServiceError::conflict("dup").status(), StatusCode::CONFLICT);
        assert_eq!(
            ServiceError::Upstream("down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn data_errors_from_postgres_are_client_errors() {
        assert_eq!(sqlstate_response("23505").unwrap().0, StatusCode::CONFLICT);
        assert_eq!(sqlstate_response("23503").unwrap().0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(sqlstate_response("23514").unwrap().0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(sqlstate_response("22001").unwrap().0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(sqlstate_response("40001"), None);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let (status, Json(body)) =
            ApiError::from(ServiceError::Internal(anyhow::anyhow!("secret path /etc/x")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn validation_message_is_returned() {
        let (_, Json(body)) = ApiError::from(ServiceError::validation("score out of range"));
        assert_eq!(body["error"], "score out of range");
    }
}
