use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use airlock_core::{AirlockError, ErrorKind};

pub type AppResult<T> = Result<T, AppError>;

/// HTTP-facing error: a status code plus the engine's stable kind code and
/// a human message, serialized as `{"error": {"kind", "message"}}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "io", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invariant", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "permission_denied", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_denied", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        }));

        (self.status, body).into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidTransition | ErrorKind::Precondition => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Invariant => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AirlockError> for AppError {
    fn from(err: AirlockError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Io {
            tracing::error!(error = %err, "internal error");
            // Internal details stay in the logs.
            return Self::new(status_for(kind), kind.as_str(), "internal error");
        }
        Self::new(status_for(kind), kind.as_str(), err.to_string())
    }
}

impl From<airlock_model::ModelError> for AppError {
    fn from(err: airlock_model::ModelError) -> Self {
        Self::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_contract_statuses() {
        let err = AppError::from(AirlockError::PermissionDenied("nope".into()));
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.kind, "permission_denied");

        let err = AppError::from(AirlockError::Conflict("raced".into()));
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = AppError::from(AirlockError::Precondition("gate".into()));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err = AppError::from(AirlockError::upstream(Some(500), "bad"));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::from(AirlockError::Io(std::io::Error::other("secret path")));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal error");
    }
}
