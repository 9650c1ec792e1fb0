use thiserror::Error;

/// Unified error type for the lifecycle engine.
///
/// Every variant maps onto a stable machine-readable [`ErrorKind`] code that
/// travels in API error bodies and decides CLI exit codes.
#[derive(Error, Debug)]
pub enum AirlockError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("upstream failure{}: {message}", status.map(|s| format!(" (http {s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("snapshot store error: {0}")]
    Snapshot(#[from] cacache::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Model(#[from] airlock_model::ModelError),
}

impl AirlockError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AirlockError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AirlockError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            AirlockError::Precondition(_) => ErrorKind::Precondition,
            AirlockError::Conflict(_) => ErrorKind::Conflict,
            AirlockError::NotFound(_) => ErrorKind::NotFound,
            AirlockError::Invariant(_) | AirlockError::Model(_) => ErrorKind::Invariant,
            AirlockError::Upstream { .. } => ErrorKind::Upstream,
            AirlockError::Timeout(_) => ErrorKind::Timeout,
            AirlockError::Io(_)
            | AirlockError::Database(_)
            | AirlockError::Snapshot(_)
            | AirlockError::Serialization(_) => ErrorKind::Io,
        }
    }
}

/// Machine-readable error codes; serialized snake_case in API bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    InvalidTransition,
    Precondition,
    Conflict,
    NotFound,
    Invariant,
    Upstream,
    Timeout,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invariant => "invariant",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        }
    }

    /// Process exit code for administrative CLIs: 0 success, 1 validation
    /// error, 2 state error, 3 I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::NotFound | ErrorKind::Invariant | ErrorKind::Precondition => 1,
            ErrorKind::InvalidTransition | ErrorKind::Conflict | ErrorKind::PermissionDenied => 2,
            ErrorKind::Upstream | ErrorKind::Timeout | ErrorKind::Io => 3,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, AirlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_codes() {
        assert_eq!(
            AirlockError::PermissionDenied("x".into()).kind().as_str(),
            "permission_denied"
        );
        assert_eq!(
            AirlockError::upstream(Some(503), "bad gateway").kind().as_str(),
            "upstream"
        );
        assert_eq!(
            AirlockError::Invariant("dup".into()).kind().as_str(),
            "invariant"
        );
    }

    #[test]
    fn exit_codes_follow_cli_contract() {
        assert_eq!(ErrorKind::NotFound.exit_code(), 1);
        assert_eq!(ErrorKind::InvalidTransition.exit_code(), 2);
        assert_eq!(ErrorKind::Io.exit_code(), 3);
    }

    #[test]
    fn upstream_message_includes_status() {
        let err = AirlockError::upstream(Some(400), "rejected");
        assert_eq!(err.to_string(), "upstream failure (http 400): rejected");
    }
}
