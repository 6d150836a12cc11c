use serde::Serialize;

/// The wire error types from the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    ResourceExhausted,
    Timeout,
    Unavailable,
    Conflict,
    Internal,
    NotImplemented,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadgenError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Run is in a terminal state: {0}")]
    TerminalState(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Insufficient worker capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: u32, available: u32 },

    #[error("Invalid worker token")]
    InvalidWorkerToken,

    #[error("Invalid telemetry batch: {0}")]
    InvalidTelemetry(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Invalid Last-Event-ID: {0}")]
    InvalidLastEventId(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoadgenError {
    /// Maps this error onto the wire error-type taxonomy from the error envelope.
    pub fn error_type(&self) -> ErrorType {
        match self {
            LoadgenError::Validation(_) => ErrorType::InvalidArgument,
            LoadgenError::RunNotFound(_) | LoadgenError::WorkerNotFound(_) => ErrorType::NotFound,
            LoadgenError::TerminalState(_) => ErrorType::FailedPrecondition,
            LoadgenError::InvalidTransition(_) => ErrorType::FailedPrecondition,
            LoadgenError::InsufficientCapacity { .. } => ErrorType::ResourceExhausted,
            LoadgenError::InvalidWorkerToken => ErrorType::Unauthorized,
            LoadgenError::InvalidTelemetry(_) => ErrorType::InvalidArgument,
            LoadgenError::RateLimited => ErrorType::RateLimited,
            LoadgenError::InvalidLastEventId(_) | LoadgenError::InvalidCursor(_) => {
                ErrorType::InvalidArgument
            }
            LoadgenError::Http(_) | LoadgenError::Io(_) | LoadgenError::Serde(_) => {
                ErrorType::Unavailable
            }
            LoadgenError::Internal(_) => ErrorType::Internal,
        }
    }

    /// A short machine-readable code, distinct from the broader [`ErrorType`].
    pub fn error_code(&self) -> &'static str {
        match self {
            LoadgenError::Validation(_) => "VALIDATION_ERROR",
            LoadgenError::RunNotFound(_) => "RUN_NOT_FOUND",
            LoadgenError::WorkerNotFound(_) => "WORKER_NOT_FOUND",
            LoadgenError::TerminalState(_) => "TERMINAL_STATE",
            LoadgenError::InvalidTransition(_) => "INVALID_TRANSITION",
            LoadgenError::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            LoadgenError::InvalidWorkerToken => "INVALID_WORKER_TOKEN",
            LoadgenError::InvalidTelemetry(_) => "INVALID_TELEMETRY",
            LoadgenError::RateLimited => "RATE_LIMITED",
            LoadgenError::InvalidLastEventId(_) => "INVALID_LAST_EVENT_ID",
            LoadgenError::InvalidCursor(_) => "INVALID_CURSOR",
            LoadgenError::Http(_) => "UPSTREAM_ERROR",
            LoadgenError::Io(_) => "IO_ERROR",
            LoadgenError::Serde(_) => "SERDE_ERROR",
            LoadgenError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a client may safely retry the request that produced this error.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            LoadgenError::InsufficientCapacity { .. }
                | LoadgenError::RateLimited
                | LoadgenError::Http(_)
                | LoadgenError::Internal(_)
        )
    }
}

impl Serialize for LoadgenError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// The `{error_type, error_code, error_message, retryable, details?}` envelope from §7.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error_type: ErrorType,
    pub error_code: &'static str,
    pub error_message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&LoadgenError> for ErrorEnvelope {
    fn from(err: &LoadgenError) -> Self {
        ErrorEnvelope {
            error_type: err.error_type(),
            error_code: err.error_code(),
            error_message: err.to_string(),
            retryable: err.retryable(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = LoadgenError::Validation("field X is required".to_string());
        assert_eq!(err.to_string(), "Validation error: field X is required");
    }

    #[test]
    fn run_not_found_maps_to_not_found_type() {
        let err = LoadgenError::RunNotFound("run_abc".to_string());
        assert_eq!(err.error_type(), ErrorType::NotFound);
        assert_eq!(err.error_code(), "RUN_NOT_FOUND");
        assert!(!err.retryable());
    }

    #[test]
    fn insufficient_capacity_is_retryable() {
        let err = LoadgenError::InsufficientCapacity {
            requested: 100,
            available: 40,
        };
        assert!(err.retryable());
        assert_eq!(err.error_type(), ErrorType::ResourceExhausted);
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("40"));
    }

    #[test]
    fn validation_is_never_retryable() {
        let err = LoadgenError::Validation("bad field".to_string());
        assert!(!err.retryable());
    }

    #[test]
    fn serialize_produces_string() {
        let err = LoadgenError::Validation("test error".to_string());
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"Validation error: test error\"");
    }

    #[test]
    fn envelope_from_error_carries_code_and_type() {
        let err = LoadgenError::InvalidWorkerToken;
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.error_code, "INVALID_WORKER_TOKEN");
        assert_eq!(envelope.error_type, ErrorType::Unauthorized);
        assert!(!envelope.retryable);
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LoadgenError = io_err.into();
        let msg = err.to_string();
        assert!(msg.contains("IO error"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn error_is_debug() {
        let err = LoadgenError::Validation("test".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Validation"));
    }
}
