//! Maps [`LoadgenError`] onto an HTTP response carrying the `{error_type,
//! error_code, error_message, retryable}` envelope from §7, the same
//! newtype-plus-`IntoResponse` shape the donor control-plane server uses
//! for its own domain error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use loadgen_core::{ErrorEnvelope, ErrorType, LoadgenError};

pub struct AppError(pub LoadgenError);

impl From<LoadgenError> for AppError {
    fn from(err: LoadgenError) -> Self {
        AppError(err)
    }
}

fn status_for(error_type: ErrorType) -> StatusCode {
    match error_type {
        ErrorType::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorType::FailedPrecondition => StatusCode::CONFLICT,
        ErrorType::NotFound => StatusCode::NOT_FOUND,
        ErrorType::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorType::Forbidden => StatusCode::FORBIDDEN,
        ErrorType::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorType::ResourceExhausted => StatusCode::CONFLICT,
        ErrorType::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorType::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorType::Conflict => StatusCode::CONFLICT,
        ErrorType::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorType::NotImplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope::from(&self.0);
        let status = status_for(envelope.error_type);
        (status, Json(envelope)).into_response()
    }
}
