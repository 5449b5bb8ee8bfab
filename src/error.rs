//! Error handling for the stream guardrails server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::frame_validator::FrameRejection;
use crate::inference_client::BoundaryError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed, empty, oversized/undersized or undecodable frame
    #[error("Validation error: {0}")]
    Validation(FrameRejection),

    /// Session exceeded its per-second frame budget
    #[error("Rate limit exceeded: max {max_per_second} requests/second")]
    RateLimited { max_per_second: u32 },

    /// Inference boundary timeout, connection failure or non-success status
    #[error("{0}")]
    Transport(#[from] BoundaryError),

    /// Unparsable or unrecognized inbound message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport failures may succeed on a later frame; everything else is permanent
    /// for the payload that caused it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<FrameRejection> for Error {
    fn from(rejection: FrameRejection) -> Self {
        match rejection {
            FrameRejection::RateLimited { max_per_second } => Error::RateLimited { max_per_second },
            other => Error::Validation(other),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            Error::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            Error::Protocol(_) => (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_rejection_maps_to_rate_limited() {
        let err: Error = FrameRejection::RateLimited { max_per_second: 30 }.into();
        assert!(matches!(err, Error::RateLimited { max_per_second: 30 }));
        assert_eq!(err.to_string(), "Rate limit exceeded: max 30 requests/second");
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::Transport(BoundaryError::Timeout).is_retryable());
        assert!(!Error::from(FrameRejection::Empty).is_retryable());
        assert!(!Error::Protocol("bad json".to_string()).is_retryable());
    }
}
