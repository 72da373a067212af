use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::web::validate::ValidationError;

/// Message returned when no upstream credential is configured.
pub const CONFIGURATION_ERROR: &str = "Server configuration error.";

/// Fallback when an upstream error body carries no usable message.
pub const GENERIC_UPSTREAM_ERROR: &str = "Upstream API request failed.";

/// Failures at the relay boundary. Every variant renders as a JSON body of
/// the form `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(#[from] ValidationError),

    #[error("upstream credential is not configured")]
    ServiceUnavailable,

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream returned {status}: {message}")]
    UpstreamError { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Single-line message that is safe to hand to the browser.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::BadRequest(e) => e.to_string(),
            RelayError::ServiceUnavailable => CONFIGURATION_ERROR.to_string(),
            RelayError::UpstreamUnreachable(_) => {
                "Failed to reach the language model service.".to_string()
            }
            RelayError::UpstreamError { message, .. } => message.clone(),
            RelayError::Internal(_) => "An unexpected error occurred.".to_string(),
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.public_message() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_400() {
        let err = RelayError::from(ValidationError::MissingMessages);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.public_message(),
            "Messages array is required and must not be empty."
        );
    }

    #[test]
    fn upstream_failures_are_500_without_raw_details() {
        let err = RelayError::UpstreamUnreachable("tcp connect error: refused".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("refused"));

        let err = RelayError::UpstreamError {
            status: 429,
            message: "Rate limit reached".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Rate limit reached");
    }

    #[test]
    fn missing_credential_message() {
        assert_eq!(
            RelayError::ServiceUnavailable.public_message(),
            CONFIGURATION_ERROR
        );
    }
}
