//! # Error Handling
//!
//! Two families of errors live here:
//!
//! ### `EngineError` - one unit of work failed
//! Returned by every decode and synthesis call. A session that receives one
//! logs it and carries on with the next segment or message; it never reaches
//! the client over the data channel.
//!
//! ### `AppError` - an HTTP request failed
//! Used by the plain HTTP endpoints and by the websocket upgrade handlers. An
//! upgrade that fails this way never creates a session.
//!
//! ## HTTP Status Code Mapping:
//! - Internal → 500 (Internal Server Error)
//! - UpgradeFailed → 400 (Bad Request)
//! - ServiceUnavailable → 503 (session limit reached)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failure of a single recognition or synthesis unit.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No engine is configured for this kind of work
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine could not be constructed
    #[error("engine construction failed: {0}")]
    Construction(String),

    /// The engine could not be reached
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The engine answered with an error status
    #[error("engine rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The engine answered with something we cannot use
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),

    /// The unit of work panicked; the panic was contained
    #[error("engine panicked: {0}")]
    Panicked(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::InvalidResponse(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

/// Custom error types for the HTTP surface.
///
/// ## Usage Example:
/// ```rust
/// use speech_relay::error::AppError;
/// let err = AppError::ServiceUnavailable("session limit reached".to_string());
/// assert!(err.to_string().contains("session limit"));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Too many live sessions
    ServiceUnavailable(String),

    /// The websocket handshake could not be completed
    UpgradeFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::UpgradeFailed(msg) => write!(f, "Upgrade failed: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent sessions (64) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpgradeFailed(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
            AppError::UpgradeFailed(msg) => ("upgrade_failed", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// An engine that cannot be built for a new session is a server-side problem.
impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::ServiceUnavailable("full".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::UpgradeFailed("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_engine_error_conversion() {
        let app: AppError = EngineError::Construction("no model".into()).into();
        assert!(matches!(app, AppError::Internal(ref msg) if msg.contains("no model")));

        let rejected = EngineError::Rejected { status: 500, body: "boom".into() };
        assert_eq!(rejected.to_string(), "engine rejected request (500): boom");
    }
}
