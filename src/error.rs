//! # Error Handling
//!
//! Error types for the voice pipeline server and how they are turned into HTTP responses.
//!
//! ## Error Policy by Layer:
//! - **Engines and providers**: return `anyhow::Result` so failures carry context
//! - **Pipeline stages**: recognition and generation failures are *values* (an error marker
//!   or a fallback answer), synthesis failures are propagated and caught by the agent
//! - **HTTP surface**: everything is converted into [`AppError`], which renders a JSON body
//!
//! ## Key Rust Concepts:
//! - **Enums for error types**: each variant is one failure category with a message
//! - **From trait**: lets `?` convert foreign errors automatically
//! - **ResponseError trait**: actix-web turns the error into an HTTP response for us

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
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

/// Anything bubbling up through `anyhow` is treated as an internal failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<InvalidRoleError> for AppError {
    fn from(err: InvalidRoleError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// A conversation message was given a role other than `user` or `assistant`.
///
/// The `system` role is deliberately rejected: the system prompt lives outside the
/// message history and is only injected when the context is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRoleError {
    pub role: String,
}

impl InvalidRoleError {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

impl fmt::Display for InvalidRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message role '{}': expected 'user' or 'assistant'", self.role)
    }
}

impl std::error::Error for InvalidRoleError {}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::ConfigError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_role_converts_to_validation_error() {
        let err: AppError = InvalidRoleError::new("system").into();
        match err {
            AppError::ValidationError(msg) => assert!(msg.contains("system")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
