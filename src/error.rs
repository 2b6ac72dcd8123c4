/// Unified error types for OneLight
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the plug-control service
#[derive(Error, Debug)]
pub enum OneLightError {
    /// A device did not answer in time or refused the connection
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// A device answered with something we could not make sense of
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The mac is already claimed by a provisioned device
    #[error("Device {0} is already registered")]
    DuplicateRegistration(String),

    /// Ownership mismatch
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Unknown device or user id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence-layer invariant break
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Missing or invalid credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed request input or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for OneLightError {
    fn from(err: sqlx::Error) -> Self {
        OneLightError::ConstraintViolation(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OneLightError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OneLightError::ConstraintViolation(format!("Migration failed: {}", err))
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert OneLightError to HTTP response
impl IntoResponse for OneLightError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            OneLightError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            OneLightError::Unauthorized(_) => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                // Never reveal who owns the device
                "Forbidden".to_string(),
            ),
            OneLightError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            OneLightError::DuplicateRegistration(_) => (
                StatusCode::CONFLICT,
                "DuplicateRegistration",
                self.to_string(),
            ),
            OneLightError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            OneLightError::ConstraintViolation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "ConstraintViolation",
                "Request violates a storage constraint".to_string(),
            ),
            OneLightError::DeviceUnreachable(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "DeviceUnreachable",
                self.to_string(),
            ),
            OneLightError::Protocol(_) => (
                StatusCode::BAD_GATEWAY,
                "ProtocolError",
                self.to_string(),
            ),
            OneLightError::Internal(_) | OneLightError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for OneLight operations
pub type OneLightResult<T> = Result<T, OneLightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (OneLightError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (OneLightError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (OneLightError::DuplicateRegistration("x".into()), StatusCode::CONFLICT),
            (OneLightError::Authentication("x".into()), StatusCode::UNAUTHORIZED),
            (OneLightError::DeviceUnreachable("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (OneLightError::Protocol("x".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_sqlx_errors_become_constraint_violations() {
        let err: OneLightError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, OneLightError::ConstraintViolation(_)));
    }
}
