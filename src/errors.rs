use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ride::RideStatus;

/// Main error type for the swift-rides service
#[derive(Debug)]
pub enum RideError {
    // Request shape errors, rejected before any write
    Validation(Vec<FieldError>),

    // Lookup and identity errors
    NotFound(String),
    Unauthorized(String),

    // Lifecycle errors
    InvalidTransition { from: RideStatus, to: RideStatus },
    RideNoLongerAvailable,
    RideNotActive { status: RideStatus },
    CodeNotVerified,
    InvalidCode,

    // Storage and infrastructure errors
    StoreUnavailable(String),
    Serialization(String),
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for RideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideError::Validation(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            RideError::NotFound(what) => write!(f, "Not found: {}", what),
            RideError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            RideError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {} -> {}", from.as_str(), to.as_str())
            }
            RideError::RideNoLongerAvailable => write!(f, "Ride is no longer available"),
            RideError::RideNotActive { status } => {
                write!(f, "Ride is not active: status is {}", status.as_str())
            }
            RideError::CodeNotVerified => {
                write!(f, "Pickup code has not been verified for this ride")
            }
            RideError::InvalidCode => write!(f, "Pickup code does not match"),
            RideError::StoreUnavailable(msg) => write!(f, "Ride store unavailable: {}", msg),
            RideError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            RideError::Internal(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl std::error::Error for RideError {}

impl IntoResponse for RideError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match self {
            RideError::Validation(errors) => {
                let details = serde_json::to_value(&errors).ok();
                (
                    StatusCode::BAD_REQUEST,
                    "validation_failed",
                    "Validation errors occurred".to_string(),
                    details,
                )
            }
            RideError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Not found: {}", what),
                None,
            ),
            RideError::Unauthorized(msg) => (StatusCode::FORBIDDEN, "unauthorized", msg, None),
            RideError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                "invalid_transition",
                format!("Cannot move ride from {} to {}", from.as_str(), to.as_str()),
                None,
            ),
            RideError::RideNoLongerAvailable => (
                StatusCode::CONFLICT,
                "ride_no_longer_available",
                "Ride is no longer available".to_string(),
                None,
            ),
            RideError::RideNotActive { status } => (
                StatusCode::CONFLICT,
                "ride_not_active",
                format!("Ride is not active: status is {}", status.as_str()),
                None,
            ),
            RideError::CodeNotVerified => (
                StatusCode::CONFLICT,
                "code_not_verified",
                "Verify the pickup code before starting the ride".to_string(),
                None,
            ),
            RideError::InvalidCode => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_code",
                "Pickup code does not match".to_string(),
                None,
            ),
            RideError::StoreUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                msg,
                None,
            ),

            // Everything else is an internal server error
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
                None,
            ),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type RideResult<T> = Result<T, RideError>;

// Conversion implementations for common error types
impl From<redis::RedisError> for RideError {
    fn from(err: redis::RedisError) -> Self {
        RideError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RideError {
    fn from(err: serde_json::Error) -> Self {
        RideError::Serialization(err.to_string())
    }
}

// Helper functions for creating common errors
impl RideError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RideError::NotFound(what.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        RideError::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RideError::Internal(msg.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RideError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        RideError::NotFound(format!("ride {}", ride_id.into()))
    }

    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        RideError::NotFound(format!("user {}", user_id.into()))
    }
}
