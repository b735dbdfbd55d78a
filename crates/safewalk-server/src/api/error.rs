//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use safewalk_core::SafewalkError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Carries the HTTP status, a machine-readable code and a message, and
/// renders as an [`ErrorResponse`] body.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    error_code: String,
    message: String,
    details: Option<serde_json::Value>,
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "NOT_CONNECTED",
    "message": "No trigger device is connected.",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "NOT_CONNECTED")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No trigger device is connected.")]
    pub message: String,

    /// Optional additional details.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// 400 Bad Request - invalid input from the client.
    #[must_use]
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error_code: error_code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details to the response body.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn error_code(&self) -> &str {
        &self.error_code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                error_code = %self.error_code,
                message = %self.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                error_code = %self.error_code,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: self.error_code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Convert from safewalk-core errors.
impl From<SafewalkError> for ApiError {
    fn from(err: SafewalkError) -> Self {
        let status = StatusCode::from_u16(err.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &err {
            SafewalkError::InvalidContact { field, .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };
        Self {
            status,
            error_code: err.error_code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

macro_rules! from_core_error {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(err: $error) -> Self {
                    Self::from(SafewalkError::from(err))
                }
            }
        )*
    };
}

from_core_error!(
    safewalk_core::ContactError,
    safewalk_core::PeripheralError,
    safewalk_core::countdown::CountdownError,
    safewalk_core::ConfigError,
);

#[cfg(test)]
mod tests {
    use super::*;
    use safewalk_core::PeripheralError;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("INVALID_UUID", "not a UUID");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("not a UUID"));
    }

    #[test]
    fn test_peripheral_errors_map_to_status() {
        let not_connected = ApiError::from(PeripheralError::NotConnected);
        assert_eq!(not_connected.status(), StatusCode::CONFLICT);
        assert_eq!(not_connected.error_code(), "NOT_CONNECTED");

        let missing = ApiError::from(PeripheralError::DeviceNotFound {
            device_id: "AA:BB".to_string(),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let stopped = ApiError::from(PeripheralError::ServiceStopped);
        assert_eq!(stopped.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "NO_RECIPIENTS".to_string(),
            message: "No emergency contacts configured.".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\":\"NO_RECIPIENTS\""));
    }
}
