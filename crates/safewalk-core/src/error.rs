//! Unified error types for the safewalk core library.
//!
//! This module provides a unified error type [`SafewalkError`] that covers all failure
//! modes across the safewalk system. Each module also has its own specific error type
//! (`ConfigError`, `StoreError`, `ContactError`, `LocationError`, `AlertError`,
//! `PeripheralError`, `CountdownError`) for internal use.
//!
//! # Propagation rules
//!
//! - Location failures inside a firing degrade the alert (sent without a location),
//!   they never abort it.
//! - `NoRecipients` aborts the send attempt and is surfaced.
//! - Delivery and peripheral failures are surfaced and never retried automatically.
//!
//! # Example
//!
//! ```rust
//! use safewalk_core::error::{SafewalkError, Result};
//!
//! fn require_recipients(recipients: &[String]) -> Result<()> {
//!     if recipients.is_empty() {
//!         return Err(SafewalkError::NoRecipients);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all safewalk operations.
#[derive(Debug, Error)]
pub enum SafewalkError {
    // =========================================================================
    // LOCATION ERRORS
    // =========================================================================
    /// Location permission was denied and no fix could be produced.
    #[error("Location permission denied. Grant location access to include a position in alerts.")]
    PermissionDenied,

    /// Neither a fresh nor a cached location fix is available.
    #[error("No location fix available and no cached location stored.")]
    NoFixAvailable,

    // =========================================================================
    // ALERT ERRORS
    // =========================================================================
    /// No emergency contact is configured, so no alert can be sent.
    #[error("No emergency contacts configured. Add at least one contact to the profile.")]
    NoRecipients,

    /// The messaging gateway reported that sending was cancelled.
    #[error("Alert delivery was cancelled.")]
    DeliveryCancelled,

    /// The messaging gateway failed to deliver the alert.
    #[error("Alert delivery failed: {0}")]
    DeliveryFailed(String),

    // =========================================================================
    // PERIPHERAL ERRORS
    // =========================================================================
    /// The requested device is not in the current discovered set.
    #[error("Device not found: '{0}'. Start a scan and make sure the trigger is powered on.")]
    DeviceNotFound(String),

    /// Connecting to the device or discovering its services failed.
    #[error("Connection to device failed: {0}")]
    ConnectionFailed(String),

    /// A characteristic operation was attempted without a connected device.
    #[error("No trigger device is connected.")]
    NotConnected,

    /// The Bluetooth stack is not usable on this system.
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// Starting or running a scan failed.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// A characteristic read or write failed.
    #[error("Characteristic operation failed: {0}")]
    CharacteristicFailed(String),

    // =========================================================================
    // PROFILE ERRORS
    // =========================================================================
    /// A contact number did not pass validation.
    #[error("Invalid contact for {field}: '{value}'. Expected exactly 10 digits.")]
    InvalidContact {
        /// Profile field that was rejected.
        field: String,
        /// The rejected value.
        value: String,
    },

    // =========================================================================
    // COUNTDOWN ERRORS
    // =========================================================================
    /// A background service is no longer running.
    #[error("Service stopped: {0}")]
    ServiceStopped(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for safewalk operations.
pub type Result<T> = std::result::Result<T, SafewalkError>;

impl SafewalkError {
    /// Returns `true` if this error is related to location resolution.
    #[inline]
    #[must_use]
    pub const fn is_location_error(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::NoFixAvailable)
    }

    /// Returns `true` if this error is related to alert delivery.
    #[inline]
    #[must_use]
    pub const fn is_alert_error(&self) -> bool {
        matches!(
            self,
            Self::NoRecipients | Self::DeliveryCancelled | Self::DeliveryFailed(_)
        )
    }

    /// Returns `true` if this error is related to the trigger peripheral.
    #[inline]
    #[must_use]
    pub const fn is_peripheral_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::ConnectionFailed(_)
                | Self::NotConnected
                | Self::BluetoothUnavailable(_)
                | Self::ScanFailed(_)
                | Self::CharacteristicFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if the user may reasonably retry the operation.
    ///
    /// Nothing is retried automatically; this only informs the presentation layer.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::ConnectionFailed(_)
                | Self::ScanFailed(_)
                | Self::DeliveryCancelled
                | Self::DeliveryFailed(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidContact { .. } => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 409 Conflict - not valid in the current state
            Self::NotConnected => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::NoRecipients | Self::ConfigParseError(_) | Self::ConfigValidationError(_) => {
                422
            }

            // 424 Failed Dependency - a collaborator refused or failed
            Self::PermissionDenied
            | Self::NoFixAvailable
            | Self::DeliveryCancelled
            | Self::DeliveryFailed(_) => 424,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the peripheral misbehaved
            Self::ConnectionFailed(_) | Self::CharacteristicFailed(_) => 502,

            // 503 Service Unavailable - Bluetooth hardware or stopped services
            Self::BluetoothUnavailable(_) | Self::ScanFailed(_) | Self::ServiceStopped(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NoFixAvailable => "NO_FIX_AVAILABLE",
            Self::NoRecipients => "NO_RECIPIENTS",
            Self::DeliveryCancelled => "DELIVERY_CANCELLED",
            Self::DeliveryFailed(_) => "DELIVERY_FAILED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::CharacteristicFailed(_) => "CHARACTERISTIC_FAILED",
            Self::InvalidContact { .. } => "INVALID_CONTACT",
            Self::ServiceStopped(_) => "SERVICE_STOPPED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for SafewalkError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StoreError> for SafewalkError {
    fn from(err: crate::storage::StoreError) -> Self {
        use crate::storage::StoreError;
        match err {
            StoreError::Io(e) => Self::IoError(e),
            other => Self::PersistenceError(other.to_string()),
        }
    }
}

impl From<crate::contacts::ContactError> for SafewalkError {
    fn from(err: crate::contacts::ContactError) -> Self {
        use crate::contacts::ContactError;
        match err {
            ContactError::Invalid { field, value } => Self::InvalidContact {
                field: field.to_string(),
                value,
            },
            ContactError::Store(e) => e.into(),
        }
    }
}

impl From<crate::location::LocationError> for SafewalkError {
    fn from(err: crate::location::LocationError) -> Self {
        use crate::location::LocationError;
        match err {
            LocationError::PermissionDenied => Self::PermissionDenied,
            LocationError::NoFixAvailable => Self::NoFixAvailable,
        }
    }
}

impl From<crate::alert::AlertError> for SafewalkError {
    fn from(err: crate::alert::AlertError) -> Self {
        use crate::alert::AlertError;
        match err {
            AlertError::NoRecipients => Self::NoRecipients,
            AlertError::DeliveryCancelled => Self::DeliveryCancelled,
            AlertError::DeliveryFailed { reason } => Self::DeliveryFailed(reason),
            AlertError::Store(e) => e.into(),
        }
    }
}

impl From<crate::peripheral::PeripheralError> for SafewalkError {
    fn from(err: crate::peripheral::PeripheralError) -> Self {
        use crate::peripheral::PeripheralError;
        match err {
            PeripheralError::DeviceNotFound { device_id } => Self::DeviceNotFound(device_id),
            PeripheralError::ConnectionFailed { device_id, message } => {
                Self::ConnectionFailed(format!("{device_id}: {message}"))
            }
            PeripheralError::NotConnected => Self::NotConnected,
            PeripheralError::AdapterUnavailable { message } => Self::BluetoothUnavailable(message),
            PeripheralError::ScanFailed { message } => Self::ScanFailed(message),
            PeripheralError::CharacteristicNotFound {
                service,
                characteristic,
            } => Self::CharacteristicFailed(format!(
                "characteristic {characteristic} not found in service {service}"
            )),
            PeripheralError::Io { message } => Self::CharacteristicFailed(message),
            PeripheralError::ServiceStopped => {
                Self::ServiceStopped("peripheral session".to_string())
            }
        }
    }
}

impl From<crate::countdown::CountdownError> for SafewalkError {
    fn from(err: crate::countdown::CountdownError) -> Self {
        use crate::countdown::CountdownError;
        match err {
            CountdownError::ServiceStopped => Self::ServiceStopped("countdown".to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_location_error_classification() {
        assert!(SafewalkError::PermissionDenied.is_location_error());
        assert!(SafewalkError::NoFixAvailable.is_location_error());

        assert!(!SafewalkError::NoRecipients.is_location_error());
    }

    #[test]
    fn test_alert_error_classification() {
        assert!(SafewalkError::NoRecipients.is_alert_error());
        assert!(SafewalkError::DeliveryCancelled.is_alert_error());
        assert!(SafewalkError::DeliveryFailed("gateway down".into()).is_alert_error());

        assert!(!SafewalkError::NotConnected.is_alert_error());
    }

    #[test]
    fn test_peripheral_error_classification() {
        assert!(SafewalkError::DeviceNotFound("AA".into()).is_peripheral_error());
        assert!(SafewalkError::ConnectionFailed("timeout".into()).is_peripheral_error());
        assert!(SafewalkError::NotConnected.is_peripheral_error());

        assert!(!SafewalkError::NoFixAvailable.is_peripheral_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(SafewalkError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(SafewalkError::ConfigValidationError("bad".into()).is_config_error());
        assert!(!SafewalkError::NotConnected.is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(SafewalkError::DeliveryFailed("x".into()).is_recoverable());
        assert!(SafewalkError::ConnectionFailed("x".into()).is_recoverable());
        assert!(!SafewalkError::NoRecipients.is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            SafewalkError::InvalidContact {
                field: "contact1".into(),
                value: "12".into()
            }
            .http_status_code(),
            400
        );
        assert_eq!(SafewalkError::DeviceNotFound("x".into()).http_status_code(), 404);
        assert_eq!(SafewalkError::NotConnected.http_status_code(), 409);
        assert_eq!(SafewalkError::NoRecipients.http_status_code(), 422);
        assert_eq!(SafewalkError::DeliveryCancelled.http_status_code(), 424);
        assert_eq!(
            SafewalkError::PersistenceError("disk".into()).http_status_code(),
            500
        );
        assert_eq!(
            SafewalkError::BluetoothUnavailable("off".into()).http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SafewalkError::NoRecipients.error_code(), "NO_RECIPIENTS");
        assert_eq!(SafewalkError::NotConnected.error_code(), "NOT_CONNECTED");
        assert_eq!(
            SafewalkError::DeviceNotFound("x".into()).error_code(),
            "DEVICE_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: SafewalkError = io_err.into();
        assert!(matches!(err, SafewalkError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_from_module_errors() {
        let err: SafewalkError = crate::location::LocationError::NoFixAvailable.into();
        assert!(matches!(err, SafewalkError::NoFixAvailable));

        let err: SafewalkError = crate::alert::AlertError::DeliveryFailed {
            reason: "timeout".into(),
        }
        .into();
        assert!(err.to_string().contains("timeout"));

        let err: SafewalkError = crate::peripheral::PeripheralError::DeviceNotFound {
            device_id: "AA:BB".into(),
        }
        .into();
        assert!(err.to_string().contains("AA:BB"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SafewalkError>();
        assert_sync::<SafewalkError>();
    }
}
