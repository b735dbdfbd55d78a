//! OpenAPI specification generation for the safewalk API.
//!
//! The generated document is served at `/api/openapi.json`, browsable through
//! Swagger UI, and written to disk by the `gen-openapi` binary for client
//! generation.

use axum::Json;
use safewalk_core::alert::DeliveryReceipt;
use safewalk_core::countdown::ArmSource;
use safewalk_core::peripheral::{PeripheralDevice, PeripheralSession, ServiceInfo};
use safewalk_core::{
    AlertOutcome, Coordinate, CountdownSnapshot, CountdownState, FireCause, FiringReport,
    Freshness, HealthResponse, LinkState, PeripheralSnapshot, Profile, ResolvedLocation,
    TriggerSignal,
};
use utoipa::OpenApi;

use super::countdown::SignalRequest;
use super::error::ErrorResponse;
use super::peripheral::{CharacteristicValue, ConnectRequest};

/// Serve the OpenAPI specification as JSON.
///
/// Available at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for safewalk.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "safewalk API",
        version = "0.1.0",
        description = r#"
# safewalk API

safewalk sends an emergency text with your location to your contacts when a
countdown you did not cancel runs out, or the moment you squeeze your trigger.

## Overview

1. **Countdown**: Armed on startup. Disarm it before it reaches zero, or the alert goes out.
2. **Profile**: Your name and up to two 10-digit emergency contacts.
3. **Peripheral**: Scan for and connect to the Bluetooth trigger. ARM signals start the
   countdown, PANIC signals send the alert immediately.

## Behaviour worth knowing

- Only one alert is sent per countdown expiry, and commands are ignored while it is sent.
- A missing location never blocks the alert; the message is sent without a link.
- Failed deliveries are reported in the countdown's `last_firing` and are not retried.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local safewalk server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "countdown", description = "Alert countdown: arm, disarm and trigger signals"),
        (name = "profile", description = "Sender name and emergency contacts"),
        (name = "peripheral", description = "Bluetooth trigger scanning, connection and characteristic access")
    ),
    paths(
        super::health::health_check,
        super::countdown::get_countdown,
        super::countdown::arm,
        super::countdown::disarm,
        super::countdown::signal,
        super::profile::get_profile,
        super::profile::update_profile,
        super::peripheral::get_peripheral,
        super::peripheral::start_scan,
        super::peripheral::stop_scan,
        super::peripheral::connect,
        super::peripheral::disconnect,
        super::peripheral::read_characteristic,
        super::peripheral::write_characteristic,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Countdown
            CountdownSnapshot,
            CountdownState,
            TriggerSignal,
            SignalRequest,
            ArmSource,
            FireCause,
            FiringReport,
            AlertOutcome,
            DeliveryReceipt,
            ResolvedLocation,
            Coordinate,
            Freshness,
            // Profile
            Profile,
            // Peripheral
            PeripheralSnapshot,
            PeripheralSession,
            PeripheralDevice,
            ServiceInfo,
            LinkState,
            ConnectRequest,
            CharacteristicValue,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "safewalk API");
        assert!(spec.paths.paths.contains_key("/api/countdown/arm"));
        assert!(spec
            .paths
            .paths
            .contains_key("/api/peripheral/characteristics/{service}/{characteristic}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"safewalk API\""));
        assert!(json.contains("CountdownSnapshot"));
    }
}
