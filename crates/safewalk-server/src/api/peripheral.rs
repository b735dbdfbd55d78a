//! Trigger peripheral API endpoints.
//!
//! Scanning, connecting to the trigger device and raw characteristic access.
//! Trigger notifications from a connected device reach the countdown
//! without going through this API.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use safewalk_core::peripheral::PeripheralSession;
use safewalk_core::PeripheralSnapshot;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Longest scan window a client may request.
pub const MAX_SCAN_WINDOW_SECS: u64 = 120;

/// Creates the peripheral router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_peripheral))
        .route("/scan", post(start_scan))
        .route("/scan/stop", post(stop_scan))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route(
            "/characteristics/{service}/{characteristic}",
            get(read_characteristic).put(write_characteristic),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for starting a scan.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ScanQuery {
    /// Scan window in seconds. Defaults to `peripheral.scan_window_secs`.
    #[param(example = 10, minimum = 1, maximum = 120)]
    pub window_secs: Option<u64>,
}

/// Request body for connecting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "device_id": "C4:7F:0E:12:34:56" }))]
pub struct ConnectRequest {
    /// Id of a device from the current scan results.
    #[schema(example = "C4:7F:0E:12:34:56")]
    pub device_id: String,
}

/// A characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value": [1] }))]
pub struct CharacteristicValue {
    /// Raw bytes.
    pub value: Vec<u8>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the peripheral session.
#[utoipa::path(
    get,
    path = "/api/peripheral",
    tag = "peripheral",
    operation_id = "getPeripheral",
    summary = "Get the peripheral session",
    description = "Returns the link state, the devices found by the current or last \
        scan and the connected device with its services.",
    responses(
        (status = 200, description = "Peripheral session", body = PeripheralSnapshot)
    )
)]
pub async fn get_peripheral(State(state): State<SharedState>) -> Json<PeripheralSnapshot> {
    Json(state.peripheral.snapshot())
}

/// Start scanning for trigger devices.
#[utoipa::path(
    post,
    path = "/api/peripheral/scan",
    tag = "peripheral",
    operation_id = "startScan",
    summary = "Start a scan",
    description = "Starts discovery for a bounded window. A scan already in progress \
        is left running. Results appear in the peripheral session as they arrive.",
    params(ScanQuery),
    responses(
        (status = 200, description = "Scan started", body = PeripheralSnapshot),
        (status = 400, description = "Window out of range", body = super::error::ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = super::error::ErrorResponse)
    )
)]
pub async fn start_scan(
    State(state): State<SharedState>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<PeripheralSnapshot>> {
    let window = match query.window_secs {
        Some(secs) if !(1..=MAX_SCAN_WINDOW_SECS).contains(&secs) => {
            return Err(ApiError::bad_request(
                "INVALID_SCAN_WINDOW",
                format!("window_secs must be between 1 and {MAX_SCAN_WINDOW_SECS}"),
            ));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };
    Ok(Json(state.peripheral.start_scan(window).await?))
}

/// Stop the running scan.
#[utoipa::path(
    post,
    path = "/api/peripheral/scan/stop",
    tag = "peripheral",
    operation_id = "stopScan",
    summary = "Stop scanning",
    description = "Stops discovery early. Does nothing when no scan is running.",
    responses(
        (status = 200, description = "Scan stopped", body = PeripheralSnapshot)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> ApiResult<Json<PeripheralSnapshot>> {
    Ok(Json(state.peripheral.stop_scan().await?))
}

/// Connect to a discovered device.
#[utoipa::path(
    post,
    path = "/api/peripheral/connect",
    tag = "peripheral",
    operation_id = "connectPeripheral",
    summary = "Connect to a device",
    description = "Connects to a device from the scan results, discovers its services \
        and subscribes to trigger notifications when available. Returns the existing \
        session when already connected.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connected", body = PeripheralSession),
        (status = 404, description = "Device not in the scan results", body = super::error::ErrorResponse),
        (status = 502, description = "Connection failed", body = super::error::ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<PeripheralSession>> {
    Ok(Json(state.peripheral.connect(&request.device_id).await?))
}

/// Disconnect the active device.
#[utoipa::path(
    post,
    path = "/api/peripheral/disconnect",
    tag = "peripheral",
    operation_id = "disconnectPeripheral",
    summary = "Disconnect",
    description = "Closes the connection. Does nothing when already disconnected.",
    responses(
        (status = 204, description = "Disconnected"),
        (status = 500, description = "The transport refused; the session is kept", body = super::error::ErrorResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.peripheral.disconnect().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Read a characteristic of the connected device.
#[utoipa::path(
    get,
    path = "/api/peripheral/characteristics/{service}/{characteristic}",
    tag = "peripheral",
    operation_id = "readCharacteristic",
    summary = "Read a characteristic",
    params(
        ("service" = String, Path, description = "Service UUID"),
        ("characteristic" = String, Path, description = "Characteristic UUID")
    ),
    responses(
        (status = 200, description = "Value read", body = CharacteristicValue),
        (status = 400, description = "Malformed UUID", body = super::error::ErrorResponse),
        (status = 409, description = "No device connected", body = super::error::ErrorResponse)
    )
)]
pub async fn read_characteristic(
    State(state): State<SharedState>,
    Path((service, characteristic)): Path<(String, String)>,
) -> ApiResult<Json<CharacteristicValue>> {
    let (service, characteristic) = parse_uuids(&service, &characteristic)?;
    let value = state
        .peripheral
        .read_characteristic(service, characteristic)
        .await?;
    Ok(Json(CharacteristicValue { value }))
}

/// Write a characteristic of the connected device.
#[utoipa::path(
    put,
    path = "/api/peripheral/characteristics/{service}/{characteristic}",
    tag = "peripheral",
    operation_id = "writeCharacteristic",
    summary = "Write a characteristic",
    params(
        ("service" = String, Path, description = "Service UUID"),
        ("characteristic" = String, Path, description = "Characteristic UUID")
    ),
    request_body = CharacteristicValue,
    responses(
        (status = 204, description = "Value written"),
        (status = 400, description = "Malformed UUID", body = super::error::ErrorResponse),
        (status = 409, description = "No device connected", body = super::error::ErrorResponse)
    )
)]
pub async fn write_characteristic(
    State(state): State<SharedState>,
    Path((service, characteristic)): Path<(String, String)>,
    Json(body): Json<CharacteristicValue>,
) -> ApiResult<StatusCode> {
    let (service, characteristic) = parse_uuids(&service, &characteristic)?;
    state
        .peripheral
        .write_characteristic(service, characteristic, body.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_uuids(service: &str, characteristic: &str) -> ApiResult<(Uuid, Uuid)> {
    let parse = |name: &str, value: &str| {
        Uuid::parse_str(value).map_err(|_| {
            ApiError::bad_request("INVALID_UUID", format!("{name} is not a UUID: '{value}'"))
        })
    };
    Ok((
        parse("service", service)?,
        parse("characteristic", characteristic)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuids() {
        let ok = parse_uuids(
            "0000fe10-0000-1000-8000-00805f9b34fb",
            "0000fe11-0000-1000-8000-00805f9b34fb",
        );
        assert!(ok.is_ok());

        let err = parse_uuids("fe10", "0000fe11-0000-1000-8000-00805f9b34fb").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INVALID_UUID");
    }
}
