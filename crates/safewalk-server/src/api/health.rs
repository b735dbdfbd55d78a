//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and supervisors.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use safewalk_core::HealthResponse;

use crate::state::SharedState;

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
///
/// Reports the service version with the current countdown and peripheral
/// link states.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns the service version together with the countdown state \
        and the trigger peripheral link state.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(
        state.countdown.snapshot().state,
        state.peripheral.snapshot().state,
    ))
}

#[cfg(test)]
mod tests {
    use safewalk_core::{CountdownState, LinkState};

    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse::ok(CountdownState::Armed, LinkState::Disconnected);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"countdown\":\"ARMED\""));
        assert!(json.contains("\"peripheral\":\"DISCONNECTED\""));
    }
}
