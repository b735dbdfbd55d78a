//! Countdown API endpoints.
//!
//! The countdown arms automatically when the service starts. If it reaches
//! zero before being disarmed, the user's contacts are alerted.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use safewalk_core::{CountdownSnapshot, TriggerSignal};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the countdown router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_countdown))
        .route("/arm", post(arm))
        .route("/disarm", post(disarm))
        .route("/signal", post(signal))
}

/// Request body for injecting a trigger signal.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "signal": "PANIC" }))]
pub struct SignalRequest {
    /// Signal to deliver, as if sent by the trigger device.
    pub signal: TriggerSignal,
}

/// Get the countdown state.
#[utoipa::path(
    get,
    path = "/api/countdown",
    tag = "countdown",
    operation_id = "getCountdown",
    summary = "Get the countdown state",
    description = "Returns the state (IDLE, ARMED or FIRING), the seconds remaining \
        and the report of the most recent firing.",
    responses(
        (status = 200, description = "Countdown state", body = CountdownSnapshot)
    )
)]
pub async fn get_countdown(State(state): State<SharedState>) -> Json<CountdownSnapshot> {
    Json(state.countdown.snapshot())
}

/// Arm or restart the countdown.
#[utoipa::path(
    post,
    path = "/api/countdown/arm",
    tag = "countdown",
    operation_id = "armCountdown",
    summary = "Arm the countdown",
    description = "Starts the countdown from its full length. Arming while armed \
        restarts it. Ignored while an alert is being sent.",
    responses(
        (status = 200, description = "Countdown state after the command", body = CountdownSnapshot),
        (status = 503, description = "Countdown service stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn arm(State(state): State<SharedState>) -> ApiResult<Json<CountdownSnapshot>> {
    Ok(Json(state.countdown.arm().await?))
}

/// Disarm the countdown.
#[utoipa::path(
    post,
    path = "/api/countdown/disarm",
    tag = "countdown",
    operation_id = "disarmCountdown",
    summary = "Disarm the countdown",
    description = "Stops the countdown without sending an alert. Has no effect when \
        idle or while an alert is being sent.",
    responses(
        (status = 200, description = "Countdown state after the command", body = CountdownSnapshot),
        (status = 503, description = "Countdown service stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn disarm(State(state): State<SharedState>) -> ApiResult<Json<CountdownSnapshot>> {
    Ok(Json(state.countdown.disarm().await?))
}

/// Deliver a trigger signal.
#[utoipa::path(
    post,
    path = "/api/countdown/signal",
    tag = "countdown",
    operation_id = "signalCountdown",
    summary = "Deliver a trigger signal",
    description = "Handles ARM or PANIC exactly as if the trigger device had sent it. \
        ARM starts an idle countdown but does not restart a running one; PANIC \
        sends the alert immediately.",
    request_body = SignalRequest,
    responses(
        (status = 200, description = "Countdown state after the signal", body = CountdownSnapshot),
        (status = 503, description = "Countdown service stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn signal(
    State(state): State<SharedState>,
    Json(request): Json<SignalRequest>,
) -> ApiResult<Json<CountdownSnapshot>> {
    Ok(Json(state.countdown.signal(request.signal).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_request_parsing() {
        let request: SignalRequest = serde_json::from_str(r#"{"signal":"PANIC"}"#).unwrap();
        assert_eq!(request.signal, TriggerSignal::Panic);
        assert!(serde_json::from_str::<SignalRequest>(r#"{"signal":"LOUD"}"#).is_err());
    }
}
