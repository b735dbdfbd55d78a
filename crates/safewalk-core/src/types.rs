//! Shared types and OpenAPI schemas.
//!
//! Most API types live next to the logic that produces them (countdown,
//! peripheral, contacts). This module holds the few that span subsystems.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::countdown::CountdownState;
use crate::peripheral::LinkState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Current countdown state.
    pub countdown: CountdownState,

    /// Current trigger peripheral link state.
    pub peripheral: LinkState,
}

impl HealthResponse {
    /// Healthy response for the given subsystem states.
    #[must_use]
    pub fn ok(countdown: CountdownState, peripheral: LinkState) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            countdown,
            peripheral,
        }
    }
}
