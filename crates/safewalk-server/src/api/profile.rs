//! Contact profile API endpoints.
//!
//! The profile holds the name used in the alert message and up to two
//! ten-digit emergency contacts. Blank contacts are allowed.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use safewalk_core::Profile;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the profile router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_profile).put(update_profile))
}

/// Get the contact profile.
#[utoipa::path(
    get,
    path = "/api/profile",
    tag = "profile",
    operation_id = "getProfile",
    summary = "Get the contact profile",
    description = "Returns the sender name and both emergency contacts. Unset \
        values are empty strings.",
    responses(
        (status = 200, description = "Profile retrieved", body = Profile),
        (status = 500, description = "Store unreadable", body = super::error::ErrorResponse)
    )
)]
pub async fn get_profile(State(state): State<SharedState>) -> ApiResult<Json<Profile>> {
    Ok(Json(state.profiles.load()?))
}

/// Replace the contact profile.
#[utoipa::path(
    put,
    path = "/api/profile",
    tag = "profile",
    operation_id = "updateProfile",
    summary = "Update the contact profile",
    description = "Trims and validates every field, then saves. Each non-empty \
        contact must be exactly 10 digits. Nothing is written when validation fails.",
    request_body = Profile,
    responses(
        (status = 200, description = "Profile saved", body = Profile),
        (status = 400, description = "A contact is not 10 digits", body = super::error::ErrorResponse)
    )
)]
pub async fn update_profile(
    State(state): State<SharedState>,
    Json(profile): Json<Profile>,
) -> ApiResult<Json<Profile>> {
    Ok(Json(state.profiles.save(&profile)?))
}
