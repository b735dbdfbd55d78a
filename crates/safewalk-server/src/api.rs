//! HTTP API routes and handlers.
//!
//! Endpoints are organized by domain:
//! - `health` - Service health checks
//! - `countdown` - Arm, disarm and trigger signals
//! - `profile` - Sender name and emergency contacts
//! - `peripheral` - Trigger scanning, connection and characteristic access
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod countdown;
pub mod error;
pub mod health;
pub mod openapi;
pub mod peripheral;
pub mod profile;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                      - Health check
/// /api
/// ├── /countdown               - Countdown state, arm, disarm, signal
/// ├── /profile                 - Contact profile
/// ├── /peripheral              - Scan, connect, disconnect, characteristics
/// └── /openapi.json            - OpenAPI specification
/// /swagger-ui                  - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/countdown", countdown::router())
                .nest("/profile", profile::router())
                .nest("/peripheral", peripheral::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
