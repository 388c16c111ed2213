//! HTTP surface of the rule management service.

mod error;
mod handlers;
mod middleware;
mod server;
mod state;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use middleware::{ApiJson, ValidRule};
pub use server::{serve_listener, HttpServer};
pub use state::AppState;

/// Path prefix of the rule management API.
pub const API_PREFIX: &str = "/multi_tenant_rule_management";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Layers run bottom-up: tenant extraction, then rate limiting.
    let api = Router::new()
        .route(
            "/customers/rules",
            post(handlers::create_rule).put(handlers::edit_rule),
        )
        .route(
            "/customers/rules/{rule_name}",
            get(handlers::get_rule).delete(handlers::delete_rule),
        )
        .route("/rules/bulk", post(handlers::bulk_operations))
        .route_layer(from_fn_with_state(state.clone(), middleware::enforce_rate_limit))
        .route_layer(from_fn(middleware::require_tenant));

    Router::new()
        .route("/health", get(handlers::health))
        .nest(API_PREFIX, api)
        .with_state(state)
}
