//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and component construction
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let session_state = middleware::SessionState {
        authenticator: services.authenticator.clone(),
        clock: services.clock.clone(),
        cookie_secure: services.cookie_secure,
    };

    // Everything except health checks goes through session resolution.
    let resolved = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            session_state,
            middleware::session_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(resolved)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
