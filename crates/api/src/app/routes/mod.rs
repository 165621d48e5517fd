use axum::{
    Router,
    routing::{get, post},
};

pub mod licenses;
pub mod session;
pub mod system;

/// Router for every endpoint behind session resolution.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/session/logout", post(session::logout))
        .nest("/licenses", licenses::router())
}
