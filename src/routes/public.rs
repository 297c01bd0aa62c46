use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a credential: liveness and self-registration.
/// Registration only creates a `pending` learner, which no gated route accepts
/// until an admin approves it.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Used by load balancers and monitors. Never touches the store.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        .route("/register", post(handlers::register_user))
}
