use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the session control router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Lifecycle
        .route("/session/start", post(handlers::start_session))
        .route("/session/stop", post(handlers::stop_session))
        .route("/session", delete(handlers::teardown_session))
        // Observation
        .route("/session/status", get(handlers::get_session_status))
        .route("/session/timeline", get(handlers::get_session_timeline))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
