use super::state::AppState;
use crate::error::SessionError;
use crate::identity::{resolve_user, UserId};
use crate::session::{FeedbackSegment, SessionSnapshot};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Optional user id (if not provided, ask the identity provider)
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub user_id: UserId,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub status: String,
    pub message: String,
    pub session: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    /// Playback offset in seconds
    pub at: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::AlreadyStreaming => StatusCode::CONFLICT,
        SessionError::Permission(_) => StatusCode::FORBIDDEN,
        SessionError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Transport(_) | SessionError::ServerReported(_) => StatusCode::BAD_GATEWAY,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start streaming as the requested (or resolved) user
pub async fn start_session(
    State(state): State<AppState>,
    body: Option<Json<StartSessionRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let user_id = match req.user_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => UserId::new(id),
        None => resolve_user(state.identity.as_ref()).await,
    };

    info!("Starting session for user: {}", user_id);

    if let Err(e) = state.coordinator.start(user_id.clone()).await {
        error!("Failed to start session: {}", e);
        return (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            user_id: user_id.clone(),
            status: "streaming".to_string(),
            message: format!("Session started for {}", user_id),
        }),
    )
        .into_response()
}

/// POST /session/stop
/// Stop capturing; the service finishes the session and closes the connection
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    let was_active = state.coordinator.is_active();
    state.coordinator.stop();

    let (status, message) = if was_active {
        ("stopping", "Recording is being finalized")
    } else {
        ("idle", "No active session")
    };

    (
        StatusCode::OK,
        Json(SessionResponse {
            status: status.to_string(),
            message: message.to_string(),
            session: state.coordinator.snapshot(),
        }),
    )
}

/// DELETE /session
/// Abandon the session immediately
pub async fn teardown_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Tearing down session");
    state.coordinator.teardown();

    (
        StatusCode::OK,
        Json(SessionResponse {
            status: "closed".to_string(),
            message: "Session torn down".to_string(),
            session: state.coordinator.snapshot(),
        }),
    )
}

/// GET /session/status
/// Current session snapshot
pub async fn get_session_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.coordinator.snapshot()))
}

/// GET /session/timeline
/// Feedback timeline, or the segments covering `?at=<seconds>`
pub async fn get_session_timeline(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> impl IntoResponse {
    let segments: Vec<FeedbackSegment> = match query.at {
        Some(seconds) => state.coordinator.feedback_at(seconds),
        None => state.coordinator.timeline(),
    };
    (StatusCode::OK, Json(segments))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
