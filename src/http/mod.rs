//! HTTP API for controlling the streaming session
//!
//! This module provides a REST API standing in for the capture UI:
//! - POST /session/start - Acquire the camera and start streaming
//! - POST /session/stop - Stop capturing and finalize the recording
//! - DELETE /session - Abandon the session (teardown)
//! - GET /session/status - Connection status, captions and counters
//! - GET /session/timeline - Feedback timeline (optionally `?at=<seconds>`)
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
