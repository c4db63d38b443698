//! Streaming session management
//!
//! This module provides the `SessionCoordinator` that manages:
//! - Capture device lifecycle (acquire on start, release on stop/teardown)
//! - The control channel and the auth-before-data ordering
//! - Frame sampling and chunked recording once the channel is open
//! - Session status and the deduplicated feedback timeline

mod config;
mod coordinator;
mod state;
mod timeline;

pub use config::SessionConfig;
pub use coordinator::{Capabilities, SessionCoordinator};
pub use state::{ConnectionStatus, SessionSnapshot, SessionStore};
pub use timeline::{FeedbackSegment, FeedbackTimeline, SegmentKey};
