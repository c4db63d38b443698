use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::identity::UserId;

/// State of the control connection
///
/// Moves forward only, except that `Connecting`, `Connected` or
/// `Authenticated` may drop to `Disconnected` on an unexpected closure, which
/// ends that connection instance. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Closed,
}

impl ConnectionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Authenticated => 3,
            Self::Closed => 4,
        }
    }

    /// Whether `self -> next` is a legal transition within one connection
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        match (self, next) {
            (Self::Closed, _) | (Self::Disconnected, _) => false,
            (_, Self::Disconnected) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }

    /// Whether data may be written in this state
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }
}

/// Transient coaching banner shown after an actionable feedback
#[derive(Debug, Clone)]
struct Banner {
    text: String,
    generation: u64,
}

/// Point-in-time view of the session for the operator
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub streaming: bool,
    pub caption: String,
    pub banner: Option<String>,
    pub error: Option<String>,
    pub user_id: Option<UserId>,
    pub remote_session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub frames_sent: usize,
    pub chunks_sent: usize,
    pub final_payload_bytes: Option<usize>,
    pub upload_url: Option<String>,
    pub recording_path: Option<PathBuf>,
    pub timeline_segments: usize,
}

#[derive(Debug, Default)]
struct SessionView {
    streaming: bool,
    caption: String,
    banner: Option<Banner>,
    banner_generation: u64,
    error: Option<String>,
    user_id: Option<UserId>,
    remote_session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    frames_sent: usize,
    chunks_sent: usize,
    final_payload_bytes: Option<usize>,
    upload_url: Option<String>,
    recording_path: Option<PathBuf>,
}

/// Session and connection status store updated by the coordinator, its
/// producers and the protocol interpreter
pub struct SessionStore {
    view: Mutex<SessionView>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub const IDLE_CAPTION: &'static str = "Ready";

    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            view: Mutex::new(SessionView {
                caption: Self::IDLE_CAPTION.to_string(),
                ..SessionView::default()
            }),
            status_tx,
        }
    }

    /// Reset everything for a new session owned by `user_id`
    pub fn begin(&self, user_id: UserId) {
        {
            let mut view = self.view();
            let generation = view.banner_generation + 1;
            *view = SessionView {
                streaming: true,
                caption: "Starting camera...".to_string(),
                banner_generation: generation,
                user_id: Some(user_id),
                started_at: Some(Utc::now()),
                ..SessionView::default()
            };
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }

    /// Mark the session as no longer capturing
    pub fn end_streaming(&self) {
        self.view().streaming = false;
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Start a new connection instance
    pub fn begin_connecting(&self) {
        self.status_tx.send_replace(ConnectionStatus::Connecting);
    }

    /// Apply a status transition; illegal transitions are ignored
    pub fn set_status(&self, next: ConnectionStatus) -> bool {
        self.status_tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!("Connection status {:?} -> {:?}", current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn set_caption(&self, caption: impl Into<String>) {
        self.view().caption = caption.into();
    }

    pub fn caption(&self) -> String {
        self.view().caption.clone()
    }

    /// Show a coaching banner, returning its generation for a later timed clear
    pub fn show_banner(&self, text: impl Into<String>) -> u64 {
        let mut view = self.view();
        view.banner_generation += 1;
        let generation = view.banner_generation;
        view.banner = Some(Banner {
            text: text.into(),
            generation,
        });
        generation
    }

    pub fn clear_banner(&self) {
        self.view().banner = None;
    }

    /// Clear the banner only if it is still the one shown at `generation`
    pub fn clear_banner_if(&self, generation: u64) {
        let mut view = self.view();
        if view.banner.as_ref().map(|b| b.generation) == Some(generation) {
            view.banner = None;
        }
    }

    pub fn banner(&self) -> Option<String> {
        self.view().banner.as_ref().map(|b| b.text.clone())
    }

    /// Surface an advisory error to the operator
    pub fn surface_error(&self, error: &SessionError) {
        warn!("Session error: {}", error);
        self.view().error = Some(error.to_string());
    }

    pub fn error(&self) -> Option<String> {
        self.view().error.clone()
    }

    /// Record the id assigned by the service; later values are ignored
    pub fn set_remote_session_id(&self, id: String) {
        let mut view = self.view();
        if view.remote_session_id.is_none() {
            view.remote_session_id = Some(id);
        }
    }

    pub fn remote_session_id(&self) -> Option<String> {
        self.view().remote_session_id.clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.view().user_id.clone()
    }

    pub fn record_frame_sent(&self) {
        self.view().frames_sent += 1;
    }

    pub fn record_chunk_sent(&self) {
        self.view().chunks_sent += 1;
    }

    pub fn record_final_payload(&self, bytes: usize) {
        self.view().final_payload_bytes = Some(bytes);
    }

    pub fn set_upload_url(&self, url: String) {
        self.view().upload_url = Some(url);
    }

    pub fn set_recording_path(&self, path: PathBuf) {
        self.view().recording_path = Some(path);
    }

    pub fn snapshot(&self, timeline_segments: usize) -> SessionSnapshot {
        let status = self.status();
        let view = self.view();
        let duration_secs = view
            .started_at
            .map(|started| {
                Utc::now().signed_duration_since(started).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionSnapshot {
            status,
            streaming: view.streaming,
            caption: view.caption.clone(),
            banner: view.banner.as_ref().map(|b| b.text.clone()),
            error: view.error.clone(),
            user_id: view.user_id.clone(),
            remote_session_id: view.remote_session_id.clone(),
            started_at: view.started_at,
            duration_secs,
            frames_sent: view.frames_sent,
            chunks_sent: view.chunks_sent,
            final_payload_bytes: view.final_payload_bytes,
            upload_url: view.upload_url.clone(),
            recording_path: view.recording_path.clone(),
            timeline_segments,
        }
    }

    fn view(&self) -> MutexGuard<'_, SessionView> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
