use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{decode_inbound, AiFeedback, InboundMessage, ServerError, StatusUpdate};
use crate::channel::{ControlChannel, TransportEvent};
use crate::error::SessionError;
use crate::session::{ConnectionStatus, FeedbackSegment, FeedbackTimeline, SessionStore};

/// Remote session id used for segment keys before `auth_success` arrived
const LOCAL_SESSION_ID: &str = "local";

/// What the reader loop should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The service finished everything for this session; connection closed
    Terminal,
}

/// Why the reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A terminal tag closed the connection
    Terminal,
    /// The connection dropped unexpectedly
    Lost,
    /// We closed the connection ourselves
    Closed,
}

/// Applies inbound service messages to the session store and timeline
pub struct ProtocolInterpreter {
    store: Arc<SessionStore>,
    timeline: Arc<FeedbackTimeline>,
    channel: Arc<ControlChannel>,
    banner_duration: Duration,
    banner_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolInterpreter {
    pub fn new(
        store: Arc<SessionStore>,
        timeline: Arc<FeedbackTimeline>,
        channel: Arc<ControlChannel>,
        banner_duration: Duration,
    ) -> Self {
        Self {
            store,
            timeline,
            channel,
            banner_duration,
            banner_timer: Mutex::new(None),
        }
    }

    /// Consume inbound events until the connection ends
    pub async fn run(&self, mut incoming: mpsc::UnboundedReceiver<TransportEvent>) -> ReadOutcome {
        while let Some(event) = incoming.recv().await {
            match event {
                TransportEvent::Text(text) => {
                    if self.handle_text(&text) == Disposition::Terminal {
                        return ReadOutcome::Terminal;
                    }
                }
                TransportEvent::Closed => {
                    return self.connection_ended("connection closed by the server");
                }
                TransportEvent::Error(reason) => {
                    return self.connection_ended(&reason);
                }
            }
        }

        self.connection_ended("connection dropped")
    }

    /// Decode and apply one text frame; malformed JSON is dropped
    pub fn handle_text(&self, text: &str) -> Disposition {
        match decode_inbound(text) {
            Some(message) => self.handle(message),
            None => {
                debug!("Ignoring malformed inbound message ({} bytes)", text.len());
                Disposition::Continue
            }
        }
    }

    pub fn handle(&self, message: InboundMessage) -> Disposition {
        match message {
            InboundMessage::AuthSuccess { session_id } => {
                if let Some(id) = session_id {
                    info!("Authenticated, remote session {}", id);
                    self.store.set_remote_session_id(id);
                }
                self.store.set_status(ConnectionStatus::Authenticated);
                self.store.set_caption("Connected, analysing your delivery");
                Disposition::Continue
            }
            InboundMessage::AiFeedback(feedback) => {
                self.apply_feedback(feedback);
                Disposition::Continue
            }
            InboundMessage::Feedback { message } => {
                self.store
                    .set_caption(message.unwrap_or_else(|| "Analysing...".to_string()));
                self.cancel_banner_timer();
                self.store.clear_banner();
                Disposition::Continue
            }
            InboundMessage::Status(update) => {
                self.store.set_caption(status_caption(&update));
                Disposition::Continue
            }
            InboundMessage::UploadComplete { url } => {
                match url {
                    Some(url) => {
                        info!("Recording uploaded to {}", url);
                        self.store.set_caption(format!("Recording uploaded: {}", url));
                        self.store.set_upload_url(url);
                    }
                    None => self.store.set_caption("Recording uploaded"),
                }
                Disposition::Continue
            }
            InboundMessage::FeedbackSaved { segments_saved } => {
                let count = segments_saved.unwrap_or(self.timeline.len() as u64);
                info!("Service saved {} feedback segments", count);
                self.store.set_caption(saved_caption(count));
                self.terminate()
            }
            InboundMessage::FeedbackSaveError(error) => {
                self.fail("Failed to save feedback", error)
            }
            InboundMessage::UploadError(error) => self.fail("Recording upload failed", error),
            InboundMessage::Unknown => {
                debug!("Ignoring inbound message with unknown type");
                Disposition::Continue
            }
        }
    }

    /// Abort the pending banner timer, if any
    pub fn cancel_timers(&self) {
        self.cancel_banner_timer();
    }

    fn apply_feedback(&self, feedback: AiFeedback) {
        if !feedback.is_actionable() {
            let message = feedback.text();
            let caption = if message.is_empty()
                || message.eq_ignore_ascii_case(AiFeedback::OK_SENTINEL)
            {
                "No issues detected".to_string()
            } else {
                message.to_string()
            };
            self.store.set_caption(caption);
            return;
        }

        let remote_session_id = feedback
            .session_id
            .clone()
            .or_else(|| self.store.remote_session_id())
            .unwrap_or_else(|| LOCAL_SESSION_ID.to_string());
        let created_at = feedback
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let inserted = self
            .timeline
            .append_with(&remote_session_id, feedback.segment_index, |key| {
                FeedbackSegment::new(
                    key,
                    feedback.text(),
                    feedback.start_seconds.unwrap_or(0.0),
                    feedback.end_seconds,
                    created_at,
                )
            });

        match inserted {
            Some(segment) => {
                info!(
                    "Feedback {} at {:.1}s-{:.1}s: {}",
                    segment.id,
                    segment.start_offset_seconds,
                    segment.end_offset_seconds,
                    segment.text
                );
                self.show_banner(segment.text);
            }
            None => debug!("Ignoring redelivered feedback segment"),
        }
    }

    fn show_banner(&self, text: String) {
        let generation = self.store.show_banner(text);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let duration = self.banner_duration;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            store.clear_banner_if(generation);
        });

        if let Some(previous) = self.banner_timer().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_banner_timer(&self) {
        if let Some(timer) = self.banner_timer().take() {
            timer.abort();
        }
    }

    fn fail(&self, caption: &str, error: ServerError) -> Disposition {
        let message = error.message.unwrap_or_else(|| caption.to_string());
        warn!("{}: {}", caption, message);
        self.store.set_caption(caption);
        self.store
            .surface_error(&SessionError::ServerReported(message));
        self.terminate()
    }

    fn terminate(&self) -> Disposition {
        self.channel.close();
        Disposition::Terminal
    }

    fn connection_ended(&self, reason: &str) -> ReadOutcome {
        if self.channel.mark_lost(reason) {
            warn!("Control channel lost: {}", reason);
            ReadOutcome::Lost
        } else {
            ReadOutcome::Closed
        }
    }

    fn banner_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.banner_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Caption for a progress report
pub fn status_caption(update: &StatusUpdate) -> String {
    if let Some(segments) = update.segments_processed {
        return format!("Analysing... {} segments processed", segments);
    }
    match update.frames_processed {
        Some(frames) => format!("Analysing... {} frames processed", frames),
        None => "Analysis in progress...".to_string(),
    }
}

/// Caption for `feedback_saved`
pub fn saved_caption(count: u64) -> String {
    if count == 1 {
        "Saved 1 feedback segment".to_string()
    } else {
        format!("Saved {} feedback segments", count)
    }
}
