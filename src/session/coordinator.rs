use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{ConnectionStatus, SessionSnapshot, SessionStore};
use super::timeline::{FeedbackSegment, FeedbackTimeline};
use crate::capture::{CaptureDevice, CaptureStream, MediaEncoder, StillEncoder};
use crate::channel::{ControlChannel, Transport, WireCommand};
use crate::error::SessionError;
use crate::identity::UserId;
use crate::protocol::{OutboundMessage, ProtocolInterpreter};
use crate::recording::{
    stop_requested, ChunkConfig, ChunkRecorder, FrameSampler, RecordingArchive,
};

/// External capabilities driven by the coordinator
#[derive(Clone)]
pub struct Capabilities {
    pub device: Arc<dyn CaptureDevice>,
    pub media_encoder: Arc<dyn MediaEncoder>,
    pub still_encoder: Arc<dyn StillEncoder>,
    pub transport: Arc<dyn Transport>,
}

/// Owns the capture lifecycle of at most one session at a time and
/// multiplexes the frame sampler, chunk recorder and control traffic onto
/// one connection.
///
/// Lifecycle of a session:
/// `Acquiring` (device) -> connecting -> `auth` sent -> warm-up ->
/// producers running -> stop requested -> final payload + `stop` ->
/// server terminal message closes the connection.
/// [`SessionCoordinator::teardown`] ends it from any of these states.
pub struct SessionCoordinator {
    config: SessionConfig,
    caps: Capabilities,
    store: Arc<SessionStore>,
    timeline: Arc<FeedbackTimeline>,
    slot: Mutex<Slot>,
    acquisitions: AtomicU64,
}

enum Slot {
    Idle,
    /// Waiting on the capture device; `generation` identifies the start call
    Acquiring {
        generation: u64,
        /// `stop()` arrived before the session went live
        stop_requested: bool,
    },
    Live(LiveSession),
}

/// A running session: the device stream, the connection and the task
/// driving them
struct LiveSession {
    runtime: Arc<SessionRuntime>,
    runner: JoinHandle<()>,
}

impl LiveSession {
    fn is_finished(&self) -> bool {
        *self.runtime.done_tx.borrow() || self.runner.is_finished()
    }

    /// Tracks, then timers, then the connection
    fn abandon(self) {
        let runtime = &self.runtime;
        runtime.release_tracks();

        runtime.active.store(false, Ordering::SeqCst);
        runtime.request_stop();
        self.runner.abort();
        runtime.interpreter.cancel_timers();

        runtime.channel.close();
        // Covers a connect still in flight when the runner was aborted
        runtime.store.set_status(ConnectionStatus::Closed);
        runtime.finish();
        info!("Session torn down");
    }
}

/// State shared between the coordinator and the session's tasks
struct SessionRuntime {
    config: SessionConfig,
    caps: Capabilities,
    user_id: UserId,
    recording_name: String,
    stream: Arc<dyn CaptureStream>,
    channel: Arc<ControlChannel>,
    interpreter: Arc<ProtocolInterpreter>,
    store: Arc<SessionStore>,
    /// Cleared on teardown; in-flight encodes check it before sending
    active: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

impl SessionRuntime {
    /// Returns `true` for the first request only
    fn request_stop(&self) -> bool {
        self.stop_tx.send_if_modified(|stopping| {
            if *stopping {
                false
            } else {
                *stopping = true;
                true
            }
        })
    }

    fn stop_pending(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn release_tracks(&self) {
        self.stream.release_tracks();
        self.store.end_streaming();
    }

    fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.store.end_streaming();
        self.done_tx.send_replace(true);
    }

    async fn drive(self: Arc<Self>) {
        // await-connection-open
        self.store.begin_connecting();
        self.store.set_caption("Connecting to the analysis service...");

        let link = match self.caps.transport.connect(&self.config.server_url).await {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to open control channel: {}", e);
                self.store.set_status(ConnectionStatus::Disconnected);
                self.store.surface_error(&e);
                self.store.set_caption("Could not reach the analysis service");
                self.release_tracks();
                self.finish();
                return;
            }
        };

        if !self.active.load(Ordering::SeqCst) {
            let _ = link.outgoing.send(WireCommand::Close);
            return;
        }

        let incoming = self.channel.attach(link);
        self.channel.send(&OutboundMessage::Auth {
            user_id: self.user_id.to_string(),
        });
        self.store.set_caption("Authenticating...");

        let mut tasks = JoinSet::new();

        let reader = Arc::clone(&self);
        tasks.spawn(async move {
            let outcome = reader.interpreter.run(incoming).await;
            debug!("Control channel reader finished: {:?}", outcome);
            // Whatever ended the connection, capture has nothing left to feed
            reader.release_tracks();
            reader.request_stop();
        });

        let mut stop_rx = self.stop_tx.subscribe();
        let stopped_during_warmup = tokio::select! {
            _ = tokio::time::sleep(self.config.warmup) => false,
            _ = stop_requested(&mut stop_rx) => true,
        };

        if stopped_during_warmup {
            info!("Stopped before recording began, sending stop only");
            self.channel.send(&OutboundMessage::Stop);
        } else {
            tasks.spawn(
                FrameSampler::new(
                    Arc::clone(&self.stream),
                    Arc::clone(&self.caps.still_encoder),
                    Arc::clone(&self.channel),
                    Arc::clone(&self.store),
                    Arc::clone(&self.active),
                    self.config.frame_interval,
                )
                .run(self.stop_tx.subscribe()),
            );

            self.store.set_caption("Recording");
            self.record(&mut stop_rx).await;
        }

        // await-connection-close
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Session task panicked: {}", e);
                }
            }
        }

        self.finish();
        info!("Session finished");
    }

    async fn record(&self, stop_rx: &mut watch::Receiver<bool>) {
        let config = ChunkConfig {
            format: self.config.media_format.clone(),
            timeslice: self.config.chunk_interval,
            recording_name: self.recording_name.clone(),
        };

        let recorder = ChunkRecorder::start(
            self.caps.media_encoder.as_ref(),
            Arc::clone(&self.stream),
            config,
            Arc::clone(&self.channel),
            Arc::clone(&self.store),
            Arc::clone(&self.active),
            self.open_archive(),
        );

        match recorder {
            Ok(recorder) => match recorder.run(self.stop_tx.subscribe()).await {
                Ok(summary) => debug!("Recording summary: {:?}", summary),
                Err(e) => error!("Recorder failed: {:#}", e),
            },
            Err(e) => {
                // Frames keep flowing; only the recording is unavailable
                self.store.surface_error(&e);
                stop_requested(stop_rx).await;
                self.channel.send(&OutboundMessage::Stop);
            }
        }
    }

    fn open_archive(&self) -> Option<RecordingArchive> {
        let dir = self.config.recordings_dir.as_ref()?;
        match RecordingArchive::new(dir) {
            Ok(archive) => Some(archive),
            Err(e) => {
                warn!("Local recording disabled: {:#}", e);
                None
            }
        }
    }
}

impl SessionCoordinator {
    pub fn new(config: SessionConfig, caps: Capabilities) -> Self {
        Self {
            config,
            caps,
            store: Arc::new(SessionStore::new()),
            timeline: Arc::new(FeedbackTimeline::new()),
            slot: Mutex::new(Slot::Idle),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Acquire the device and begin streaming as `user_id`.
    ///
    /// Device failure is surfaced in the session store and returned; no
    /// connection is opened in that case. The connection itself is opened in
    /// the background and its failures are only surfaced.
    pub async fn start(&self, user_id: UserId) -> Result<(), SessionError> {
        let generation = {
            let mut slot = self.slot();
            match &*slot {
                Slot::Acquiring { .. } => return Err(SessionError::AlreadyStreaming),
                Slot::Live(live) if !live.is_finished() => {
                    warn!("Session already active");
                    return Err(SessionError::AlreadyStreaming);
                }
                _ => {}
            }
            let generation = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = Slot::Acquiring {
                generation,
                stop_requested: false,
            };
            generation
        };

        info!(
            "Starting session for {} with {}",
            user_id,
            self.caps.device.name()
        );
        self.timeline.reset();
        self.store.begin(user_id.clone());

        let stream = match self.caps.device.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to acquire capture device: {}", e);
                let mut slot = self.slot();
                // A superseded start must not touch the store of a newer session
                if matches!(*slot, Slot::Acquiring { generation: g, .. } if g == generation) {
                    *slot = Slot::Idle;
                    self.store.surface_error(&e);
                    self.store.set_caption("Camera unavailable");
                    self.store.end_streaming();
                }
                return Err(e);
            }
        };

        let mut slot = self.slot();
        let stop_requested = match &*slot {
            Slot::Acquiring {
                generation: g,
                stop_requested,
            } if *g == generation => *stop_requested,
            _ => {
                info!("Session abandoned while acquiring the capture device");
                stream.release_tracks();
                return Ok(());
            }
        };

        let channel = Arc::new(ControlChannel::new(Arc::clone(&self.store)));
        let interpreter = Arc::new(ProtocolInterpreter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.timeline),
            Arc::clone(&channel),
            self.config.banner_duration,
        ));
        let (stop_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        let runtime = Arc::new(SessionRuntime {
            config: self.config.clone(),
            caps: self.caps.clone(),
            user_id,
            recording_name: recording_name(),
            stream,
            channel,
            interpreter,
            store: Arc::clone(&self.store),
            active: Arc::new(AtomicBool::new(true)),
            stop_tx,
            done_tx,
        });

        if stop_requested {
            // Still connect so the service sees auth followed by stop
            info!("Stop was requested while acquiring, stopping immediately");
            runtime.release_tracks();
            runtime.request_stop();
        }

        let runner = tokio::spawn(Arc::clone(&runtime).drive());
        *slot = Slot::Live(LiveSession { runtime, runner });

        Ok(())
    }

    /// Stop capturing and let the recorder finalize.
    ///
    /// The connection stays open until the service's terminal message.
    /// Calling this when not streaming, or a second time, does nothing.
    pub fn stop(&self) {
        let mut slot = self.slot();
        match &mut *slot {
            Slot::Idle => debug!("Stop ignored: not streaming"),
            Slot::Acquiring { stop_requested, .. } => {
                if !*stop_requested {
                    info!("Stop requested while acquiring the capture device");
                    *stop_requested = true;
                    self.store.set_caption("Finishing recording...");
                }
            }
            Slot::Live(live) => {
                if live.is_finished() || live.runtime.stop_pending() {
                    debug!("Stop ignored: session already stopping");
                    return;
                }

                info!("Stopping session");
                live.runtime.release_tracks();
                live.runtime.request_stop();
                self.store.set_caption("Finishing recording...");
            }
        }
    }

    /// Abandon the session from whatever state it is in: release device
    /// tracks, clear timers, close the connection.
    pub fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.slot(), Slot::Idle);
        match previous {
            Slot::Idle => {}
            Slot::Acquiring { .. } => {
                info!("Session abandoned while acquiring");
                self.store.end_streaming();
            }
            Slot::Live(live) => live.abandon(),
        }
    }

    /// Whether a session is alive (its connection lifecycle not yet over)
    pub fn is_active(&self) -> bool {
        match &*self.slot() {
            Slot::Idle => false,
            Slot::Acquiring { .. } => true,
            Slot::Live(live) => !live.is_finished(),
        }
    }

    /// Resolves once the current session's lifecycle has ended
    pub async fn wait_finished(&self) {
        let done_rx = match &*self.slot() {
            Slot::Live(live) => Some(live.runtime.done_tx.subscribe()),
            _ => None,
        };

        if let Some(mut done_rx) = done_rx {
            let _ = done_rx.wait_for(|done| *done).await;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot(self.timeline.len())
    }

    pub fn timeline(&self) -> Vec<FeedbackSegment> {
        self.timeline.segments()
    }

    /// Segments covering playback offset `seconds`
    pub fn feedback_at(&self, seconds: f64) -> Vec<FeedbackSegment> {
        self.timeline.active_at(seconds)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.store.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.store.subscribe_status()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn recording_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("session-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &id[..8])
}
