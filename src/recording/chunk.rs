use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::archive::RecordingArchive;
use super::stop_requested;
use crate::capture::{CaptureStream, MediaEncoder, MediaRecording};
use crate::channel::ControlChannel;
use crate::error::SessionError;
use crate::protocol::{to_data_url, OutboundMessage};
use crate::session::SessionStore;

/// Chunk configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Recording format, e.g. `video/webm;codecs=vp8,opus`
    pub format: String,
    /// Length of each slice (default: 1 second)
    pub timeslice: Duration,
    /// Name for the local copy (without extension)
    pub recording_name: String,
}

impl ChunkConfig {
    pub fn new(format: impl Into<String>, recording_name: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            timeslice: Duration::from_secs(1),
            recording_name: recording_name.into(),
        }
    }
}

/// Outcome of a finished recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Number of non-empty slices captured
    pub slices: usize,
    /// Size of the assembled recording in bytes
    pub total_bytes: usize,
    /// Whether the full recording was put on the wire
    pub final_payload_sent: bool,
    /// Local copy, when an archive is configured
    pub archived_to: Option<PathBuf>,
}

/// Chunked media recorder
///
/// Streams every completed slice as `video_chunk` and, on stop, sends the
/// concatenation of all slices as `video_complete` followed by `stop`.
/// Slice encoding runs off the capture path, so wire order for chunks is
/// encode-completion order.
pub struct ChunkRecorder {
    config: ChunkConfig,
    recording: Box<dyn MediaRecording>,
    channel: Arc<ControlChannel>,
    store: Arc<SessionStore>,
    active: Arc<AtomicBool>,
    archive: Option<RecordingArchive>,
    slices: Vec<Vec<u8>>,
    in_flight: JoinSet<()>,
}

impl ChunkRecorder {
    /// Start recording `stream`.
    ///
    /// An unsupported format is a [`SessionError::Configuration`]; nothing is
    /// recorded in that case.
    pub fn start(
        encoder: &dyn MediaEncoder,
        stream: Arc<dyn CaptureStream>,
        config: ChunkConfig,
        channel: Arc<ControlChannel>,
        store: Arc<SessionStore>,
        active: Arc<AtomicBool>,
        archive: Option<RecordingArchive>,
    ) -> Result<Self, SessionError> {
        if !encoder.is_supported(&config.format) {
            return Err(SessionError::Configuration(config.format.clone()));
        }

        let recording = encoder
            .start(stream, &config.format, config.timeslice)
            .map_err(|e| SessionError::Configuration(format!("{}: {}", config.format, e)))?;

        info!(
            "Chunk recorder started: {} ({}ms slices)",
            config.format,
            config.timeslice.as_millis()
        );

        Ok(Self {
            config,
            recording,
            channel,
            store,
            active,
            archive,
            slices: Vec::new(),
            in_flight: JoinSet::new(),
        })
    }

    /// Record until a stop is requested or the tracks end, then finalize
    pub async fn run(mut self, mut stop_rx: watch::Receiver<bool>) -> Result<RecordingSummary> {
        loop {
            tokio::select! {
                slice = self.recording.next_slice() => match slice {
                    Some(bytes) => self.accept(bytes),
                    None => {
                        info!("Recording ended with the capture tracks");
                        break;
                    }
                },
                _ = stop_requested(&mut stop_rx) => {
                    info!("Stopping recorder");
                    self.recording.stop();
                    while let Some(bytes) = self.recording.next_slice().await {
                        self.accept(bytes);
                    }
                    break;
                }
            }
        }

        // Let in-flight slice sends land before the final payload
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                warn!("Slice send task failed: {}", e);
            }
        }

        self.finalize().await
    }

    fn accept(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }

        debug!("Slice {} captured ({} bytes)", self.slices.len(), bytes.len());
        self.slices.push(bytes.clone());

        let channel = Arc::clone(&self.channel);
        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let format = self.config.format.clone();

        self.in_flight.spawn(async move {
            let data = match tokio::task::spawn_blocking(move || to_data_url(&format, &bytes)).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Slice encode task failed: {}", e);
                    return;
                }
            };

            if !active.load(Ordering::SeqCst) {
                return;
            }
            if channel.send(&OutboundMessage::ChunkData { data }) {
                store.record_chunk_sent();
            }
        });
    }

    async fn finalize(self) -> Result<RecordingSummary> {
        let mut summary = RecordingSummary {
            slices: self.slices.len(),
            ..RecordingSummary::default()
        };

        if self.slices.is_empty() {
            info!("No media recorded, sending stop only");
            if self.active.load(Ordering::SeqCst) {
                self.channel.send(&OutboundMessage::Stop);
            }
            return Ok(summary);
        }

        let payload = self.slices.concat();
        summary.total_bytes = payload.len();
        self.store.record_final_payload(payload.len());

        if let Some(archive) = &self.archive {
            match archive
                .persist(&self.config.recording_name, &self.config.format, &payload)
                .await
            {
                Ok(path) => {
                    self.store.set_recording_path(path.clone());
                    summary.archived_to = Some(path);
                }
                Err(e) => error!("Failed to keep local recording: {:#}", e),
            }
        }

        let format = self.config.format.clone();
        let data = tokio::task::spawn_blocking(move || to_data_url(&format, &payload))
            .await
            .context("Final payload encode task failed")?;

        if self.active.load(Ordering::SeqCst) {
            summary.final_payload_sent = self.channel.send(&OutboundMessage::FinalPayload { data });
            self.channel.send(&OutboundMessage::Stop);
        }

        info!(
            "Recording finalized: {} slices, {} bytes (sent={})",
            summary.slices, summary.total_bytes, summary.final_payload_sent
        );

        Ok(summary)
    }
}
