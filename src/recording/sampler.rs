use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::stop_requested;
use crate::capture::{CaptureStream, StillEncoder};
use crate::channel::ControlChannel;
use crate::protocol::{to_data_url, OutboundMessage};
use crate::session::SessionStore;

/// Periodic still-frame snapshots of the capture surface
///
/// Best effort: a tick with the connection not open or the surface not laid
/// out is skipped, and ticks missed while an encode is running are dropped.
pub struct FrameSampler {
    stream: Arc<dyn CaptureStream>,
    encoder: Arc<dyn StillEncoder>,
    channel: Arc<ControlChannel>,
    store: Arc<SessionStore>,
    active: Arc<AtomicBool>,
    period: Duration,
}

impl FrameSampler {
    pub fn new(
        stream: Arc<dyn CaptureStream>,
        encoder: Arc<dyn StillEncoder>,
        channel: Arc<ControlChannel>,
        store: Arc<SessionStore>,
        active: Arc<AtomicBool>,
        period: Duration,
    ) -> Self {
        Self {
            stream,
            encoder,
            channel,
            store,
            active,
            period,
        }
    }

    /// Sample until a stop is requested
    pub async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!("Frame sampler started ({}ms period)", self.period.as_millis());

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }
                _ = stop_requested(&mut stop_rx) => break,
            }
        }

        info!("Frame sampler stopped");
    }

    /// Take one snapshot and send it. Returns whether a frame went out.
    pub async fn sample(&self) -> bool {
        if !self.active.load(Ordering::SeqCst) || !self.channel.is_open() {
            debug!("Skipping frame: connection not open");
            return false;
        }

        let (width, height) = self.stream.surface_size();
        if width == 0 || height == 0 {
            debug!("Skipping frame: capture surface not laid out");
            return false;
        }

        let Some(frame) = self.stream.snapshot() else {
            return false;
        };

        let encoder = Arc::clone(&self.encoder);
        let encoded = tokio::task::spawn_blocking(move || {
            encoder
                .encode(&frame)
                .map(|bytes| to_data_url(encoder.mime_type(), &bytes))
        })
        .await;

        let data = match encoded {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!("Failed to encode frame: {}", e);
                return false;
            }
            Err(e) => {
                warn!("Frame encode task failed: {}", e);
                return false;
            }
        };

        // The session may have ended while encoding
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }

        let sent = self.channel.send(&OutboundMessage::Frame { data });
        if sent {
            self.store.record_frame_sent();
        }
        sent
    }
}
