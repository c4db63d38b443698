// Deterministic capture backend for headless runs and tests
//
// Generates a moving gradient instead of camera pixels and fixed-size media
// slices instead of a real container, so the full session pipeline can run
// without devices or codecs.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::info;

use super::backend::{
    CaptureDevice, CaptureStream, MediaEncoder, MediaRecording, StillEncoder, VideoFrame,
};
use crate::error::SessionError;

/// Marker written at the start of the first slice of every synthetic recording
pub const SYNTHETIC_MEDIA_HEADER: &[u8] = b"ZYNK-SYNTHETIC-MEDIA\n";

/// Synthetic camera configuration
#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Simulate the user denying camera/microphone access
    pub deny_permission: bool,
    /// How long the capture surface reports zero dimensions after acquisition
    pub layout_delay: Duration,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            deny_permission: false,
            layout_delay: Duration::ZERO,
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for SyntheticCamera {
    async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, SessionError> {
        if self.config.deny_permission {
            return Err(SessionError::Permission(
                "access to camera and microphone was denied".to_string(),
            ));
        }

        info!(
            "Synthetic camera acquired ({}x{})",
            self.config.width, self.config.height
        );

        Ok(Arc::new(SyntheticStream::new(
            self.config.width,
            self.config.height,
            self.config.layout_delay,
        )))
    }

    fn name(&self) -> &str {
        "synthetic camera"
    }
}

/// Live synthetic capture
pub struct SyntheticStream {
    width: u32,
    height: u32,
    laid_out_at: Instant,
    live: AtomicBool,
    frames_grabbed: AtomicU64,
}

impl SyntheticStream {
    pub fn new(width: u32, height: u32, layout_delay: Duration) -> Self {
        Self {
            width,
            height,
            laid_out_at: Instant::now() + layout_delay,
            live: AtomicBool::new(true),
            frames_grabbed: AtomicU64::new(0),
        }
    }

    /// Number of snapshots taken so far
    pub fn frames_grabbed(&self) -> u64 {
        self.frames_grabbed.load(Ordering::SeqCst)
    }
}

impl CaptureStream for SyntheticStream {
    fn surface_size(&self) -> (u32, u32) {
        if Instant::now() < self.laid_out_at {
            return (0, 0);
        }
        (self.width, self.height)
    }

    fn snapshot(&self) -> Option<VideoFrame> {
        if !self.is_live() {
            return None;
        }

        let (width, height) = self.surface_size();
        if width == 0 || height == 0 {
            return None;
        }

        let shift = self.frames_grabbed.fetch_add(1, Ordering::SeqCst) as u32;
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                rgb.push(((x + shift) % 256) as u8);
                rgb.push((y % 256) as u8);
                rgb.push(((x + y + shift) % 256) as u8);
            }
        }

        Some(VideoFrame { width, height, rgb })
    }

    fn release_tracks(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            info!("Synthetic camera tracks stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Binary PPM encoder, enough for a text-safe still without an image codec
#[derive(Debug, Default, Clone, Copy)]
pub struct PpmStillEncoder;

impl StillEncoder for PpmStillEncoder {
    fn mime_type(&self) -> &str {
        "image/x-portable-pixmap"
    }

    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>> {
        let expected = (frame.width * frame.height * 3) as usize;
        if frame.rgb.len() != expected {
            bail!(
                "Frame buffer is {} bytes, expected {} for {}x{}",
                frame.rgb.len(),
                expected,
                frame.width,
                frame.height
            );
        }

        let mut out = format!("P6\n{} {}\n255\n", frame.width, frame.height).into_bytes();
        out.extend_from_slice(&frame.rgb);
        Ok(out)
    }
}

/// Media encoder producing fixed-size synthetic slices
pub struct SyntheticMediaEncoder {
    formats: Vec<String>,
}

impl SyntheticMediaEncoder {
    /// Encoder accepting the given base MIME types (codec parameters are ignored)
    pub fn new(formats: Vec<String>) -> Self {
        Self { formats }
    }
}

impl Default for SyntheticMediaEncoder {
    fn default() -> Self {
        Self::new(vec!["video/webm".to_string(), "video/mp4".to_string()])
    }
}

impl MediaEncoder for SyntheticMediaEncoder {
    fn is_supported(&self, format: &str) -> bool {
        let base = base_mime(format);
        self.formats.iter().any(|f| f.eq_ignore_ascii_case(base))
    }

    fn start(
        &self,
        stream: Arc<dyn CaptureStream>,
        format: &str,
        timeslice: Duration,
    ) -> Result<Box<dyn MediaRecording>> {
        if !self.is_supported(format) {
            bail!("Format {} is not supported", format);
        }

        let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(SyntheticRecording {
            stream,
            ticker,
            sequence: 0,
            stopped: false,
            flushed: false,
        }))
    }
}

struct SyntheticRecording {
    stream: Arc<dyn CaptureStream>,
    ticker: Interval,
    sequence: u32,
    stopped: bool,
    flushed: bool,
}

impl SyntheticRecording {
    fn next_payload(&mut self) -> Vec<u8> {
        let mut slice = Vec::with_capacity(1024 + SYNTHETIC_MEDIA_HEADER.len());
        if self.sequence == 0 {
            slice.extend_from_slice(SYNTHETIC_MEDIA_HEADER);
        }
        for _ in 0..256 {
            slice.extend_from_slice(&self.sequence.to_le_bytes());
        }
        self.sequence += 1;
        slice
    }
}

#[async_trait::async_trait]
impl MediaRecording for SyntheticRecording {
    async fn next_slice(&mut self) -> Option<Vec<u8>> {
        if !self.stopped && self.stream.is_live() {
            self.ticker.tick().await;
            if self.stream.is_live() && !self.stopped {
                return Some(self.next_payload());
            }
        }

        // Tracks ended or stop requested: flush the tail once
        self.stopped = true;
        if self.flushed {
            return None;
        }
        self.flushed = true;
        Some(self.next_payload())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// MIME type without codec parameters (`video/webm;codecs=vp8` -> `video/webm`)
pub fn base_mime(format: &str) -> &str {
    format.split(';').next().unwrap_or(format).trim()
}
