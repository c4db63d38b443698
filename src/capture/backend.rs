use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;

/// One still image grabbed from the capture surface (packed RGB)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB bytes, `width * height * 3` long
    pub rgb: Vec<u8>,
}

/// A live audio/video capture owned by the session coordinator
pub trait CaptureStream: Send + Sync {
    /// Current size of the capture surface; `(0, 0)` until it has been laid out
    fn surface_size(&self) -> (u32, u32);

    /// Grab the current picture, or `None` once the tracks are released
    fn snapshot(&self) -> Option<VideoFrame>;

    /// Stop every device track. Must be idempotent.
    fn release_tracks(&self);

    /// Whether the tracks are still delivering media
    fn is_live(&self) -> bool;
}

/// Camera + microphone capture capability
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request access and open the device.
    ///
    /// Denied or unavailable devices yield [`SessionError::Permission`].
    async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, SessionError>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Still image encoding capability
pub trait StillEncoder: Send + Sync {
    /// MIME type of the encoded image (used in the data URL)
    fn mime_type(&self) -> &str;

    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>>;
}

/// Compressed media recording capability
pub trait MediaEncoder: Send + Sync {
    /// Whether `format` (a MIME type, optionally with codecs) can be recorded
    fn is_supported(&self, format: &str) -> bool;

    /// Begin recording `stream`, completing one slice every `timeslice`
    fn start(
        &self,
        stream: Arc<dyn CaptureStream>,
        format: &str,
        timeslice: Duration,
    ) -> Result<Box<dyn MediaRecording>>;
}

/// An in-progress recording producing independently decodable slices
#[async_trait::async_trait]
pub trait MediaRecording: Send {
    /// Next completed slice.
    ///
    /// After [`MediaRecording::stop`] any buffered media is flushed as a last
    /// slice and then `None` is returned.
    async fn next_slice(&mut self) -> Option<Vec<u8>>;

    /// Request the recording to finish
    fn stop(&mut self);
}
