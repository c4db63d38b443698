use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

/// Configuration for a streaming session coordinator
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Analysis service endpoint (e.g., "ws://localhost:8000/ws/video")
    pub server_url: String,

    /// Period of the still-frame sampler
    pub frame_interval: Duration,

    /// Length of each recording slice
    pub chunk_interval: Duration,

    /// Grace delay after the channel opens before the first frame/slice,
    /// letting the capture surface stabilize
    pub warmup: Duration,

    /// How long a coaching banner stays up
    pub banner_duration: Duration,

    /// Recording format requested from the media encoder
    pub media_format: String,

    /// Directory for the durable local copy; `None` disables it
    pub recordings_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000/ws/video".to_string(),
            frame_interval: Duration::from_millis(500),
            chunk_interval: Duration::from_secs(1),
            warmup: Duration::from_millis(500),
            banner_duration: Duration::from_secs(4),
            media_format: "video/webm;codecs=vp8,opus".to_string(),
            recordings_dir: None,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        let stream = &config.stream;
        Self {
            server_url: stream.server_url.clone(),
            frame_interval: Duration::from_millis(stream.frame_interval_ms.max(1)),
            chunk_interval: Duration::from_millis(stream.chunk_interval_ms.max(1)),
            warmup: Duration::from_millis(stream.warmup_ms),
            banner_duration: Duration::from_millis(stream.banner_ms),
            media_format: stream.media_format.clone(),
            recordings_dir: config
                .recordings
                .path
                .as_deref()
                .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned())),
        }
    }
}
