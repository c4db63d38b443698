use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub recordings: RecordingsConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "zynk-live".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Analysis service connection and producer cadences
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub server_url: String,
    pub frame_interval_ms: u64,
    pub chunk_interval_ms: u64,
    pub warmup_ms: u64,
    pub banner_ms: u64,
    pub media_format: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000/ws/video".to_string(),
            frame_interval_ms: 500,
            chunk_interval_ms: 1000,
            warmup_ms: 500,
            banner_ms: 4000,
            media_format: "video/webm;codecs=vp8,opus".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordingsConfig {
    /// Directory for the durable local copy; unset disables it
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
