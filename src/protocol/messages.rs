use base64::Engine;
use serde::{Deserialize, Serialize};

/// Message sent to the analysis service
///
/// Field names are the wire contract; every payload is a text-safe data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Always the first message on a connection
    Auth { user_id: String },

    /// Still image snapshot of the capture surface
    Frame { data: String },

    /// One completed recording slice
    #[serde(rename = "video_chunk")]
    ChunkData { data: String },

    /// The complete recording, sent once at stop
    #[serde(rename = "video_complete")]
    FinalPayload { data: String },

    Stop,
}

impl OutboundMessage {
    /// Wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Frame { .. } => "frame",
            Self::ChunkData { .. } => "video_chunk",
            Self::FinalPayload { .. } => "video_complete",
            Self::Stop => "stop",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Message received from the analysis service
///
/// Unknown tags decode to [`InboundMessage::Unknown`]. Accepted field-name
/// aliases (camelCase spellings sent by older service builds) are listed on
/// each field and nowhere else. Optional fields are read leniently: a value of
/// the wrong JSON type counts as absent rather than rejecting the message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthSuccess {
        #[serde(default, alias = "sessionId", deserialize_with = "lenient::string")]
        session_id: Option<String>,
    },
    AiFeedback(AiFeedback),
    Feedback {
        #[serde(default, deserialize_with = "lenient::string")]
        message: Option<String>,
    },
    Status(StatusUpdate),
    UploadComplete {
        #[serde(default, deserialize_with = "lenient::string")]
        url: Option<String>,
    },
    FeedbackSaved {
        #[serde(default, alias = "count", deserialize_with = "lenient::count")]
        segments_saved: Option<u64>,
    },
    FeedbackSaveError(ServerError),
    UploadError(ServerError),
    #[serde(other)]
    Unknown,
}

/// Coaching feedback for one analysed segment
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AiFeedback {
    #[serde(default, deserialize_with = "lenient::string")]
    pub message: Option<String>,
    #[serde(default, alias = "isActionable", deserialize_with = "lenient::flag")]
    pub is_actionable: Option<bool>,
    #[serde(default, alias = "startSeconds", deserialize_with = "lenient::seconds")]
    pub start_seconds: Option<f64>,
    #[serde(default, alias = "endSeconds", deserialize_with = "lenient::seconds")]
    pub end_seconds: Option<f64>,
    #[serde(default, alias = "segmentIndex", deserialize_with = "lenient::count")]
    pub segment_index: Option<u64>,
    #[serde(default, alias = "sessionId", deserialize_with = "lenient::string")]
    pub session_id: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default, alias = "createdAt", deserialize_with = "lenient::string")]
    pub created_at: Option<String>,
}

impl AiFeedback {
    /// Sentinel the service sends when nothing needs correcting
    pub const OK_SENTINEL: &'static str = "OK";

    /// Trimmed message text, empty when absent
    pub fn text(&self) -> &str {
        self.message.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Whether this feedback belongs on the timeline
    pub fn is_actionable(&self) -> bool {
        let message = self.text();
        !message.is_empty()
            && !message.eq_ignore_ascii_case(Self::OK_SENTINEL)
            && self.is_actionable != Some(false)
    }
}

/// Analysis progress report
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, alias = "segmentsProcessed", deserialize_with = "lenient::count")]
    pub segments_processed: Option<u64>,
    #[serde(default, alias = "framesProcessed", deserialize_with = "lenient::count")]
    pub frames_processed: Option<u64>,
    /// Service-side time of the report; not a progress counter
    #[serde(default, deserialize_with = "lenient::seconds")]
    pub timestamp: Option<f64>,
}

/// Payload of `feedback_save_error` / `upload_error`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerError {
    #[serde(default, alias = "error", deserialize_with = "lenient::string")]
    pub message: Option<String>,
}

/// Field readers that map values of an unexpected JSON type to `None`
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
        Option::<Value>::deserialize(deserializer)
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match value(d)? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }

    /// Non-negative integer; integral floats and numeric strings are accepted
    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match value(d)? {
            Some(Value::Number(n)) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match value(d)? {
            Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()),
            Some(Value::String(s)) => s.trim().parse().ok().filter(|f: &f64| f.is_finite()),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match value(d)? {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        })
    }
}

/// Decode one inbound text frame; `None` for malformed JSON
pub fn decode_inbound(text: &str) -> Option<InboundMessage> {
    serde_json::from_str(text).ok()
}

/// Encode bytes as a `data:<mime>;base64,...` URL
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
