use thiserror::Error;

/// Errors surfaced to the operator of a streaming session.
///
/// Every variant is advisory: the session store keeps its `Display` text and
/// there is no retry policy beyond starting a new session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Camera/microphone access was denied or the device could not be opened.
    #[error("camera or microphone unavailable: {0}")]
    Permission(String),

    /// The requested recording format is not supported by the runtime.
    #[error("recording format not supported: {0}")]
    Configuration(String),

    /// Connect, send or receive failure on the control channel.
    #[error("connection error: {0}")]
    Transport(String),

    /// Error reported verbatim by the analysis service.
    #[error("{0}")]
    ServerReported(String),

    /// A session is already alive on this coordinator.
    #[error("a streaming session is already active")]
    AlreadyStreaming,
}
