pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod protocol;
pub mod recording;
pub mod session;

pub use capture::{
    CaptureDevice, CaptureStream, MediaEncoder, MediaRecording, PpmStillEncoder, StillEncoder,
    SyntheticCamera, SyntheticCameraConfig, SyntheticMediaEncoder, VideoFrame,
};
pub use channel::{ControlChannel, MemoryTransport, Transport, WebSocketTransport};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use identity::{resolve_user, IdentityProvider, StaticIdentity, UserId};
pub use protocol::{InboundMessage, OutboundMessage, ProtocolInterpreter};
pub use recording::{ChunkConfig, ChunkRecorder, FrameSampler, RecordingArchive};
pub use session::{
    Capabilities, ConnectionStatus, FeedbackSegment, FeedbackTimeline, SegmentKey,
    SessionConfig, SessionCoordinator, SessionSnapshot, SessionStore,
};
