pub mod backend;
pub mod synthetic;

pub use backend::{
    CaptureDevice, CaptureStream, MediaEncoder, MediaRecording, StillEncoder, VideoFrame,
};
pub use synthetic::{
    PpmStillEncoder, SyntheticCamera, SyntheticCameraConfig, SyntheticMediaEncoder,
    SyntheticStream,
};
