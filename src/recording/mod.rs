pub mod archive;
pub mod chunk;
pub mod sampler;

pub use archive::RecordingArchive;
pub use chunk::{ChunkConfig, ChunkRecorder, RecordingSummary};
pub use sampler::FrameSampler;

use tokio::sync::watch;

/// Resolve once a stop has been requested (or the stop sender is gone)
pub async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
