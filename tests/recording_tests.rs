// Integration tests for the chunk recorder, frame sampler and local archive
//
// Producers write through a control channel attached to an in-memory link,
// with auth already sent so data messages are accepted.

mod common;

use anyhow::Result;
use common::{within, ScriptedEncoder};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use zynk_live::capture::synthetic::SYNTHETIC_MEDIA_HEADER;
use zynk_live::capture::{
    CaptureStream, MediaEncoder, PpmStillEncoder, SyntheticMediaEncoder, SyntheticStream,
};
use zynk_live::channel::{ControlChannel, MemoryPeer, MemoryTransport, Transport};
use zynk_live::protocol::to_data_url;
use zynk_live::recording::archive::extension_for;
use zynk_live::recording::{ChunkConfig, ChunkRecorder, FrameSampler, RecordingArchive};
use zynk_live::session::SessionStore;
use zynk_live::{OutboundMessage, SessionError, UserId};

const FORMAT: &str = "video/webm;codecs=vp8,opus";

struct Wire {
    store: Arc<SessionStore>,
    channel: Arc<ControlChannel>,
    peer: MemoryPeer,
    _transport: MemoryTransport,
}

async fn open_wire() -> Result<Wire> {
    let transport = MemoryTransport::new();
    let store = Arc::new(SessionStore::new());
    store.begin(UserId::new("user-1"));
    store.begin_connecting();

    let channel = Arc::new(ControlChannel::new(Arc::clone(&store)));
    let _incoming = channel.attach(transport.connect("memory://analysis").await?);
    let mut peer = within(transport.accept()).await.expect("no peer");

    assert!(channel.send(&OutboundMessage::Auth {
        user_id: "user-1".to_string(),
    }));
    assert!(within(peer.next_message()).await.is_some_and(|m| m.is_auth()));

    Ok(Wire {
        store,
        channel,
        peer,
        _transport: transport,
    })
}

fn stream() -> Arc<SyntheticStream> {
    Arc::new(SyntheticStream::new(4, 3, Duration::ZERO))
}

fn chunk_config() -> ChunkConfig {
    ChunkConfig {
        timeslice: Duration::from_millis(10),
        ..ChunkConfig::new(FORMAT, "test-session")
    }
}

#[tokio::test]
async fn test_no_slices_sends_stop_only() -> Result<()> {
    let mut wire = open_wire().await?;
    let (encoder, _slices) = ScriptedEncoder::new();

    let recorder = ChunkRecorder::start(
        &encoder,
        stream(),
        chunk_config(),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        Arc::new(AtomicBool::new(true)),
        None,
    )?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(recorder.run(stop_rx));
    stop_tx.send_replace(true);
    let summary = within(handle).await??;

    assert_eq!(summary.slices, 0);
    assert!(!summary.final_payload_sent);
    assert_eq!(within(wire.peer.next_message()).await, Some(OutboundMessage::Stop));
    assert!(wire.peer.drain_pending().is_empty(), "Nothing should follow stop");

    Ok(())
}

#[tokio::test]
async fn test_final_payload_concatenates_slices() -> Result<()> {
    let mut wire = open_wire().await?;
    let (encoder, slices) = ScriptedEncoder::new();

    let recorder = ChunkRecorder::start(
        &encoder,
        stream(),
        chunk_config(),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        Arc::new(AtomicBool::new(true)),
        None,
    )?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(recorder.run(stop_rx));

    slices.send(vec![1, 2])?;
    slices.send(Vec::new())?;
    slices.send(vec![3])?;

    // Both chunks go out before stop is requested
    let mut chunks = HashSet::new();
    for _ in 0..2 {
        match within(wire.peer.next_message()).await {
            Some(OutboundMessage::ChunkData { data }) => {
                chunks.insert(data);
            }
            other => panic!("expected video_chunk, got {:?}", other),
        }
    }
    assert!(chunks.contains(&to_data_url(FORMAT, &[1, 2])));
    assert!(chunks.contains(&to_data_url(FORMAT, &[3])));

    stop_tx.send_replace(true);
    let summary = within(handle).await??;

    assert_eq!(summary.slices, 2, "Empty slices are skipped");
    assert_eq!(summary.total_bytes, 3);
    assert!(summary.final_payload_sent);

    assert_eq!(
        within(wire.peer.next_message()).await,
        Some(OutboundMessage::FinalPayload {
            data: to_data_url(FORMAT, &[1, 2, 3]),
        })
    );
    assert_eq!(within(wire.peer.next_message()).await, Some(OutboundMessage::Stop));

    let snapshot = wire.store.snapshot(0);
    assert_eq!(snapshot.chunks_sent, 2);
    assert_eq!(snapshot.final_payload_bytes, Some(3));

    Ok(())
}

#[tokio::test]
async fn test_unsupported_format_is_configuration_error() -> Result<()> {
    let wire = open_wire().await?;

    let result = ChunkRecorder::start(
        &ScriptedEncoder::unsupported(),
        stream(),
        chunk_config(),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        Arc::new(AtomicBool::new(true)),
        None,
    );

    assert!(matches!(result, Err(SessionError::Configuration(_))));

    Ok(())
}

#[tokio::test]
async fn test_archive_keeps_recording_after_session_ends() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let archive = RecordingArchive::new(temp_dir.path().join("recordings"))?;
    let mut wire = open_wire().await?;
    let (encoder, slices) = ScriptedEncoder::new();

    // Session already torn down: nothing may reach the wire
    let active = Arc::new(AtomicBool::new(false));
    let recorder = ChunkRecorder::start(
        &encoder,
        stream(),
        chunk_config(),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        active,
        Some(archive),
    )?;

    slices.send(b"abc".to_vec())?;
    slices.send(b"def".to_vec())?;

    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send_replace(true);
    let summary = within(recorder.run(stop_rx)).await?;

    assert!(!summary.final_payload_sent);
    assert!(wire.peer.drain_pending().is_empty());

    let path = summary.archived_to.expect("recording should be archived");
    assert!(path.to_string_lossy().ends_with("test-session.webm"));
    assert_eq!(std::fs::read(&path)?, b"abcdef");
    assert_eq!(wire.store.snapshot(0).recording_path, Some(path));

    Ok(())
}

#[tokio::test]
async fn test_synthetic_recording_ends_with_tracks() -> Result<()> {
    let mut wire = open_wire().await?;
    let stream = stream();
    let encoder = SyntheticMediaEncoder::default();

    let recorder = ChunkRecorder::start(
        &encoder,
        stream.clone(),
        chunk_config(),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        Arc::new(AtomicBool::new(true)),
        None,
    )?;

    let (_stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(recorder.run(stop_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.release_tracks();
    let summary = within(handle).await??;

    assert!(summary.slices >= 1);
    assert!(summary.final_payload_sent);

    let mut last = None;
    while let Some(message) = within(wire.peer.next_message()).await {
        let is_stop = message == OutboundMessage::Stop;
        last = Some(message);
        if is_stop {
            break;
        }
    }
    assert_eq!(last, Some(OutboundMessage::Stop));

    Ok(())
}

#[test]
fn test_synthetic_encoder_formats() {
    let encoder = SyntheticMediaEncoder::default();
    assert!(encoder.is_supported(FORMAT));
    assert!(encoder.is_supported("VIDEO/MP4"));
    assert!(!encoder.is_supported("video/x-matroska"));

    assert_eq!(extension_for(FORMAT), "webm");
    assert_eq!(extension_for("video/mp4;codecs=avc1"), "mp4");
    assert_eq!(extension_for("application/octet-stream"), "bin");
    assert!(!SYNTHETIC_MEDIA_HEADER.is_empty());
}

fn sampler(wire: &Wire, stream: Arc<SyntheticStream>, active: bool) -> FrameSampler {
    FrameSampler::new(
        stream,
        Arc::new(PpmStillEncoder),
        Arc::clone(&wire.channel),
        Arc::clone(&wire.store),
        Arc::new(AtomicBool::new(active)),
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn test_sampler_sends_still_frames() -> Result<()> {
    let mut wire = open_wire().await?;
    let stream = stream();
    let sampler = sampler(&wire, stream.clone(), true);

    assert!(sampler.sample().await);

    let Some(OutboundMessage::Frame { data }) = within(wire.peer.next_message()).await else {
        panic!("expected a frame");
    };
    assert!(data.starts_with("data:image/x-portable-pixmap;base64,"));
    assert_eq!(stream.frames_grabbed(), 1);
    assert_eq!(wire.store.snapshot(0).frames_sent, 1);

    Ok(())
}

#[tokio::test]
async fn test_sampler_skips_unlaid_surface() -> Result<()> {
    let mut wire = open_wire().await?;
    let stream = Arc::new(SyntheticStream::new(4, 3, Duration::from_secs(60)));
    let sampler = sampler(&wire, stream.clone(), true);

    assert!(!sampler.sample().await);
    assert_eq!(stream.frames_grabbed(), 0);
    assert!(wire.peer.drain_pending().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_sampler_skips_when_not_open() -> Result<()> {
    let mut wire = open_wire().await?;
    wire.channel.close();
    let stream = stream();

    assert!(!sampler(&wire, stream.clone(), true).sample().await);
    assert_eq!(stream.frames_grabbed(), 0);

    let inactive = open_wire().await?;
    assert!(!sampler(&inactive, stream.clone(), false).sample().await);
    assert_eq!(stream.frames_grabbed(), 0);

    // Only the close command reached the first peer
    assert_eq!(wire.peer.drain_pending().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_sampler_stops_on_request() -> Result<()> {
    let mut wire = open_wire().await?;
    let sampler = sampler(&wire, stream(), true);

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(sampler.run(stop_rx));

    for _ in 0..2 {
        assert!(matches!(
            within(wire.peer.next_message()).await,
            Some(OutboundMessage::Frame { .. })
        ));
    }

    stop_tx.send_replace(true);
    within(handle).await?;

    Ok(())
}
