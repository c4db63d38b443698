// Shared fixtures for session integration tests
#![allow(dead_code)]

use anyhow::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use zynk_live::capture::{CaptureDevice, CaptureStream, MediaEncoder, MediaRecording};
use zynk_live::capture::{SyntheticStream, PpmStillEncoder};
use zynk_live::channel::{MemoryPeer, MemoryTransport, Transport, TransportLink};
use zynk_live::{Capabilities, OutboundMessage, SessionConfig, SessionCoordinator, SessionError};

pub const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than [`WAIT`]
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting for the session")
}

/// Session config with test-friendly cadences
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        server_url: "memory://analysis".to_string(),
        frame_interval: Duration::from_millis(20),
        chunk_interval: Duration::from_millis(20),
        warmup: Duration::from_millis(10),
        banner_duration: Duration::from_millis(50),
        media_format: "video/webm;codecs=vp8,opus".to_string(),
        recordings_dir: None,
    }
}

/// How one `acquire` call behaves
#[derive(Debug, Clone, Copy, Default)]
pub struct Plan {
    pub delay: Duration,
    pub deny: bool,
}

/// Camera that keeps a handle on every stream it hands out
///
/// Each `acquire` follows the next queued [`Plan`], then the default plan.
pub struct TestCamera {
    pub width: u32,
    pub height: u32,
    default_plan: Plan,
    plans: Mutex<VecDeque<Plan>>,
    pub streams: Mutex<Vec<Arc<SyntheticStream>>>,
}

impl TestCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            default_plan: Plan::default(),
            plans: Mutex::new(VecDeque::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn denying() -> Self {
        Self {
            default_plan: Plan {
                deny: true,
                ..Plan::default()
            },
            ..Self::new(8, 6)
        }
    }

    /// Camera whose every acquisition takes `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            default_plan: Plan {
                delay,
                ..Plan::default()
            },
            ..Self::new(8, 6)
        }
    }

    /// Camera that follows `plans` in order, then acquires immediately
    pub fn scripted(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            ..Self::new(8, 6)
        }
    }

    pub fn last_stream(&self) -> Arc<SyntheticStream> {
        self.streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no stream acquired")
    }
}

#[async_trait::async_trait]
impl CaptureDevice for TestCamera {
    async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, SessionError> {
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_plan);

        if !plan.delay.is_zero() {
            tokio::time::sleep(plan.delay).await;
        }
        if plan.deny {
            return Err(SessionError::Permission("denied by test".to_string()));
        }

        let stream = Arc::new(SyntheticStream::new(self.width, self.height, Duration::ZERO));
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }

    fn name(&self) -> &str {
        "test camera"
    }
}

/// Transport whose `connect` never resolves
#[derive(Default)]
pub struct StalledTransport {
    attempts: AtomicUsize,
    abandoned: Arc<AtomicBool>,
}

impl StalledTransport {
    pub fn connection_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether a pending `connect` was dropped by its caller
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for StalledTransport {
    async fn connect(&self, _url: &str) -> Result<TransportLink, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let _guard = SetOnDrop(Arc::clone(&self.abandoned));
        std::future::pending::<Result<TransportLink, SessionError>>().await
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Media encoder whose slices are pushed by the test
pub struct ScriptedEncoder {
    supported: bool,
    slices: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ScriptedEncoder {
    pub fn new() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                supported: true,
                slices: Mutex::new(Some(rx)),
            },
            tx,
        )
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            slices: Mutex::new(None),
        }
    }
}

impl MediaEncoder for ScriptedEncoder {
    fn is_supported(&self, _format: &str) -> bool {
        self.supported
    }

    fn start(
        &self,
        _stream: Arc<dyn CaptureStream>,
        _format: &str,
        _timeslice: Duration,
    ) -> Result<Box<dyn MediaRecording>> {
        let rx = self
            .slices
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("scripted encoder already used"))?;
        Ok(Box::new(ScriptedRecording { rx, stopped: false }))
    }
}

struct ScriptedRecording {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stopped: bool,
}

#[async_trait::async_trait]
impl MediaRecording for ScriptedRecording {
    async fn next_slice(&mut self) -> Option<Vec<u8>> {
        if self.stopped {
            return self.rx.try_recv().ok();
        }
        self.rx.recv().await
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// A coordinator wired to a test camera, scripted encoder and memory transport
pub struct Harness {
    pub coordinator: Arc<SessionCoordinator>,
    pub camera: Arc<TestCamera>,
    pub transport: Arc<MemoryTransport>,
    pub slices: mpsc::UnboundedSender<Vec<u8>>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        Self::with(config, TestCamera::new(8, 6), MemoryTransport::new())
    }

    pub fn with(config: SessionConfig, camera: TestCamera, transport: MemoryTransport) -> Self {
        let (encoder, slices) = ScriptedEncoder::new();
        let camera = Arc::new(camera);
        let transport = Arc::new(transport);
        let coordinator = coordinator(config, camera.clone(), transport.clone(), encoder);

        Self {
            coordinator,
            camera,
            transport,
            slices,
        }
    }

    pub async fn accept(&self) -> MemoryPeer {
        within(self.transport.accept())
            .await
            .expect("transport dropped")
    }
}

/// Coordinator over a test camera, any transport and a scripted encoder
pub fn coordinator(
    config: SessionConfig,
    camera: Arc<TestCamera>,
    transport: Arc<dyn Transport>,
    encoder: ScriptedEncoder,
) -> Arc<SessionCoordinator> {
    Arc::new(SessionCoordinator::new(
        config,
        Capabilities {
            device: camera,
            media_encoder: Arc::new(encoder),
            still_encoder: Arc::new(PpmStillEncoder),
            transport,
        },
    ))
}

/// Next message that is not a frame
pub async fn next_non_frame(peer: &mut MemoryPeer) -> Option<OutboundMessage> {
    loop {
        match within(peer.next_message()).await? {
            OutboundMessage::Frame { .. } => continue,
            other => return Some(other),
        }
    }
}

/// Collect every message until the client closes or drops the connection
pub async fn collect_until_closed(peer: &mut MemoryPeer) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Some(message) = within(peer.next_message()).await {
        messages.push(message);
    }
    messages
}

pub fn tags(messages: &[OutboundMessage]) -> Vec<&'static str> {
    messages.iter().map(|m| m.tag()).collect()
}

/// Poll `check` until it holds, failing the test after [`WAIT`]
pub async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
