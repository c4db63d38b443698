// In-process transport for tests and offline demos
//
// Each `connect` hands the far end of the link to whoever awaits
// `MemoryTransport::accept`, which then plays the analysis service.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use super::transport::{Transport, TransportEvent, TransportLink, WireCommand};
use crate::error::SessionError;
use crate::protocol::OutboundMessage;

pub struct MemoryTransport {
    refuse_with: Option<String>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
    attempts: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            refuse_with: None,
            peers_tx,
            peers_rx: Mutex::new(peers_rx),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Transport whose every connection attempt fails with `reason`
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            refuse_with: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Wait for the next client connection
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }

    /// Number of `connect` calls so far, successful or not
    pub fn connection_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = &self.refuse_with {
            return Err(SessionError::Transport(reason.clone()));
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            received: outgoing_rx,
            inject: incoming_tx,
        };
        self.peers_tx
            .send(peer)
            .map_err(|_| SessionError::Transport("memory transport dropped".to_string()))?;

        info!("Memory transport connected to {}", url);

        Ok(TransportLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Server side of an in-memory connection
pub struct MemoryPeer {
    url: String,
    received: mpsc::UnboundedReceiver<WireCommand>,
    inject: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next raw command written by the client; `None` once the client
    /// dropped its writer
    pub async fn next_command(&mut self) -> Option<WireCommand> {
        self.received.recv().await
    }

    /// Next decoded client message; `None` on close or end of stream
    pub async fn next_message(&mut self) -> Option<OutboundMessage> {
        match self.received.recv().await? {
            WireCommand::Text(text) => serde_json::from_str(&text).ok(),
            WireCommand::Close => None,
        }
    }

    /// Every command currently queued, without waiting
    pub fn drain_pending(&mut self) -> Vec<WireCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.received.try_recv() {
            commands.push(command);
        }
        commands
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inject.send(TransportEvent::Text(text.into()));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Close the connection from the server side without a terminal message
    pub fn hang_up(&self) {
        let _ = self.inject.send(TransportEvent::Closed);
    }

    /// Simulate a receive failure
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inject.send(TransportEvent::Error(reason.into()));
    }
}
