use tokio::sync::mpsc;

use crate::error::SessionError;

/// Command for the transport's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    Text(String),
    Close,
}

/// Event delivered by the transport's reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Peer closed the connection
    Closed,
    /// Receive failure; the connection is unusable afterwards
    Error(String),
}

/// An open duplex connection, as a pair of queues
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<WireCommand>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Duplex message transport capability
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection; returning `Ok` means the channel is open.
    async fn connect(&self, url: &str) -> Result<TransportLink, SessionError>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
