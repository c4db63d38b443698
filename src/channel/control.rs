use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::transport::{TransportEvent, TransportLink, WireCommand};
use crate::error::SessionError;
use crate::protocol::OutboundMessage;
use crate::session::{ConnectionStatus, SessionStore};

/// The single duplex connection of a session
///
/// Only writes while open; data messages are refused until `auth` has been
/// queued, and `auth` is queued under the same lock as every later write, so
/// the remote peer always observes it first.
pub struct ControlChannel {
    /// Writer half; `None` before open and after close
    outgoing: Mutex<Option<mpsc::UnboundedSender<WireCommand>>>,

    /// Whether `auth` has been queued on this connection
    auth_sent: AtomicBool,

    store: Arc<SessionStore>,
}

impl ControlChannel {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            outgoing: Mutex::new(None),
            auth_sent: AtomicBool::new(false),
            store,
        }
    }

    /// Take ownership of an open link, returning its inbound event queue
    pub fn attach(&self, link: TransportLink) -> mpsc::UnboundedReceiver<TransportEvent> {
        *self.outgoing() = Some(link.outgoing);
        self.store.set_status(ConnectionStatus::Connected);
        info!("Control channel open");
        link.incoming
    }

    pub fn is_open(&self) -> bool {
        self.outgoing().is_some() && self.store.status().is_open()
    }

    pub fn auth_sent(&self) -> bool {
        self.auth_sent.load(Ordering::SeqCst)
    }

    /// Queue a message. Returns `false` when it was discarded.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} message: {}", message.tag(), e);
                return false;
            }
        };

        let guard = self.outgoing();
        let Some(tx) = guard.as_ref() else {
            debug!("Discarding {} message: connection not open", message.tag());
            return false;
        };
        if !self.store.status().is_open() {
            debug!("Discarding {} message: connection closing", message.tag());
            return false;
        }

        if message.is_auth() {
            if self.auth_sent.swap(true, Ordering::SeqCst) {
                warn!("Auth already sent on this connection");
                return false;
            }
        } else if !self.auth_sent() {
            warn!("Refusing {} message before auth", message.tag());
            return false;
        }

        if tx.send(WireCommand::Text(text)).is_ok() {
            return true;
        }
        drop(guard);

        warn!("Failed to send {} message: transport writer gone", message.tag());
        self.mark_lost("transport writer gone");
        false
    }

    /// Close from our side. Idempotent.
    pub fn close(&self) {
        if let Some(tx) = self.outgoing().take() {
            let _ = tx.send(WireCommand::Close);
            self.store.set_status(ConnectionStatus::Closed);
            info!("Control channel closed");
        }
    }

    /// The connection failed or was closed by the peer without a terminal
    /// message. Returns `true` if this ended an open connection.
    pub fn mark_lost(&self, reason: &str) -> bool {
        self.outgoing().take();
        if self.store.set_status(ConnectionStatus::Disconnected) {
            self.store
                .surface_error(&SessionError::Transport(reason.to_string()));
            self.store.set_caption("Connection lost");
            return true;
        }
        false
    }

    fn outgoing(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<WireCommand>>> {
        self.outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
