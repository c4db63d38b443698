use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportEvent, TransportLink, WireCommand};
use crate::error::SessionError;

/// WebSocket transport to the analysis service
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, SessionError> {
        info!("Connecting to {}", url);

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| SessionError::Transport(format!("failed to connect to {}: {}", url, e)))?;

        info!("Connected to {}", url);

        let (mut sink, mut stream) = ws.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<WireCommand>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: drains the command queue in order; a failed write ends the
        // connection through the reader's event queue
        let failures = incoming_tx.clone();
        tokio::spawn(async move {
            while let Some(command) = outgoing_rx.recv().await {
                match command {
                    WireCommand::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            let _ = failures
                                .send(TransportEvent::Error(format!("send failed: {}", e)));
                            break;
                        }
                    }
                    WireCommand::Close => {
                        if let Err(e) = sink.close().await {
                            debug!("WebSocket close failed: {}", e);
                        }
                        break;
                    }
                }
            }
            debug!("WebSocket writer stopped");
        });

        // Reader: forwards text frames until the connection ends
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(TransportEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = incoming_tx.send(TransportEvent::Closed);
            debug!("WebSocket reader stopped");
        });

        Ok(TransportLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
