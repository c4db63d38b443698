//! Control channel: the single duplex connection of a session
//!
//! - `ControlChannel` gates every write on the open state and the
//!   auth-before-data rule
//! - `Transport` abstracts the wire; `WebSocketTransport` talks to the
//!   analysis service, `MemoryTransport` runs in-process

pub mod control;
pub mod memory;
pub mod transport;
pub mod websocket;

pub use control::ControlChannel;
pub use memory::{MemoryPeer, MemoryTransport};
pub use transport::{Transport, TransportEvent, TransportLink, WireCommand};
pub use websocket::WebSocketTransport;
