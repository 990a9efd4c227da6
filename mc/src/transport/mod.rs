//! Transport boundary
//!
//! The engine only needs to push frames out and be told about frames and
//! connection changes coming in. Framing, sockets and reconnects belong to
//! the transport implementation.

mod memory;

use async_trait::async_trait;

use crate::error::MuxError;
use crate::observer::ConnectionEvent;

pub use memory::MemoryTransport;

/// Default capacity of the inbound event channel
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Outbound half of a shared connection
///
/// Implementations serialize concurrent sends onto the single ordered stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), MuxError>;
}

/// Inbound traffic delivered to the receiver task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection opened or closed
    Connection(ConnectionEvent),
    /// One complete frame from the peer
    Frame(Vec<u8>),
    /// The peer's handler rejected `request` and will not reply to it
    Failed { request: Vec<u8>, error: MuxError },
}
