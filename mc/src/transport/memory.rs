//! In-process transport
//!
//! Runs a [`Handler`] as the peer: every sent frame is handed to the handler
//! on its own task and the reply comes back as an inbound frame. A handler
//! error comes back as a `Failed` event carrying the request. Useful for
//! tests and for embedding without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Transport, TransportEvent};
use crate::error::MuxError;
use crate::handler::Handler;
use crate::observer::ConnectionEvent;

const PEER: &str = "memory";

/// Transport backed by an in-process handler
pub struct MemoryTransport {
    handler: Arc<dyn Handler>,
    inbound: mpsc::Sender<TransportEvent>,
    connection_id: Uuid,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Connect to `handler`, returning the transport and its inbound event stream
    ///
    /// The stream starts with an `Opened` event.
    pub fn connect(handler: Arc<dyn Handler>, buffer: usize) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let connection_id = Uuid::now_v7();
        debug!(%connection_id, buffer, "MemoryTransport::connect: called");

        // Fresh channel with capacity >= 1, so this cannot fail
        let _ = tx.try_send(TransportEvent::Connection(ConnectionEvent::opened(connection_id, PEER)));

        let transport = Arc::new(Self {
            handler,
            inbound: tx,
            connection_id,
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a frame as if the peer had sent it unprompted
    pub async fn inject(&self, frame: Vec<u8>) -> Result<(), MuxError> {
        debug!(len = frame.len(), "MemoryTransport::inject: called");
        self.inbound
            .send(TransportEvent::Frame(frame))
            .await
            .map_err(|_| MuxError::ChannelClosed)
    }

    /// Close the connection; later sends fail and a `Closed` event is emitted
    pub async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection_id = %self.connection_id, %reason, "MemoryTransport::close: called");
        let event = ConnectionEvent::closed(self.connection_id, PEER, Some(reason.to_string()));
        let _ = self.inbound.send(TransportEvent::Connection(event)).await;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Transport("connection closed".to_string()));
        }

        let handler = Arc::clone(&self.handler);
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            let event = match handler.handle(frame.clone()).await {
                Ok(reply) => TransportEvent::Frame(reply),
                Err(error) => {
                    warn!(error = %error, "MemoryTransport: handler failed");
                    TransportEvent::Failed { request: frame, error }
                }
            };
            if inbound.send(event).await.is_err() {
                debug!("MemoryTransport: receiver gone, reply dropped");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Handler for Upper {
        async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>, MuxError> {
            if request == b"FAIL" {
                return Err(MuxError::Handler("Failure Demonstration".to_string()));
            }
            Ok(request.to_ascii_uppercase())
        }
    }

    #[tokio::test]
    async fn test_connect_emits_opened() {
        let (transport, mut rx) = MemoryTransport::connect(Arc::new(Upper), 8);
        match rx.recv().await.unwrap() {
            TransportEvent::Connection(ConnectionEvent::Opened { connection_id, peer }) => {
                assert_eq!(connection_id, transport.connection_id());
                assert_eq!(peer, "memory");
            }
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_delivers_reply() {
        let (transport, mut rx) = MemoryTransport::connect(Arc::new(Upper), 8);
        rx.recv().await.unwrap();

        transport.send(b"abc".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Frame(b"ABC".to_vec()));
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let (transport, mut rx) = MemoryTransport::connect(Arc::new(Upper), 8);
        rx.recv().await.unwrap();

        transport.send(b"FAIL".to_vec()).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Failed {
                request: b"FAIL".to_vec(),
                error: MuxError::Handler("Failure Demonstration".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_close_rejects_sends() {
        let (transport, mut rx) = MemoryTransport::connect(Arc::new(Upper), 8);
        rx.recv().await.unwrap();

        transport.close("test over").await;
        transport.close("again").await;
        assert!(transport.is_closed());
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Connection(ConnectionEvent::Closed { .. })
        ));
        assert!(matches!(
            transport.send(b"abc".to_vec()).await,
            Err(MuxError::Transport(_))
        ));
    }
}
