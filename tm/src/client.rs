//! TCP client transport
//!
//! One shared connection for every caller. Writes go through a mutex so
//! frames never interleave; a single reader task turns inbound frames into
//! [`TransportEvent`]s for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use muxcore::{ConnectionEvent, MuxError, Transport, TransportEvent};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::framing::{FrameError, LengthHeader, read_frame, write_frame};

/// Client side of a framed TCP connection
pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
    header: LengthHeader,
    peer: SocketAddr,
    connection_id: Uuid,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Connect to `addr`, returning the transport and its inbound event stream
    pub async fn connect(
        addr: &str,
        header: LengthHeader,
        connect_timeout: Duration,
        buffer: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), MuxError> {
        debug!(%addr, ?header, ?connect_timeout, "TcpTransport::connect: called");

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(MuxError::Transport(format!("Failed to connect to {addr}: {e}"))),
            Err(_) => {
                return Err(MuxError::Transport(format!(
                    "Connection to {addr} timed out after {connect_timeout:?}"
                )));
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| MuxError::Transport(e.to_string()))?;
        let peer = stream.peer_addr().map_err(|e| MuxError::Transport(e.to_string()))?;

        let connection_id = Uuid::now_v7();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let _ = tx
            .send(TransportEvent::Connection(ConnectionEvent::opened(
                connection_id,
                peer.to_string(),
            )))
            .await;
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_loop(reader, header, tx, connection_id, peer, Arc::clone(&closed)));

        info!(%peer, %connection_id, "Connected");
        let transport = Arc::new(Self {
            writer: Mutex::new(writer),
            header,
            peer,
            connection_id,
            closed,
        });
        Ok((transport, rx))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// True once the reader has seen the connection end
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Transport("connection closed".to_string()));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, self.header, &frame).await.map_err(|e| match e {
            // Rejected before any byte was written; the connection is still good
            FrameError::TooLarge { len, max } => MuxError::TooLarge { len, max },
            e => MuxError::Transport(e.to_string()),
        })
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    header: LengthHeader,
    tx: mpsc::Sender<TransportEvent>,
    connection_id: Uuid,
    peer: SocketAddr,
    closed: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(reader);
    let reason = loop {
        match read_frame(&mut reader, header).await {
            Ok(frame) => {
                if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                    debug!(%peer, "read_loop: gateway gone, stopping");
                    closed.store(true, Ordering::SeqCst);
                    return;
                }
            }
            Err(FrameError::Closed) => break None,
            Err(e) => {
                warn!(%peer, error = %e, "read_loop: connection failed");
                break Some(e.to_string());
            }
        }
    };

    info!(%peer, %connection_id, ?reason, "Disconnected");
    closed.store(true, Ordering::SeqCst);
    let event = ConnectionEvent::closed(connection_id, peer.to_string(), reason);
    let _ = tx.send(TransportEvent::Connection(event)).await;
}
