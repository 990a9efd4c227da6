//! TCP server
//!
//! Accepts connections and answers every frame with the handler's reply on
//! the same connection. Frames on one connection are handled concurrently,
//! so replies may leave in a different order than requests arrived.

use std::net::SocketAddr;
use std::sync::Arc;

use eyre::{Context, Result};
use muxcore::{ConnectionEvent, ConnectionObserver, Handler, LoggingObserver};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::framing::{FrameError, LengthHeader, read_frame, write_frame};

/// Framed TCP server running a [`Handler`]
pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    observer: Arc<dyn ConnectionObserver>,
    header: LengthHeader,
}

impl Server {
    pub async fn bind(addr: &str, handler: Arc<dyn Handler>, header: LengthHeader) -> Result<Self> {
        debug!(%addr, ?header, "Server::bind: called");
        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {addr}"))?;
        Ok(Self {
            listener,
            handler,
            observer: Arc::new(LoggingObserver),
            header,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    /// Accept connections until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Server listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            handler: Arc::clone(&self.handler),
                            observer: Arc::clone(&self.observer),
                            header: self.header,
                            peer,
                        };
                        tokio::spawn(connection.serve(stream, cancel.child_token()));
                    }
                    Err(e) => warn!(error = %e, "Server: accept failed"),
                },
            }
        }

        info!(%addr, "Server stopped");
        Ok(())
    }
}

struct Connection {
    handler: Arc<dyn Handler>,
    observer: Arc<dyn ConnectionObserver>,
    header: LengthHeader,
    peer: SocketAddr,
}

impl Connection {
    async fn serve(self, stream: TcpStream, cancel: CancellationToken) {
        let connection_id = Uuid::now_v7();
        let peer = self.peer.to_string();
        self.observer.on_event(&ConnectionEvent::opened(connection_id, peer.clone()));

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Connection: set_nodelay failed");
        }
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let writer = Arc::new(Mutex::new(writer));

        let reason = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break Some("server shutting down".to_string()),
                frame = read_frame(&mut reader, self.header) => frame,
            };
            match frame {
                Ok(request) => {
                    tokio::spawn(respond(
                        Arc::clone(&self.handler),
                        Arc::clone(&writer),
                        self.header,
                        request,
                    ));
                }
                Err(FrameError::Closed) => break None,
                Err(e) => {
                    warn!(%peer, error = %e, "Connection: read failed");
                    break Some(e.to_string());
                }
            }
        };

        // In-flight handlers hold the writer; shutting it down lets the peer see EOF now
        if cancel.is_cancelled() {
            if let Err(e) = writer.lock().await.shutdown().await {
                debug!(%peer, error = %e, "Connection: shutdown failed");
            }
        }

        self.observer
            .on_event(&ConnectionEvent::closed(connection_id, peer, reason));
    }
}

/// Run the handler for one request and write its reply, if any
async fn respond(handler: Arc<dyn Handler>, writer: Arc<Mutex<OwnedWriteHalf>>, header: LengthHeader, request: Vec<u8>) {
    let reply = match handler.handle(request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "respond: handler failed, no reply sent");
            return;
        }
    };

    let mut writer = writer.lock().await;
    if let Err(e) = write_frame(&mut *writer, header, &reply).await {
        warn!(error = %e, "respond: write failed");
    }
}
