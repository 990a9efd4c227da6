//! Connection state notifications
//!
//! The engine reports connection open/close to an observer for operational
//! visibility. Observers must not block.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Connection lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConnectionEvent {
    Opened {
        #[serde(rename = "connection-id")]
        connection_id: Uuid,
        peer: String,
    },
    Closed {
        #[serde(rename = "connection-id")]
        connection_id: Uuid,
        peer: String,
        reason: Option<String>,
    },
}

impl ConnectionEvent {
    pub fn opened(connection_id: Uuid, peer: impl Into<String>) -> Self {
        Self::Opened {
            connection_id,
            peer: peer.into(),
        }
    }

    pub fn closed(connection_id: Uuid, peer: impl Into<String>, reason: Option<String>) -> Self {
        Self::Closed {
            connection_id,
            peer: peer.into(),
            reason,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        match self {
            Self::Opened { connection_id, .. } | Self::Closed { connection_id, .. } => *connection_id,
        }
    }

    pub fn peer(&self) -> &str {
        match self {
            Self::Opened { peer, .. } | Self::Closed { peer, .. } => peer,
        }
    }
}

/// Receives connection lifecycle events
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}

/// Logs every event at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { connection_id, peer } => {
                info!(%connection_id, %peer, "Connection opened");
            }
            ConnectionEvent::Closed {
                connection_id,
                peer,
                reason,
            } => {
                info!(%connection_id, %peer, reason = reason.as_deref().unwrap_or("none"), "Connection closed");
            }
        }
    }
}

impl<F> ConnectionObserver for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConnectionEvent) {
        self(event)
    }
}
