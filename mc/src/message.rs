//! Messages flowing through the aggregator

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Which way a message travelled on the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Request sent by a local caller (admitted as the group's echo)
    Outbound,
    /// Frame received from the peer
    Inbound,
}

/// A payload plus arrival metadata
#[derive(Debug, Clone)]
pub struct Message {
    payload: Vec<u8>,
    direction: Direction,
    sequence: u64,
    received_at: Instant,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>, direction: Direction) -> Self {
        Self {
            payload: payload.into(),
            direction,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            received_at: Instant::now(),
        }
    }

    pub fn outbound(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(payload, Direction::Outbound)
    }

    pub fn inbound(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(payload, Direction::Inbound)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload rendered as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Process-wide arrival order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}
