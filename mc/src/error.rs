//! Error types for the multiplexing engine

use std::time::Duration;
use thiserror::Error;

/// Result of a single multiplexed call
pub type CallResult = Result<Vec<u8>, MuxError>;

/// Errors that can occur while correlating calls and replies
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MuxError {
    #[error("Malformed correlation key: payload is {len} bytes, key needs {width}")]
    MalformedKey { len: usize, width: usize },

    #[error("No response received for {request} (key {key}, {received} message(s) in group)")]
    GroupTimeout {
        key: String,
        request: String,
        received: usize,
    },

    #[error("Call for key {key} timed out after {timeout:?}")]
    CallTimeout { key: String, timeout: Duration },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request of {len} bytes exceeds the frame limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("Too many outstanding calls (limit {limit})")]
    Backpressure { limit: usize },

    #[error("Correlation key {0} already has a call in flight")]
    KeyInUse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel error")]
    ChannelClosed,
}

impl MuxError {
    /// Check if this is either kind of timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, MuxError::GroupTimeout { .. } | MuxError::CallTimeout { .. })
    }

    /// Check if this error affects the whole connection rather than one call
    pub fn is_transport(&self) -> bool {
        matches!(self, MuxError::Transport(_) | MuxError::ChannelClosed)
    }

    /// Check if retrying the same request later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            MuxError::GroupTimeout { .. } => true,
            MuxError::CallTimeout { .. } => true,
            MuxError::Backpressure { .. } => true,
            MuxError::KeyInUse(_) => true,
            MuxError::Transport(_) => true,
            MuxError::ChannelClosed => false,
            MuxError::MalformedKey { .. } => false,
            MuxError::TooLarge { .. } => false,
            MuxError::Handler(_) => false,
            MuxError::InvalidConfig(_) => false,
        }
    }
}
