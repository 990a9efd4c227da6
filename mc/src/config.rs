//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::MuxError;

/// Multiplexing engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Bytes of payload prefix used as the correlation key
    #[serde(rename = "correlation-key-width")]
    pub correlation_key_width: usize,

    /// Time an unreleased group may stay open before it is discarded
    #[serde(rename = "group-timeout-ms")]
    pub group_timeout_ms: u64,

    /// Messages required before a group is released
    #[serde(rename = "release-group-size")]
    pub release_group_size: usize,

    /// Position in the released group whose payload is returned to the caller
    #[serde(rename = "output-index")]
    pub output_index: usize,

    /// Default caller-side deadline, independent of the group timeout
    #[serde(rename = "reply-timeout-ms")]
    pub reply_timeout_ms: u64,

    /// Bound on open groups and on pending calls
    #[serde(rename = "max-outstanding-groups")]
    pub max_outstanding_groups: usize,

    /// How often the reaper sweeps for expired groups
    #[serde(rename = "reap-interval-ms")]
    pub reap_interval_ms: u64,

    /// Capacity of the inbound event channel between transport and receiver
    #[serde(rename = "inbound-buffer")]
    pub inbound_buffer: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            correlation_key_width: 3,
            group_timeout_ms: 1000,
            release_group_size: 2,
            output_index: 1,
            reply_timeout_ms: 20_000,
            max_outstanding_groups: 10_000,
            reap_interval_ms: 100,
            inbound_buffer: crate::transport::DEFAULT_INBOUND_BUFFER,
        }
    }
}

impl MuxConfig {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<(), MuxError> {
        debug!(?self, "MuxConfig::validate: called");
        if self.correlation_key_width == 0 {
            return Err(MuxError::InvalidConfig(
                "correlation-key-width must be at least 1".to_string(),
            ));
        }
        if self.release_group_size == 0 {
            return Err(MuxError::InvalidConfig("release-group-size must be at least 1".to_string()));
        }
        if self.group_timeout_ms == 0 || self.reply_timeout_ms == 0 {
            return Err(MuxError::InvalidConfig(
                "group-timeout-ms and reply-timeout-ms must be positive".to_string(),
            ));
        }
        if self.max_outstanding_groups == 0 {
            return Err(MuxError::InvalidConfig(
                "max-outstanding-groups must be at least 1".to_string(),
            ));
        }
        if self.reap_interval_ms == 0 {
            return Err(MuxError::InvalidConfig("reap-interval-ms must be positive".to_string()));
        }
        if self.output_index >= self.release_group_size {
            warn!(
                output_index = self.output_index,
                release_group_size = self.release_group_size,
                "output-index is past the release size; the last message will be returned"
            );
        }
        Ok(())
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}
