//! Business logic boundary
//!
//! A [`Handler`] produces the peer-side reply for a request. A
//! [`DiscardPolicy`] decides what a caller receives when its group is
//! discarded by the reaper; the default is a `GroupTimeout` failure, but a
//! policy may substitute a success payload.

use async_trait::async_trait;

use crate::aggregator::Group;
use crate::error::{CallResult, MuxError};

/// Produces reply payloads on the receiving side
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>, MuxError>;
}

/// Maps a discarded group to the result its caller receives
pub trait DiscardPolicy: Send + Sync {
    fn on_discard(&self, group: &Group) -> CallResult;
}

/// Fails every discarded call with `GroupTimeout`
#[derive(Debug, Clone, Copy, Default)]
pub struct FailOnDiscard;

impl DiscardPolicy for FailOnDiscard {
    fn on_discard(&self, group: &Group) -> CallResult {
        Err(MuxError::GroupTimeout {
            key: group.key().to_string(),
            request: group.request().map(|m| m.text()).unwrap_or_default(),
            received: group.size(),
        })
    }
}
