//! Groups of messages sharing one correlation key

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::gateway::CallId;
use crate::key::CorrelationKey;
use crate::message::{Direction, Message};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of one group instance (keys are reused, ids are not)
pub type GroupId = u64;

/// Release state of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupState {
    Open,
    Released,
    TimedOut,
    /// Removed without release or timeout (call timeout, stale replacement, connection loss)
    Evicted,
}

/// Messages collected for one request/response cycle
#[derive(Debug, Clone)]
pub struct Group {
    id: GroupId,
    key: CorrelationKey,
    owner: Option<CallId>,
    messages: Vec<Message>,
    created: Instant,
    deadline: Instant,
    state: GroupState,
}

impl Group {
    pub(crate) fn new(key: CorrelationKey, owner: Option<CallId>, timeout: Duration) -> Self {
        let created = Instant::now();
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            key,
            owner,
            messages: Vec::with_capacity(2),
            created,
            deadline: created + timeout,
            state: GroupState::Open,
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn close(mut self, state: GroupState) -> Self {
        self.state = state;
        self
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// The pending call that opened this group, if it was opened by an outbound request
    pub fn owner(&self) -> Option<CallId> {
        self.owner
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state == GroupState::Open && self.deadline <= now
    }

    /// First message that travelled in the given direction
    pub fn first(&self, direction: Direction) -> Option<&Message> {
        self.messages.iter().find(|m| m.direction() == direction)
    }

    /// The outbound request that opened the group, falling back to the first message
    pub fn request(&self) -> Option<&Message> {
        self.first(Direction::Outbound).or_else(|| self.messages.first())
    }
}
