//! Pending call table
//!
//! One entry per outstanding call, keyed by correlation key. Each entry holds
//! a oneshot slot that is consumed by whichever resolver removes the entry
//! first, which is what makes resolution exactly-once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CallResult, MuxError};
use crate::key::CorrelationKey;

/// Identity of one call; keys can be reused, call ids cannot
pub type CallId = u64;

struct PendingCall {
    id: CallId,
    created: Instant,
    reply_timeout: Duration,
    slot: oneshot::Sender<CallResult>,
}

pub(crate) struct PendingCalls {
    calls: DashMap<CorrelationKey, PendingCall>,
    next_id: AtomicU64,
    count: AtomicUsize,
    limit: usize,
}

impl PendingCalls {
    pub fn new(limit: usize) -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(1),
            count: AtomicUsize::new(0),
            limit,
        }
    }

    /// Register a waiter for `key`
    ///
    /// Fails with `KeyInUse` while another call holds the key, since two
    /// in-flight calls with one key could not be told apart.
    pub fn register(
        &self,
        key: &CorrelationKey,
        reply_timeout: Duration,
    ) -> Result<(CallId, oneshot::Receiver<CallResult>), MuxError> {
        match self.calls.entry(key.clone()) {
            Entry::Occupied(_) => Err(MuxError::KeyInUse(key.to_string())),
            Entry::Vacant(entry) => {
                let reserved = self
                    .count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.limit).then_some(n + 1))
                    .is_ok();
                if !reserved {
                    return Err(MuxError::Backpressure { limit: self.limit });
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (slot, rx) = oneshot::channel();
                entry.insert(PendingCall {
                    id,
                    created: Instant::now(),
                    reply_timeout,
                    slot,
                });
                debug!(%key, id, "register: pending call added");
                Ok((id, rx))
            }
        }
    }

    /// Resolve the call `id` waiting on `key`
    ///
    /// Returns false when that call is no longer pending (already resolved,
    /// timed out, or cancelled); the result is dropped.
    pub fn resolve(&self, key: &CorrelationKey, id: CallId, result: CallResult) -> bool {
        let Some((_, call)) = self.calls.remove_if(key, |_, c| c.id == id) else {
            return false;
        };
        self.count.fetch_sub(1, Ordering::SeqCst);
        debug!(
            %key,
            id,
            ok = result.is_ok(),
            elapsed_ms = call.created.elapsed().as_millis() as u64,
            reply_timeout_ms = call.reply_timeout.as_millis() as u64,
            "resolve: pending call resolved"
        );
        // The caller may have gone away; nothing left to deliver to
        let _ = call.slot.send(result);
        true
    }

    /// Remove the call without resolving it
    pub fn cancel(&self, key: &CorrelationKey, id: CallId) -> bool {
        if self.calls.remove_if(key, |_, c| c.id == id).is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
            debug!(%key, id, "cancel: pending call removed");
            true
        } else {
            false
        }
    }

    /// Resolve every pending call with `err`, returning how many were failed
    pub fn fail_all(&self, err: &MuxError) -> usize {
        let keys: Vec<CorrelationKey> = self.calls.iter().map(|c| c.key().clone()).collect();
        let mut failed = 0;
        for key in keys {
            if let Some((_, call)) = self.calls.remove(&key) {
                self.count.fetch_sub(1, Ordering::SeqCst);
                let _ = call.slot.send(Err(err.clone()));
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.calls.contains_key(key)
    }
}
