//! Dispatcher - ties callers, the aggregator and the transport together
//!
//! Outbound: extract key, register a pending call, open the group with the
//! request echo, send. Inbound: extract key, admit, resolve on release.
//! Discard: ask the discard policy what the caller gets. Connection loss:
//! fail everything still waiting, and every call made afterwards.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use super::pending::{CallId, PendingCalls};
use crate::aggregator::{AdmitResult, Aggregator, Group};
use crate::error::{CallResult, MuxError};
use crate::handler::DiscardPolicy;
use crate::key::{CorrelationKey, CorrelationStrategy};
use crate::message::Message;
use crate::metrics::{Counters, MuxMetrics};
use crate::observer::{ConnectionEvent, ConnectionObserver};
use crate::reaper::DiscardSink;
use crate::transport::{Transport, TransportEvent};

/// Routes calls out and results back for one shared connection
pub struct Dispatcher {
    extractor: Arc<dyn CorrelationStrategy>,
    aggregator: Arc<Aggregator>,
    pending: PendingCalls,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn DiscardPolicy>,
    observer: Arc<dyn ConnectionObserver>,
    counters: Arc<Counters>,
    /// Set once the connection has closed; holds the reason
    closed: OnceLock<String>,
}

/// Cleans up a call's pending entry and owned group however `call` exits,
/// including when the caller drops the future
struct CallGuard<'a> {
    dispatcher: &'a Dispatcher,
    key: &'a CorrelationKey,
    id: CallId,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.dispatcher.pending.cancel(self.key, self.id) {
            debug!(key = %self.key, id = self.id, "CallGuard: call abandoned");
        }
        self.dispatcher.aggregator.evict_owned(self.key, self.id);
    }
}

impl Dispatcher {
    pub(crate) fn new(
        extractor: Arc<dyn CorrelationStrategy>,
        aggregator: Arc<Aggregator>,
        transport: Arc<dyn Transport>,
        policy: Arc<dyn DiscardPolicy>,
        observer: Arc<dyn ConnectionObserver>,
        limit: usize,
        counters: Arc<Counters>,
    ) -> Self {
        debug!(limit, "Dispatcher::new: called");
        Self {
            extractor,
            aggregator,
            pending: PendingCalls::new(limit),
            transport,
            policy,
            observer,
            counters,
            closed: OnceLock::new(),
        }
    }

    /// Send a request and wait up to `reply_timeout` for its result
    ///
    /// The deadline covers the send as well as the wait for the result.
    pub async fn call(&self, request: Vec<u8>, reply_timeout: Duration) -> CallResult {
        let deadline = Instant::now() + reply_timeout;
        let key = self.extractor.extract(&request).inspect_err(|e| {
            debug!(error = %e, "call: rejecting request");
            Counters::bump(&self.counters.malformed);
        })?;
        debug!(%key, ?reply_timeout, "call: called");
        Counters::bump(&self.counters.calls);
        self.check_open()?;

        let (id, mut slot) = self.pending.register(&key, reply_timeout).inspect_err(|e| {
            if matches!(e, MuxError::Backpressure { .. }) {
                Counters::bump(&self.counters.rejected);
            }
        })?;
        let _guard = CallGuard {
            dispatcher: self,
            key: &key,
            id,
        };
        // A close that landed after the first check may have missed this registration
        self.check_open()?;

        // The echo has to be in the group before the frame leaves so the reply
        // always lands behind it.
        match self.aggregator.begin(key.clone(), Message::outbound(request.clone()), id) {
            AdmitResult::Pending { .. } => {}
            AdmitResult::Released { group, output } => self.deliver(group, output),
            AdmitResult::Rejected { limit, .. } => return Err(MuxError::Backpressure { limit }),
        }

        match timeout_at(deadline, self.transport.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%key, error = %e, "call: send failed");
                if e.is_transport() {
                    Counters::bump(&self.counters.transport_failures);
                }
                return Err(e);
            }
            Err(_) => return self.expire_call(&key, id, reply_timeout, &mut slot),
        }

        match timeout_at(deadline, &mut slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MuxError::ChannelClosed),
            Err(_) => self.expire_call(&key, id, reply_timeout, &mut slot),
        }
    }

    /// Handle one inbound frame
    pub fn receive(&self, frame: Vec<u8>) {
        let key = match self.extractor.extract(&frame) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "receive: dropping frame");
                Counters::bump(&self.counters.malformed);
                return;
            }
        };

        match self.aggregator.admit(key, Message::inbound(frame)) {
            AdmitResult::Pending { key, size } => debug!(%key, size, "receive: group still open"),
            AdmitResult::Released { group, output } => self.deliver(group, output),
            AdmitResult::Rejected { key, limit } => {
                warn!(%key, limit, "receive: group table full, dropping frame");
            }
        }
    }

    /// Resolve the call that sent `request` with the peer handler's error
    pub fn reject(&self, request: Vec<u8>, error: MuxError) {
        let key = match self.extractor.extract(&request) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "reject: dropping handler failure");
                Counters::bump(&self.counters.malformed);
                return;
            }
        };

        let Some(group) = self.aggregator.evict_request(&key, &request) else {
            debug!(%key, "reject: no open call for failed request");
            return;
        };
        Counters::bump(&self.counters.handler_failures);
        let Some(id) = group.owner() else {
            return;
        };
        if !self.pending.resolve(&key, id, Err(error)) {
            debug!(%key, id, "reject: call already resolved");
        }
    }

    /// Handle one transport event
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.receive(frame),
            TransportEvent::Failed { request, error } => self.reject(request, error),
            TransportEvent::Connection(event) => {
                self.observer.on_event(&event);
                if let ConnectionEvent::Closed { reason, .. } = event {
                    let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                    // Latch before failing so calls registering concurrently see it
                    let _ = self.closed.set(reason.clone());
                    self.fail_all(MuxError::Transport(reason));
                }
            }
        }
    }

    /// True once the connection has reported `Closed`
    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    /// Fail every pending call and drop every open group
    pub fn fail_all(&self, err: MuxError) -> usize {
        let failed = self.pending.fail_all(&err);
        let dropped = self.aggregator.evict_all();
        Counters::add(&self.counters.transport_failures, failed as u64);
        if failed > 0 || dropped > 0 {
            info!(failed, dropped, error = %err, "fail_all: pending calls failed");
        }
        failed
    }

    pub fn metrics(&self) -> MuxMetrics {
        self.counters.snapshot(self.aggregator.len(), self.pending.len())
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn open_groups(&self) -> usize {
        self.aggregator.len()
    }

    fn check_open(&self) -> Result<(), MuxError> {
        match self.closed.get() {
            Some(reason) => {
                Counters::bump(&self.counters.transport_failures);
                Err(MuxError::Transport(reason.clone()))
            }
            None => Ok(()),
        }
    }

    /// Give up on a call whose deadline passed
    fn expire_call(
        &self,
        key: &CorrelationKey,
        id: CallId,
        reply_timeout: Duration,
        slot: &mut oneshot::Receiver<CallResult>,
    ) -> CallResult {
        if self.pending.cancel(key, id) {
            warn!(%key, ?reply_timeout, "call: reply timeout");
            Counters::bump(&self.counters.call_timeouts);
            Err(MuxError::CallTimeout {
                key: key.to_string(),
                timeout: reply_timeout,
            })
        } else {
            // Resolved between the deadline and the cancel; that result wins
            slot.try_recv().unwrap_or(Err(MuxError::ChannelClosed))
        }
    }

    /// Hand a released group's output to the call that opened it
    fn deliver(&self, group: Group, output: Vec<u8>) {
        let delivered = group
            .owner()
            .is_some_and(|id| self.pending.resolve(group.key(), id, Ok(output)));
        if !delivered {
            debug!(key = %group.key(), owner = ?group.owner(), "deliver: no waiting call, dropping group");
            Counters::bump(&self.counters.orphaned);
        }
    }
}

impl DiscardSink for Dispatcher {
    fn discard(&self, group: Group) {
        Counters::bump(&self.counters.discarded);
        let Some(id) = group.owner() else {
            debug!(key = %group.key(), size = group.size(), "discard: unowned group dropped");
            return;
        };

        let result = self.policy.on_discard(&group);
        debug!(key = %group.key(), id, ok = result.is_ok(), "discard: resolving call");
        if !self.pending.resolve(group.key(), id, result) {
            debug!(key = %group.key(), id, "discard: call already resolved");
        }
    }
}
