//! Engine counters for observability

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of engine activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxMetrics {
    /// Groups currently open in the aggregator
    pub open_groups: usize,
    /// Calls currently waiting for a result
    pub pending_calls: usize,
    /// Calls issued through the gateway
    pub calls: u64,
    /// Groups released with an output
    pub released: u64,
    /// Groups routed to the discard path by the reaper
    pub discarded: u64,
    /// Groups removed without release or timeout
    pub evicted: u64,
    /// Calls that hit their reply timeout
    pub call_timeouts: u64,
    /// Calls failed by a connection error
    pub transport_failures: u64,
    /// Calls failed by the peer's handler
    pub handler_failures: u64,
    /// Payloads dropped because no key could be extracted
    pub malformed: u64,
    /// Calls or groups refused by the outstanding bound
    pub rejected: u64,
    /// Released groups that no pending call was waiting for
    pub orphaned: u64,
}

/// Live counters shared by the engine components
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub calls: AtomicU64,
    pub released: AtomicU64,
    pub discarded: AtomicU64,
    pub evicted: AtomicU64,
    pub call_timeouts: AtomicU64,
    pub transport_failures: AtomicU64,
    pub handler_failures: AtomicU64,
    pub malformed: AtomicU64,
    pub rejected: AtomicU64,
    pub orphaned: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, open_groups: usize, pending_calls: usize) -> MuxMetrics {
        MuxMetrics {
            open_groups,
            pending_calls,
            calls: self.calls.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            call_timeouts: self.call_timeouts.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.released);
        Counters::add(&counters.discarded, 3);

        let metrics = counters.snapshot(2, 1);
        assert_eq!(metrics.open_groups, 2);
        assert_eq!(metrics.pending_calls, 1);
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.discarded, 3);
        assert_eq!(metrics.call_timeouts, 0);
    }

    #[test]
    fn test_metrics_serialize() {
        let json = serde_json::to_string(&MuxMetrics::default()).unwrap();
        assert!(json.contains("\"open_groups\":0"));
        assert!(json.contains("\"call_timeouts\":0"));
    }
}
