//! Aggregator implementation over a concurrent group table

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::{Entry, VacantEntry};
use tracing::{debug, warn};

use super::group::{Group, GroupState};
use super::strategy::{OutputProcessor, PositionOutputProcessor, ReleaseStrategy, SizeReleaseStrategy};
use crate::config::MuxConfig;
use crate::gateway::CallId;
use crate::key::CorrelationKey;
use crate::message::Message;
use crate::metrics::Counters;

/// Outcome of admitting a message
#[derive(Debug)]
pub enum AdmitResult {
    /// The group is still open
    Pending { key: CorrelationKey, size: usize },

    /// The group completed and has been removed from the table
    Released { group: Group, output: Vec<u8> },

    /// A new group was needed but the table is at its bound
    Rejected { key: CorrelationKey, limit: usize },
}

/// Groups messages by correlation key and releases completed groups
pub struct Aggregator {
    groups: DashMap<CorrelationKey, Group>,
    release: Arc<dyn ReleaseStrategy>,
    output: Arc<dyn OutputProcessor>,
    group_timeout: Duration,
    limit: usize,
    /// Open group count, reserved before insert so the bound holds across shards
    open: AtomicUsize,
    counters: Arc<Counters>,
}

impl Aggregator {
    /// Create an aggregator with explicit strategies
    pub fn new(
        release: Arc<dyn ReleaseStrategy>,
        output: Arc<dyn OutputProcessor>,
        group_timeout: Duration,
        limit: usize,
    ) -> Self {
        Self::with_counters(release, output, group_timeout, limit, Arc::default())
    }

    /// Create an aggregator with the size/position strategies from config
    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(
            Arc::new(SizeReleaseStrategy::new(config.release_group_size)),
            Arc::new(PositionOutputProcessor::new(config.output_index)),
            config.group_timeout(),
            config.max_outstanding_groups,
        )
    }

    pub(crate) fn with_counters(
        release: Arc<dyn ReleaseStrategy>,
        output: Arc<dyn OutputProcessor>,
        group_timeout: Duration,
        limit: usize,
        counters: Arc<Counters>,
    ) -> Self {
        debug!(?group_timeout, limit, "Aggregator::new: called");
        Self {
            groups: DashMap::new(),
            release,
            output,
            group_timeout,
            limit,
            open: AtomicUsize::new(0),
            counters,
        }
    }

    /// Admit a message into the open group for its key
    ///
    /// Creates the group if none is open. The get-or-create, append and release
    /// check happen under the key's shard lock, so concurrent admits for one key
    /// always land in the same group.
    pub fn admit(&self, key: CorrelationKey, message: Message) -> AdmitResult {
        match self.groups.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(message);
                if self.release.should_release(entry.get()) {
                    let group = entry.remove();
                    self.open.fetch_sub(1, Ordering::SeqCst);
                    self.release_group(group)
                } else {
                    let size = entry.get().size();
                    AdmitResult::Pending {
                        key: entry.key().clone(),
                        size,
                    }
                }
            }
            Entry::Vacant(entry) => self.open_group(entry, None, message),
        }
    }

    /// Open a fresh group for an outbound request owned by `owner`
    ///
    /// Any open group already holding the key is stale (its caller is gone,
    /// or it was started by a late reply) and is replaced.
    pub fn begin(&self, key: CorrelationKey, message: Message, owner: CallId) -> AdmitResult {
        match self.groups.entry(key) {
            Entry::Occupied(mut entry) => {
                let mut group = Group::new(entry.key().clone(), Some(owner), self.group_timeout);
                group.push(message);
                let releasable = self.release.should_release(&group);
                let stale = if releasable {
                    self.open.fetch_sub(1, Ordering::SeqCst);
                    entry.remove()
                } else {
                    let key = entry.key().clone();
                    let size = group.size();
                    let stale = entry.insert(group);
                    self.evicted(stale);
                    return AdmitResult::Pending { key, size };
                };
                self.evicted(stale);
                self.release_group(group)
            }
            Entry::Vacant(entry) => self.open_group(entry, Some(owner), message),
        }
    }

    /// Remove every open group whose deadline has passed
    ///
    /// Removal re-checks the deadline under the shard lock, so a group released
    /// concurrently is never also returned here.
    pub fn expire(&self, now: Instant) -> Vec<Group> {
        let candidates: Vec<CorrelationKey> = self
            .groups
            .iter()
            .filter(|g| g.is_expired(now))
            .map(|g| g.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for key in candidates {
            if let Some((_, group)) = self.groups.remove_if(&key, |_, g| g.is_expired(now)) {
                self.open.fetch_sub(1, Ordering::SeqCst);
                debug!(%key, size = group.size(), "expire: group timed out");
                expired.push(group.close(GroupState::TimedOut));
            }
        }
        expired
    }

    /// Remove the open group for a key regardless of owner
    pub fn evict(&self, key: &CorrelationKey) -> Option<Group> {
        let (_, group) = self.groups.remove(key)?;
        self.open.fetch_sub(1, Ordering::SeqCst);
        Some(self.evicted(group))
    }

    /// Remove the open group for a key only if `owner` opened it
    pub fn evict_owned(&self, key: &CorrelationKey, owner: CallId) -> Option<Group> {
        let (_, group) = self.groups.remove_if(key, |_, g| g.owner() == Some(owner))?;
        self.open.fetch_sub(1, Ordering::SeqCst);
        Some(self.evicted(group))
    }

    /// Remove the owned group for a key if it was opened by `request`
    pub fn evict_request(&self, key: &CorrelationKey, request: &[u8]) -> Option<Group> {
        let (_, group) = self.groups.remove_if(key, |_, g| {
            g.owner().is_some() && g.request().is_some_and(|m| m.payload() == request)
        })?;
        self.open.fetch_sub(1, Ordering::SeqCst);
        Some(self.evicted(group))
    }

    /// Remove every open group, returning how many were dropped
    pub fn evict_all(&self) -> usize {
        let keys: Vec<CorrelationKey> = self.groups.iter().map(|g| g.key().clone()).collect();
        keys.iter().filter(|key| self.evict(key).is_some()).count()
    }

    /// Number of open groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.groups.contains_key(key)
    }

    pub fn group_timeout(&self) -> Duration {
        self.group_timeout
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn open_group(
        &self,
        entry: VacantEntry<'_, CorrelationKey, Group>,
        owner: Option<CallId>,
        message: Message,
    ) -> AdmitResult {
        if !self.try_reserve() {
            warn!(key = %entry.key(), limit = self.limit, "open_group: group table full");
            Counters::bump(&self.counters.rejected);
            return AdmitResult::Rejected {
                key: entry.into_key(),
                limit: self.limit,
            };
        }

        let mut group = Group::new(entry.key().clone(), owner, self.group_timeout);
        group.push(message);

        if self.release.should_release(&group) {
            self.open.fetch_sub(1, Ordering::SeqCst);
            return self.release_group(group);
        }

        let key = entry.key().clone();
        debug!(%key, ?owner, "open_group: group opened");
        entry.insert(group);
        AdmitResult::Pending { key, size: 1 }
    }

    fn release_group(&self, group: Group) -> AdmitResult {
        let output = self.output.process(&group);
        Counters::bump(&self.counters.released);
        debug!(key = %group.key(), size = group.size(), "release_group: group released");
        AdmitResult::Released {
            group: group.close(GroupState::Released),
            output,
        }
    }

    fn evicted(&self, group: Group) -> Group {
        debug!(key = %group.key(), size = group.size(), owner = ?group.owner(), "evicted: dropping open group");
        Counters::bump(&self.counters.evicted);
        group.close(GroupState::Evicted)
    }

    fn try_reserve(&self) -> bool {
        self.open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.limit).then_some(n + 1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn aggregator() -> Aggregator {
        Aggregator::from_config(&MuxConfig::default())
    }

    fn key(s: &str) -> CorrelationKey {
        CorrelationKey::from(s)
    }

    #[test]
    fn test_admit_releases_at_size() {
        let agg = aggregator();
        let first = agg.begin(key("999"), Message::outbound("999Hello world!"), 1);
        assert!(matches!(first, AdmitResult::Pending { size: 1, .. }));
        assert_eq!(agg.len(), 1);

        match agg.admit(key("999"), Message::inbound("999Hello world!:echo")) {
            AdmitResult::Released { group, output } => {
                assert_eq!(output, b"999Hello world!:echo".to_vec());
                assert_eq!(group.state(), GroupState::Released);
                assert_eq!(group.owner(), Some(1));
                assert_eq!(group.size(), 2);
            }
            other => panic!("expected release, got {other:?}"),
        }
        assert!(agg.is_empty());
    }

    #[test]
    fn test_message_after_release_starts_new_group() {
        let agg = aggregator();
        agg.begin(key("123"), Message::outbound("123a"), 1);
        agg.admit(key("123"), Message::inbound("123a:echo"));
        assert!(!agg.contains(&key("123")));

        let late = agg.admit(key("123"), Message::inbound("123late"));
        assert!(matches!(late, AdmitResult::Pending { size: 1, .. }));
        assert!(agg.contains(&key("123")));
    }

    #[test]
    fn test_begin_replaces_stale_group() {
        let agg = aggregator();
        agg.admit(key("123"), Message::inbound("123stale"));

        let result = agg.begin(key("123"), Message::outbound("123fresh"), 9);
        assert!(matches!(result, AdmitResult::Pending { size: 1, .. }));
        assert_eq!(agg.len(), 1);

        match agg.admit(key("123"), Message::inbound("123fresh:echo")) {
            AdmitResult::Released { group, output } => {
                assert_eq!(group.owner(), Some(9));
                assert_eq!(output, b"123fresh:echo".to_vec());
            }
            other => panic!("expected release, got {other:?}"),
        }
        assert_eq!(agg.counters.evicted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_release_size_one_releases_on_begin() {
        let agg = Aggregator::new(
            Arc::new(SizeReleaseStrategy::new(1)),
            Arc::new(PositionOutputProcessor::new(0)),
            Duration::from_secs(1),
            10,
        );
        match agg.begin(key("555"), Message::outbound("555x"), 3) {
            AdmitResult::Released { output, .. } => assert_eq!(output, b"555x".to_vec()),
            other => panic!("expected release, got {other:?}"),
        }
        assert!(agg.is_empty());
    }

    #[test]
    fn test_bound_rejects_new_groups() {
        let agg = Aggregator::new(
            Arc::new(SizeReleaseStrategy::default()),
            Arc::new(PositionOutputProcessor::default()),
            Duration::from_secs(1),
            2,
        );
        agg.begin(key("100"), Message::outbound("100a"), 1);
        agg.begin(key("101"), Message::outbound("101a"), 2);
        let rejected = agg.begin(key("102"), Message::outbound("102a"), 3);
        assert!(matches!(rejected, AdmitResult::Rejected { limit: 2, .. }));

        // existing groups still accept messages
        assert!(matches!(
            agg.admit(key("100"), Message::inbound("100a:echo")),
            AdmitResult::Released { .. }
        ));
        assert!(matches!(
            agg.begin(key("102"), Message::outbound("102a"), 3),
            AdmitResult::Pending { .. }
        ));
    }

    #[test]
    fn test_expire_removes_only_overdue_groups() {
        let agg = Aggregator::new(
            Arc::new(SizeReleaseStrategy::default()),
            Arc::new(PositionOutputProcessor::default()),
            Duration::from_millis(50),
            10,
        );
        agg.begin(key("100"), Message::outbound("100a"), 1);

        assert!(agg.expire(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_millis(100);
        let expired = agg.expire(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state(), GroupState::TimedOut);
        assert_eq!(expired[0].request().unwrap().text(), "100a");
        assert!(agg.is_empty());

        // slot is free again
        assert!(matches!(
            agg.begin(key("100"), Message::outbound("100b"), 2),
            AdmitResult::Pending { .. }
        ));
    }

    #[test]
    fn test_evict_owned_checks_owner() {
        let agg = aggregator();
        agg.begin(key("100"), Message::outbound("100a"), 1);
        assert!(agg.evict_owned(&key("100"), 2).is_none());
        let evicted = agg.evict_owned(&key("100"), 1).unwrap();
        assert_eq!(evicted.state(), GroupState::Evicted);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_evict_request_matches_payload() {
        let agg = aggregator();
        agg.begin(key("100"), Message::outbound("100new"), 7);
        assert!(agg.evict_request(&key("100"), b"100old").is_none());

        let evicted = agg.evict_request(&key("100"), b"100new").unwrap();
        assert_eq!(evicted.owner(), Some(7));
        assert!(agg.is_empty());

        // groups opened by a late reply have no owner and are left alone
        agg.admit(key("200"), Message::inbound("200x"));
        assert!(agg.evict_request(&key("200"), b"200x").is_none());
    }

    #[test]
    fn test_evict_all() {
        let agg = aggregator();
        for i in 100..110 {
            agg.begin(key(&i.to_string()), Message::outbound(format!("{i}x")), i);
        }
        assert_eq!(agg.evict_all(), 10);
        assert!(agg.is_empty());
        assert_eq!(agg.open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_admits_share_one_group() {
        let agg = Arc::new(Aggregator::new(
            Arc::new(SizeReleaseStrategy::new(8)),
            Arc::new(PositionOutputProcessor::new(7)),
            Duration::from_secs(5),
            10,
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || agg.admit(key("777"), Message::inbound(format!("777-{i}"))))
            })
            .collect();

        let released = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, AdmitResult::Released { .. }))
            .count();

        assert_eq!(released, 1);
        assert!(agg.is_empty());
        assert_eq!(agg.open.load(Ordering::SeqCst), 0);
    }
}
