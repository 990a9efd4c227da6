//! Release strategies and output processors
//!
//! The release strategy decides when a group is complete; the output
//! processor turns a completed group into the payload handed to the caller.

use super::group::Group;

/// Predicate deciding when a group is complete
pub trait ReleaseStrategy: Send + Sync {
    fn should_release(&self, group: &Group) -> bool;
}

/// Derives the caller's payload from a released group
pub trait OutputProcessor: Send + Sync {
    fn process(&self, group: &Group) -> Vec<u8>;
}

/// Releases once the group holds `size` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReleaseStrategy {
    size: usize,
}

impl SizeReleaseStrategy {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for SizeReleaseStrategy {
    fn default() -> Self {
        // request echo + reply
        Self::new(2)
    }
}

impl ReleaseStrategy for SizeReleaseStrategy {
    fn should_release(&self, group: &Group) -> bool {
        group.size() >= self.size
    }
}

/// Returns the payload at a fixed position in the group
///
/// Groups shorter than the position yield their last message instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOutputProcessor {
    index: usize,
}

impl PositionOutputProcessor {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Default for PositionOutputProcessor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl OutputProcessor for PositionOutputProcessor {
    fn process(&self, group: &Group) -> Vec<u8> {
        group
            .messages()
            .get(self.index)
            .or_else(|| group.messages().last())
            .map(|m| m.payload().to_vec())
            .unwrap_or_default()
    }
}

impl<F> ReleaseStrategy for F
where
    F: Fn(&Group) -> bool + Send + Sync,
{
    fn should_release(&self, group: &Group) -> bool {
        self(group)
    }
}
