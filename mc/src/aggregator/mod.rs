//! Aggregator and outstanding group table
//!
//! The aggregator owns every open group. Messages are admitted by key; a
//! release strategy decides when a group is complete, and the reaper evicts
//! groups that outlive their deadline.

mod core;
mod group;
mod strategy;

pub use self::core::{AdmitResult, Aggregator};
pub use group::{Group, GroupId, GroupState};
pub use strategy::{OutputProcessor, PositionOutputProcessor, ReleaseStrategy, SizeReleaseStrategy};
