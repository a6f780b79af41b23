//! Group/source membership state.
//!
//! This module owns the per-`(VLAN instance, group)` filter-state tables and
//! reproduces RFC3376/RFC3810 Include/Exclude semantics at snooping-switch
//! granularity. All mutations — report, leave or timer expiry — go through
//! the same paths so downstream hardware programming and membership
//! notifications behave identically regardless of what caused a change.

mod engine;
mod types;

pub use engine::{GroupMap, GroupMapStats};
pub use types::{
    FilterMode, GroupEntry, GroupKey, GroupRecord, GroupStatus, HwIndex, HwIndexPool, RecordType,
    Seconds, SourceEntry, SourceRef, SourceStatus, TimerProfile,
};
