//! Channel profiles: ordered permit/deny address-range rule lists.
//!
//! Profiles keep the packet path cheap: the heavy admission checks
//! (family coverage, cross-instance overlap, unreachable rules) run at
//! configuration time in the warning evaluator; per-packet checks are a
//! linear first-match scan.

mod filter;
mod types;

pub use filter::ProfileTable;
pub use types::{Profile, ProfileRule, RuleAction};
