//! l2mcd - L2 Multicast Control-Plane Engine
//!
//! Snoops IGMP/MLD membership protocol traffic to program hardware multicast
//! forwarding, and layers Multicast VLAN Registration (MVR) on the same
//! engine. Two feature consumers — plain per-VLAN snooping (IPMC) and MVR —
//! share one membership state model with mutual-exclusion and profile-based
//! admission rules between them.
//!
//! # Architecture
//!
//! ```text
//! [driver rx callback] ──> [ring buffer] ──> [consumer task]
//!                                                │ parse (collaborator)
//!                                                ▼
//!                                          [dispatcher] ──> flood/discard
//!                                                │
//!                          [VLAN registry]──[group/source map]
//!                                                │
//! [1 Hz aging + querier] ────────────────────────┤
//!                                                ▼
//!                              [hardware programming collaborator]
//! ```
//!
//! # Key components
//!
//! - [`orch::McastOrch`]: the per-process context object and management API
//! - [`registry`]: VLAN instances, global per-feature state
//! - [`group`]: Include/Exclude filter state per group/source/port
//! - [`profile`]: channel profiles (ordered permit/deny ranges)
//! - [`warnings`]: the global admission evaluator
//! - [`rx`]: ring buffer, dispatcher and collaborator traits
//! - [`aging`]: timer expiry and querier election
//!
//! Wire parsing, hardware register programming and VLAN membership
//! management are collaborator traits; this crate owns no byte formats.

pub mod actions;
pub mod aging;
pub mod audit;
pub mod error;
pub mod group;
pub mod orch;
pub mod profile;
pub mod registry;
pub mod rx;
pub mod state;
pub mod warnings;

pub use actions::EngineAction;
pub use error::{L2mcError, Result};
pub use group::{
    FilterMode, GroupKey, GroupRecord, GroupStatus, RecordType, Seconds, SourceRef, SourceStatus,
};
pub use orch::{InstanceStatus, McastOrch, McastOrchCallbacks, McastOrchConfig};
pub use profile::{Profile, ProfileRule, RuleAction};
pub use registry::{
    CompatMode, MvrMode, OperState, PortRole, QuerierConfig, UnknownPduPolicy, VlanConfig,
    VlanStats,
};
pub use rx::{
    DispatchOutcome, FrameDeliver, FramePredicate, FrameSource, FrameSourceHandle, ParseVerdict,
    ParsedPdu, PduParser, RawFrame,
};
pub use warnings::WarningSet;

// Re-export the shared primitive types for downstream bindings.
pub use mcast_types::{
    AddrRange, GroupAddr, IpFamily, McastFeature, PortId, PortSet, SourceAddr, VlanId, VlanKey,
};
