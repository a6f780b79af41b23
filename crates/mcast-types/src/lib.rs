//! Common types for the L2 multicast control plane.
//!
//! This crate provides the type-safe primitives shared by the snooping engine
//! and its management-plane bindings:
//!
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`VlanKey`]: the totally-ordered `(feature, family, vlan)` instance key
//! - [`PortId`] / [`PortSet`]: switch port handles and port bitmaps
//! - [`GroupAddr`] / [`SourceAddr`]: family-checked multicast group and
//!   unicast source addresses
//! - [`AddrRange`]: inclusive address ranges for channel-profile rules

mod addr;
mod family;
mod key;
mod port;
mod vlan;

pub use addr::{AddrRange, GroupAddr, SourceAddr};
pub use family::IpFamily;
pub use key::{McastFeature, VlanKey};
pub use port::{PortId, PortSet, MAX_PORTS};
pub use vlan::VlanId;

/// Common error type for parsing and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid port ID: {0} (must be 0-{})", port::MAX_PORTS - 1)]
    InvalidPortId(u16),

    #[error("not a multicast address: {0}")]
    NotMulticast(std::net::IpAddr),

    #[error("not a unicast address: {0}")]
    NotUnicast(std::net::IpAddr),

    #[error("address family mismatch: expected {expected}, got {actual}")]
    FamilyMismatch { expected: IpFamily, actual: IpFamily },

    #[error("invalid prefix length {len} for {family}")]
    InvalidPrefixLen { family: IpFamily, len: u8 },

    #[error("invalid range: {0}")]
    InvalidRange(String),
}
