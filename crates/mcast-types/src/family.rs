//! IP address family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// IP address family of a snooping instance or PDU.
///
/// IPv4 instances track IGMP state; IPv6 instances track MLD state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    /// Returns the family of an IP address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::Ipv4,
            IpAddr::V6(_) => IpFamily::Ipv6,
        }
    }

    /// Number of bits in an address of this family.
    pub const fn addr_bits(&self) -> u8 {
        match self {
            IpFamily::Ipv4 => 32,
            IpFamily::Ipv6 => 128,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::Ipv4 => write!(f, "IPv4"),
            IpFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}
