//! Multicast group and source address wrappers.

use crate::{IpFamily, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

fn addr_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

/// A multicast group (destination) address.
///
/// Construction checks that the address is in the multicast range of its
/// family; every other component can then rely on that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "IpAddr", into = "IpAddr")]
pub struct GroupAddr(IpAddr);

impl GroupAddr {
    pub fn new(addr: IpAddr) -> Result<Self, ParseError> {
        if addr.is_multicast() {
            Ok(GroupAddr(addr))
        } else {
            Err(ParseError::NotMulticast(addr))
        }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.0)
    }

    pub const fn addr(&self) -> IpAddr {
        self.0
    }

    /// Numeric value of the address, for range comparisons.
    pub fn to_bits(&self) -> u128 {
        addr_bits(&self.0)
    }
}

impl fmt::Display for GroupAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: IpAddr = s
            .parse()
            .map_err(|_| ParseError::InvalidRange(s.to_string()))?;
        GroupAddr::new(addr)
    }
}

impl TryFrom<IpAddr> for GroupAddr {
    type Error = ParseError;

    fn try_from(addr: IpAddr) -> Result<Self, Self::Error> {
        GroupAddr::new(addr)
    }
}

impl From<GroupAddr> for IpAddr {
    fn from(group: GroupAddr) -> IpAddr {
        group.0
    }
}

/// A multicast source (sender) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "IpAddr", into = "IpAddr")]
pub struct SourceAddr(IpAddr);

impl SourceAddr {
    pub fn new(addr: IpAddr) -> Result<Self, ParseError> {
        if addr.is_multicast() {
            Err(ParseError::NotUnicast(addr))
        } else {
            Ok(SourceAddr(addr))
        }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.0)
    }

    pub const fn addr(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for SourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: IpAddr = s
            .parse()
            .map_err(|_| ParseError::InvalidRange(s.to_string()))?;
        SourceAddr::new(addr)
    }
}

impl TryFrom<IpAddr> for SourceAddr {
    type Error = ParseError;

    fn try_from(addr: IpAddr) -> Result<Self, Self::Error> {
        SourceAddr::new(addr)
    }
}

impl From<SourceAddr> for IpAddr {
    fn from(source: SourceAddr) -> IpAddr {
        source.0
    }
}

/// An inclusive address range within one family.
///
/// Channel-profile rules are ranges; `from_prefix` builds the range covered
/// by a CIDR prefix such as `224.0.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    family: IpFamily,
    start: u128,
    end: u128,
}

impl AddrRange {
    pub fn from_range(lo: IpAddr, hi: IpAddr) -> Result<Self, ParseError> {
        let family = IpFamily::of(&lo);
        if IpFamily::of(&hi) != family {
            return Err(ParseError::FamilyMismatch {
                expected: family,
                actual: IpFamily::of(&hi),
            });
        }
        let (start, end) = (addr_bits(&lo), addr_bits(&hi));
        if start > end {
            return Err(ParseError::InvalidRange(format!("{}-{}", lo, hi)));
        }
        Ok(AddrRange { family, start, end })
    }

    pub fn from_prefix(addr: IpAddr, len: u8) -> Result<Self, ParseError> {
        let family = IpFamily::of(&addr);
        let bits = family.addr_bits();
        if len > bits {
            return Err(ParseError::InvalidPrefixLen { family, len });
        }
        let host_bits = (bits - len) as u32;
        let base = addr_bits(&addr);
        // Mask off host bits, then fill them for the upper bound.
        let span = if host_bits as u8 == bits {
            u128::MAX >> (128 - bits)
        } else {
            (1u128 << host_bits) - 1
        };
        let start = base & !span;
        let end = start | span;
        Ok(AddrRange { family, start, end })
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }

    pub fn contains(&self, group: GroupAddr) -> bool {
        group.family() == self.family && (self.start..=self.end).contains(&group.to_bits())
    }

    /// True if `self` fully covers `other`.
    pub fn covers(&self, other: &AddrRange) -> bool {
        self.family == other.family && self.start <= other.start && self.end >= other.end
    }

    /// True if the two ranges share at least one address.
    pub fn overlaps(&self, other: &AddrRange) -> bool {
        self.family == other.family && self.start <= other.end && other.start <= self.end
    }
}

fn bits_to_addr(family: IpFamily, bits: u128) -> IpAddr {
    match family {
        IpFamily::Ipv4 => IpAddr::V4(std::net::Ipv4Addr::from(bits as u32)),
        IpFamily::Ipv6 => IpAddr::V6(std::net::Ipv6Addr::from(bits)),
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            bits_to_addr(self.family, self.start),
            bits_to_addr(self.family, self.end)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(s: &str) -> GroupAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_group_addr_validation() {
        assert!(GroupAddr::new("224.0.0.1".parse().unwrap()).is_ok());
        assert!(GroupAddr::new("ff02::1".parse().unwrap()).is_ok());
        assert!(GroupAddr::new("10.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn test_source_addr_validation() {
        assert!(SourceAddr::new("10.0.0.1".parse().unwrap()).is_ok());
        assert!(SourceAddr::new("224.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn test_prefix_range() {
        let range = AddrRange::from_prefix("224.0.0.0".parse().unwrap(), 24).unwrap();
        assert!(range.contains(group("224.0.0.5")));
        assert!(range.contains(group("224.0.0.255")));
        assert!(!range.contains(group("224.0.1.0")));
    }

    #[test]
    fn test_covers_and_overlaps() {
        let all = AddrRange::from_prefix("224.0.0.0".parse().unwrap(), 4).unwrap();
        let narrow = AddrRange::from_prefix("224.0.0.0".parse().unwrap(), 24).unwrap();
        let other = AddrRange::from_prefix("232.0.0.0".parse().unwrap(), 8).unwrap();

        assert!(all.covers(&narrow));
        assert!(!narrow.covers(&all));
        assert!(all.overlaps(&narrow));
        assert!(all.overlaps(&other));
        assert!(!narrow.overlaps(&other));
    }

    #[test]
    fn test_family_isolation() {
        let v4 = AddrRange::from_prefix("224.0.0.0".parse().unwrap(), 8).unwrap();
        let v6 = AddrRange::from_prefix("ff00::".parse().unwrap(), 8).unwrap();
        assert!(!v4.overlaps(&v6));
        assert!(!v6.contains(group("224.0.0.1")));
    }

    #[test]
    fn test_bad_ranges() {
        assert!(AddrRange::from_range(
            "224.0.0.10".parse().unwrap(),
            "224.0.0.1".parse().unwrap()
        )
        .is_err());
        assert!(AddrRange::from_range(
            "224.0.0.1".parse().unwrap(),
            "ff02::1".parse().unwrap()
        )
        .is_err());
        assert!(AddrRange::from_prefix("224.0.0.0".parse().unwrap(), 33).is_err());
    }
}
