//! Switch port handles and port bitmaps.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of front-panel ports the engine tracks state for.
pub const MAX_PORTS: u16 = 64;

/// A front-panel switch port (0-based logical index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PortId(u16);

impl PortId {
    /// Creates a new port ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is not below [`MAX_PORTS`].
    pub const fn new(index: u16) -> Result<Self, ParseError> {
        if index < MAX_PORTS {
            Ok(PortId(index))
        } else {
            Err(ParseError::InvalidPortId(index))
        }
    }

    pub const fn index(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ethernet{}", self.0)
    }
}

impl TryFrom<u16> for PortId {
    type Error = ParseError;

    fn try_from(index: u16) -> Result<Self, Self::Error> {
        PortId::new(index)
    }
}

impl From<PortId> for u16 {
    fn from(port: PortId) -> u16 {
        port.0
    }
}

/// A set of ports, one bit per [`PortId`].
///
/// Used for group membership bitmaps, exclude-mode tracking and egress port
/// sets handed to the hardware-programming collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSet(u64);

impl PortSet {
    pub const fn empty() -> Self {
        PortSet(0)
    }

    pub fn single(port: PortId) -> Self {
        let mut set = PortSet::empty();
        set.insert(port);
        set
    }

    pub fn insert(&mut self, port: PortId) {
        self.0 |= 1u64 << port.index();
    }

    pub fn remove(&mut self, port: PortId) {
        self.0 &= !(1u64 << port.index());
    }

    pub fn contains(&self, port: PortId) -> bool {
        self.0 & (1u64 << port.index()) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> u32 {
        self.0.count_ones()
    }

    /// Union of two sets.
    pub const fn union(&self, other: PortSet) -> PortSet {
        PortSet(self.0 | other.0)
    }

    /// Ports present in `self` but not in `other`.
    pub const fn difference(&self, other: PortSet) -> PortSet {
        PortSet(self.0 & !other.0)
    }

    pub const fn intersection(&self, other: PortSet) -> PortSet {
        PortSet(self.0 & other.0)
    }

    /// Iterates set ports in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = PortId> + '_ {
        (0..MAX_PORTS).filter_map(move |i| {
            if self.0 & (1u64 << i) != 0 {
                // Index is below MAX_PORTS by construction.
                Some(PortId(i))
            } else {
                None
            }
        })
    }

    /// First set port at or after `from`, in index order.
    pub fn next_at_or_after(&self, from: PortId) -> Option<PortId> {
        self.iter().find(|p| *p >= from)
    }

    pub const fn as_bits(&self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        PortSet(bits)
    }
}

impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl FromIterator<PortId> for PortSet {
    fn from_iter<I: IntoIterator<Item = PortId>>(iter: I) -> Self {
        let mut set = PortSet::empty();
        for port in iter {
            set.insert(port);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(i: u16) -> PortId {
        PortId::new(i).unwrap()
    }

    #[test]
    fn test_port_bounds() {
        assert!(PortId::new(0).is_ok());
        assert!(PortId::new(63).is_ok());
        assert!(PortId::new(64).is_err());
    }

    #[test]
    fn test_insert_remove_contains() {
        let mut set = PortSet::empty();
        assert!(set.is_empty());

        set.insert(port(3));
        set.insert(port(17));
        assert!(set.contains(port(3)));
        assert!(set.contains(port(17)));
        assert!(!set.contains(port(4)));
        assert_eq!(set.len(), 2);

        set.remove(port(3));
        assert!(!set.contains(port(3)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_set_algebra() {
        let a: PortSet = [port(1), port(2), port(3)].into_iter().collect();
        let b: PortSet = [port(3), port(4)].into_iter().collect();

        assert_eq!(a.union(b).len(), 4);
        assert_eq!(a.intersection(b), PortSet::single(port(3)));
        assert_eq!(
            a.difference(b),
            [port(1), port(2)].into_iter().collect::<PortSet>()
        );
    }

    #[test]
    fn test_iter_order() {
        let set: PortSet = [port(40), port(2), port(63)].into_iter().collect();
        let ports: Vec<u16> = set.iter().map(|p| p.index()).collect();
        assert_eq!(ports, vec![2, 40, 63]);
    }

    #[test]
    fn test_next_at_or_after() {
        let set: PortSet = [port(5), port(9)].into_iter().collect();
        assert_eq!(set.next_at_or_after(port(0)), Some(port(5)));
        assert_eq!(set.next_at_or_after(port(5)), Some(port(5)));
        assert_eq!(set.next_at_or_after(port(6)), Some(port(9)));
        assert_eq!(set.next_at_or_after(port(10)), None);
    }
}
