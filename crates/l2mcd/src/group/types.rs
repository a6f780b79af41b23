//! Group and source entry types.

use mcast_types::{GroupAddr, PortId, PortSet, SourceAddr, VlanKey};
use serde::Serialize;
use std::collections::BTreeMap;

/// Absolute seconds on the engine's monotonic epoch.
pub type Seconds = u64;

/// Index into the hardware replication table.
pub type HwIndex = u16;

/// Timer targets derived from the owning instance's querier configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerProfile {
    /// Group membership interval: robustness x query-interval + max-response-time.
    pub group_membership_interval: Seconds,
    /// Last-member (leave-latency) interval.
    pub last_member_interval: Seconds,
}

impl Default for TimerProfile {
    fn default() -> Self {
        // RFC3376 defaults: 2 * 125s + 10s, 2 * 1s.
        Self {
            group_membership_interval: 260,
            last_member_interval: 2,
        }
    }
}

/// Per-(group, port) source filter mode, per RFC3376/RFC3810.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Group record types carried by v3/MLDv2 reports. v1/v2 joins are presented
/// by the parser as `IsExclude` with an empty source list; v2 leaves arrive
/// as leave PDUs, not records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    IsInclude,
    IsExclude,
    ToInclude,
    ToExclude,
    AllowNewSources,
    BlockOldSources,
}

/// One group record from a membership report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub record_type: RecordType,
    pub group: GroupAddr,
    pub sources: Vec<SourceAddr>,
}

impl GroupRecord {
    pub fn new(record_type: RecordType, group: GroupAddr, sources: Vec<SourceAddr>) -> Self {
        Self {
            record_type,
            group,
            sources,
        }
    }

    /// An any-source (ASM) join record.
    pub fn asm_join(group: GroupAddr) -> Self {
        Self::new(RecordType::IsExclude, group, Vec::new())
    }
}

/// Key of a group entry: VLAN instance first, group address second, so that
/// one instance's groups form a contiguous BTreeMap range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub vlan: VlanKey,
    pub group: GroupAddr,
}

impl GroupKey {
    pub fn new(vlan: VlanKey, group: GroupAddr) -> Self {
        Self { vlan, group }
    }
}

/// Reference to a source within a group, as exposed by the source iterator.
///
/// The derived order places every concrete source (in address order) before
/// the synthetic any-source entry, which is the iteration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceRef {
    Concrete(SourceAddr),
    AnySource,
}

/// Per-source, per-port state within a group.
#[derive(Debug, Clone, Default)]
pub struct SourceEntry {
    /// Ports forwarding this source under Include mode.
    pub include_ports: PortSet,
    /// Ports actively filtering this source under Exclude mode.
    pub exclude_ports: PortSet,
    /// Per-port expiry timers.
    pub timers: BTreeMap<PortId, Seconds>,
    /// Hardware location of the per-source filter entry, when programmed.
    pub hw_location: Option<HwIndex>,
}

impl SourceEntry {
    /// True if no port references this source any more.
    pub fn is_empty(&self) -> bool {
        self.include_ports.is_empty() && self.exclude_ports.is_empty()
    }

    /// Drops all state this source holds for `port`.
    pub fn clear_port(&mut self, port: PortId) {
        self.include_ports.remove(port);
        self.exclude_ports.remove(port);
        self.timers.remove(&port);
    }
}

/// Membership state for one `(VLAN instance, group)` pair.
#[derive(Debug, Clone, Default)]
pub struct GroupEntry {
    /// Ports in Exclude filter mode. Absence means Include mode.
    pub exclude_mode_ports: PortSet,
    /// Ports with any-source (wildcard) forwarding state. The ASM entry
    /// conceptually always exists; this bitmap records the ports on which it
    /// currently forwards.
    pub asm_ports: PortSet,
    /// Ports with any forwarding state at all (derived, kept current by the
    /// engine after every mutation).
    pub active_ports: PortSet,
    /// Per-port group timers; present only for ports in Exclude mode.
    pub group_timers: BTreeMap<PortId, Seconds>,
    /// Concrete per-source state, ordered by source address.
    pub sources: BTreeMap<SourceAddr, SourceEntry>,
    /// Hardware location of the group replication entry, when programmed.
    pub hw_location: Option<HwIndex>,
}

impl GroupEntry {
    /// Ports that should receive this group's traffic: any-source forwarders
    /// plus every port listed on an Include-mode source.
    pub fn forwarding_ports(&self) -> PortSet {
        self.sources
            .values()
            .fold(self.asm_ports, |acc, src| acc.union(src.include_ports))
    }

    /// Recomputes the derived `active_ports` bitmap.
    pub fn refresh_active_ports(&mut self) {
        self.active_ports = self.forwarding_ports();
    }

    /// True if no port has source or ASM state left.
    pub fn is_empty(&self) -> bool {
        self.asm_ports.is_empty() && self.sources.values().all(SourceEntry::is_empty)
    }
}

/// Caller-visible group status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub ports: PortSet,
    pub hw_location: Option<HwIndex>,
}

/// Caller-visible per-(source, port) status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub filter_mode: FilterMode,
    pub forwarding: bool,
    pub grp_timeout: Option<Seconds>,
    pub src_timeout: Option<Seconds>,
    pub hw_location: Option<HwIndex>,
}

/// Bounded free-list of hardware replication indices.
///
/// Exhaustion is not fatal: the logical entry stays authoritative and a later
/// change retries allocation.
#[derive(Debug)]
pub struct HwIndexPool {
    free: Vec<HwIndex>,
}

impl HwIndexPool {
    pub fn new(capacity: u16) -> Self {
        // Highest index at the bottom so allocation hands out 0 first.
        Self {
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn alloc(&mut self) -> Option<HwIndex> {
        self.free.pop()
    }

    pub fn release(&mut self, index: HwIndex) {
        self.free.push(index);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcast_types::{IpFamily, McastFeature, VlanId};
    use pretty_assertions::assert_eq;

    fn port(i: u16) -> PortId {
        PortId::new(i).unwrap()
    }

    #[test]
    fn test_source_ref_order() {
        let a = SourceRef::Concrete("10.0.0.1".parse().unwrap());
        let b = SourceRef::Concrete("10.0.0.2".parse().unwrap());
        assert!(a < b);
        assert!(b < SourceRef::AnySource);
    }

    #[test]
    fn test_group_key_order_groups_by_vlan() {
        let v10 = VlanKey::new(McastFeature::Ipmc, IpFamily::Ipv4, VlanId::new(10).unwrap());
        let v20 = VlanKey::new(McastFeature::Ipmc, IpFamily::Ipv4, VlanId::new(20).unwrap());
        let g_hi: GroupAddr = "239.255.0.1".parse().unwrap();
        let g_lo: GroupAddr = "224.1.1.1".parse().unwrap();

        // All of vlan 10's groups sort before any of vlan 20's.
        assert!(GroupKey::new(v10, g_hi) < GroupKey::new(v20, g_lo));
    }

    #[test]
    fn test_forwarding_ports_union() {
        let mut entry = GroupEntry::default();
        entry.asm_ports.insert(port(1));

        let mut src = SourceEntry::default();
        src.include_ports.insert(port(2));
        entry
            .sources
            .insert("10.0.0.9".parse().unwrap(), src);

        entry.refresh_active_ports();
        let expected: PortSet = [port(1), port(2)].into_iter().collect();
        assert_eq!(entry.active_ports, expected);
    }

    #[test]
    fn test_hw_pool() {
        let mut pool = HwIndexPool::new(2);
        assert_eq!(pool.alloc(), Some(0));
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), None);
        pool.release(0);
        assert_eq!(pool.alloc(), Some(0));
    }

    #[test]
    fn test_entry_empty_when_sources_drained() {
        let mut entry = GroupEntry::default();
        let mut src = SourceEntry::default();
        src.include_ports.insert(port(3));
        entry.sources.insert("10.0.0.1".parse().unwrap(), src);
        assert!(!entry.is_empty());

        entry
            .sources
            .get_mut(&"10.0.0.1".parse().unwrap())
            .unwrap()
            .clear_port(port(3));
        assert!(entry.is_empty());
    }
}
