//! The group/source membership engine.
//!
//! Maintains Include/Exclude filter state per `(group, port)` and, within a
//! group, per `(source, port)`, reproducing IGMPv3/MLDv2 semantics at
//! snooping-switch granularity. Every mutation funnels through [`GroupMap`]
//! so that hardware programming and membership notifications are emitted
//! uniformly whether state was changed by a report, a leave or a timeout.

use super::types::{
    FilterMode, GroupEntry, GroupKey, GroupRecord, GroupStatus, HwIndexPool, RecordType, Seconds,
    SourceEntry, SourceRef, SourceStatus, TimerProfile,
};
use crate::actions::EngineAction;
use crate::error::{L2mcError, Result};
use log::{debug, warn};
use mcast_types::{GroupAddr, PortId, PortSet, SourceAddr, VlanKey};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Counters kept by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupMapStats {
    pub reports_processed: u64,
    pub leaves_processed: u64,
    pub groups_created: u64,
    pub groups_removed: u64,
    pub sources_created: u64,
    pub sources_removed: u64,
    pub sources_expired: u64,
    pub throttle_drops: u64,
    pub hw_alloc_failures: u64,
}

/// The per-process group/source map.
///
/// Exclusively owned by the engine; callers only ever see snapshots taken
/// while the engine lock is held.
#[derive(Debug)]
pub struct GroupMap {
    entries: BTreeMap<GroupKey, GroupEntry>,
    hw_pool: HwIndexPool,
    stats: GroupMapStats,
}

fn source_entry<'a>(
    sources: &'a mut BTreeMap<SourceAddr, SourceEntry>,
    created: &mut u64,
    addr: SourceAddr,
) -> &'a mut SourceEntry {
    sources.entry(addr).or_insert_with(|| {
        *created += 1;
        SourceEntry::default()
    })
}

fn prune_empty_sources(entry: &mut GroupEntry, removed: &mut u64, pool: &mut HwIndexPool) {
    let before = entry.sources.len();
    entry.sources.retain(|_, src| {
        if src.is_empty() {
            if let Some(index) = src.hw_location.take() {
                pool.release(index);
            }
            false
        } else {
            true
        }
    });
    *removed += (before - entry.sources.len()) as u64;
}

/// Refreshes a timer to `target` or lowers it, but never extends it past an
/// already-earlier deadline when `lower_only` is set.
fn set_timer(timers: &mut BTreeMap<PortId, Seconds>, port: PortId, target: Seconds, lower_only: bool) {
    let slot = timers.entry(port).or_insert(target);
    if lower_only {
        *slot = (*slot).min(target);
    } else {
        *slot = target;
    }
}

impl GroupMap {
    pub fn new(hw_capacity: u16) -> Self {
        Self {
            entries: BTreeMap::new(),
            hw_pool: HwIndexPool::new(hw_capacity),
            stats: GroupMapStats::default(),
        }
    }

    pub fn stats(&self) -> GroupMapStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of groups on `vlan`'s `(feature, family)` scope in which `port`
    /// currently forwards. Used for per-port throttling.
    fn active_group_count(&self, vlan: &VlanKey, port: PortId) -> usize {
        self.entries
            .iter()
            .filter(|(k, e)| k.vlan.same_scope(vlan) && e.active_ports.contains(port))
            .count()
    }

    /// Applies one group record received on `port`.
    ///
    /// Idempotent: replaying an already-applied record refreshes timers to
    /// the same absolute target a single application would have produced.
    #[allow(clippy::too_many_arguments)]
    pub fn report(
        &mut self,
        vlan: VlanKey,
        port: PortId,
        record: &GroupRecord,
        timing: &TimerProfile,
        now: Seconds,
        group_limit: Option<u32>,
        actions: &mut Vec<EngineAction>,
    ) -> Result<()> {
        if record.group.family() != vlan.family {
            return Err(L2mcError::Validation(format!(
                "group {} does not match family of {}",
                record.group, vlan
            )));
        }

        let key = GroupKey::new(vlan, record.group);
        let existed = self.entries.contains_key(&key);

        // Throttling: adding this port to a group it is not yet part of must
        // not push the port past its per-scope group limit.
        if let Some(limit) = group_limit {
            let already_member = self
                .entries
                .get(&key)
                .map(|e| e.active_ports.contains(port))
                .unwrap_or(false);
            if !already_member && self.active_group_count(&vlan, port) >= limit as usize {
                self.stats.throttle_drops += 1;
                return Err(L2mcError::ResourceExhausted(format!(
                    "port {} reached its group limit of {}",
                    port, limit
                )));
            }
        }

        if !existed {
            self.stats.groups_created += 1;
        }
        let stats = &mut self.stats;
        let entry = self.entries.entry(key).or_default();
        let forwarding_before = entry.forwarding_ports();
        let gmi = now + timing.group_membership_interval;
        let lmi = now + timing.last_member_interval;

        match record.record_type {
            RecordType::IsInclude | RecordType::AllowNewSources => {
                for &source in &record.sources {
                    let src = source_entry(&mut entry.sources, &mut stats.sources_created, source);
                    src.include_ports.insert(port);
                    // Allow also unblocks a source the port was filtering.
                    src.exclude_ports.remove(port);
                    set_timer(&mut src.timers, port, gmi, false);
                }
            }
            RecordType::IsExclude | RecordType::ToExclude => {
                entry.exclude_mode_ports.insert(port);
                entry.asm_ports.insert(port);
                set_timer(&mut entry.group_timers, port, gmi, false);

                // The listed set replaces the port's previous source state.
                for src in entry.sources.values_mut() {
                    src.clear_port(port);
                }
                for &source in &record.sources {
                    let src = source_entry(&mut entry.sources, &mut stats.sources_created, source);
                    src.exclude_ports.insert(port);
                    set_timer(&mut src.timers, port, gmi, false);
                    // Actively filtered sources hold their own filter slot.
                    if src.hw_location.is_none() {
                        src.hw_location = self.hw_pool.alloc();
                    }
                }
            }
            RecordType::ToInclude => {
                for &source in &record.sources {
                    let src = source_entry(&mut entry.sources, &mut stats.sources_created, source);
                    src.include_ports.insert(port);
                    src.exclude_ports.remove(port);
                    set_timer(&mut src.timers, port, gmi, false);
                }
                // Sources the port no longer wants are put on leave latency,
                // and the exclude-mode group timer is lowered so the mode
                // flips back unless another report refreshes it.
                for (addr, src) in entry.sources.iter_mut() {
                    if src.include_ports.contains(port) && !record.sources.contains(addr) {
                        set_timer(&mut src.timers, port, lmi, true);
                    }
                }
                if entry.exclude_mode_ports.contains(port) {
                    set_timer(&mut entry.group_timers, port, lmi, true);
                }
                actions.push(EngineAction::SendQuery {
                    vlan,
                    group: Some(record.group),
                });
            }
            RecordType::BlockOldSources => {
                if entry.exclude_mode_ports.contains(port) {
                    for &source in &record.sources {
                        let src =
                            source_entry(&mut entry.sources, &mut stats.sources_created, source);
                        src.exclude_ports.insert(port);
                        src.include_ports.remove(port);
                        set_timer(&mut src.timers, port, gmi, false);
                        if src.hw_location.is_none() {
                            src.hw_location = self.hw_pool.alloc();
                        }
                    }
                } else {
                    for &source in &record.sources {
                        if let Some(src) = entry.sources.get_mut(&source) {
                            if src.include_ports.contains(port) {
                                set_timer(&mut src.timers, port, lmi, true);
                            }
                        }
                    }
                    actions.push(EngineAction::SendQuery {
                        vlan,
                        group: Some(record.group),
                    });
                }
            }
        }

        prune_empty_sources(entry, &mut stats.sources_removed, &mut self.hw_pool);
        entry.refresh_active_ports();
        self.stats.reports_processed += 1;
        self.commit(key, existed, forwarding_before, actions);
        Ok(())
    }

    /// Processes an ASM leave (IGMPv2 Leave / MLDv1 Done) from `port`.
    pub fn leave(
        &mut self,
        vlan: VlanKey,
        group: GroupAddr,
        port: PortId,
        timing: &TimerProfile,
        now: Seconds,
        fast_leave: bool,
        actions: &mut Vec<EngineAction>,
    ) -> Result<()> {
        let key = GroupKey::new(vlan, group);
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| L2mcError::NotFound(format!("group {} on {}", group, vlan)))?;
        let forwarding_before = entry.forwarding_ports();
        let lmi = now + timing.last_member_interval;

        if fast_leave {
            entry.exclude_mode_ports.remove(port);
            entry.asm_ports.remove(port);
            entry.group_timers.remove(&port);
            for src in entry.sources.values_mut() {
                src.clear_port(port);
            }
        } else {
            if entry.group_timers.contains_key(&port) {
                set_timer(&mut entry.group_timers, port, lmi, true);
            }
            for src in entry.sources.values_mut() {
                if src.include_ports.contains(port) {
                    set_timer(&mut src.timers, port, lmi, true);
                }
            }
            actions.push(EngineAction::SendQuery {
                vlan,
                group: Some(group),
            });
        }

        prune_empty_sources(entry, &mut self.stats.sources_removed, &mut self.hw_pool);
        entry.refresh_active_ports();
        self.stats.leaves_processed += 1;
        self.commit(key, true, forwarding_before, actions);
        Ok(())
    }

    /// Expires timers across the whole map.
    ///
    /// Walks a snapshot of the keys so that entry removal cannot invalidate
    /// the iteration. Expiry is `timeout <= now`: an entry whose timeout
    /// equals the current tick's timestamp is removed by that tick.
    pub fn age(&mut self, now: Seconds, actions: &mut Vec<EngineAction>) {
        let keys: Vec<GroupKey> = self.entries.keys().copied().collect();
        for key in keys {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            let forwarding_before = entry.forwarding_ports();

            // Per-source timers.
            for src in entry.sources.values_mut() {
                let expired: Vec<PortId> = src
                    .timers
                    .iter()
                    .filter(|(_, t)| **t <= now)
                    .map(|(p, _)| *p)
                    .collect();
                for port in expired {
                    src.clear_port(port);
                    self.stats.sources_expired += 1;
                }
            }

            // Per-port group timers: an expired Exclude-mode timer flips the
            // port back to Include mode; its deny list is dropped and any
            // Include-mode sources recorded meanwhile are retained.
            let flipped: Vec<PortId> = entry
                .group_timers
                .iter()
                .filter(|(_, t)| **t <= now)
                .map(|(p, _)| *p)
                .collect();
            for port in flipped {
                entry.group_timers.remove(&port);
                if entry.exclude_mode_ports.contains(port) {
                    entry.exclude_mode_ports.remove(port);
                    entry.asm_ports.remove(port);
                    for src in entry.sources.values_mut() {
                        src.exclude_ports.remove(port);
                        if !src.include_ports.contains(port) {
                            src.timers.remove(&port);
                        }
                    }
                    debug!("group {} port {} reverted to include mode", key.group, port);
                }
            }

            prune_empty_sources(entry, &mut self.stats.sources_removed, &mut self.hw_pool);
            entry.refresh_active_ports();
            self.commit(key, true, forwarding_before, actions);
        }
    }

    /// Tears down every group owned by `vlan`. Returns the number of groups
    /// removed.
    pub fn remove_vlan(&mut self, vlan: VlanKey, actions: &mut Vec<EngineAction>) -> usize {
        let keys: Vec<GroupKey> = self
            .entries
            .keys()
            .filter(|k| k.vlan == vlan)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = self.entries.remove(key) {
                let forwarding = entry.forwarding_ports();
                if let Some(index) = entry.hw_location {
                    self.hw_pool.release(index);
                }
                for src in entry.sources.values() {
                    if let Some(index) = src.hw_location {
                        self.hw_pool.release(index);
                    }
                }
                if !forwarding.is_empty() {
                    actions.push(EngineAction::UnprogramGroup {
                        vlan: key.vlan,
                        group: key.group,
                    });
                    actions.push(EngineAction::MembershipChange {
                        vlan: key.vlan,
                        group: key.group,
                        joined: PortSet::empty(),
                        left: forwarding,
                    });
                }
                self.stats.groups_removed += 1;
            }
        }
        keys.len()
    }

    /// Group status: member ports and hardware location.
    pub fn status(&self, vlan: VlanKey, group: GroupAddr) -> Result<GroupStatus> {
        let entry = self
            .entries
            .get(&GroupKey::new(vlan, group))
            .ok_or_else(|| L2mcError::NotFound(format!("group {} on {}", group, vlan)))?;
        Ok(GroupStatus {
            ports: entry.active_ports,
            hw_location: entry.hw_location,
        })
    }

    /// Per-(source, port) status, including the synthetic any-source entry.
    pub fn source_status(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        port: PortId,
        source: SourceRef,
    ) -> Result<SourceStatus> {
        let entry = self
            .entries
            .get(&GroupKey::new(vlan, group))
            .ok_or_else(|| L2mcError::NotFound(format!("group {} on {}", group, vlan)))?;

        let filter_mode = if entry.exclude_mode_ports.contains(port) {
            FilterMode::Exclude
        } else {
            FilterMode::Include
        };
        let grp_timeout = entry.group_timers.get(&port).copied();

        match source {
            SourceRef::AnySource => Ok(SourceStatus {
                filter_mode,
                forwarding: entry.asm_ports.contains(port),
                grp_timeout,
                src_timeout: None,
                hw_location: entry.hw_location,
            }),
            SourceRef::Concrete(addr) => {
                let src = entry.sources.get(&addr).ok_or_else(|| {
                    L2mcError::NotFound(format!("source {} of group {} on {}", addr, group, vlan))
                })?;
                let forwarding = match filter_mode {
                    FilterMode::Include => src.include_ports.contains(port),
                    // In exclude mode a listed source is actively filtered.
                    FilterMode::Exclude => !src.exclude_ports.contains(port),
                };
                Ok(SourceStatus {
                    filter_mode,
                    forwarding,
                    grp_timeout,
                    src_timeout: src.timers.get(&port).copied(),
                    hw_location: src.hw_location.or(entry.hw_location),
                })
            }
        }
    }

    /// Next group key after `prev` in `(vlan, group)` order. With
    /// `stay_in_scope`, iteration ends when the `(feature, family)` of the
    /// reference key is left.
    pub fn next_group(&self, prev: Option<GroupKey>, stay_in_scope: bool) -> Option<GroupKey> {
        let next = match prev {
            None => self.entries.keys().next().copied(),
            Some(p) => self
                .entries
                .range((Excluded(p), Unbounded))
                .next()
                .map(|(k, _)| *k),
        }?;
        if stay_in_scope {
            if let Some(p) = prev {
                if !next.vlan.same_scope(&p.vlan) {
                    return None;
                }
            }
        }
        Some(next)
    }

    /// Next source of `(vlan, group, port)` after `prev`: concrete sources in
    /// address order first, the synthetic any-source entry last.
    pub fn next_source(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        port: PortId,
        prev: Option<SourceRef>,
    ) -> Option<SourceRef> {
        let entry = self.entries.get(&GroupKey::new(vlan, group))?;
        let floor = match prev {
            None => None,
            Some(SourceRef::AnySource) => return None,
            Some(SourceRef::Concrete(addr)) => Some(addr),
        };

        let next_concrete = entry
            .sources
            .iter()
            .filter(|(addr, src)| {
                floor.map_or(true, |f| **addr > f)
                    && (src.include_ports.contains(port) || src.exclude_ports.contains(port))
            })
            .map(|(addr, _)| SourceRef::Concrete(*addr))
            .next();

        next_concrete.or({
            if entry.asm_ports.contains(port) {
                Some(SourceRef::AnySource)
            } else {
                None
            }
        })
    }

    /// Next member port of a group at or after `from`.
    pub fn next_port(&self, vlan: VlanKey, group: GroupAddr, from: PortId) -> Option<PortId> {
        self.entries
            .get(&GroupKey::new(vlan, group))
            .and_then(|e| e.active_ports.next_at_or_after(from))
    }

    /// True if `port` forwards at least one group of `vlan`.
    pub fn port_active_in_vlan(&self, vlan: VlanKey, port: PortId) -> bool {
        self.entries
            .iter()
            .any(|(k, e)| k.vlan == vlan && e.active_ports.contains(port))
    }

    /// Emits the hardware and notification actions implied by a mutation,
    /// and removes the entry if it became empty.
    fn commit(
        &mut self,
        key: GroupKey,
        existed: bool,
        forwarding_before: PortSet,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };

        if entry.is_empty() {
            if let Some(removed) = self.entries.remove(&key) {
                if let Some(index) = removed.hw_location {
                    self.hw_pool.release(index);
                }
            }
            if existed && !forwarding_before.is_empty() {
                actions.push(EngineAction::UnprogramGroup {
                    vlan: key.vlan,
                    group: key.group,
                });
                actions.push(EngineAction::MembershipChange {
                    vlan: key.vlan,
                    group: key.group,
                    joined: PortSet::empty(),
                    left: forwarding_before,
                });
            }
            self.stats.groups_removed += 1;
            return;
        }

        let forwarding_after = entry.forwarding_ports();
        if forwarding_after == forwarding_before {
            return;
        }

        if entry.hw_location.is_none() {
            entry.hw_location = self.hw_pool.alloc();
            if entry.hw_location.is_none() {
                self.stats.hw_alloc_failures += 1;
                warn!(
                    "replication table exhausted; group {} on {} kept in software state only",
                    key.group, key.vlan
                );
            }
        }

        actions.push(EngineAction::ProgramGroup {
            vlan: key.vlan,
            group: key.group,
            ports: forwarding_after,
        });
        actions.push(EngineAction::MembershipChange {
            vlan: key.vlan,
            group: key.group,
            joined: forwarding_after.difference(forwarding_before),
            left: forwarding_before.difference(forwarding_after),
        });
    }
}
