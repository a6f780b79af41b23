//! The mutable engine state guarded by the single main lock.

use crate::actions::EngineAction;
use crate::group::GroupMap;
use crate::profile::ProfileTable;
use crate::registry::VlanRegistry;
use crate::warnings;
use mcast_types::{McastFeature, PortSet, VlanKey};
use serde::Serialize;

/// Receive-pipeline counters (dispatch side; the ring keeps its own).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub parse_discarded: u64,
    pub parse_flooded: u64,
    pub discarded_no_link: u64,
    pub consumed: u64,
    pub flooded: u64,
    pub discarded_policy: u64,
}

/// Everything the engine mutates, owned by one lock.
///
/// Constructed once per process and handed to the orchestration context;
/// there are no free-standing statics.
#[derive(Debug)]
pub struct EngineState {
    pub registry: VlanRegistry,
    pub groups: GroupMap,
    pub profiles: ProfileTable,
    /// Current link state per port; frames from down ports are discarded
    /// (capture-to-processing race window).
    pub link_up: PortSet,
    pub pipeline: PipelineStats,
}

impl EngineState {
    pub fn new(hw_capacity: u16) -> Self {
        Self {
            registry: VlanRegistry::new(),
            groups: GroupMap::new(hw_capacity),
            profiles: ProfileTable::new(),
            link_up: PortSet::empty(),
            pipeline: PipelineStats::default(),
        }
    }

    /// Re-runs the admission evaluator over all instances and applies the
    /// result. Groups of instances that just lost their active state are
    /// flushed so hardware deprogramming is emitted through the usual path.
    pub fn recompute_warnings(&mut self, actions: &mut Vec<EngineAction>) {
        let configs = self.registry.configs_snapshot();
        let decisions = warnings::evaluate(&configs, self.registry.globals(), &self.profiles);
        let deactivated = self.registry.apply_decisions(&decisions);
        for key in deactivated {
            self.groups.remove_vlan(key, actions);
        }
    }

    /// Post-processes an action list before it leaves the lock scope:
    /// replication entries are widened with the scope's router ports, and
    /// MVR membership deltas on receiver ports become VLAN-membership calls.
    pub fn finish_actions(&self, actions: &mut Vec<EngineAction>) {
        let mut extra = Vec::new();
        for action in actions.iter_mut() {
            match action {
                EngineAction::ProgramGroup { vlan, ports, .. } => {
                    let routers = self
                        .registry
                        .global(vlan.feature, vlan.family)
                        .router_ports();
                    *ports = ports.union(routers);
                }
                EngineAction::MembershipChange {
                    vlan, joined, left, ..
                } if vlan.feature == McastFeature::Mvr => {
                    let Some(instance) = self.registry.get(vlan) else {
                        continue;
                    };
                    let receivers = instance.config.receiver_ports();
                    let added = joined.intersection(receivers);
                    if !added.is_empty() {
                        extra.push(EngineAction::AddVlanMembership {
                            vlan_id: vlan.vlan_id,
                            ports: added,
                        });
                    }
                    // Only drop membership for ports that no longer forward
                    // any group of this instance.
                    let mut removable = PortSet::empty();
                    for port in left.intersection(receivers).iter() {
                        if !self.groups.port_active_in_vlan(*vlan, port) {
                            removable.insert(port);
                        }
                    }
                    if !removable.is_empty() {
                        extra.push(EngineAction::RemoveVlanMembership {
                            vlan_id: vlan.vlan_id,
                            ports: removable,
                        });
                    }
                }
                _ => {}
            }
        }
        actions.extend(extra);
    }
}
