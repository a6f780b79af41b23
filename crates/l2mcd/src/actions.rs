//! Deferred collaborator actions.
//!
//! Engine mutations never call hardware or forwarding collaborators while the
//! engine lock is held. Instead every mutating operation appends the calls it
//! wants made to a `Vec<EngineAction>`; the orchestration layer drains the
//! list after releasing the lock. State visible to a collaborator callback may
//! therefore already be one step further advanced than the action describes.

use mcast_types::{GroupAddr, IpFamily, McastFeature, PortSet, VlanId, VlanKey};

/// A collaborator call requested by an engine mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Program (or reprogram) the replication entry for a group.
    ProgramGroup {
        vlan: VlanKey,
        group: GroupAddr,
        ports: PortSet,
    },
    /// Remove the replication entry for a group.
    UnprogramGroup { vlan: VlanKey, group: GroupAddr },
    /// Update the multicast-router port set for a feature/family scope.
    SetRouterPorts {
        feature: McastFeature,
        family: IpFamily,
        ports: PortSet,
    },
    /// Add receiver ports to the MVR VLAN's membership.
    AddVlanMembership { vlan_id: VlanId, ports: PortSet },
    /// Remove receiver ports from the MVR VLAN's membership.
    RemoveVlanMembership { vlan_id: VlanId, ports: PortSet },
    /// Ask the frame sink to emit a general (group `None`) or group-specific
    /// query on the VLAN.
    SendQuery {
        vlan: VlanKey,
        group: Option<GroupAddr>,
    },
    /// Flood an unconsumed frame to the given ports.
    FloodFrame { vlan_id: VlanId, ports: PortSet },
    /// Notify registered observers of a membership delta.
    MembershipChange {
        vlan: VlanKey,
        group: GroupAddr,
        joined: PortSet,
        left: PortSet,
    },
}
