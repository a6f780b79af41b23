//! VLAN instance keys.

use crate::{IpFamily, VlanId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The multicast feature that owns a VLAN instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McastFeature {
    /// Plain IGMP/MLD snooping on the VLAN itself.
    Ipmc,
    /// Multicast VLAN Registration.
    Mvr,
}

impl fmt::Display for McastFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McastFeature::Ipmc => write!(f, "IPMC"),
            McastFeature::Mvr => write!(f, "MVR"),
        }
    }
}

/// Key of a VLAN instance in the registry.
///
/// The total order is `(feature, family, vlan_id)`. Management iterators and
/// the group map rely on this order for range scans and for the
/// stay-in-family iteration contract, so the `Ord` implementation is written
/// out explicitly rather than derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanKey {
    pub feature: McastFeature,
    pub family: IpFamily,
    pub vlan_id: VlanId,
}

impl VlanKey {
    pub fn new(feature: McastFeature, family: IpFamily, vlan_id: VlanId) -> Self {
        Self {
            feature,
            family,
            vlan_id,
        }
    }

    /// Returns true if `other` belongs to the same `(feature, family)` scope.
    pub fn same_scope(&self, other: &VlanKey) -> bool {
        self.feature == other.feature && self.family == other.family
    }

    /// The key of the twin instance owned by the other feature.
    pub fn twin(&self) -> VlanKey {
        let feature = match self.feature {
            McastFeature::Ipmc => McastFeature::Mvr,
            McastFeature::Mvr => McastFeature::Ipmc,
        };
        VlanKey::new(feature, self.family, self.vlan_id)
    }
}

impl Ord for VlanKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.feature
            .cmp(&other.feature)
            .then(self.family.cmp(&other.family))
            .then(self.vlan_id.cmp(&other.vlan_id))
    }
}

impl PartialOrd for VlanKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/Vlan{}", self.feature, self.family, self.vlan_id)
    }
}
