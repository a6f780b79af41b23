//! Operational warnings and the admission evaluator.
//!
//! Admission is a global property: MVR-vs-MVR profile overlap and MVR-vs-IPMC
//! precedence couple every instance to every other. Rather than maintaining
//! partial-order-dependent incremental updates, any admission-relevant change
//! triggers [`evaluate`], a pure function from all configurations to all
//! operational states.

use crate::profile::ProfileTable;
use crate::registry::{GlobalState, OperState, VlanConfig};
use mcast_types::{IpFamily, McastFeature, VlanKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bitset of operational warnings attached to a VLAN instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningSet(u32);

impl WarningSet {
    /// The referenced channel profile does not exist.
    pub const PROFILE_MISSING: WarningSet = WarningSet(1 << 0);
    /// The profile has no rule for the instance's address family.
    pub const PROFILE_NO_FAMILY_RULE: WarningSet = WarningSet(1 << 1);
    /// The profile has no permit rule for the instance's address family.
    pub const PROFILE_NO_PERMIT: WarningSet = WarningSet(1 << 2);
    /// Permit ranges overlap those of another active MVR instance.
    pub const PROFILE_OVERLAP: WarningSet = WarningSet(1 << 3);
    /// A permit rule is shadowed by an earlier deny rule.
    pub const UNREACHABLE_PERMIT: WarningSet = WarningSet(1 << 4);
    /// Forced inactive because the MVR twin on the same VLAN won.
    pub const PRECEDENCE_LOST: WarningSet = WarningSet(1 << 5);
    /// The owning feature is disabled for this address family.
    pub const FEATURE_DISABLED: WarningSet = WarningSet(1 << 6);

    pub const fn empty() -> Self {
        WarningSet(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: WarningSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: WarningSet) {
        self.0 |= other.0;
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    fn names(&self) -> Vec<&'static str> {
        const TABLE: [(WarningSet, &str); 7] = [
            (WarningSet::PROFILE_MISSING, "profile-missing"),
            (WarningSet::PROFILE_NO_FAMILY_RULE, "profile-no-family-rule"),
            (WarningSet::PROFILE_NO_PERMIT, "profile-no-permit"),
            (WarningSet::PROFILE_OVERLAP, "profile-overlap"),
            (WarningSet::UNREACHABLE_PERMIT, "unreachable-permit"),
            (WarningSet::PRECEDENCE_LOST, "precedence-lost"),
            (WarningSet::FEATURE_DISABLED, "feature-disabled"),
        ];
        TABLE
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for WarningSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.names().join(","))
        }
    }
}

/// Admission decision for one instance.
pub type Decision = (OperState, WarningSet);

/// Recomputes operational state and warnings for every instance.
///
/// Precedence rules, in evaluation order:
/// 1. disabled feature or admin-disabled instance,
/// 2. MVR profile admission (missing profile, no family rule, no permit),
/// 3. MVR-vs-MVR permit overlap: the later key in the total order loses,
/// 4. MVR-beats-IPMC for the same `(family, vlan_id)`.
pub fn evaluate(
    configs: &BTreeMap<VlanKey, VlanConfig>,
    globals: &BTreeMap<(McastFeature, IpFamily), GlobalState>,
    profiles: &ProfileTable,
) -> BTreeMap<VlanKey, Decision> {
    let mut decisions: BTreeMap<VlanKey, Decision> = BTreeMap::new();

    for (key, config) in configs {
        let mut warnings = WarningSet::empty();

        let feature_enabled = globals
            .get(&(key.feature, key.family))
            .map(|g| g.enabled)
            .unwrap_or(true);
        if !feature_enabled {
            warnings.insert(WarningSet::FEATURE_DISABLED);
            decisions.insert(*key, (OperState::Inactive, warnings));
            continue;
        }

        if !config.admin_active {
            decisions.insert(*key, (OperState::AdminDisabled, warnings));
            continue;
        }

        if key.feature == McastFeature::Mvr {
            if let Some(name) = &config.profile {
                match profiles.get(name) {
                    None => {
                        warnings.insert(WarningSet::PROFILE_MISSING);
                        decisions.insert(*key, (OperState::Inactive, warnings));
                        continue;
                    }
                    Some(profile) => {
                        if !profile.has_family_rule(key.family) {
                            warnings.insert(WarningSet::PROFILE_NO_FAMILY_RULE);
                            decisions.insert(*key, (OperState::Inactive, warnings));
                            continue;
                        }
                        if !profile.has_permit_rule(key.family) {
                            warnings.insert(WarningSet::PROFILE_NO_PERMIT);
                            decisions.insert(*key, (OperState::Inactive, warnings));
                            continue;
                        }
                        if !profile.unreachable_permits().is_empty() {
                            warnings.insert(WarningSet::UNREACHABLE_PERMIT);
                        }
                    }
                }
            }
        }

        decisions.insert(*key, (OperState::Active, warnings));
    }

    // MVR-vs-MVR overlap: pairwise over instances that survived so far, in
    // key order, so the later-validated instance is the one forced inactive.
    let mvr_active: Vec<VlanKey> = decisions
        .iter()
        .filter(|(k, (state, _))| k.feature == McastFeature::Mvr && *state == OperState::Active)
        .map(|(k, _)| *k)
        .collect();
    for (i, key) in mvr_active.iter().enumerate() {
        let Some(profile) = configs
            .get(key)
            .and_then(|c| c.profile.as_ref())
            .and_then(|name| profiles.get(name))
        else {
            continue;
        };
        let conflict = mvr_active[..i].iter().any(|earlier| {
            if earlier.family != key.family {
                return false;
            }
            // An earlier instance that itself lost the overlap check does not
            // disqualify this one.
            if decisions[earlier].0 != OperState::Active {
                return false;
            }
            configs
                .get(earlier)
                .and_then(|c| c.profile.as_ref())
                .and_then(|name| profiles.get(name))
                .map(|other| profile.permits_overlap(other, key.family))
                .unwrap_or(false)
        });
        if conflict {
            if let Some(decision) = decisions.get_mut(key) {
                decision.0 = OperState::Inactive;
                decision.1.insert(WarningSet::PROFILE_OVERLAP);
            }
        }
    }

    // MVR beats IPMC on the same (family, vlan).
    let ipmc_keys: Vec<VlanKey> = decisions
        .keys()
        .filter(|k| k.feature == McastFeature::Ipmc)
        .copied()
        .collect();
    for key in ipmc_keys {
        if decisions[&key].0 != OperState::Active {
            continue;
        }
        let twin = key.twin();
        if decisions.get(&twin).map(|(s, _)| *s) == Some(OperState::Active) {
            if let Some(decision) = decisions.get_mut(&key) {
                decision.0 = OperState::Inactive;
                decision.1.insert(WarningSet::PRECEDENCE_LOST);
            }
        }
    }

    decisions
}
