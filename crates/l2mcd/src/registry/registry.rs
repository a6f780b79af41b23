//! The VLAN instance registry.

use super::types::{GlobalState, OperState, VlanConfig, VlanInstance, MAX_VLAN_INSTANCES};
use crate::error::{L2mcError, Result};
use crate::warnings::Decision;
use log::{debug, info};
use mcast_types::{IpFamily, McastFeature, VlanId, VlanKey};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Registry of VLAN instances plus the per-`(feature, family)` global state.
#[derive(Debug)]
pub struct VlanRegistry {
    instances: BTreeMap<VlanKey, VlanInstance>,
    globals: BTreeMap<(McastFeature, IpFamily), GlobalState>,
}

impl VlanRegistry {
    pub fn new() -> Self {
        let mut globals = BTreeMap::new();
        for feature in [McastFeature::Ipmc, McastFeature::Mvr] {
            for family in [IpFamily::Ipv4, IpFamily::Ipv6] {
                globals.insert((feature, family), GlobalState::new(feature, family));
            }
        }
        Self {
            instances: BTreeMap::new(),
            globals,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn count_feature(&self, feature: McastFeature) -> usize {
        self.instances
            .keys()
            .filter(|k| k.feature == feature)
            .count()
    }

    /// Creates an instance with the given configuration.
    pub fn create(&mut self, key: VlanKey, config: VlanConfig) -> Result<()> {
        if self.instances.contains_key(&key) {
            return Err(L2mcError::AlreadyExists(key.to_string()));
        }
        if self.count_feature(key.feature) >= MAX_VLAN_INSTANCES {
            return Err(L2mcError::ResourceExhausted(format!(
                "{} instance limit of {} reached",
                key.feature, MAX_VLAN_INSTANCES
            )));
        }
        config
            .validate()
            .map_err(L2mcError::Validation)?;
        info!("created instance {}", key);
        self.instances
            .insert(key, VlanInstance::new(key, config.normalized()));
        Ok(())
    }

    /// Returns the IPMC instance for `(family, vid)`, creating it with the
    /// feature default configuration on first reference.
    pub fn ensure_ipmc(&mut self, family: IpFamily, vlan_id: VlanId) -> Result<VlanKey> {
        let key = VlanKey::new(McastFeature::Ipmc, family, vlan_id);
        if !self.instances.contains_key(&key) {
            self.create(key, VlanConfig::default_for(McastFeature::Ipmc))?;
            debug!("auto-vivified {}", key);
        }
        Ok(key)
    }

    /// Removes an instance. The caller is responsible for tearing down the
    /// instance's group state first so hardware deprogramming is emitted.
    pub fn remove(&mut self, key: VlanKey) -> Result<VlanInstance> {
        self.instances
            .remove(&key)
            .ok_or_else(|| L2mcError::NotFound(key.to_string()))
    }

    pub fn get(&self, key: &VlanKey) -> Option<&VlanInstance> {
        self.instances.get(key)
    }

    pub fn get_mut(&mut self, key: &VlanKey) -> Option<&mut VlanInstance> {
        self.instances.get_mut(key)
    }

    pub fn get_config(&self, key: &VlanKey) -> Result<&VlanConfig> {
        self.instances
            .get(key)
            .map(|i| &i.config)
            .ok_or_else(|| L2mcError::NotFound(key.to_string()))
    }

    /// Replaces an instance's configuration.
    ///
    /// A no-op returning `Ok(false)` when the normalized new configuration
    /// equals the stored one.
    pub fn set_config(&mut self, key: VlanKey, config: VlanConfig) -> Result<bool> {
        let instance = self
            .instances
            .get_mut(&key)
            .ok_or_else(|| L2mcError::NotFound(key.to_string()))?;
        if instance.config.normalized_eq(&config) {
            debug!("unchanged configuration for {}", key);
            return Ok(false);
        }
        config
            .validate()
            .map_err(L2mcError::Validation)?;
        instance.config = config.normalized();
        Ok(true)
    }

    /// Next key after `prev` in the `(feature, family, vlan)` total order.
    ///
    /// With `stay_in_family`, iteration terminates as soon as the
    /// `(feature, family)` scope of the reference key is left, so management
    /// walks cannot leak across feature or family boundaries.
    pub fn iterate(&self, prev: Option<VlanKey>, stay_in_family: bool) -> Option<VlanKey> {
        let next = match prev {
            None => self.instances.keys().next().copied(),
            Some(p) => self
                .instances
                .range((Excluded(p), Unbounded))
                .next()
                .map(|(k, _)| *k),
        }?;
        if stay_in_family {
            if let Some(p) = prev {
                if !next.same_scope(&p) {
                    return None;
                }
            }
        }
        Some(next)
    }

    pub fn global(&self, feature: McastFeature, family: IpFamily) -> &GlobalState {
        // All four scopes are created at construction.
        &self.globals[&(feature, family)]
    }

    pub fn global_mut(&mut self, feature: McastFeature, family: IpFamily) -> &mut GlobalState {
        self.globals
            .get_mut(&(feature, family))
            .expect("global scopes are created at construction")
    }

    pub fn globals(&self) -> &BTreeMap<(McastFeature, IpFamily), GlobalState> {
        &self.globals
    }

    pub fn globals_mut(
        &mut self,
    ) -> impl Iterator<Item = (&(McastFeature, IpFamily), &mut GlobalState)> {
        self.globals.iter_mut()
    }

    pub fn instances(&self) -> impl Iterator<Item = &VlanInstance> {
        self.instances.values()
    }

    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut VlanInstance> {
        self.instances.values_mut()
    }

    /// Snapshot of all configurations, for the warning evaluator.
    pub fn configs_snapshot(&self) -> BTreeMap<VlanKey, VlanConfig> {
        self.instances
            .iter()
            .map(|(k, i)| (*k, i.config.clone()))
            .collect()
    }

    /// Applies evaluator decisions. Returns the keys whose instances were
    /// just deactivated (left `Active`), so callers can flush their groups.
    pub fn apply_decisions(&mut self, decisions: &BTreeMap<VlanKey, Decision>) -> Vec<VlanKey> {
        let mut deactivated = Vec::new();
        for (key, (state, warnings)) in decisions {
            if let Some(instance) = self.instances.get_mut(key) {
                let was_active = instance.status.oper_state == OperState::Active;
                if was_active && *state != OperState::Active {
                    info!("instance {} deactivated ({})", key, warnings);
                    deactivated.push(*key);
                }
                instance.status.oper_state = *state;
                instance.status.warnings = *warnings;
            }
        }
        deactivated
    }
}

impl Default for VlanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(feature: McastFeature, family: IpFamily, vid: u16) -> VlanKey {
        VlanKey::new(feature, family, VlanId::new(vid).unwrap())
    }

    #[test]
    fn test_create_and_duplicate() {
        let mut registry = VlanRegistry::new();
        let k = key(McastFeature::Mvr, IpFamily::Ipv4, 100);
        registry.create(k, VlanConfig::default_for(McastFeature::Mvr)).unwrap();

        let err = registry
            .create(k, VlanConfig::default_for(McastFeature::Mvr))
            .unwrap_err();
        assert!(matches!(err, L2mcError::AlreadyExists(_)));
    }

    #[test]
    fn test_instance_limit() {
        let mut registry = VlanRegistry::new();
        for vid in 1..=MAX_VLAN_INSTANCES as u16 {
            registry
                .create(
                    key(McastFeature::Ipmc, IpFamily::Ipv4, vid),
                    VlanConfig::default_for(McastFeature::Ipmc),
                )
                .unwrap();
        }
        let err = registry
            .create(
                key(McastFeature::Ipmc, IpFamily::Ipv4, 4000),
                VlanConfig::default_for(McastFeature::Ipmc),
            )
            .unwrap_err();
        assert!(matches!(err, L2mcError::ResourceExhausted(_)));

        // The other feature has its own instance cap.
        registry
            .create(
                key(McastFeature::Mvr, IpFamily::Ipv4, 4000),
                VlanConfig::default_for(McastFeature::Mvr),
            )
            .unwrap();
    }

    #[test]
    fn test_auto_vivification() {
        let mut registry = VlanRegistry::new();
        let k = registry
            .ensure_ipmc(IpFamily::Ipv4, VlanId::new(10).unwrap())
            .unwrap();
        assert!(registry.get(&k).is_some());
        assert!(registry.get(&k).unwrap().config.admin_active);

        // Second reference reuses the instance.
        registry
            .ensure_ipmc(IpFamily::Ipv4, VlanId::new(10).unwrap())
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_config_no_op_on_equal() {
        let mut registry = VlanRegistry::new();
        let k = key(McastFeature::Mvr, IpFamily::Ipv4, 100);
        let mut config = VlanConfig::default_for(McastFeature::Mvr);
        config.name = "uplink".into();
        registry.create(k, config.clone()).unwrap();

        // Same config with zero padding in the name: no-op.
        let mut padded = config.clone();
        padded.name = format!("uplink{}", "\0".repeat(4));
        assert!(!registry.set_config(k, padded).unwrap());

        config.admin_active = true;
        assert!(registry.set_config(k, config).unwrap());
    }

    #[test]
    fn test_set_config_validation() {
        let mut registry = VlanRegistry::new();
        let k = key(McastFeature::Mvr, IpFamily::Ipv4, 100);
        registry.create(k, VlanConfig::default_for(McastFeature::Mvr)).unwrap();

        let mut bad = VlanConfig::default_for(McastFeature::Mvr);
        bad.querier.query_interval = 0;
        assert!(matches!(
            registry.set_config(k, bad),
            Err(L2mcError::Validation(_))
        ));
    }

    #[test]
    fn test_iterate_order_and_family_boundary() {
        let mut registry = VlanRegistry::new();
        for (feature, family, vid) in [
            (McastFeature::Ipmc, IpFamily::Ipv4, 20),
            (McastFeature::Ipmc, IpFamily::Ipv4, 10),
            (McastFeature::Ipmc, IpFamily::Ipv6, 10),
            (McastFeature::Mvr, IpFamily::Ipv4, 10),
        ] {
            registry
                .create(
                    key(feature, family, vid),
                    VlanConfig::default_for(feature),
                )
                .unwrap();
        }

        let first = registry.iterate(None, false).unwrap();
        assert_eq!(first, key(McastFeature::Ipmc, IpFamily::Ipv4, 10));
        let second = registry.iterate(Some(first), true).unwrap();
        assert_eq!(second, key(McastFeature::Ipmc, IpFamily::Ipv4, 20));

        // Stay-in-family iteration stops at the IPv6 boundary...
        assert_eq!(registry.iterate(Some(second), true), None);
        // ...while the unbounded walk continues in total order.
        assert_eq!(
            registry.iterate(Some(second), false),
            Some(key(McastFeature::Ipmc, IpFamily::Ipv6, 10))
        );
    }

    #[test]
    fn test_remove() {
        let mut registry = VlanRegistry::new();
        let k = key(McastFeature::Ipmc, IpFamily::Ipv4, 10);
        registry.create(k, VlanConfig::default_for(McastFeature::Ipmc)).unwrap();
        registry.remove(k).unwrap();
        assert!(matches!(registry.remove(k), Err(L2mcError::NotFound(_))));
    }
}
