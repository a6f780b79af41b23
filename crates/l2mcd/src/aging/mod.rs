//! The 1 Hz aging driver.
//!
//! A single pass expires group/source timers, ages dynamically learned
//! router ports and advances every active instance's querier state machine.
//! All membership removals go through the same [`crate::group::GroupMap`]
//! mutation path as leaves, so hardware deprogramming and notifications do
//! not depend on why membership was lost.

mod querier;

pub use querier::{QuerierRole, QuerierSm};

use crate::actions::EngineAction;
use crate::group::Seconds;
use crate::registry::OperState;
use crate::state::EngineState;

/// Runs one aging tick at `now`.
pub fn tick(state: &mut EngineState, now: Seconds, actions: &mut Vec<EngineAction>) {
    state.groups.age(now, actions);

    for ((feature, family), global) in state.registry.globals_mut() {
        if global.age_router_ports(now) {
            actions.push(EngineAction::SetRouterPorts {
                feature: *feature,
                family: *family,
                ports: global.router_ports(),
            });
        }
    }

    for instance in state.registry.instances_mut() {
        if instance.status.oper_state == OperState::Active {
            let key = instance.key;
            instance
                .status
                .querier
                .tick(key, &instance.config.querier, now, actions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{QuerierConfig, VlanConfig, ROUTER_PORT_TIMEOUT};
    use mcast_types::{IpFamily, McastFeature, PortId, VlanId, VlanKey};

    fn active_querier_config() -> VlanConfig {
        VlanConfig {
            admin_active: true,
            querier: QuerierConfig {
                enabled: true,
                address: Some("10.0.0.1".parse().unwrap()),
                ..QuerierConfig::default()
            },
            ..VlanConfig::default()
        }
    }

    #[test]
    fn test_tick_emits_queries_for_active_instances() {
        let mut state = EngineState::new(16);
        let key = VlanKey::new(
            McastFeature::Ipmc,
            IpFamily::Ipv4,
            VlanId::new(10).unwrap(),
        );
        state.registry.create(key, active_querier_config()).unwrap();
        state.recompute_warnings(&mut Vec::new());

        let mut actions = Vec::new();
        tick(&mut state, 0, &mut actions);
        assert!(actions
            .iter()
            .any(|a| matches!(a, EngineAction::SendQuery { vlan, group: None } if *vlan == key)));
    }

    #[test]
    fn test_tick_skips_inactive_instances() {
        let mut state = EngineState::new(16);
        let key = VlanKey::new(
            McastFeature::Ipmc,
            IpFamily::Ipv4,
            VlanId::new(10).unwrap(),
        );
        let mut config = active_querier_config();
        config.admin_active = false;
        state.registry.create(key, config).unwrap();
        state.recompute_warnings(&mut Vec::new());

        let mut actions = Vec::new();
        tick(&mut state, 0, &mut actions);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_tick_ages_router_ports() {
        let mut state = EngineState::new(16);
        let port = PortId::new(7).unwrap();
        state
            .registry
            .global_mut(McastFeature::Ipmc, IpFamily::Ipv4)
            .learn_router_port(port, 0);

        let mut actions = Vec::new();
        tick(&mut state, ROUTER_PORT_TIMEOUT, &mut actions);
        assert!(actions.iter().any(|a| matches!(
            a,
            EngineAction::SetRouterPorts {
                feature: McastFeature::Ipmc,
                family: IpFamily::Ipv4,
                ports,
            } if ports.is_empty()
        )));
    }
}
