//! The engine context object and its management-plane surface.
//!
//! One [`McastOrch`] exists per process. All mutable engine state sits behind
//! a single mutex; the receive ring has its own independent leaf lock so
//! frame producers in driver context never contend with engine users. The
//! lock is never held across an `.await` or a collaborator call: mutations
//! collect [`EngineAction`]s under the lock and execute them after releasing
//! it.

use crate::actions::EngineAction;
use crate::aging;
use crate::audit::{AuditCategory, AuditRecord};
use crate::audit_log;
use crate::error::{L2mcError, Result};
use crate::group::{GroupKey, GroupStatus, Seconds, SourceRef, SourceStatus};
use crate::profile::Profile;
use crate::registry::{OperState, PortRole, UnknownPduPolicy, VlanConfig, VlanStats};
use crate::rx::{
    dispatch, FrameDeliver, FrameSourceHandle, ParseVerdict, PduParser, RawFrame, RingBuffer,
    RingStats,
};
use crate::state::{EngineState, PipelineStats};
use crate::warnings::WarningSet;
use log::{debug, error, info};
use mcast_types::{
    GroupAddr, IpFamily, McastFeature, PortId, PortSet, SourceAddr, VlanId, VlanKey,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Collaborator calls the engine makes with its lock released.
pub trait McastOrchCallbacks: Send + Sync {
    fn program_group(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        ports: PortSet,
    ) -> std::result::Result<(), String>;
    fn unprogram_group(&self, vlan: VlanKey, group: GroupAddr)
        -> std::result::Result<(), String>;
    fn set_router_ports(
        &self,
        feature: McastFeature,
        family: IpFamily,
        ports: PortSet,
    ) -> std::result::Result<(), String>;
    fn add_vlan_membership(
        &self,
        vlan_id: VlanId,
        ports: PortSet,
    ) -> std::result::Result<(), String>;
    fn remove_vlan_membership(
        &self,
        vlan_id: VlanId,
        ports: PortSet,
    ) -> std::result::Result<(), String>;
    /// Encode and send a general (`group` = `None`) or group-specific query.
    fn send_query(&self, vlan: VlanKey, group: Option<GroupAddr>)
        -> std::result::Result<(), String>;
    /// Transmit a raw frame to a port set.
    fn transmit(
        &self,
        vlan_id: VlanId,
        data: &[u8],
        ports: PortSet,
    ) -> std::result::Result<(), String>;
    fn membership_change(&self, vlan: VlanKey, group: GroupAddr, joined: PortSet, left: PortSet);
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct McastOrchConfig {
    pub ring_capacity: usize,
    /// Hardware replication table size.
    pub hw_capacity: u16,
    pub tick_interval: Duration,
}

impl Default for McastOrchConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 512,
            hw_capacity: 1024,
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Caller-visible instance status.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub oper_state: OperState,
    pub warnings: WarningSet,
    pub querier_role: aging::QuerierRole,
    pub other_querier: Option<SourceAddr>,
    pub stats: VlanStats,
}

/// The multicast control-plane engine.
pub struct McastOrch {
    config: McastOrchConfig,
    state: Mutex<EngineState>,
    ring: Arc<RingBuffer>,
    parser: Arc<dyn PduParser>,
    callbacks: Arc<dyn McastOrchCallbacks>,
    running: AtomicBool,
    epoch: Instant,
}

impl McastOrch {
    pub fn new(
        config: McastOrchConfig,
        parser: Arc<dyn PduParser>,
        callbacks: Arc<dyn McastOrchCallbacks>,
    ) -> Arc<Self> {
        let ring = Arc::new(RingBuffer::new(config.ring_capacity));
        Arc::new(Self {
            state: Mutex::new(EngineState::new(config.hw_capacity)),
            ring,
            parser,
            callbacks,
            running: AtomicBool::new(true),
            epoch: Instant::now(),
            config,
        })
    }

    /// Seconds since engine start (the engine's monotonic epoch).
    pub fn now(&self) -> Seconds {
        self.epoch.elapsed().as_secs()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ------------------------------------------------------------------
    // Instance lifecycle and configuration
    // ------------------------------------------------------------------

    pub fn default_config(&self, feature: McastFeature) -> VlanConfig {
        VlanConfig::default_for(feature)
    }

    pub fn create_vlan(&self, key: VlanKey, config: VlanConfig) -> Result<()> {
        let mut actions = Vec::new();
        let result = {
            let mut state = self.state();
            let result = state.registry.create(key, config);
            if result.is_ok() {
                state.recompute_warnings(&mut actions);
                state.finish_actions(&mut actions);
            }
            result
        };
        self.run_actions(actions, None);

        match &result {
            Ok(()) => {
                audit_log!(AuditRecord::new(
                    AuditCategory::ResourceCreate,
                    "McastOrch",
                    "create_vlan"
                )
                .with_object(key.to_string()));
            }
            Err(err) => {
                audit_log!(AuditRecord::new(
                    AuditCategory::ResourceCreate,
                    "McastOrch",
                    "create_vlan"
                )
                .with_object(key.to_string())
                .with_error(err.to_string()));
            }
        }
        result
    }

    pub fn remove_vlan(&self, key: VlanKey) -> Result<()> {
        let mut actions = Vec::new();
        let result = {
            let mut state = self.state();
            // Tear down group state first so deprogramming is emitted.
            state.groups.remove_vlan(key, &mut actions);
            let result = state.registry.remove(key).map(|_| ());
            if result.is_ok() {
                state.recompute_warnings(&mut actions);
            }
            state.finish_actions(&mut actions);
            result
        };
        self.run_actions(actions, None);

        if result.is_ok() {
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceDelete,
                "McastOrch",
                "remove_vlan"
            )
            .with_object(key.to_string()));
        }
        result
    }

    pub fn get_config(&self, key: VlanKey) -> Result<VlanConfig> {
        self.state().registry.get_config(&key).cloned()
    }

    pub fn set_config(&self, key: VlanKey, config: VlanConfig) -> Result<()> {
        let mut actions = Vec::new();
        let result = {
            let mut state = self.state();
            match state.registry.set_config(key, config) {
                Ok(true) => {
                    // Any admission-relevant change re-evaluates every
                    // instance: precedence and profile overlap are global.
                    state.recompute_warnings(&mut actions);
                    state.finish_actions(&mut actions);
                    Ok(true)
                }
                other => other,
            }
        };
        self.run_actions(actions, None);

        match result {
            Ok(changed) => {
                if changed {
                    audit_log!(AuditRecord::new(
                        AuditCategory::ConfigChange,
                        "McastOrch",
                        "set_config"
                    )
                    .with_object(key.to_string()));
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Sets one port's MVR role on an instance.
    pub fn set_port_role(&self, key: VlanKey, port: PortId, role: PortRole) -> Result<()> {
        let mut config = self.get_config(key)?;
        if role == PortRole::None {
            config.port_roles.remove(&port);
        } else {
            config.port_roles.insert(port, role);
        }
        self.set_config(key, config)
    }

    /// Installs or replaces a channel profile.
    pub fn set_profile(&self, profile: Profile) -> Result<()> {
        let name = profile.name.clone();
        let mut actions = Vec::new();
        let result = {
            let mut state = self.state();
            let result = state.profiles.set(profile);
            if result.is_ok() {
                state.recompute_warnings(&mut actions);
                state.finish_actions(&mut actions);
            }
            result
        };
        self.run_actions(actions, None);

        if result.is_ok() {
            audit_log!(
                AuditRecord::new(AuditCategory::ConfigChange, "McastOrch", "set_profile")
                    .with_object(name)
            );
        }
        result
    }

    pub fn remove_profile(&self, name: &str) -> Result<()> {
        let mut actions = Vec::new();
        let result = {
            let mut state = self.state();
            let result = state.profiles.remove(name).map(|_| ());
            if result.is_ok() {
                state.recompute_warnings(&mut actions);
                state.finish_actions(&mut actions);
            }
            result
        };
        self.run_actions(actions, None);
        result
    }

    /// Feature-wide enable/disable for one `(feature, family)` scope.
    pub fn set_feature_enabled(&self, feature: McastFeature, family: IpFamily, enabled: bool) {
        let mut actions = Vec::new();
        {
            let mut state = self.state();
            state.registry.global_mut(feature, family).enabled = enabled;
            state.recompute_warnings(&mut actions);
            state.finish_actions(&mut actions);
        }
        self.run_actions(actions, None);
        info!(
            "{}/{} {}",
            feature,
            family,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_unknown_policy(
        &self,
        feature: McastFeature,
        family: IpFamily,
        policy: UnknownPduPolicy,
    ) {
        self.state().registry.global_mut(feature, family).unknown_policy = policy;
    }

    pub fn set_fast_leave(&self, feature: McastFeature, family: IpFamily, port: PortId, on: bool) {
        let mut state = self.state();
        let global = state.registry.global_mut(feature, family);
        if on {
            global.fast_leave_ports.insert(port);
        } else {
            global.fast_leave_ports.remove(port);
        }
    }

    pub fn set_group_limit(&self, feature: McastFeature, family: IpFamily, limit: Option<u32>) {
        self.state().registry.global_mut(feature, family).group_limit = limit;
    }

    pub fn set_static_router_port(
        &self,
        feature: McastFeature,
        family: IpFamily,
        port: PortId,
        on: bool,
    ) {
        let ports = {
            let mut state = self.state();
            let global = state.registry.global_mut(feature, family);
            if on {
                global.static_router_ports.insert(port);
            } else {
                global.static_router_ports.remove(port);
            }
            global.router_ports()
        };
        if let Err(err) = self.callbacks.set_router_ports(feature, family, ports) {
            error!("router-port programming failed: {}", err);
        }
    }

    /// Link-state updates from the port-management collaborator.
    pub fn on_link_change(&self, port: PortId, up: bool) {
        let mut state = self.state();
        if up {
            state.link_up.insert(port);
        } else {
            state.link_up.remove(port);
        }
        debug!("link {} {}", port, if up { "up" } else { "down" });
    }

    // ------------------------------------------------------------------
    // Status, statistics and iterators
    // ------------------------------------------------------------------

    pub fn status(&self, key: VlanKey) -> Result<InstanceStatus> {
        let state = self.state();
        let instance = state
            .registry
            .get(&key)
            .ok_or_else(|| L2mcError::NotFound(key.to_string()))?;
        Ok(InstanceStatus {
            oper_state: instance.status.oper_state,
            warnings: instance.status.warnings,
            querier_role: instance.status.querier.role(),
            other_querier: instance.status.querier.other_querier(),
            stats: instance.status.stats,
        })
    }

    pub fn statistics(&self, key: VlanKey) -> Result<VlanStats> {
        self.status(key).map(|s| s.stats)
    }

    pub fn clear_statistics(&self, key: VlanKey) -> Result<()> {
        let mut state = self.state();
        let instance = state
            .registry
            .get_mut(&key)
            .ok_or_else(|| L2mcError::NotFound(key.to_string()))?;
        instance.status.stats.clear();
        Ok(())
    }

    pub fn group_status(&self, vlan: VlanKey, group: GroupAddr) -> Result<GroupStatus> {
        self.state().groups.status(vlan, group)
    }

    pub fn source_status(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        port: PortId,
        source: SourceRef,
    ) -> Result<SourceStatus> {
        self.state().groups.source_status(vlan, group, port, source)
    }

    pub fn next_instance(&self, prev: Option<VlanKey>, stay_in_family: bool) -> Option<VlanKey> {
        self.state().registry.iterate(prev, stay_in_family)
    }

    pub fn next_group(&self, prev: Option<GroupKey>, stay_in_family: bool) -> Option<GroupKey> {
        self.state().groups.next_group(prev, stay_in_family)
    }

    pub fn next_source(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        port: PortId,
        prev: Option<SourceRef>,
    ) -> Option<SourceRef> {
        self.state().groups.next_source(vlan, group, port, prev)
    }

    pub fn next_port(&self, vlan: VlanKey, group: GroupAddr, from: PortId) -> Option<PortId> {
        self.state().groups.next_port(vlan, group, from)
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.stats()
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.state().pipeline
    }

    // ------------------------------------------------------------------
    // Packet path
    // ------------------------------------------------------------------

    /// Producer entry point, callable from driver context.
    pub fn deliver_frame(&self, frame: RawFrame) -> bool {
        self.ring.deliver(frame)
    }

    /// Registers the ring as the delivery sink of a frame source.
    pub fn attach_frame_source(&self, source: &dyn crate::rx::FrameSource) -> FrameSourceHandle {
        source.register(
            Self::wants_frame,
            Arc::clone(&self.ring) as Arc<dyn FrameDeliver>,
        )
    }

    /// Pre-filter run in driver context: the driver already narrows traffic
    /// to IGMP/MLD candidates, so only obviously empty frames are refused.
    fn wants_frame(frame: &RawFrame) -> bool {
        !frame.data.is_empty()
    }

    /// Drains the ring: parse, dispatch under the lock, then execute the
    /// collected actions with the lock released.
    pub fn process_pending(&self) {
        let now = self.now();
        while let Some(frame) = self.ring.pop() {
            self.process_frame(frame, now);
        }
    }

    fn process_frame(&self, frame: RawFrame, now: Seconds) {
        let pdu = match self.parser.parse(&frame) {
            Ok(pdu) => pdu,
            Err(ParseVerdict::Discard) => {
                self.state().pipeline.parse_discarded += 1;
                return;
            }
            Err(ParseVerdict::Flood) => {
                // Malformed but floodable per the unknown-next-header policy.
                let mut actions = Vec::new();
                {
                    let mut state = self.state();
                    state.pipeline.parse_flooded += 1;
                    actions.push(EngineAction::FloodFrame {
                        vlan_id: frame.vlan_id,
                        ports: state
                            .link_up
                            .difference(PortSet::single(frame.ingress_port)),
                    });
                }
                self.run_actions(actions, Some(&frame));
                return;
            }
        };

        let mut actions = Vec::new();
        {
            let mut state = self.state();
            dispatch(&mut state, &frame, &pdu, now, &mut actions);
            state.finish_actions(&mut actions);
        }
        self.run_actions(actions, Some(&frame));
    }

    /// Runs one aging tick at an explicit timestamp.
    pub fn tick_at(&self, now: Seconds) {
        let mut actions = Vec::new();
        {
            let mut state = self.state();
            aging::tick(&mut state, now, &mut actions);
            state.finish_actions(&mut actions);
        }
        self.run_actions(actions, None);
    }

    pub fn tick_now(&self) {
        self.tick_at(self.now());
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Spawns the ring consumer and the 1 Hz aging driver. Both run for the
    /// process lifetime; feature-wide disable stops new work but in-flight
    /// ticks complete.
    pub fn spawn_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let consumer = {
            let orch = Arc::clone(self);
            tokio::spawn(async move {
                info!("receive consumer task started");
                while orch.running.load(Ordering::Relaxed) {
                    orch.ring.wait().await;
                    orch.process_pending();
                }
                info!("receive consumer task stopped");
            })
        };

        let aging = {
            let orch = Arc::clone(self);
            tokio::spawn(async move {
                info!("aging task started");
                let mut interval = tokio::time::interval(orch.config.tick_interval);
                while orch.running.load(Ordering::Relaxed) {
                    interval.tick().await;
                    orch.tick_now();
                }
                info!("aging task stopped");
            })
        };

        vec![consumer, aging]
    }

    /// Requests task shutdown (used by the daemon on SIGINT).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.ring.wake();
    }

    // ------------------------------------------------------------------
    // Action execution
    // ------------------------------------------------------------------

    /// Executes collaborator calls with the engine lock released. Failures
    /// are logged and do not roll logical state back; the next membership or
    /// configuration change retries convergence.
    fn run_actions(&self, actions: Vec<EngineAction>, frame: Option<&RawFrame>) {
        for action in actions {
            let outcome = match &action {
                EngineAction::ProgramGroup { vlan, group, ports } => {
                    self.callbacks.program_group(*vlan, *group, *ports)
                }
                EngineAction::UnprogramGroup { vlan, group } => {
                    self.callbacks.unprogram_group(*vlan, *group)
                }
                EngineAction::SetRouterPorts {
                    feature,
                    family,
                    ports,
                } => self.callbacks.set_router_ports(*feature, *family, *ports),
                EngineAction::AddVlanMembership { vlan_id, ports } => {
                    self.callbacks.add_vlan_membership(*vlan_id, *ports)
                }
                EngineAction::RemoveVlanMembership { vlan_id, ports } => {
                    self.callbacks.remove_vlan_membership(*vlan_id, *ports)
                }
                EngineAction::SendQuery { vlan, group } => {
                    self.callbacks.send_query(*vlan, *group)
                }
                EngineAction::FloodFrame { vlan_id, ports } => match frame {
                    Some(frame) => self.callbacks.transmit(*vlan_id, &frame.data, *ports),
                    None => Err("flood action without a frame".to_string()),
                },
                EngineAction::MembershipChange {
                    vlan,
                    group,
                    joined,
                    left,
                } => {
                    self.callbacks.membership_change(*vlan, *group, *joined, *left);
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                error!("collaborator call failed for {:?}: {}", action, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{GroupRecord, RecordType};
    use crate::profile::ProfileRule;
    use crate::rx::ParsedPdu;
    use mcast_types::AddrRange;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct TestCallbacks {
        programmed: Mutex<Vec<(VlanKey, GroupAddr, PortSet)>>,
        unprogrammed: Mutex<Vec<(VlanKey, GroupAddr)>>,
        transmitted: Mutex<Vec<(VlanId, PortSet)>>,
        queries: Mutex<Vec<(VlanKey, Option<GroupAddr>)>>,
        memberships: Mutex<Vec<(VlanId, PortSet, bool)>>,
    }

    impl McastOrchCallbacks for TestCallbacks {
        fn program_group(
            &self,
            vlan: VlanKey,
            group: GroupAddr,
            ports: PortSet,
        ) -> std::result::Result<(), String> {
            self.programmed.lock().unwrap().push((vlan, group, ports));
            Ok(())
        }

        fn unprogram_group(
            &self,
            vlan: VlanKey,
            group: GroupAddr,
        ) -> std::result::Result<(), String> {
            self.unprogrammed.lock().unwrap().push((vlan, group));
            Ok(())
        }

        fn set_router_ports(
            &self,
            _feature: McastFeature,
            _family: IpFamily,
            _ports: PortSet,
        ) -> std::result::Result<(), String> {
            Ok(())
        }

        fn add_vlan_membership(
            &self,
            vlan_id: VlanId,
            ports: PortSet,
        ) -> std::result::Result<(), String> {
            self.memberships.lock().unwrap().push((vlan_id, ports, true));
            Ok(())
        }

        fn remove_vlan_membership(
            &self,
            vlan_id: VlanId,
            ports: PortSet,
        ) -> std::result::Result<(), String> {
            self.memberships.lock().unwrap().push((vlan_id, ports, false));
            Ok(())
        }

        fn send_query(
            &self,
            vlan: VlanKey,
            group: Option<GroupAddr>,
        ) -> std::result::Result<(), String> {
            self.queries.lock().unwrap().push((vlan, group));
            Ok(())
        }

        fn transmit(
            &self,
            vlan_id: VlanId,
            _data: &[u8],
            ports: PortSet,
        ) -> std::result::Result<(), String> {
            self.transmitted.lock().unwrap().push((vlan_id, ports));
            Ok(())
        }

        fn membership_change(
            &self,
            _vlan: VlanKey,
            _group: GroupAddr,
            _joined: PortSet,
            _left: PortSet,
        ) {
        }
    }

    /// Parser returning pre-scripted results in delivery order.
    struct ScriptedParser {
        script: Mutex<VecDeque<std::result::Result<ParsedPdu, ParseVerdict>>>,
    }

    impl ScriptedParser {
        fn new(script: Vec<std::result::Result<ParsedPdu, ParseVerdict>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    impl PduParser for ScriptedParser {
        fn parse(
            &self,
            _frame: &RawFrame,
        ) -> std::result::Result<ParsedPdu, ParseVerdict> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ParseVerdict::Discard))
        }
    }

    fn port(i: u16) -> PortId {
        PortId::new(i).unwrap()
    }

    fn vid(v: u16) -> VlanId {
        VlanId::new(v).unwrap()
    }

    fn group(s: &str) -> GroupAddr {
        s.parse().unwrap()
    }

    fn frame(p: u16, v: u16) -> RawFrame {
        RawFrame {
            data: vec![0u8; 64],
            ingress_port: port(p),
            vlan_id: vid(v),
            family: IpFamily::Ipv4,
        }
    }

    fn asm_report(g: &str) -> std::result::Result<ParsedPdu, ParseVerdict> {
        Ok(ParsedPdu::Report {
            family: IpFamily::Ipv4,
            version: 2,
            records: vec![GroupRecord::new(
                RecordType::IsExclude,
                group(g),
                Vec::new(),
            )],
        })
    }

    fn setup(
        script: Vec<std::result::Result<ParsedPdu, ParseVerdict>>,
    ) -> (Arc<McastOrch>, Arc<TestCallbacks>) {
        let callbacks = Arc::new(TestCallbacks::default());
        let orch = McastOrch::new(
            McastOrchConfig::default(),
            ScriptedParser::new(script),
            callbacks.clone(),
        );
        for p in 0..8 {
            orch.on_link_change(port(p), true);
        }
        (orch, callbacks)
    }

    fn ipmc_key(v: u16) -> VlanKey {
        VlanKey::new(McastFeature::Ipmc, IpFamily::Ipv4, vid(v))
    }

    fn mvr_key(v: u16) -> VlanKey {
        VlanKey::new(McastFeature::Mvr, IpFamily::Ipv4, vid(v))
    }

    #[test]
    fn test_create_get_remove() {
        let (orch, _) = setup(Vec::new());
        let key = ipmc_key(10);
        orch.create_vlan(key, orch.default_config(McastFeature::Ipmc))
            .unwrap();
        assert!(orch.get_config(key).is_ok());
        assert_eq!(orch.status(key).unwrap().oper_state, OperState::Active);

        orch.remove_vlan(key).unwrap();
        assert!(matches!(orch.get_config(key), Err(L2mcError::NotFound(_))));
    }

    #[test]
    fn test_report_programs_hardware() {
        let (orch, callbacks) = setup(vec![asm_report("239.1.1.1")]);
        let key = ipmc_key(10);
        orch.create_vlan(key, orch.default_config(McastFeature::Ipmc))
            .unwrap();

        assert!(orch.deliver_frame(frame(1, 10)));
        orch.process_pending();

        let programmed = callbacks.programmed.lock().unwrap();
        assert_eq!(programmed.len(), 1);
        assert_eq!(programmed[0].0, key);
        assert_eq!(programmed[0].1, group("239.1.1.1"));
        assert!(programmed[0].2.contains(port(1)));
        assert_eq!(orch.statistics(key).unwrap().rx_v2_reports, 1);
    }

    #[test]
    fn test_unconsumed_frame_floods() {
        let (orch, callbacks) = setup(vec![asm_report("239.1.1.1")]);
        // No instance exists at all.
        orch.deliver_frame(frame(1, 10));
        orch.process_pending();

        let transmitted = callbacks.transmitted.lock().unwrap();
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0].0, vid(10));
        assert!(!transmitted[0].1.contains(port(1)));
    }

    #[test]
    fn test_parse_discard_counts() {
        let (orch, callbacks) = setup(vec![Err(ParseVerdict::Discard)]);
        orch.deliver_frame(frame(1, 10));
        orch.process_pending();

        assert_eq!(orch.pipeline_stats().parse_discarded, 1);
        assert!(callbacks.transmitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_flood_transmits() {
        let (orch, callbacks) = setup(vec![Err(ParseVerdict::Flood)]);
        orch.deliver_frame(frame(1, 10));
        orch.process_pending();

        assert_eq!(orch.pipeline_stats().parse_flooded, 1);
        assert_eq!(callbacks.transmitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_aging_unprograms_expired_group() {
        let (orch, callbacks) = setup(vec![asm_report("239.1.1.1")]);
        let key = ipmc_key(10);
        orch.create_vlan(key, orch.default_config(McastFeature::Ipmc))
            .unwrap();
        orch.deliver_frame(frame(1, 10));
        orch.process_pending();
        assert!(orch.group_status(key, group("239.1.1.1")).is_ok());

        // Far enough in the future that the membership interval elapsed.
        orch.tick_at(10_000);
        assert!(orch.group_status(key, group("239.1.1.1")).is_err());
        assert_eq!(callbacks.unprogrammed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_mvr_receiver_membership_calls() {
        let (orch, callbacks) = setup(vec![asm_report("239.1.1.1")]);
        let key = mvr_key(100);
        let mut config = orch.default_config(McastFeature::Mvr);
        config.admin_active = true;
        config.profile = Some("tv".into());
        orch.set_profile(Profile::new("tv").with_rule(ProfileRule::permit(
            AddrRange::from_prefix("239.0.0.0".parse().unwrap(), 8).unwrap(),
        )))
        .unwrap();
        orch.create_vlan(key, config).unwrap();
        orch.set_port_role(key, port(2), PortRole::Receiver).unwrap();

        orch.deliver_frame(frame(2, 30));
        orch.process_pending();

        let memberships = callbacks.memberships.lock().unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].0, vid(100));
        assert!(memberships[0].1.contains(port(2)));
        assert!(memberships[0].2);
    }

    #[test]
    fn test_set_config_no_op_skips_reevaluation() {
        let (orch, _) = setup(Vec::new());
        let key = ipmc_key(10);
        let config = orch.default_config(McastFeature::Ipmc);
        orch.create_vlan(key, config.clone()).unwrap();
        // Identical config: accepted, nothing changes.
        orch.set_config(key, config).unwrap();
        assert_eq!(orch.status(key).unwrap().oper_state, OperState::Active);
    }

    #[test]
    fn test_clear_statistics() {
        let (orch, _) = setup(vec![asm_report("239.1.1.1")]);
        let key = ipmc_key(10);
        orch.create_vlan(key, orch.default_config(McastFeature::Ipmc))
            .unwrap();
        orch.deliver_frame(frame(1, 10));
        orch.process_pending();
        assert_eq!(orch.statistics(key).unwrap().rx_v2_reports, 1);

        orch.clear_statistics(key).unwrap();
        assert_eq!(orch.statistics(key).unwrap().rx_v2_reports, 0);
    }

    #[test]
    fn test_iterator_surface() {
        let (orch, _) = setup(Vec::new());
        orch.create_vlan(ipmc_key(10), orch.default_config(McastFeature::Ipmc))
            .unwrap();
        orch.create_vlan(ipmc_key(20), orch.default_config(McastFeature::Ipmc))
            .unwrap();

        let first = orch.next_instance(None, false).unwrap();
        assert_eq!(first, ipmc_key(10));
        assert_eq!(orch.next_instance(Some(first), true), Some(ipmc_key(20)));
        assert_eq!(orch.next_instance(Some(ipmc_key(20)), true), None);
    }

    #[test]
    fn test_attach_frame_source() {
        use crate::rx::{FramePredicate, FrameSource, FrameSourceHandle};

        #[derive(Default)]
        struct MockSource {
            registered: Mutex<Vec<FrameSourceHandle>>,
        }

        impl FrameSource for MockSource {
            fn register(
                &self,
                _predicate: FramePredicate,
                _sink: Arc<dyn FrameDeliver>,
            ) -> FrameSourceHandle {
                let handle = self.registered.lock().unwrap().len() as FrameSourceHandle + 1;
                self.registered.lock().unwrap().push(handle);
                handle
            }

            fn unregister(&self, _handle: FrameSourceHandle) {}
        }

        let (orch, _) = setup(Vec::new());
        let source = MockSource::default();
        let handle = orch.attach_frame_source(&source);
        assert_eq!(handle, 1);
        assert_eq!(source.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_consumer_processes_frames() {
        let (orch, callbacks) = setup(vec![asm_report("239.1.1.1")]);
        let key = ipmc_key(10);
        orch.create_vlan(key, orch.default_config(McastFeature::Ipmc))
            .unwrap();

        let handles = orch.spawn_tasks();
        orch.deliver_frame(frame(1, 10));

        // Wait for the consumer to drain the ring.
        for _ in 0..100 {
            if !callbacks.programmed.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!callbacks.programmed.lock().unwrap().is_empty());

        orch.stop();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}
