//! Frame dispatch: which VLAN instance(s) process a snooped PDU.
//!
//! Runs under the engine lock, after the consumer task parsed the frame.
//! MVR instances are offered the frame first; a frame may be accepted by
//! more than one MVR instance when their profiles permit disjoint subsets of
//! its records (admission keeps concurrently-active permit ranges disjoint).
//! The IPMC instance of the frame's exact VLAN is the fallback consumer, and
//! frames nobody consumed are flooded or discarded per the family's
//! unknown-PDU policy.

use crate::actions::EngineAction;
use crate::error::L2mcError;
use crate::group::{GroupRecord, Seconds};
use crate::registry::{CompatMode, MvrMode, PortRole};
use crate::rx::parser::{ParsedPdu, RawFrame};
use crate::state::EngineState;
use log::debug;
use mcast_types::{McastFeature, PortSet, VlanKey};

/// What happened to a dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Accepted by this many instances.
    Consumed(usize),
    Flooded,
    Discarded,
}

/// Routes one parsed PDU to the instances that should process it.
pub fn dispatch(
    state: &mut EngineState,
    frame: &RawFrame,
    pdu: &ParsedPdu,
    now: Seconds,
    actions: &mut Vec<EngineAction>,
) -> DispatchOutcome {
    state.pipeline.frames_processed += 1;

    // Link may have dropped between capture and processing.
    if !state.link_up.contains(frame.ingress_port) {
        state.pipeline.discarded_no_link += 1;
        return DispatchOutcome::Discarded;
    }

    let family = pdu.family();
    let mut consumed = 0;

    let mvr_keys: Vec<VlanKey> = state
        .registry
        .instances()
        .filter(|i| i.key.feature == McastFeature::Mvr && i.key.family == family)
        .map(|i| i.key)
        .collect();
    for key in mvr_keys {
        if offer(state, key, frame, pdu, now, actions) {
            consumed += 1;
        }
    }

    if consumed == 0 {
        let ipmc = VlanKey::new(McastFeature::Ipmc, family, frame.vlan_id);
        if offer(state, ipmc, frame, pdu, now, actions) {
            consumed += 1;
        }
    }

    if consumed > 0 {
        state.pipeline.consumed += 1;
        return DispatchOutcome::Consumed(consumed);
    }

    match state
        .registry
        .global(McastFeature::Ipmc, family)
        .unknown_policy
    {
        crate::registry::UnknownPduPolicy::Flood => {
            state.pipeline.flooded += 1;
            actions.push(EngineAction::FloodFrame {
                vlan_id: frame.vlan_id,
                ports: state.link_up.difference(PortSet::single(frame.ingress_port)),
            });
            DispatchOutcome::Flooded
        }
        crate::registry::UnknownPduPolicy::Discard => {
            state.pipeline.discarded_policy += 1;
            DispatchOutcome::Discarded
        }
    }
}

/// Offers the PDU to one instance. Returns true if the instance accepted it.
fn offer(
    state: &mut EngineState,
    key: VlanKey,
    frame: &RawFrame,
    pdu: &ParsedPdu,
    now: Seconds,
    actions: &mut Vec<EngineAction>,
) -> bool {
    let Some(instance) = state.registry.get(&key) else {
        return false;
    };
    if !instance.is_active() {
        return false;
    }

    let is_mvr = key.feature == McastFeature::Mvr;
    let role = instance.config.role_of(frame.ingress_port);
    if is_mvr && role == PortRole::None {
        return false;
    }
    let mode = instance.config.mvr_mode;
    let compat = instance.config.compat;
    let profile_name = instance.config.profile.clone();
    let timing = instance.config.querier.timer_profile();
    let querier_config = instance.config.querier.clone();

    match pdu {
        ParsedPdu::Report {
            version, records, ..
        } => {
            if is_mvr && role == PortRole::Source {
                // Source-port traffic must be classified in the MVR VLAN,
                // and compatible mode never learns from source ports.
                if frame.vlan_id != key.vlan_id || mode == MvrMode::Compatible {
                    return false;
                }
            }

            let (permitted, denied): (Vec<_>, Vec<_>) =
                match profile_name.as_deref().and_then(|n| state.profiles.get(n)) {
                    Some(profile) => records.iter().partition(|r| profile.permit(r.group)),
                    // A referenced-but-missing profile admits nothing; the
                    // evaluator has already forced such instances inactive.
                    None if profile_name.is_some() => (Vec::new(), records.iter().collect()),
                    None => (records.iter().collect(), Vec::new()),
                };

            if !denied.is_empty() {
                if let Some(instance) = state.registry.get_mut(&key) {
                    instance.status.stats.dropped_profile += denied.len() as u64;
                }
            }
            // At least one record must pass the profile, otherwise state for
            // denied channels would be installed on accept.
            if permitted.is_empty() {
                return false;
            }

            let limit = state.registry.global(key.feature, key.family).group_limit;
            // A host-compatibility mode below v3/MLDv2 cannot track sources:
            // v3 records are degraded to any-source joins.
            let downgrade = *version >= 3
                && matches!(compat, CompatMode::ForcedV1 | CompatMode::ForcedV2);
            let mut throttled = 0u64;
            for record in permitted {
                let degraded;
                let record = if downgrade {
                    degraded = GroupRecord::asm_join(record.group);
                    &degraded
                } else {
                    record
                };
                match state
                    .groups
                    .report(key, frame.ingress_port, record, &timing, now, limit, actions)
                {
                    Ok(()) => {}
                    Err(L2mcError::ResourceExhausted(reason)) => {
                        throttled += 1;
                        debug!("report throttled on {}: {}", key, reason);
                    }
                    Err(err) => debug!("report on {} not applied: {}", key, err),
                }
            }

            if let Some(instance) = state.registry.get_mut(&key) {
                let stats = &mut instance.status.stats;
                match version {
                    1 => stats.rx_v1_reports += 1,
                    2 => stats.rx_v2_reports += 1,
                    _ => stats.rx_v3_reports += 1,
                }
                stats.dropped_throttle += throttled;
                stats.last_report_rx = Some(now);
            }
            true
        }
        ParsedPdu::Query { group, source, .. } => {
            if is_mvr && (role != PortRole::Source || frame.vlan_id != key.vlan_id) {
                return false;
            }

            if state
                .registry
                .global_mut(key.feature, key.family)
                .learn_router_port(frame.ingress_port, now)
            {
                let ports = state.registry.global(key.feature, key.family).router_ports();
                actions.push(EngineAction::SetRouterPorts {
                    feature: key.feature,
                    family: key.family,
                    ports,
                });
            }

            if let Some(instance) = state.registry.get_mut(&key) {
                instance
                    .status
                    .querier
                    .on_query_received(*source, &querier_config, now);
                let stats = &mut instance.status.stats;
                if group.is_none() {
                    stats.rx_general_queries += 1;
                } else {
                    stats.rx_group_queries += 1;
                }
                stats.last_query_rx = Some(now);
            }
            true
        }
        ParsedPdu::Leave { group, .. } => {
            if is_mvr && role == PortRole::Source {
                if frame.vlan_id != key.vlan_id || mode == MvrMode::Compatible {
                    return false;
                }
            }

            let denied = match profile_name.as_deref().and_then(|n| state.profiles.get(n)) {
                Some(profile) => !profile.permit(*group),
                None => profile_name.is_some(),
            };
            if denied {
                if let Some(instance) = state.registry.get_mut(&key) {
                    instance.status.stats.dropped_profile += 1;
                }
                return false;
            }

            let fast_leave = state
                .registry
                .global(key.feature, key.family)
                .fast_leave_ports
                .contains(frame.ingress_port);
            match state.groups.leave(
                key,
                *group,
                frame.ingress_port,
                &timing,
                now,
                fast_leave,
                actions,
            ) {
                Ok(()) => {}
                // A leave for state that already expired is routine.
                Err(L2mcError::NotFound(_)) => {}
                Err(err) => debug!("leave on {} not applied: {}", key, err),
            }
            if let Some(instance) = state.registry.get_mut(&key) {
                instance.status.stats.rx_leaves += 1;
                instance.status.stats.last_report_rx = Some(now);
            }
            true
        }
    }
}
