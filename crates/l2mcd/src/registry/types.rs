//! VLAN instance configuration and status types.

use crate::aging::QuerierSm;
use crate::group::{Seconds, TimerProfile};
use crate::warnings::WarningSet;
use mcast_types::{IpFamily, McastFeature, PortId, PortSet, SourceAddr, VlanKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instance names are stored zero-padded to this length; comparison happens
/// on the normalized form.
pub const VLAN_NAME_LEN: usize = 32;

/// Per-feature cap on VLAN instances.
pub const MAX_VLAN_INSTANCES: usize = 128;

/// Learned multicast-router ports expire this long after the last observed
/// query.
pub const ROUTER_PORT_TIMEOUT: Seconds = 300;

/// Role of a port within an MVR instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    #[default]
    None,
    Source,
    Receiver,
}

/// MVR operating mode.
///
/// In compatible mode the switch does not learn from reports arriving on
/// source ports; membership on those ports is driven by the upstream router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MvrMode {
    #[default]
    Dynamic,
    Compatible,
}

/// Host compatibility mode for the instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatMode {
    /// Track the oldest version heard on the segment.
    #[default]
    Auto,
    ForcedV1,
    ForcedV2,
    ForcedV3,
}

/// Querier parameters of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerierConfig {
    pub enabled: bool,
    /// Source address used in election; an instance without one defers to
    /// any observed querier.
    pub address: Option<SourceAddr>,
    pub query_interval: Seconds,
    pub max_response_time: Seconds,
    pub robustness: u8,
    pub last_member_interval: Seconds,
    pub startup_query_count: u8,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        // RFC3376 section 8 defaults.
        Self {
            enabled: false,
            address: None,
            query_interval: 125,
            max_response_time: 10,
            robustness: 2,
            last_member_interval: 2,
            startup_query_count: 2,
        }
    }
}

impl QuerierConfig {
    /// Derived timer targets for the group engine.
    pub fn timer_profile(&self) -> TimerProfile {
        TimerProfile {
            group_membership_interval: self.robustness as Seconds * self.query_interval
                + self.max_response_time,
            last_member_interval: self.last_member_interval,
        }
    }

    /// Interval between startup queries.
    pub fn startup_query_interval(&self) -> Seconds {
        (self.query_interval / 4).max(1)
    }

    /// How long an observed foreign querier stays authoritative.
    pub fn other_querier_present_interval(&self) -> Seconds {
        self.robustness as Seconds * self.query_interval + self.max_response_time / 2
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.query_interval == 0 {
            return Err("query interval must be non-zero".into());
        }
        if self.robustness == 0 {
            return Err("robustness must be at least 1".into());
        }
        if self.max_response_time >= self.query_interval {
            return Err("max response time must be below the query interval".into());
        }
        Ok(())
    }
}

/// Administrative configuration of a VLAN instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    pub name: String,
    pub admin_active: bool,
    pub compat: CompatMode,
    pub querier: QuerierConfig,
    /// Named channel profile; `None` means no filtering.
    pub profile: Option<String>,
    /// Only meaningful for MVR instances.
    pub mvr_mode: MvrMode,
    /// Per-port roles; only meaningful for MVR instances.
    pub port_roles: BTreeMap<PortId, PortRole>,
}

impl VlanConfig {
    /// Default configuration for a feature. Auto-vivified IPMC instances come
    /// up snooping; MVR instances require explicit activation.
    pub fn default_for(feature: McastFeature) -> Self {
        Self {
            admin_active: matches!(feature, McastFeature::Ipmc),
            ..Self::default()
        }
    }

    /// Normalized copy: the name truncated to [`VLAN_NAME_LEN`] with trailing
    /// NUL padding stripped, role entries with `PortRole::None` dropped.
    pub fn normalized(&self) -> Self {
        let mut conf = self.clone();
        conf.name.truncate(VLAN_NAME_LEN);
        while conf.name.ends_with('\0') {
            conf.name.pop();
        }
        conf.port_roles.retain(|_, role| *role != PortRole::None);
        conf
    }

    /// Equality on the normalized forms; `set_config` treats equal configs as
    /// a no-op.
    pub fn normalized_eq(&self, other: &VlanConfig) -> bool {
        self.normalized() == other.normalized()
    }

    pub fn role_of(&self, port: PortId) -> PortRole {
        self.port_roles.get(&port).copied().unwrap_or_default()
    }

    /// Ports configured as MVR receivers.
    pub fn receiver_ports(&self) -> PortSet {
        self.port_roles
            .iter()
            .filter(|(_, r)| **r == PortRole::Receiver)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.querier.validate()
    }
}

/// Operational state of a VLAN instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    #[default]
    AdminDisabled,
    Active,
    Inactive,
    InternalError,
}

/// Per-instance protocol statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VlanStats {
    pub rx_general_queries: u64,
    pub rx_group_queries: u64,
    pub rx_v1_reports: u64,
    pub rx_v2_reports: u64,
    pub rx_v3_reports: u64,
    pub rx_leaves: u64,
    pub dropped_profile: u64,
    pub dropped_throttle: u64,
    pub last_query_rx: Option<Seconds>,
    pub last_report_rx: Option<Seconds>,
}

impl VlanStats {
    pub fn clear(&mut self) {
        *self = VlanStats::default();
    }
}

/// Live status of a VLAN instance.
#[derive(Debug, Clone, Default)]
pub struct VlanStatus {
    pub oper_state: OperState,
    pub warnings: WarningSet,
    pub querier: QuerierSm,
    pub stats: VlanStats,
}

/// A VLAN instance: key, configuration and live status.
#[derive(Debug, Clone)]
pub struct VlanInstance {
    pub key: VlanKey,
    pub config: VlanConfig,
    pub status: VlanStatus,
}

impl VlanInstance {
    pub fn new(key: VlanKey, config: VlanConfig) -> Self {
        Self {
            key,
            config,
            status: VlanStatus::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.oper_state == OperState::Active
    }
}

/// What to do with snooped frames no instance consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPduPolicy {
    #[default]
    Flood,
    Discard,
}

/// Feature-wide state shared by all instances of one `(feature, family)`
/// pair.
#[derive(Debug, Clone)]
pub struct GlobalState {
    pub feature: McastFeature,
    pub family: IpFamily,
    pub enabled: bool,
    pub unknown_policy: UnknownPduPolicy,
    pub static_router_ports: PortSet,
    /// Dynamically learned router ports with their expiry.
    pub learned_router_ports: BTreeMap<PortId, Seconds>,
    pub fast_leave_ports: PortSet,
    /// Per-port cap on concurrently joined groups.
    pub group_limit: Option<u32>,
}

impl GlobalState {
    pub fn new(feature: McastFeature, family: IpFamily) -> Self {
        Self {
            feature,
            family,
            enabled: true,
            unknown_policy: UnknownPduPolicy::default(),
            static_router_ports: PortSet::empty(),
            learned_router_ports: BTreeMap::new(),
            fast_leave_ports: PortSet::empty(),
            group_limit: None,
        }
    }

    /// Static plus currently learned router ports.
    pub fn router_ports(&self) -> PortSet {
        self.learned_router_ports
            .keys()
            .copied()
            .fold(self.static_router_ports, |acc, p| acc.union(PortSet::single(p)))
    }

    /// Records a query observation on `port`.
    pub fn learn_router_port(&mut self, port: PortId, now: Seconds) -> bool {
        let fresh = !self.learned_router_ports.contains_key(&port);
        self.learned_router_ports
            .insert(port, now + ROUTER_PORT_TIMEOUT);
        fresh
    }

    /// Expires learned router ports; returns true if the set changed.
    pub fn age_router_ports(&mut self, now: Seconds) -> bool {
        let before = self.learned_router_ports.len();
        self.learned_router_ports.retain(|_, expiry| *expiry > now);
        self.learned_router_ports.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(i: u16) -> PortId {
        PortId::new(i).unwrap()
    }

    #[test]
    fn test_config_normalized_eq() {
        let mut a = VlanConfig::default_for(McastFeature::Mvr);
        a.name = "uplink".to_string();
        let mut b = a.clone();
        b.name = format!("uplink{}", "\0".repeat(10));

        assert!(a.normalized_eq(&b));

        b.name = "uplink2".to_string();
        assert!(!a.normalized_eq(&b));
    }

    #[test]
    fn test_normalized_drops_none_roles() {
        let mut a = VlanConfig::default_for(McastFeature::Mvr);
        a.port_roles.insert(port(1), PortRole::Receiver);
        let mut b = a.clone();
        b.port_roles.insert(port(2), PortRole::None);

        assert!(a.normalized_eq(&b));
    }

    #[test]
    fn test_querier_derived_timers() {
        let conf = QuerierConfig::default();
        let timing = conf.timer_profile();
        assert_eq!(timing.group_membership_interval, 2 * 125 + 10);
        assert_eq!(timing.last_member_interval, 2);
        assert_eq!(conf.startup_query_interval(), 31);
    }

    #[test]
    fn test_querier_validation() {
        let mut conf = QuerierConfig::default();
        assert!(conf.validate().is_ok());
        conf.max_response_time = 200;
        assert!(conf.validate().is_err());
        conf = QuerierConfig {
            robustness: 0,
            ..QuerierConfig::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_router_port_learning_and_aging() {
        let mut global = GlobalState::new(McastFeature::Ipmc, IpFamily::Ipv4);
        global.static_router_ports.insert(port(0));

        assert!(global.learn_router_port(port(5), 100));
        assert!(!global.learn_router_port(port(5), 150)); // refresh, not new
        assert!(global.router_ports().contains(port(0)));
        assert!(global.router_ports().contains(port(5)));

        // Not expired yet at the refreshed deadline minus one.
        assert!(!global.age_router_ports(150 + ROUTER_PORT_TIMEOUT - 1));
        assert!(global.age_router_ports(150 + ROUTER_PORT_TIMEOUT));
        assert!(!global.router_ports().contains(port(5)));
        assert!(global.router_ports().contains(port(0)));
    }

    #[test]
    fn test_default_admin_state_per_feature() {
        assert!(VlanConfig::default_for(McastFeature::Ipmc).admin_active);
        assert!(!VlanConfig::default_for(McastFeature::Mvr).admin_active);
    }
}
