//! VLAN instance registry and per-feature global state.

mod registry;
mod types;

pub use registry::VlanRegistry;
pub use types::{
    CompatMode, GlobalState, MvrMode, OperState, PortRole, QuerierConfig, UnknownPduPolicy,
    VlanConfig, VlanInstance, VlanStats, VlanStatus, MAX_VLAN_INSTANCES, ROUTER_PORT_TIMEOUT,
    VLAN_NAME_LEN,
};
