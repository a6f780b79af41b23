//! l2mcd entry point.
//!
//! Wires the engine to its runtime: logging, the audit channel, the receive
//! consumer task and the 1 Hz aging driver. Frame-source and hardware
//! collaborators are registered by the platform integration; built
//! standalone, the daemon runs with logging stand-ins so the control plane
//! can be exercised end to end.

use clap::Parser;
use log::{info, warn};
use sonic_l2mcd::{
    GroupAddr, IpFamily, McastFeature, McastOrch, McastOrchCallbacks, McastOrchConfig,
    ParseVerdict, ParsedPdu, PduParser, PortSet, RawFrame, VlanId, VlanKey,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// L2 multicast snooping and MVR control-plane daemon
#[derive(Parser, Debug)]
#[command(name = "l2mcd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Receive ring capacity in frames
    #[arg(long, default_value = "512")]
    ring_capacity: usize,

    /// Hardware replication table size
    #[arg(long, default_value = "1024")]
    hw_capacity: u16,

    /// Aging tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_interval: u64,
}

/// Stand-in parser until the platform wires the real PDU decoder: nothing is
/// interpreted, everything is discarded.
struct NullParser;

impl PduParser for NullParser {
    fn parse(&self, _frame: &RawFrame) -> Result<ParsedPdu, ParseVerdict> {
        Err(ParseVerdict::Discard)
    }
}

/// Logging stand-in for the hardware/forwarding collaborators.
struct LoggingCallbacks;

impl McastOrchCallbacks for LoggingCallbacks {
    fn program_group(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        ports: PortSet,
    ) -> Result<(), String> {
        info!("program {} {} -> {}", vlan, group, ports);
        Ok(())
    }

    fn unprogram_group(&self, vlan: VlanKey, group: GroupAddr) -> Result<(), String> {
        info!("unprogram {} {}", vlan, group);
        Ok(())
    }

    fn set_router_ports(
        &self,
        feature: McastFeature,
        family: IpFamily,
        ports: PortSet,
    ) -> Result<(), String> {
        info!("router ports {}/{} -> {}", feature, family, ports);
        Ok(())
    }

    fn add_vlan_membership(&self, vlan_id: VlanId, ports: PortSet) -> Result<(), String> {
        info!("vlan {} membership add {}", vlan_id, ports);
        Ok(())
    }

    fn remove_vlan_membership(&self, vlan_id: VlanId, ports: PortSet) -> Result<(), String> {
        info!("vlan {} membership remove {}", vlan_id, ports);
        Ok(())
    }

    fn send_query(&self, vlan: VlanKey, group: Option<GroupAddr>) -> Result<(), String> {
        match group {
            Some(group) => info!("send group query {} {}", vlan, group),
            None => info!("send general query {}", vlan),
        }
        Ok(())
    }

    fn transmit(&self, vlan_id: VlanId, data: &[u8], ports: PortSet) -> Result<(), String> {
        info!("flood {} bytes on vlan {} -> {}", data.len(), vlan_id, ports);
        Ok(())
    }

    fn membership_change(
        &self,
        vlan: VlanKey,
        group: GroupAddr,
        joined: PortSet,
        left: PortSet,
    ) {
        info!(
            "membership {} {}: joined {} left {}",
            vlan, group, joined, left
        );
    }
}

/// Initializes the tracing subscriber carrying the audit channel.
fn init_audit_channel() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();
    init_audit_channel();

    info!("====================================================================");
    info!("Starting l2mcd (L2 multicast control plane)");
    info!("====================================================================");
    info!("Ring capacity: {} frames", args.ring_capacity);
    info!("Replication table: {} entries", args.hw_capacity);
    info!("Tick interval: {}ms", args.tick_interval);

    let config = McastOrchConfig {
        ring_capacity: args.ring_capacity,
        hw_capacity: args.hw_capacity,
        tick_interval: Duration::from_millis(args.tick_interval),
    };

    let orch = McastOrch::new(config, Arc::new(NullParser), Arc::new(LoggingCallbacks));
    let tasks = orch.spawn_tasks();
    info!("engine tasks running; waiting for platform registration");

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received SIGINT, shutting down"),
        Err(err) => {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    orch.stop();
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    info!("l2mcd shutdown complete");
    ExitCode::SUCCESS
}
