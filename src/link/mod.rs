//! One-time host link setup run before the failover engine starts

use log::{error, info, warn};
use std::net::Ipv4Addr;

use crate::models::filter::{FilterTable, Side};
use crate::utils::command;
use crate::utils::error::{AppError, AppResult};

/// Names of the host's network interfaces
pub fn list_interfaces() -> Vec<String> {
    match std::panic::catch_unwind(|| {
        pnet_datalink::interfaces()
            .into_iter()
            .map(|i| i.name)
            .collect::<Vec<String>>()
    }) {
        Ok(interfaces) => interfaces,
        Err(_) => {
            info!("Failed to get interfaces from pnet_datalink, falling back to pcap");
            match pcap::Device::list() {
                Ok(devices) => devices.into_iter().map(|d| d.name).collect(),
                Err(e) => {
                    error!("Failed to get interfaces from pcap: {}", e);
                    Vec::new()
                }
            }
        }
    }
}

pub fn ensure_interface_exists(name: &str) -> AppResult<()> {
    let interfaces = list_interfaces();
    if interfaces.iter().any(|i| i == name) {
        return Ok(());
    }
    Err(AppError::ConfigError(format!(
        "interface '{}' not found (available: {})",
        name,
        interfaces.join(", ")
    )))
}

/// Prepare the serving interface: multicast and promiscuous mode, an ingress
/// qdisc, and a host route per destination
pub fn configure(interface: &str, routes: &[Ipv4Addr]) -> AppResult<()> {
    info!("Configuring link {}", interface);
    command::run("ip", &["link", "set", "dev", interface, "multicast", "on"])?;
    command::run("ip", &["link", "set", "dev", interface, "promisc", "on"])?;
    add_ingress_qdisc(interface);

    for route in routes {
        let args = route_args(*route, interface);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run("ip", &args)?;
        info!("Route {}/32 via {}", route, interface);
    }
    Ok(())
}

/// Copy traffic for every master and slave address from the capture
/// interface onto the serving interface. Failures are logged.
pub fn mirror_traffic(from: &str, to: &str, filters: &FilterTable) {
    info!("Mirroring filter traffic from {} to {}", from, to);
    add_ingress_qdisc(from);

    for filter in filters.iter() {
        for side in [Side::Master, Side::Slave] {
            let args = mirror_args(from, to, filter.priority_of(side), filter.address_of(side));
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Err(e) = command::run("tc", &args) {
                warn!("Filter {}: mirroring {} failed: {}", filter.id, side, e);
            }
        }
    }
}

fn add_ingress_qdisc(interface: &str) {
    // usually already present after a restart
    if let Err(e) = command::run("tc", &["qdisc", "add", "dev", interface, "ingress"]) {
        warn!("Ingress qdisc on {} not added: {}", interface, e);
    }
}

fn route_args(route: Ipv4Addr, interface: &str) -> Vec<String> {
    vec![
        "route".into(),
        "replace".into(),
        format!("{}/32", route),
        "dev".into(),
        interface.into(),
    ]
}

fn mirror_args(from: &str, to: &str, priority: u16, address: Ipv4Addr) -> Vec<String> {
    [
        "filter", "add", "dev", from, "parent", "ffff:", "protocol", "ip", "prio",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([priority.to_string(), "u32".into(), "match".into(), "ip".into(), "dst".into()])
    .chain([
        format!("{}/32", address),
        "action".into(),
        "mirred".into(),
        "egress".into(),
        "mirror".into(),
        "dev".into(),
        to.into(),
    ])
    .collect()
}
