// src/netinfo.rs

//! Host addresses used to identify this machine to the portal

use get_if_addrs::{IfAddr, get_if_addrs};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Non-loopback IPv4 addresses of every interface that has one
pub fn detect_ipv4() -> Vec<String> {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Could not enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let ips: Vec<String> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(v4.ip),
            IfAddr::V6(_) => None,
        })
        .filter(|ip: &Ipv4Addr| !ip.is_loopback())
        .map(|ip| ip.to_string())
        .collect();

    debug!("Auto-detected IPs on this server: {:?}", ips);
    ips
}

/// Addresses to send to the portal, honouring a command-line override
pub fn host_addresses(ip_override: Option<&str>) -> Vec<String> {
    match ip_override {
        Some(ip) if !ip.trim().is_empty() => {
            debug!("User-overridden IP: {}", ip);
            vec![ip.trim().to_string()]
        }
        _ => detect_ipv4(),
    }
}
