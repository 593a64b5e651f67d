//! Overlay network address resolution
//!
//! The core takes an address at construction time; this helper finds one.
//! Order of preference: the Yggdrasil admin tool, then interface
//! enumeration (overlay addresses start with 0x02 or 0x03), then loopback
//! with a warning; the system still runs, reachable only locally.

use std::net::{IpAddr, Ipv6Addr};
use std::process::Command;

use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;
use crate::Result;

/// Identity of the local overlay node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayInfo {
    pub address: Ipv6Addr,
    pub public_key: Option<String>,
    pub coords: Option<String>,
}

/// Ask the Yggdrasil daemon for the local node via its admin CLI
pub fn query_admin() -> Result<OverlayInfo> {
    let output = Command::new("yggdrasilctl").arg("getSelf").output()?;
    parse_self_json(&output.stdout)
}

fn parse_self_json(data: &[u8]) -> Result<OverlayInfo> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| ConfigError::InvalidAddress(format!("bad admin output: {}", e)))?;

    let address_str = value
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::InvalidAddress("no address field".into()))?;
    let address: Ipv6Addr = address_str
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address_str.to_string()))?;

    Ok(OverlayInfo {
        address,
        public_key: value
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string),
        coords: value
            .get("coords")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Scan network interfaces for an overlay address (first byte 0x02/0x03)
pub fn detect_interface_address() -> Option<Ipv6Addr> {
    let interfaces = get_if_addrs::get_if_addrs().ok()?;
    interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        })
        .find(|v6| {
            let first = v6.octets()[0];
            first == 0x02 || first == 0x03
        })
}

/// Best-effort local overlay address with loopback fallback
pub fn local_address() -> Ipv6Addr {
    if let Ok(info) = query_admin() {
        return info.address;
    }
    if let Some(address) = detect_interface_address() {
        return address;
    }
    warn!("no overlay address found, falling back to loopback (locally reachable only)");
    Ipv6Addr::LOCALHOST
}
