//! On-link service discovery
//!
//! Stations publish `_meshradio._udp` records whose TXT section carries
//! group, channel, callsign, priority, codec and bitrate. Browsing
//! filters out loopback and link-local addresses and prefers IPv6.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info};

use crate::error::{ConfigError, Error};
use crate::protocol::Priority;
use crate::Result;

/// mDNS service type for MeshRadio stations
pub const SERVICE_TYPE: &str = "_meshradio._udp.local.";

/// A published or discovered station record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service instance name (e.g. "STATION1")
    pub name: String,
    pub address: Option<Ipv6Addr>,
    pub port: u16,
    pub group: String,
    pub channel: String,
    pub callsign: String,
    pub priority: Priority,
    pub codec: String,
    /// Bitrate in kbps
    pub bitrate: u32,
}

impl ServiceRecord {
    /// Apply the defaults a record is advertised with when fields are
    /// left empty
    fn with_defaults(mut self) -> Self {
        if self.group.is_empty() {
            self.group = "community".into();
        }
        if self.channel.is_empty() {
            self.channel = "community".into();
        }
        if self.codec.is_empty() {
            self.codec = "opus".into();
        }
        if self.bitrate == 0 {
            self.bitrate = 64;
        }
        self
    }

    fn txt_properties(&self) -> HashMap<String, String> {
        HashMap::from([
            ("group".into(), self.group.clone()),
            ("channel".into(), self.channel.clone()),
            ("callsign".into(), self.callsign.clone()),
            ("priority".into(), self.priority.as_str().into()),
            ("codec".into(), self.codec.clone()),
            ("bitrate".into(), self.bitrate.to_string()),
        ])
    }

    fn from_resolved(info: &ServiceInfo) -> Self {
        let txt = |key: &str| {
            info.get_property_val_str(key)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            name: info
                .get_fullname()
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string(),
            address: preferred_address(info),
            port: info.get_port(),
            group: txt("group"),
            channel: txt("channel"),
            callsign: txt("callsign"),
            priority: txt("priority").parse().unwrap_or(Priority::Normal),
            codec: txt("codec"),
            bitrate: txt("bitrate").parse().unwrap_or(0),
        }
        .with_defaults()
    }
}

/// First usable IPv6 address of a resolved service: loopback and
/// link-local are never usable over the overlay.
fn preferred_address(info: &ServiceInfo) -> Option<Ipv6Addr> {
    info.get_addresses()
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
        .find(|v6| !v6.is_loopback() && !is_link_local(v6))
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// Publishes one station record until shut down
pub struct Advertiser {
    daemon: ServiceDaemon,
    fullname: String,
    record: ServiceRecord,
}

impl Advertiser {
    pub fn new(record: ServiceRecord, address: Ipv6Addr) -> Result<Self> {
        if record.name.is_empty() {
            return Err(Error::Discovery("service name is required".into()));
        }
        if record.port == 0 {
            return Err(Error::Discovery("port is required".into()));
        }
        if record.callsign.is_empty() {
            return Err(ConfigError::MissingCallsign.into());
        }

        let record = record.with_defaults();
        let daemon =
            ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;

        let host_name = format!("{}.local.", record.name.to_lowercase());
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &record.name,
            &host_name,
            IpAddr::V6(address),
            record.port,
            record.txt_properties(),
        )
        .map_err(|e| Error::Discovery(e.to_string()))?;
        let fullname = info.get_fullname().to_string();

        daemon
            .register(info)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        info!(name = %record.name, port = record.port, "advertising station");

        Ok(Self {
            daemon,
            fullname,
            record,
        })
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn shutdown(self) {
        let _ = self.daemon.unregister(&self.fullname);
        let _ = self.daemon.shutdown();
    }
}

/// Browsing filters; empty filters match everything
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    pub timeout: Option<Duration>,
    pub channel: Option<String>,
    pub priority: Option<Priority>,
}

/// Collect station records visible on-link within the timeout
pub fn browse(options: BrowseOptions) -> Result<Vec<ServiceRecord>> {
    let timeout = options.timeout.unwrap_or(Duration::from_secs(3));
    let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| Error::Discovery(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    let mut records: HashMap<String, ServiceRecord> = HashMap::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let record = ServiceRecord::from_resolved(&info);
                debug!(name = %record.name, "resolved station");

                if let Some(ref channel) = options.channel {
                    if &record.channel != channel {
                        continue;
                    }
                }
                if let Some(priority) = options.priority {
                    if record.priority != priority {
                        continue;
                    }
                }
                records.insert(record.name.clone(), record);
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.shutdown();
    Ok(records.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_empty_fields() {
        let record = ServiceRecord {
            name: "STATION1".into(),
            address: None,
            port: 8799,
            group: String::new(),
            channel: String::new(),
            callsign: "W1AW".into(),
            priority: Priority::Normal,
            codec: String::new(),
            bitrate: 0,
        }
        .with_defaults();

        assert_eq!(record.group, "community");
        assert_eq!(record.channel, "community");
        assert_eq!(record.codec, "opus");
        assert_eq!(record.bitrate, 64);
    }

    #[test]
    fn txt_properties_complete() {
        let record = ServiceRecord {
            name: "STATION1".into(),
            address: None,
            port: 8790,
            group: "emergency".into(),
            channel: "emergency".into(),
            callsign: "W1EMERGENCY".into(),
            priority: Priority::Critical,
            codec: "opus".into(),
            bitrate: 128,
        };

        let txt = record.txt_properties();
        assert_eq!(txt["priority"], "critical");
        assert_eq!(txt["bitrate"], "128");
        assert_eq!(txt["callsign"], "W1EMERGENCY");
    }

    #[test]
    fn link_local_detection() {
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(!is_link_local(&"201:abcd::1".parse().unwrap()));
        assert!(!is_link_local(&"::1".parse().unwrap()));
    }

    #[test]
    fn missing_callsign_rejected() {
        let record = ServiceRecord {
            name: "X".into(),
            address: None,
            port: 8799,
            group: String::new(),
            channel: String::new(),
            callsign: String::new(),
            priority: Priority::Normal,
            codec: String::new(),
            bitrate: 0,
        };
        assert!(Advertiser::new(record, Ipv6Addr::LOCALHOST).is_err());
    }
}
