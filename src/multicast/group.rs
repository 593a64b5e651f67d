//! Group membership records
//!
//! Subscribers are keyed by `(canonical 16-byte address, port)` and
//! broadcasters by the canonical 16-byte address alone. Raw octets avoid
//! the string aliasing between `::1` and `0:0:0:0:0:0:0:1`.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

/// Subscriber key: canonical address octets plus port
pub type SubscriberKey = ([u8; 16], u16);
/// Broadcaster key: canonical address octets
pub type BroadcasterKey = [u8; 16];

/// A listener subscribed to a group
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub addr: Ipv6Addr,
    pub port: u16,
    pub callsign: String,
    pub last_seen: Instant,
    /// None = any-source; Some(a) = accept packets only from `a`
    pub ssm_source: Option<Ipv6Addr>,
}

impl Subscriber {
    pub fn new(addr: Ipv6Addr, port: u16, callsign: String, ssm_source: Option<Ipv6Addr>) -> Self {
        Self {
            addr,
            port,
            callsign,
            last_seen: Instant::now(),
            ssm_source,
        }
    }

    pub fn key(&self) -> SubscriberKey {
        (self.addr.octets(), self.port)
    }

    /// Does this subscriber accept packets from `source`?
    pub fn matches_source(&self, source: Ipv6Addr) -> bool {
        match self.ssm_source {
            None => true,
            Some(wanted) => wanted == source,
        }
    }
}

/// A broadcaster registered in a group (membership record, distinct from
/// the engine in [`crate::broadcaster`])
#[derive(Debug, Clone)]
pub struct BroadcastMember {
    pub addr: Ipv6Addr,
    pub port: u16,
    pub callsign: String,
    pub last_seen: Instant,
}

impl BroadcastMember {
    pub fn new(addr: Ipv6Addr, port: u16, callsign: String) -> Self {
        Self {
            addr,
            port,
            callsign,
            last_seen: Instant::now(),
        }
    }

    pub fn key(&self) -> BroadcasterKey {
        self.addr.octets()
    }
}

/// Runtime membership of one group
#[derive(Debug)]
pub(crate) struct Group {
    pub name: String,
    pub subscribers: HashMap<SubscriberKey, Subscriber>,
    pub broadcasters: HashMap<BroadcasterKey, BroadcastMember>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
            broadcasters: HashMap::new(),
        }
    }

    /// Snapshot of subscribers that accept packets from `source`
    pub fn subscribers_for_source(&self, source: Ipv6Addr) -> Vec<Subscriber> {
        self.subscribers
            .values()
            .filter(|s| s.matches_source(source))
            .cloned()
            .collect()
    }

    pub fn prune_subscribers(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|_, s| now.duration_since(s.last_seen) <= timeout);
        before - self.subscribers.len()
    }

    pub fn prune_broadcasters(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.broadcasters.len();
        self.broadcasters
            .retain(|_, b| now.duration_since(b.last_seen) <= timeout);
        before - self.broadcasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.broadcasters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssm_matching() {
        let b1: Ipv6Addr = "201:abcd::1".parse().unwrap();
        let b2: Ipv6Addr = "201:abcd::2".parse().unwrap();

        let any = Subscriber::new("201:abcd::100".parse().unwrap(), 9001, "L1".into(), None);
        let ssm = Subscriber::new(
            "201:abcd::101".parse().unwrap(),
            9002,
            "L2".into(),
            Some(b1),
        );

        assert!(any.matches_source(b1));
        assert!(any.matches_source(b2));
        assert!(ssm.matches_source(b1));
        assert!(!ssm.matches_source(b2));
    }

    #[test]
    fn canonical_keys_collapse_aliases() {
        let short: Ipv6Addr = "::1".parse().unwrap();
        let long: Ipv6Addr = "0:0:0:0:0:0:0:1".parse().unwrap();

        let a = Subscriber::new(short, 9000, "A".into(), None);
        let b = Subscriber::new(long, 9000, "B".into(), None);
        assert_eq!(a.key(), b.key());

        // Same address on a different port is a different subscriber
        let c = Subscriber::new(short, 9001, "C".into(), None);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn source_filter_snapshot() {
        let b1: Ipv6Addr = "201:abcd::1".parse().unwrap();
        let b2: Ipv6Addr = "201:abcd::2".parse().unwrap();

        let mut group = Group::new("emergency");
        let any = Subscriber::new("201:abcd::100".parse().unwrap(), 9001, "L1".into(), None);
        let ssm = Subscriber::new(
            "201:abcd::101".parse().unwrap(),
            9002,
            "L2".into(),
            Some(b1),
        );
        group.subscribers.insert(any.key(), any);
        group.subscribers.insert(ssm.key(), ssm);

        assert_eq!(group.subscribers_for_source(b1).len(), 2);
        let from_b2 = group.subscribers_for_source(b2);
        assert_eq!(from_b2.len(), 1);
        assert_eq!(from_b2[0].callsign, "L1");
    }
}
