//! Subscription-based multicast overlay
//!
//! Single authority for group membership. The "multicast" is an
//! application-level fan-out: broadcasters query a per-frame snapshot of
//! matching subscribers and unicast to each. All mutation goes through
//! one readers/writer lock; the lock is never held across I/O.

pub mod group;

pub use group::{BroadcastMember, Subscriber};

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use group::Group;

/// Per-group membership counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStats {
    pub subscribers: usize,
    pub broadcasters: usize,
}

/// Aggregate membership statistics
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub group_count: usize,
    pub total_subscribers: usize,
    pub total_broadcasters: usize,
    pub groups: HashMap<String, GroupStats>,
}

/// Group registry with subscribe/heartbeat/prune semantics
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    groups: RwLock<HashMap<String, Group>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subscriber, creating the group on first
    /// reference. `last_seen` is always refreshed to now.
    pub fn subscribe(&self, group: &str, mut subscriber: Subscriber) {
        subscriber.last_seen = Instant::now();
        let mut groups = self.groups.write().unwrap();
        let entry = groups
            .entry(group.to_string())
            .or_insert_with(|| Group::new(group));
        entry.subscribers.insert(subscriber.key(), subscriber);
    }

    /// Remove a subscriber; the group is deleted once both maps are empty.
    /// Returns false when the group or subscriber was unknown.
    pub fn unsubscribe(&self, group: &str, addr: Ipv6Addr, port: u16) -> bool {
        let mut groups = self.groups.write().unwrap();
        let Some(entry) = groups.get_mut(group) else {
            return false;
        };

        let removed = entry.subscribers.remove(&(addr.octets(), port)).is_some();
        if entry.is_empty() {
            debug!(group, "deleting empty group after unsubscribe");
            groups.remove(group);
        }
        removed
    }

    /// Refresh a subscriber's `last_seen`. Fails silently (returns false)
    /// when the subscriber is unknown; the caller may resubscribe.
    pub fn heartbeat(&self, group: &str, addr: Ipv6Addr, port: u16) -> bool {
        let mut groups = self.groups.write().unwrap();
        groups
            .get_mut(group)
            .and_then(|g| g.subscribers.get_mut(&(addr.octets(), port)))
            .map(|s| s.last_seen = Instant::now())
            .is_some()
    }

    /// Refresh every subscription of `addr` across all groups. This is the
    /// broadcaster intake path: heartbeats carry only the listener address.
    pub fn heartbeat_any(&self, addr: Ipv6Addr) -> usize {
        let octets = addr.octets();
        let now = Instant::now();
        let mut refreshed = 0;
        let mut groups = self.groups.write().unwrap();
        for group in groups.values_mut() {
            for subscriber in group.subscribers.values_mut() {
                if subscriber.addr.octets() == octets {
                    subscriber.last_seen = now;
                    refreshed += 1;
                }
            }
        }
        refreshed
    }

    /// Register a broadcaster, creating the group on first reference
    pub fn register_broadcaster(&self, group: &str, mut member: BroadcastMember) {
        member.last_seen = Instant::now();
        let mut groups = self.groups.write().unwrap();
        let entry = groups
            .entry(group.to_string())
            .or_insert_with(|| Group::new(group));
        entry.broadcasters.insert(member.key(), member);
    }

    /// Remove a broadcaster; same emptiness-triggered group deletion as
    /// unsubscribe.
    pub fn unregister_broadcaster(&self, group: &str, addr: Ipv6Addr) -> bool {
        let mut groups = self.groups.write().unwrap();
        let Some(entry) = groups.get_mut(group) else {
            return false;
        };

        let removed = entry.broadcasters.remove(&addr.octets()).is_some();
        if entry.is_empty() {
            debug!(group, "deleting empty group after unregister");
            groups.remove(group);
        }
        removed
    }

    /// The fan-out query: subscribers whose SSM filter admits `source`.
    /// Returns a cloned snapshot so callers never send under the lock.
    pub fn subscribers_for_source(&self, group: &str, source: Ipv6Addr) -> Vec<Subscriber> {
        let groups = self.groups.read().unwrap();
        groups
            .get(group)
            .map(|g| g.subscribers_for_source(source))
            .unwrap_or_default()
    }

    pub fn subscribers(&self, group: &str) -> Vec<Subscriber> {
        let groups = self.groups.read().unwrap();
        groups
            .get(group)
            .map(|g| g.subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn broadcasters(&self, group: &str) -> Vec<BroadcastMember> {
        let groups = self.groups.read().unwrap();
        groups
            .get(group)
            .map(|g| g.broadcasters.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop entries older than `timeout` from every group. Groups are kept
    /// even when emptied: deletion happens only on explicit unsubscribe or
    /// unregister, so a transient stall cannot churn group state.
    pub fn prune_stale(&self, timeout: Duration) -> (usize, usize) {
        let now = Instant::now();
        let mut subs = 0;
        let mut bcasters = 0;
        let mut groups = self.groups.write().unwrap();
        for group in groups.values_mut() {
            subs += group.prune_subscribers(now, timeout);
            bcasters += group.prune_broadcasters(now, timeout);
        }
        (subs, bcasters)
    }

    pub fn list_groups(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }

    pub fn stats(&self) -> Stats {
        let groups = self.groups.read().unwrap();
        let mut stats = Stats {
            group_count: groups.len(),
            ..Stats::default()
        };
        for (name, group) in groups.iter() {
            let gs = GroupStats {
                subscribers: group.subscribers.len(),
                broadcasters: group.broadcasters.len(),
            };
            stats.total_subscribers += gs.subscribers;
            stats.total_broadcasters += gs.broadcasters;
            stats.groups.insert(name.clone(), gs);
        }
        stats
    }

    /// Rewind a subscriber's `last_seen` for prune tests
    #[cfg(test)]
    fn backdate(&self, group: &str, addr: Ipv6Addr, port: u16, age: Duration) {
        let mut groups = self.groups.write().unwrap();
        if let Some(s) = groups
            .get_mut(group)
            .and_then(|g| g.subscribers.get_mut(&(addr.octets(), port)))
        {
            s.last_seen = Instant::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(addr: &str, port: u16, callsign: &str, ssm: Option<&str>) -> Subscriber {
        Subscriber::new(
            addr.parse().unwrap(),
            port,
            callsign.into(),
            ssm.map(|s| s.parse().unwrap()),
        )
    }

    #[test]
    fn subscribe_creates_and_unsubscribe_deletes_group() {
        let manager = SubscriptionManager::new();
        let s = sub("201:abcd::100", 9001, "L1", None);
        let (addr, port) = (s.addr, s.port);

        manager.subscribe("talk", s);
        assert_eq!(manager.list_groups(), vec!["talk".to_string()]);

        assert!(manager.unsubscribe("talk", addr, port));
        assert!(manager.list_groups().is_empty());
    }

    #[test]
    fn group_survives_while_broadcaster_remains() {
        let manager = SubscriptionManager::new();
        let s = sub("201:abcd::100", 9001, "L1", None);
        let (addr, port) = (s.addr, s.port);

        manager.subscribe("talk", s);
        manager.register_broadcaster(
            "talk",
            BroadcastMember::new("201:abcd::1".parse().unwrap(), 8798, "B1".into()),
        );

        manager.unsubscribe("talk", addr, port);
        assert_eq!(manager.list_groups(), vec!["talk".to_string()]);

        manager.unregister_broadcaster("talk", "201:abcd::1".parse().unwrap());
        assert!(manager.list_groups().is_empty());
    }

    #[test]
    fn address_aliases_are_one_key() {
        let manager = SubscriptionManager::new();
        manager.subscribe("talk", sub("::1", 9000, "SHORT", None));
        manager.subscribe("talk", sub("0:0:0:0:0:0:0:1", 9000, "LONG", None));

        let subs = manager.subscribers("talk");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].callsign, "LONG");
    }

    #[test]
    fn ssm_filtered_fanout() {
        let manager = SubscriptionManager::new();
        manager.subscribe("emergency", sub("201:abcd::100", 9001, "L1", None));
        manager.subscribe(
            "emergency",
            sub("201:abcd::101", 9002, "L2", Some("201:abcd::1")),
        );

        let from_b1 =
            manager.subscribers_for_source("emergency", "201:abcd::1".parse().unwrap());
        assert_eq!(from_b1.len(), 2);

        let from_b2 =
            manager.subscribers_for_source("emergency", "201:abcd::2".parse().unwrap());
        assert_eq!(from_b2.len(), 1);
        assert_eq!(from_b2[0].callsign, "L1");
    }

    #[test]
    fn prune_removes_stale_and_keeps_group() {
        let manager = SubscriptionManager::new();
        let s = sub("201:abcd::103", 9003, "L3", None);
        let (addr, port) = (s.addr, s.port);
        manager.subscribe("weather", s);
        manager.backdate("weather", addr, port, Duration::from_secs(20));

        let (subs, bcasters) = manager.prune_stale(Duration::from_secs(15));
        assert_eq!((subs, bcasters), (1, 0));

        // Groups are not deleted on prune
        assert_eq!(manager.list_groups(), vec!["weather".to_string()]);

        // A late heartbeat is silently ignored
        assert!(!manager.heartbeat("weather", addr, port));
    }

    #[test]
    fn heartbeat_refreshes() {
        let manager = SubscriptionManager::new();
        let s = sub("201:abcd::104", 9004, "L4", None);
        let (addr, port) = (s.addr, s.port);
        manager.subscribe("talk", s);
        manager.backdate("talk", addr, port, Duration::from_secs(20));

        assert!(manager.heartbeat("talk", addr, port));
        let (subs, _) = manager.prune_stale(Duration::from_secs(15));
        assert_eq!(subs, 0);
    }

    #[test]
    fn heartbeat_any_spans_groups() {
        let manager = SubscriptionManager::new();
        let addr: Ipv6Addr = "201:abcd::105".parse().unwrap();
        manager.subscribe("talk", sub("201:abcd::105", 9005, "L5", None));
        manager.subscribe("weather", sub("201:abcd::105", 9006, "L5", None));

        assert_eq!(manager.heartbeat_any(addr), 2);
        assert_eq!(manager.heartbeat_any("201:abcd::ffff".parse().unwrap()), 0);
    }

    #[test]
    fn stats_counts() {
        let manager = SubscriptionManager::new();
        manager.subscribe("talk", sub("201:abcd::100", 9001, "L1", None));
        manager.subscribe("talk", sub("201:abcd::101", 9002, "L2", None));
        manager.register_broadcaster(
            "talk",
            BroadcastMember::new("201:abcd::1".parse().unwrap(), 8798, "B1".into()),
        );

        let stats = manager.stats();
        assert_eq!(stats.group_count, 1);
        assert_eq!(stats.total_subscribers, 2);
        assert_eq!(stats.total_broadcasters, 1);
        assert_eq!(
            stats.groups["talk"],
            GroupStats {
                subscribers: 2,
                broadcasters: 1
            }
        );
    }
}
