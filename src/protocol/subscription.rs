//! Subscribe and heartbeat payload codecs
//!
//! Subscribe has two accepted wire forms: the 82-byte form carrying group
//! and SSM source, and a legacy 34-byte form without them. New senders
//! always emit the 82-byte form.

use std::net::Ipv6Addr;

use crate::error::ParseError;
use crate::protocol::{decode_padded, encode_padded, is_zero_addr};

/// Size of the full subscribe payload
pub const SUBSCRIBE_SIZE: usize = 82;
/// Size of the legacy subscribe payload (no group, no SSM source)
pub const SUBSCRIBE_LEGACY_SIZE: usize = 34;
/// Size of the heartbeat payload
pub const HEARTBEAT_SIZE: usize = 24;

/// A listener's subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePayload {
    pub listener_addr: [u8; 16],
    pub listener_port: u16,
    pub callsign: [u8; 16],
    /// Group name, NUL-padded; all-zero means "the broadcaster's group"
    pub group: [u8; 32],
    /// SSM source address; all-zero means any-source
    pub ssm_source: [u8; 16],
}

impl SubscribePayload {
    pub fn new(
        listener_addr: Ipv6Addr,
        listener_port: u16,
        callsign: &str,
        group: &str,
        ssm_source: Option<Ipv6Addr>,
    ) -> Self {
        Self {
            listener_addr: listener_addr.octets(),
            listener_port,
            callsign: encode_padded::<16>(callsign),
            group: encode_padded::<32>(group),
            ssm_source: ssm_source.map(|a| a.octets()).unwrap_or([0u8; 16]),
        }
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SUBSCRIBE_SIZE];
        buf[0..16].copy_from_slice(&self.listener_addr);
        buf[16..18].copy_from_slice(&self.listener_port.to_be_bytes());
        buf[18..34].copy_from_slice(&self.callsign);
        buf[34..66].copy_from_slice(&self.group);
        buf[66..82].copy_from_slice(&self.ssm_source);
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SUBSCRIBE_LEGACY_SIZE {
            return Err(ParseError::SubscribeTooSmall(data.len()));
        }

        let mut payload = Self {
            listener_addr: data[0..16].try_into().unwrap(),
            listener_port: u16::from_be_bytes([data[16], data[17]]),
            callsign: data[18..34].try_into().unwrap(),
            group: [0u8; 32],
            ssm_source: [0u8; 16],
        };

        if data.len() >= SUBSCRIBE_SIZE {
            payload.group = data[34..66].try_into().unwrap();
            payload.ssm_source = data[66..82].try_into().unwrap();
        }

        Ok(payload)
    }

    pub fn callsign_str(&self) -> String {
        decode_padded(&self.callsign)
    }

    pub fn group_str(&self) -> String {
        decode_padded(&self.group)
    }

    pub fn listener_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.listener_addr)
    }

    /// SSM source, None for any-source subscriptions
    pub fn ssm(&self) -> Option<Ipv6Addr> {
        if is_zero_addr(&self.ssm_source) {
            None
        } else {
            Some(Ipv6Addr::from(self.ssm_source))
        }
    }
}

/// Periodic listener-to-broadcaster keepalive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub listener_addr: [u8; 16],
    /// Wall-clock seconds at the listener
    pub timestamp: u64,
}

impl HeartbeatPayload {
    pub fn new(listener_addr: Ipv6Addr, timestamp: u64) -> Self {
        Self {
            listener_addr: listener_addr.octets(),
            timestamp,
        }
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEARTBEAT_SIZE];
        buf[0..16].copy_from_slice(&self.listener_addr);
        buf[16..24].copy_from_slice(&self.timestamp.to_be_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEARTBEAT_SIZE {
            return Err(ParseError::HeartbeatTooSmall(data.len()));
        }

        Ok(Self {
            listener_addr: data[0..16].try_into().unwrap(),
            timestamp: u64::from_be_bytes(data[16..24].try_into().unwrap()),
        })
    }

    pub fn listener_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.listener_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_form_roundtrip() {
        let payload = SubscribePayload::new(
            "201:abcd::100".parse().unwrap(),
            9001,
            "L1",
            "emergency",
            Some("201:abcd::1".parse().unwrap()),
        );

        let wire = payload.marshal();
        assert_eq!(wire.len(), SUBSCRIBE_SIZE);

        let parsed = SubscribePayload::parse(&wire).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.callsign_str(), "L1");
        assert_eq!(parsed.group_str(), "emergency");
        assert_eq!(parsed.ssm(), Some("201:abcd::1".parse().unwrap()));
    }

    #[test]
    fn legacy_form_parses() {
        let full = SubscribePayload::new(
            "201:abcd::100".parse().unwrap(),
            9001,
            "L1",
            "emergency",
            None,
        );
        let wire = full.marshal();

        let parsed = SubscribePayload::parse(&wire[..SUBSCRIBE_LEGACY_SIZE]).unwrap();
        assert_eq!(parsed.listener_port, 9001);
        assert_eq!(parsed.group_str(), "");
        assert_eq!(parsed.ssm(), None);
    }

    #[test]
    fn short_form_rejected() {
        assert_eq!(
            SubscribePayload::parse(&[0u8; 33]),
            Err(ParseError::SubscribeTooSmall(33))
        );
    }

    #[test]
    fn any_source_is_none() {
        let payload =
            SubscribePayload::new("::1".parse().unwrap(), 9000, "L", "talk", None);
        assert_eq!(SubscribePayload::parse(&payload.marshal()).unwrap().ssm(), None);
    }

    #[test]
    fn heartbeat_roundtrip() {
        let hb = HeartbeatPayload::new("201:abcd::100".parse().unwrap(), 1_700_000_000);
        let wire = hb.marshal();
        assert_eq!(wire.len(), HEARTBEAT_SIZE);
        assert_eq!(HeartbeatPayload::parse(&wire).unwrap(), hb);
    }

    #[test]
    fn heartbeat_short_rejected() {
        assert_eq!(
            HeartbeatPayload::parse(&[0u8; 23]),
            Err(ParseError::HeartbeatTooSmall(23))
        );
    }
}
