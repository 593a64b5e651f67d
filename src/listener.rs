//! Listener engine
//!
//! Subscribes to a broadcaster, keeps the subscription alive with
//! heartbeats, and plays received audio. Decoding runs on its own worker
//! so a slow decode never starves network ingress. Priority transitions
//! in the incoming stream are surfaced as typed events; acting on them
//! (auto-tune) is host policy.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::audio::Playback;
use crate::codec::OpusDecoder;
use crate::config::StreamConfig;
use crate::constants::HEARTBEAT_INTERVAL;
use crate::error::{ConfigError, StateError};
use crate::protocol::{
    AudioPayload, HeartbeatPayload, Packet, PacketType, Priority, SubscribePayload,
};
use crate::transport::Transport;
use crate::Result;

const EVENT_QUEUE_CAPACITY: usize = 64;
const DECODE_QUEUE_CAPACITY: usize = 64;

/// Listener construction parameters
pub struct ListenerConfig {
    pub callsign: String,
    pub local_address: Ipv6Addr,
    pub local_port: u16,
    pub target_address: Ipv6Addr,
    pub target_port: u16,
    pub group: String,
    /// Accept packets only from this source when set
    pub ssm_source: Option<Ipv6Addr>,
    pub audio: StreamConfig,
}

/// Host-visible events from the receive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The stream's priority bits changed; suppressed below High
    PriorityChange {
        from: Priority,
        to: Priority,
        source: Ipv6Addr,
        callsign: String,
        group: String,
    },
    /// First beacon identified the station
    StationIdentified { callsign: String },
    /// Metadata packet, surfaced to the UI layer
    Metadata { callsign: String, text: String },
}

/// Detects priority transitions in the incoming audio stream.
///
/// Transitions to a priority below High are tracked but not reported.
pub(crate) struct PriorityTracker {
    last: Priority,
}

impl PriorityTracker {
    pub fn new() -> Self {
        Self {
            last: Priority::Normal,
        }
    }

    pub fn observe(&mut self, priority: Priority) -> Option<(Priority, Priority)> {
        if priority == self.last {
            return None;
        }
        let from = self.last;
        self.last = priority;
        (priority >= Priority::High).then_some((from, priority))
    }
}

/// Audio receive engine
pub struct Listener {
    callsign: String,
    local_address: Ipv6Addr,
    local_port: u16,
    target_address: Ipv6Addr,
    target_port: u16,
    group: String,
    ssm_source: Option<Ipv6Addr>,
    audio: StreamConfig,
    transport: Arc<Transport>,
    playback: Arc<Playback>,
    running: Arc<AtomicBool>,
    packets_received: Arc<AtomicU64>,
    station_callsign: Arc<Mutex<Option<String>>>,
    events_tx: Sender<ListenerEvent>,
    events_rx: Receiver<ListenerEvent>,
    stop_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Result<Self> {
        if config.callsign.is_empty() {
            return Err(ConfigError::MissingCallsign.into());
        }
        if config.callsign.len() > 16 {
            return Err(ConfigError::CallsignTooLong(config.callsign.len()).into());
        }

        let transport = Transport::new(config.local_port)?;
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);

        let group = if config.group.is_empty() {
            "default".to_string()
        } else {
            config.group
        };

        Ok(Self {
            callsign: config.callsign,
            local_address: config.local_address,
            local_port: transport.local_port(),
            target_address: config.target_address,
            target_port: config.target_port,
            group,
            ssm_source: config.ssm_source,
            audio: config.audio,
            playback: Arc::new(Playback::new(config.audio)),
            transport: Arc::new(transport),
            running: Arc::new(AtomicBool::new(false)),
            packets_received: Arc::new(AtomicU64::new(0)),
            station_callsign: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx,
            stop_tx: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Start transport and playback, subscribe, and spawn the receive,
    /// decode and heartbeat loops
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StateError::AlreadyRunning("listener").into());
        }

        self.transport.start()?;
        if let Err(e) = self.playback.start() {
            self.running.store(false, Ordering::SeqCst);
            self.transport.stop();
            return Err(e.into());
        }

        if let Err(e) = self.send_subscribe() {
            self.running.store(false, Ordering::SeqCst);
            self.playback.stop();
            self.transport.stop();
            return Err(e);
        }
        info!(
            target = %self.target_address,
            port = self.target_port,
            group = %self.group,
            ssm = ?self.ssm_source,
            "subscribed"
        );

        let (stop_tx, stop_rx) = bounded::<()>(0);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);
        let (decode_tx, decode_rx) = bounded::<Vec<u8>>(DECODE_QUEUE_CAPACITY);

        let mut threads = self.threads.lock().unwrap();
        threads.push(self.spawn_decode_worker(decode_rx)?);
        threads.push(self.spawn_receive_loop(decode_tx)?);
        threads.push(self.spawn_heartbeat_loop(stop_rx)?);

        Ok(())
    }

    /// Stop all loops, playback and transport. No Unsubscribe is sent;
    /// the broadcaster prunes our state after the timeout.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_tx.lock().unwrap().take();
        self.playback.stop();
        self.transport.stop();

        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        info!("listener stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Host event stream
    pub fn events(&self) -> Receiver<ListenerEvent> {
        self.events_rx.clone()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Station name adopted from the first beacon, if any
    pub fn station_callsign(&self) -> Option<String> {
        self.station_callsign.lock().unwrap().clone()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    fn send_subscribe(&self) -> Result<()> {
        let payload = SubscribePayload::new(
            self.local_address,
            self.local_port,
            &self.callsign,
            &self.group,
            self.ssm_source,
        );
        let packet = Packet::new(
            PacketType::Subscribe,
            self.local_address,
            &self.callsign,
            payload.marshal(),
        );
        self.transport
            .send(&packet, self.target_address, self.target_port)?;
        Ok(())
    }

    fn spawn_receive_loop(&self, decode_tx: Sender<Vec<u8>>) -> Result<JoinHandle<()>> {
        let running = self.running.clone();
        let transport = self.transport.clone();
        let packets_received = self.packets_received.clone();
        let station_callsign = self.station_callsign.clone();
        let events_tx = self.events_tx.clone();
        let group = self.group.clone();

        let handle = std::thread::Builder::new()
            .name("listener-receive".to_string())
            .spawn(move || {
                let mut tracker = PriorityTracker::new();

                while running.load(Ordering::SeqCst) {
                    let packet = match transport.receive() {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    match packet.packet_type {
                        PacketType::Audio => {
                            let count = packets_received.fetch_add(1, Ordering::Relaxed) + 1;

                            if let Some((from, to)) = tracker.observe(packet.priority()) {
                                emit(
                                    &events_tx,
                                    ListenerEvent::PriorityChange {
                                        from,
                                        to,
                                        source: packet.source_addr(),
                                        callsign: packet.callsign_str(),
                                        group: group.clone(),
                                    },
                                );
                            }

                            match AudioPayload::parse(&packet.payload) {
                                Ok(payload) => {
                                    // Hand off to the decode worker; a full
                                    // queue drops the newest frame
                                    if let Err(TrySendError::Full(_)) =
                                        decode_tx.try_send(payload.data)
                                    {
                                        debug!("decode queue full, dropping frame");
                                    }
                                }
                                Err(e) => warn!("bad audio payload: {}", e),
                            }

                            if count % 50 == 0 {
                                debug!(
                                    count,
                                    seq = packet.sequence,
                                    from = %packet.callsign_str(),
                                    "receiving"
                                );
                            }
                        }
                        PacketType::Beacon => {
                            let mut station = station_callsign.lock().unwrap();
                            if station.is_none() {
                                let callsign = packet.callsign_str();
                                info!(station = %callsign, "connected to station");
                                *station = Some(callsign.clone());
                                emit(&events_tx, ListenerEvent::StationIdentified { callsign });
                            }
                        }
                        PacketType::Metadata => {
                            emit(
                                &events_tx,
                                ListenerEvent::Metadata {
                                    callsign: packet.callsign_str(),
                                    text: String::from_utf8_lossy(&packet.payload).into_owned(),
                                },
                            );
                        }
                        _ => {}
                    }
                }
            })?;
        Ok(handle)
    }

    fn spawn_decode_worker(&self, decode_rx: Receiver<Vec<u8>>) -> Result<JoinHandle<()>> {
        let playback = self.playback.clone();
        let audio = self.audio;

        let handle = std::thread::Builder::new()
            .name("listener-decode".to_string())
            .spawn(move || {
                let mut decoder = match OpusDecoder::new(audio) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("decoder init failed, decode worker aborted: {}", e);
                        return;
                    }
                };

                // The channel closes when the receive loop drops its sender
                while let Ok(data) = decode_rx.recv() {
                    match decoder.decode(&data) {
                        Ok(pcm) => playback.write(pcm),
                        Err(e) => debug!("decode error, frame skipped: {}", e),
                    }
                }
            })?;
        Ok(handle)
    }

    fn spawn_heartbeat_loop(&self, stop_rx: Receiver<()>) -> Result<JoinHandle<()>> {
        let running = self.running.clone();
        let transport = self.transport.clone();
        let local_address = self.local_address;
        let callsign = self.callsign.clone();
        let target_address = self.target_address;
        let target_port = self.target_port;
        let ticker = tick(HEARTBEAT_INTERVAL);

        let handle = std::thread::Builder::new()
            .name("listener-heartbeat".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    select! {
                        recv(ticker) -> _ => {
                            let timestamp = SystemTime::now()
                                .duration_since(UNIX_EPOCH)
                                .map(|d| d.as_secs())
                                .unwrap_or(0);
                            let payload = HeartbeatPayload::new(local_address, timestamp);
                            let packet = Packet::new(
                                PacketType::Heartbeat,
                                local_address,
                                &callsign,
                                payload.marshal(),
                            );
                            if let Err(e) = transport.send(&packet, target_address, target_port) {
                                warn!("heartbeat send failed: {}", e);
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;
        Ok(handle)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emit(events_tx: &Sender<ListenerEvent>, event: ListenerEvent) {
    if events_tx.try_send(event).is_err() {
        debug!("event queue full, host is not draining events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_transition_reported_once() {
        let mut tracker = PriorityTracker::new();

        // Ten Normal packets, then ten Critical: exactly one event
        let mut events = Vec::new();
        for _ in 0..10 {
            events.extend(tracker.observe(Priority::Normal));
        }
        for _ in 0..10 {
            events.extend(tracker.observe(Priority::Critical));
        }
        assert_eq!(events, vec![(Priority::Normal, Priority::Critical)]);
    }

    #[test]
    fn transitions_below_high_suppressed() {
        let mut tracker = PriorityTracker::new();
        assert_eq!(
            tracker.observe(Priority::Critical),
            Some((Priority::Normal, Priority::Critical))
        );
        // Dropping back to Normal is tracked but not reported
        assert_eq!(tracker.observe(Priority::Normal), None);
        // The tracked value did move: the next escalation starts at Normal
        assert_eq!(
            tracker.observe(Priority::High),
            Some((Priority::Normal, Priority::High))
        );
    }

    #[test]
    fn empty_callsign_rejected() {
        let result = Listener::new(ListenerConfig {
            callsign: String::new(),
            local_address: Ipv6Addr::LOCALHOST,
            local_port: 0,
            target_address: Ipv6Addr::LOCALHOST,
            target_port: 8799,
            group: "test".into(),
            ssm_source: None,
            audio: StreamConfig::music(),
        });
        assert!(result.is_err());
    }
}
