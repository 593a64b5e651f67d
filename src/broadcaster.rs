//! Broadcaster engine
//!
//! At the frame cadence: read one PCM frame, encode it, wrap it in an
//! Audio packet carrying the channel priority and a wrapping sequence
//! number, and unicast a copy to every subscriber whose SSM filter
//! matches this broadcaster. Subscribe/heartbeat intake and stale-entry
//! pruning run concurrently.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::audio::AudioSource;
use crate::channels::ChannelRegistry;
use crate::codec::OpusEncoder;
use crate::config::StreamConfig;
use crate::constants::{PRUNE_INTERVAL, PRUNE_TIMEOUT};
use crate::error::{ConfigError, StateError};
use crate::multicast::{BroadcastMember, Subscriber, SubscriptionManager};
use crate::protocol::{
    AudioPayload, CodecType, HeartbeatPayload, Packet, PacketType, Priority, SubscribePayload,
};
use crate::transport::Transport;
use crate::Result;

/// Broadcaster construction parameters
pub struct BroadcasterConfig {
    pub callsign: String,
    /// Overlay address; also the fan-out SSM identity
    pub address: Ipv6Addr,
    pub port: u16,
    pub group: String,
    pub audio: StreamConfig,
    /// Audio source; a microphone for the configured stream when None
    pub source: Option<AudioSource>,
}

/// Audio broadcast engine
pub struct Broadcaster {
    callsign: String,
    address: Ipv6Addr,
    group: String,
    priority: Priority,
    audio: StreamConfig,
    transport: Arc<Transport>,
    manager: Arc<SubscriptionManager>,
    source: Mutex<Option<AudioSource>>,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU8>,
    frames_sent: Arc<AtomicU64>,
    stop_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Result<Self> {
        if config.callsign.is_empty() {
            return Err(ConfigError::MissingCallsign.into());
        }
        if config.callsign.len() > 16 {
            return Err(ConfigError::CallsignTooLong(config.callsign.len()).into());
        }

        let transport = Transport::new(config.port)?;
        let source = config
            .source
            .unwrap_or_else(|| AudioSource::microphone(config.audio));

        let group = if config.group.is_empty() {
            "default".to_string()
        } else {
            config.group
        };
        let priority = ChannelRegistry::new().priority_for_group(&group);

        Ok(Self {
            callsign: config.callsign,
            address: config.address,
            group,
            priority,
            audio: config.audio,
            transport: Arc::new(transport),
            manager: Arc::new(SubscriptionManager::new()),
            source: Mutex::new(Some(source)),
            running: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU8::new(0)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            stop_tx: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Start transport, audio source and the three engine loops
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StateError::AlreadyRunning("broadcaster").into());
        }

        let mut source = self
            .source
            .lock()
            .unwrap()
            .take()
            .ok_or(StateError::AlreadyRunning("broadcaster"))?;

        if let Err(e) = self.transport.start() {
            self.running.store(false, Ordering::SeqCst);
            *self.source.lock().unwrap() = Some(source);
            return Err(e.into());
        }
        if let Err(e) = source.start() {
            self.running.store(false, Ordering::SeqCst);
            self.transport.stop();
            *self.source.lock().unwrap() = Some(source);
            return Err(e.into());
        }

        self.manager.register_broadcaster(
            &self.group,
            BroadcastMember::new(
                self.address,
                self.transport.local_port(),
                self.callsign.clone(),
            ),
        );
        info!(
            group = %self.group,
            priority = %self.priority,
            port = self.transport.local_port(),
            "broadcaster registered"
        );

        let (stop_tx, stop_rx) = bounded::<()>(0);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        let mut threads = self.threads.lock().unwrap();
        threads.push(self.spawn_broadcast_loop(source)?);
        threads.push(self.spawn_intake()?);
        threads.push(self.spawn_pruner(stop_rx)?);

        Ok(())
    }

    /// Stop all loops, the audio source and the transport
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_tx.lock().unwrap().take();
        self.transport.stop();
        self.manager
            .unregister_broadcaster(&self.group, self.address);

        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        info!(group = %self.group, "broadcaster stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn address(&self) -> Ipv6Addr {
        self.address
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Actual bound port (differs from the configured one when it was 0)
    pub fn local_port(&self) -> u16 {
        self.transport.local_port()
    }

    /// Frames handed to the fan-out so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn manager(&self) -> Arc<SubscriptionManager> {
        self.manager.clone()
    }

    fn spawn_broadcast_loop(&self, mut source: AudioSource) -> Result<JoinHandle<()>> {
        let running = self.running.clone();
        let sequence = self.sequence.clone();
        let frames_sent = self.frames_sent.clone();
        let transport = self.transport.clone();
        let manager = self.manager.clone();
        let group = self.group.clone();
        let callsign = self.callsign.clone();
        let address = self.address;
        let priority = self.priority;
        let audio = self.audio;

        let handle = std::thread::Builder::new()
            .name("broadcast-loop".to_string())
            .spawn(move || {
                let init = if audio.channels == 1 {
                    OpusEncoder::voice(audio)
                } else {
                    OpusEncoder::music(audio)
                };
                let mut encoder = match init {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("encoder init failed, broadcast loop aborted: {}", e);
                        return;
                    }
                };

                let frame_duration = audio.frame_duration();
                let start = Instant::now();
                let mut next_frame = Instant::now() + frame_duration;

                while running.load(Ordering::SeqCst) {
                    let samples = match source.read() {
                        Ok(s) => s,
                        Err(crate::error::AudioError::EndOfStream) => {
                            info!("audio source reached end of stream");
                            break;
                        }
                        Err(e) => {
                            debug!("audio read error, skipping tick: {}", e);
                            std::thread::sleep(frame_duration);
                            continue;
                        }
                    };

                    let encoded = match encoder.encode(&samples) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!("encode error, skipping frame: {}", e);
                            continue;
                        }
                    };

                    let payload = AudioPayload {
                        codec: CodecType::Opus,
                        sample_rate_khz: (audio.sample_rate / 1000) as u8,
                        channels: audio.channels as u8,
                        bitrate_kbps: (audio.bitrate / 1000) as u8,
                        frame_timestamp_ms: start.elapsed().as_millis() as u32,
                        data: encoded.to_vec(),
                    };

                    let mut packet =
                        Packet::new(PacketType::Audio, address, &callsign, payload.marshal());
                    packet.sequence = sequence.fetch_add(1, Ordering::Relaxed);
                    packet.set_priority(priority);

                    // Per-frame snapshot; sends happen outside the lock and
                    // never block or abort the loop
                    let subscribers = manager.subscribers_for_source(&group, address);
                    for subscriber in &subscribers {
                        if let Err(e) = transport.send(&packet, subscriber.addr, subscriber.port) {
                            debug!(
                                callsign = %subscriber.callsign,
                                "send error, subscriber left for pruning: {}", e
                            );
                        }
                    }
                    frames_sent.fetch_add(1, Ordering::Relaxed);

                    if packet.sequence % 50 == 0 {
                        debug!(
                            seq = packet.sequence,
                            listeners = subscribers.len(),
                            "broadcasting"
                        );
                    }

                    let now = Instant::now();
                    if next_frame > now {
                        std::thread::sleep(next_frame - now);
                    }
                    next_frame = next_frame.max(now) + frame_duration;
                }

                source.stop();
            })?;
        Ok(handle)
    }

    fn spawn_intake(&self) -> Result<JoinHandle<()>> {
        let running = self.running.clone();
        let transport = self.transport.clone();
        let manager = self.manager.clone();
        let group = self.group.clone();

        let handle = std::thread::Builder::new()
            .name("subscription-intake".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let packet = match transport.receive() {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    match packet.packet_type {
                        PacketType::Subscribe => handle_subscribe(&manager, &group, &packet),
                        PacketType::Heartbeat => handle_heartbeat(&manager, &packet),
                        PacketType::Unsubscribe => handle_unsubscribe(&manager, &group, &packet),
                        _ => {}
                    }
                }
            })?;
        Ok(handle)
    }

    fn spawn_pruner(&self, stop_rx: Receiver<()>) -> Result<JoinHandle<()>> {
        let running = self.running.clone();
        let manager = self.manager.clone();
        let ticker = tick(PRUNE_INTERVAL);

        let handle = std::thread::Builder::new()
            .name("pruner".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    select! {
                        recv(ticker) -> _ => {
                            let (subs, bcasters) = manager.prune_stale(PRUNE_TIMEOUT);
                            if subs > 0 || bcasters > 0 {
                                info!(subs, bcasters, "pruned stale entries");
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;
        Ok(handle)
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_subscribe(manager: &SubscriptionManager, engine_group: &str, packet: &Packet) {
    let payload = match SubscribePayload::parse(&packet.payload) {
        Ok(p) => p,
        Err(e) => {
            warn!("invalid subscribe packet: {}", e);
            return;
        }
    };

    let group = match payload.group_str() {
        g if g.is_empty() => engine_group.to_string(),
        g => g,
    };
    let ssm = payload.ssm();
    let subscriber = Subscriber::new(
        payload.listener_ip(),
        payload.listener_port,
        payload.callsign_str(),
        ssm,
    );

    info!(
        callsign = %subscriber.callsign,
        addr = %subscriber.addr,
        group = %group,
        ssm = ?ssm,
        "new subscriber"
    );
    manager.subscribe(&group, subscriber);
}

fn handle_heartbeat(manager: &SubscriptionManager, packet: &Packet) {
    let Ok(payload) = HeartbeatPayload::parse(&packet.payload) else {
        return;
    };
    manager.heartbeat_any(payload.listener_ip());
}

fn handle_unsubscribe(manager: &SubscriptionManager, engine_group: &str, packet: &Packet) {
    let Ok(payload) = SubscribePayload::parse(&packet.payload) else {
        return;
    };
    let group = match payload.group_str() {
        g if g.is_empty() => engine_group.to_string(),
        g => g,
    };
    manager.unsubscribe(&group, payload.listener_ip(), payload.listener_port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use std::time::Duration;

    fn test_audio() -> StreamConfig {
        // 2.5 ms frames keep the loop fast; still a valid Opus frame size
        StreamConfig {
            sample_rate: 48000,
            channels: 2,
            frame_size: 120,
            bitrate: 128_000,
        }
    }

    fn tone_broadcaster(address: &str, group: &str) -> Result<Broadcaster> {
        let audio = test_audio();
        Broadcaster::new(BroadcasterConfig {
            callsign: "B1".into(),
            address: address.parse().unwrap(),
            port: 0,
            group: group.into(),
            audio,
            source: Some(AudioSource::tone(440.0, audio)),
        })
    }

    fn send_subscribe(
        from: &Transport,
        to_port: u16,
        listener_port: u16,
        callsign: &str,
        group: &str,
        ssm: Option<Ipv6Addr>,
    ) {
        let payload = SubscribePayload::new(
            Ipv6Addr::LOCALHOST,
            listener_port,
            callsign,
            group,
            ssm,
        );
        let packet = Packet::new(
            PacketType::Subscribe,
            Ipv6Addr::LOCALHOST,
            callsign,
            payload.marshal(),
        );
        from.send(&packet, Ipv6Addr::LOCALHOST, to_port).unwrap();
    }

    fn drain_audio(transport: &Transport) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(p) = transport.try_receive() {
            if p.packet_type == PacketType::Audio {
                packets.push(p);
            }
        }
        packets
    }

    #[test]
    fn priority_from_registry() {
        let Ok(b) = tone_broadcaster("201:abcd::1", "emergency") else {
            return;
        };
        assert_eq!(b.priority(), Priority::Critical);

        let Ok(b) = tone_broadcaster("201:abcd::1", "unknown-group") else {
            return;
        };
        assert_eq!(b.priority(), Priority::Normal);
    }

    #[test]
    fn double_start_rejected() {
        let Ok(b) = tone_broadcaster("201:abcd::1", "test") else {
            return;
        };
        b.start().unwrap();
        assert!(b.start().is_err());
        b.stop();
    }

    // Scenario: two listeners, one any-source and one SSM-bound, fed by
    // two broadcasters. Exercises intake, fan-out and the SSM filter over
    // real loopback sockets. Skips when the host has no IPv6 stack.
    #[test]
    fn fanout_and_ssm_exclusion() {
        let b1_addr: Ipv6Addr = "201:abcd::1".parse().unwrap();

        let Ok(b1) = tone_broadcaster("201:abcd::1", "emergency") else {
            return;
        };
        let Ok(b2) = tone_broadcaster("201:abcd::2", "emergency") else {
            return;
        };
        let Ok(l1) = Transport::new(0) else { return };
        let Ok(l2) = Transport::new(0) else { return };
        l1.start().unwrap();
        l2.start().unwrap();

        b1.start().unwrap();
        b2.start().unwrap();

        // L1 takes any source, L2 only B1
        for b in [&b1, &b2] {
            send_subscribe(&l1, b.local_port(), l1.local_port(), "L1", "emergency", None);
            send_subscribe(
                &l2,
                b.local_port(),
                l2.local_port(),
                "L2",
                "emergency",
                Some(b1_addr),
            );
        }

        // Wait for intake to process the subscriptions
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let s1 = b1.manager().stats();
            let s2 = b2.manager().stats();
            if s1.total_subscribers == 2 && s2.total_subscribers == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        std::thread::sleep(Duration::from_millis(400));
        b1.stop();
        b2.stop();

        let l1_audio = drain_audio(&l1);
        let l2_audio = drain_audio(&l2);
        assert!(l1_audio.len() >= 40, "L1 got {} packets", l1_audio.len());
        assert!(l2_audio.len() >= 40, "L2 got {} packets", l2_audio.len());

        for p in &l1_audio {
            assert_eq!(p.priority(), Priority::Critical);
        }

        let l1_sources: std::collections::HashSet<_> =
            l1_audio.iter().map(|p| p.source).collect();
        let l2_sources: std::collections::HashSet<_> =
            l2_audio.iter().map(|p| p.source).collect();
        assert_eq!(l1_sources.len(), 2, "L1 should hear both broadcasters");
        assert_eq!(l2_sources.len(), 1, "L2 should hear only B1");
        assert!(l2_sources.contains(&b1_addr.octets()));
    }
}
