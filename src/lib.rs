//! # MeshRadio
//!
//! Peer-to-peer audio broadcast over an IPv6 overlay network (Yggdrasil).
//! Stations broadcast Opus-encoded audio on named logical channels;
//! listeners subscribe to a broadcaster and receive a continuous stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── BROADCASTER ─────────────────────────────┐
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────────────────┐  │
//! │  │ AudioSource │──▶│ Opus Encoder │──▶│ Packet (seq, priority)    │  │
//! │  │ mic | file  │   └──────────────┘   └─────────────┬─────────────┘  │
//! │  └─────────────┘                                    │                │
//! │  ┌──────────────────────────┐     per-frame snapshot fan-out         │
//! │  │ SubscriptionManager      │◀───────────┐          │                │
//! │  │ groups / SSM / pruning   │  Subscribe │          │                │
//! │  └──────────────────────────┘  Heartbeat │          ▼                │
//! │                              ┌───────────┴───────────────┐           │
//! │                              │ Transport (UDP [::]:port) │           │
//! │                              └───────────┬───────────────┘           │
//! └──────────────────────────────────────────┼───────────────────────────┘
//!                                            │ overlay network
//! ┌──────────────────────────────────────────┼───────────────────────────┐
//! │                              ┌───────────┴───────────────┐           │
//! │                              │ Transport (UDP [::]:port) │           │
//! │                              └───────────┬───────────────┘           │
//! │  ┌──────────────┐   ┌──────────────┐     ▼                           │
//! │  │ Playback     │◀──│ Opus Decoder │◀── receive loop                 │
//! │  │ bounded FIFO │   └──────────────┘    (+ heartbeat every 5 s)      │
//! │  └──────────────┘                                                    │
//! └──────────────────────────── LISTENER ────────────────────────────────┘
//! ```

pub mod audio;
pub mod broadcaster;
pub mod channels;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod listener;
pub mod multicast;
pub mod overlay;
pub mod protocol;
pub mod rtp;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default station callsign when none is configured
    pub const DEFAULT_CALLSIGN: &str = "STATION";

    /// Default broadcaster/listener port (the "test" channel)
    pub const DEFAULT_AUDIO_PORT: u16 = 8799;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Samples per channel in one 20 ms frame at 48 kHz
    pub const DEFAULT_FRAME_SIZE: usize = 960;

    /// Interval between listener keepalives
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

    /// Interval between stale-subscriber sweeps on the broadcaster
    pub const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

    /// Age after which a silent subscriber is dropped
    pub const PRUNE_TIMEOUT: Duration = Duration::from_secs(15);

    /// Capacity of the transport ingress queue (packets)
    pub const TRANSPORT_QUEUE_CAPACITY: usize = 100;

    /// Capacity of the playback queue (~3 s of audio at 20 ms frames)
    pub const PLAYBACK_QUEUE_FRAMES: usize = 150;

    /// How long the playback callback waits before emitting silence
    pub const UNDERRUN_WAIT: Duration = Duration::from_millis(5);

    /// Read deadline on the transport socket so shutdown stays observable
    pub const READ_DEADLINE: Duration = Duration::from_secs(1);

    /// Maximum UDP datagram size the parser must tolerate
    pub const MAX_DATAGRAM_SIZE: usize = 65535;

    /// Consecutive all-zero frames after which a file source reports EOF
    pub const SILENCE_EOF_FRAMES: usize = 50;
}
