//! Error types for the broadcast fabric

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed packet or payload
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Buffer too small for header: {0} bytes")]
    BufferTooSmall(usize),

    #[error("Payload length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unknown packet type: {0}")]
    UnknownType(u8),

    #[error("Unsupported RTP version: {0}")]
    RtpVersion(u8),

    #[error("Subscribe payload too small: {0} bytes")]
    SubscribeTooSmall(usize),

    #[error("Heartbeat payload too small: {0} bytes")]
    HeartbeatTooSmall(usize),

    #[error("Audio payload too small: {0} bytes")]
    AudioTooSmall(usize),
}

/// Socket creation, send, receive failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Transport closed")]
    Closed,
}

/// Device initialization, capture, playback
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Failed to open file: {0}")]
    FileError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Source is not running")]
    NotRunning,
}

/// Encode/decode failures
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Operation invalid in the current state
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("{0} already running")]
    AlreadyRunning(&'static str),

    #[error("{0} not running")]
    NotRunning(&'static str),

    #[error("Subscriber not found")]
    SubscriberNotFound,

    #[error("Group not found: {0}")]
    GroupNotFound(String),
}

/// Invalid configuration at the boundary
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Callsign is required")]
    MissingCallsign,

    #[error("Callsign too long: {0} bytes (max 16)")]
    CallsignTooLong(usize),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
