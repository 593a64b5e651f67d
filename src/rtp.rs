//! RTP interop transport
//!
//! Optional alternative to the native wire format for interoperability
//! with standard Opus-over-RTP tooling: RTP version 2, dynamic payload
//! type 111, 48 kHz clock, 960-sample timestamp increment per 20 ms
//! frame. The receiver reorders by sequence number with a wrap-aware
//! priority queue.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::io::ErrorKind;
use std::net::{Ipv6Addr, SocketAddrV6, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::constants::READ_DEADLINE;
use crate::error::{ParseError, TransportError};

/// RTP header size in bytes (no CSRC, no extension)
pub const RTP_HEADER_SIZE: usize = 12;
/// Dynamic payload type for Opus (RFC 7587)
pub const OPUS_PAYLOAD_TYPE: u8 = 111;
/// Timestamp increment for a 20 ms frame at the 48 kHz Opus clock
pub const OPUS_TIMESTAMP_STEP: u32 = 960;
/// Default jitter buffer capacity in packets
pub const DEFAULT_JITTER_CAPACITY: usize = 50;

/// One RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_SIZE + self.payload.len());
        buf.push(0x80); // version 2, no padding, no extension, no CSRC
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(ParseError::BufferTooSmall(data.len()));
        }
        let version = data[0] >> 6;
        if version != 2 {
            return Err(ParseError::RtpVersion(version));
        }

        Ok(Self {
            payload_type: data[1] & 0x7F,
            marker: data[1] & 0x80 != 0,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            ssrc: u32::from_be_bytes(data[8..12].try_into().unwrap()),
            payload: data[RTP_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Wrap-aware sequence comparison: `a` sorts before `b` when the forward
/// distance from `a` to `b` is inside the half window. Total only within
/// half the sequence space, which the bounded buffer guarantees.
fn seq_cmp(a: u16, b: u16) -> CmpOrdering {
    if a == b {
        CmpOrdering::Equal
    } else if b.wrapping_sub(a) < 0x8000 {
        CmpOrdering::Less
    } else {
        CmpOrdering::Greater
    }
}

struct SeqOrdered(RtpPacket);

impl PartialEq for SeqOrdered {
    fn eq(&self, other: &Self) -> bool {
        self.0.sequence == other.0.sequence
    }
}
impl Eq for SeqOrdered {}
impl PartialOrd for SeqOrdered {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for SeqOrdered {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        seq_cmp(self.0.sequence, other.0.sequence)
    }
}

/// Reordering buffer keyed on sequence number. Packets accumulate up to
/// the capacity (the reorder window); once the window is full each push
/// releases the lowest outstanding sequence.
pub struct JitterBuffer {
    heap: BinaryHeap<Reverse<SeqOrdered>>,
    capacity: usize,
}

impl JitterBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, packet: RtpPacket) {
        self.heap.push(Reverse(SeqOrdered(packet)));
    }

    /// Lowest-sequence packet, but only while the window is overfull
    pub fn pop_ready(&mut self) -> Option<RtpPacket> {
        if self.heap.len() > self.capacity {
            self.pop()
        } else {
            None
        }
    }

    /// Unconditional pop of the lowest outstanding sequence
    pub fn pop(&mut self) -> Option<RtpPacket> {
        self.heap.pop().map(|Reverse(SeqOrdered(p))| p)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// RTP sender for Opus frames
pub struct RtpSender {
    socket: UdpSocket,
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    packets_sent: u64,
}

impl RtpSender {
    pub fn new(local_port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, local_port, 0, 0))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        // SSRC chosen at startup; wall-clock seconds are unique enough
        // for a single stream per process
        let ssrc = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);

        Ok(Self {
            socket,
            ssrc,
            payload_type: OPUS_PAYLOAD_TYPE,
            sequence: 0,
            timestamp: 0,
            packets_sent: 0,
        })
    }

    fn next_packet(&mut self, opus_data: &[u8]) -> RtpPacket {
        let packet = RtpPacket {
            payload_type: self.payload_type,
            marker: false,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            payload: opus_data.to_vec(),
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(OPUS_TIMESTAMP_STEP);
        self.packets_sent += 1;
        packet
    }

    /// Send one Opus frame to a single destination
    pub fn send_opus(
        &mut self,
        opus_data: &[u8],
        dest: Ipv6Addr,
        port: u16,
    ) -> Result<(), TransportError> {
        let data = self.next_packet(opus_data).marshal();
        self.socket
            .send_to(&data, SocketAddrV6::new(dest, port, 0, 0))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Fan one frame out to many destinations; one sequence number is
    /// consumed for the frame, not per destination
    pub fn send_to_many(
        &mut self,
        opus_data: &[u8],
        destinations: &[(Ipv6Addr, u16)],
    ) -> Result<(), TransportError> {
        let data = self.next_packet(opus_data).marshal();
        let mut first_err = None;
        for &(dest, port) in destinations {
            if let Err(e) = self.socket.send_to(&data, SocketAddrV6::new(dest, port, 0, 0)) {
                debug!("rtp send to {} failed: {}", dest, e);
                first_err.get_or_insert(TransportError::SendFailed(e.to_string()));
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }
}

/// RTP receiver with sequence reordering
pub struct RtpReceiver {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    packets_rx: Receiver<RtpPacket>,
    packets_tx: Mutex<Option<Sender<RtpPacket>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    jitter_capacity: usize,
    packets_received: Arc<AtomicU64>,
    packets_lost: Arc<AtomicU64>,
}

impl RtpReceiver {
    pub fn new(local_port: u16, jitter_capacity: usize) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, local_port, 0, 0))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_read_timeout(Some(READ_DEADLINE))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let (tx, rx) = bounded(crate::constants::TRANSPORT_QUEUE_CAPACITY);

        Ok(Self {
            socket,
            running: Arc::new(AtomicBool::new(false)),
            packets_rx: rx,
            packets_tx: Mutex::new(Some(tx)),
            reader: Mutex::new(None),
            jitter_capacity: if jitter_capacity == 0 {
                DEFAULT_JITTER_CAPACITY
            } else {
                jitter_capacity
            },
            packets_received: Arc::new(AtomicU64::new(0)),
            packets_lost: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn start(&self) -> Result<(), TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(tx) = self.packets_tx.lock().unwrap().take() else {
            return Err(TransportError::Closed);
        };

        let socket = self
            .socket
            .try_clone()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let running = self.running.clone();
        let received = self.packets_received.clone();
        let lost = self.packets_lost.clone();
        let capacity = self.jitter_capacity;

        let handle = std::thread::Builder::new()
            .name("rtp-receive".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; 1500];
                let mut jitter = JitterBuffer::new(capacity);
                let mut last_seq: Option<u16> = None;

                while running.load(Ordering::SeqCst) {
                    let n = match socket.recv_from(&mut buf) {
                        Ok((n, _)) => n,
                        Err(e)
                            if e.kind() == ErrorKind::WouldBlock
                                || e.kind() == ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                warn!("rtp receive error: {}", e);
                            }
                            continue;
                        }
                    };

                    let packet = match RtpPacket::parse(&buf[..n]) {
                        Ok(p) => p,
                        Err(e) => {
                            debug!("dropping bad rtp datagram: {}", e);
                            continue;
                        }
                    };

                    received.fetch_add(1, Ordering::Relaxed);
                    if let Some(last) = last_seq {
                        let gap = packet.sequence.wrapping_sub(last).wrapping_sub(1);
                        if gap != 0 && gap < 0x8000 {
                            lost.fetch_add(gap as u64, Ordering::Relaxed);
                        }
                    }
                    last_seq = Some(packet.sequence);

                    jitter.push(packet);
                    while let Some(ordered) = jitter.pop_ready() {
                        if let Err(TrySendError::Full(_)) = tx.try_send(ordered) {
                            debug!("rtp queue full, dropping packet");
                        }
                    }
                }
            })
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        *self.reader.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Next Opus frame in sequence order
    pub fn read_opus(&self) -> Result<Vec<u8>, TransportError> {
        self.packets_rx
            .recv()
            .map(|p| p.payload)
            .map_err(|_| TransportError::Closed)
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.packets_received.load(Ordering::Relaxed),
            self.packets_lost.load(Ordering::Relaxed),
        )
    }

    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(sequence: u16) -> RtpPacket {
        RtpPacket {
            payload_type: OPUS_PAYLOAD_TYPE,
            marker: false,
            sequence,
            timestamp: sequence as u32 * OPUS_TIMESTAMP_STEP,
            ssrc: 42,
            payload: vec![sequence as u8],
        }
    }

    #[test]
    fn header_roundtrip() {
        let p = packet(200);
        let wire = p.marshal();
        assert_eq!(wire.len(), RTP_HEADER_SIZE + 1);
        assert_eq!(wire[0] >> 6, 2);
        assert_eq!(RtpPacket::parse(&wire).unwrap(), p);
    }

    #[test]
    fn bad_version_rejected() {
        let mut wire = packet(1).marshal();
        wire[0] = 0x40; // version 1
        assert_eq!(RtpPacket::parse(&wire), Err(ParseError::RtpVersion(1)));
    }

    #[test]
    fn jitter_reorders() {
        let mut jitter = JitterBuffer::new(8);
        for seq in [3u16, 1, 2, 0] {
            jitter.push(packet(seq));
        }
        let order: Vec<u16> = std::iter::from_fn(|| jitter.pop().map(|p| p.sequence)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn jitter_handles_wrap() {
        let mut jitter = JitterBuffer::new(8);
        for seq in [0u16, 65534, 1, 65535] {
            jitter.push(packet(seq));
        }
        let order: Vec<u16> = std::iter::from_fn(|| jitter.pop().map(|p| p.sequence)).collect();
        assert_eq!(order, vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn jitter_releases_in_order_once_window_fills() {
        let mut jitter = JitterBuffer::new(2);
        jitter.push(packet(5));
        jitter.push(packet(7));
        assert!(jitter.pop_ready().is_none(), "window not yet overfull");

        jitter.push(packet(6));
        let released = jitter.pop_ready().unwrap();
        assert_eq!(released.sequence, 5);
        assert!(jitter.pop_ready().is_none());
        assert_eq!(jitter.len(), 2);
    }
}
