//! UDP transport
//!
//! One datagram socket per endpoint, bound to `[::]:port`. An ingress
//! thread reads with a 1-second deadline (so shutdown stays observable),
//! parses, and feeds a bounded queue; overflow drops the newest packet.

use std::io::ErrorKind;
use std::net::{Ipv6Addr, SocketAddrV6, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::constants::{MAX_DATAGRAM_SIZE, READ_DEADLINE, TRANSPORT_QUEUE_CAPACITY};
use crate::error::TransportError;
use crate::protocol::Packet;

/// Datagram transport with a parsed-packet ingress queue
pub struct Transport {
    socket: UdpSocket,
    local_port: u16,
    running: Arc<AtomicBool>,
    ingress_rx: Receiver<Packet>,
    ingress_tx: Mutex<Option<Sender<Packet>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    parse_errors: Arc<AtomicU64>,
}

impl Transport {
    /// Bind `[::]:local_port`. Port 0 picks an ephemeral port.
    pub fn new(local_port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, local_port, 0, 0))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_read_timeout(Some(READ_DEADLINE))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let local_port = socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(local_port);

        let (tx, rx) = bounded(TRANSPORT_QUEUE_CAPACITY);

        Ok(Self {
            socket,
            local_port,
            running: Arc::new(AtomicBool::new(false)),
            ingress_rx: rx,
            ingress_tx: Mutex::new(Some(tx)),
            reader: Mutex::new(None),
            parse_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Launch the ingress thread
    pub fn start(&self) -> Result<(), TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(tx) = self.ingress_tx.lock().unwrap().take() else {
            return Err(TransportError::Closed);
        };

        let socket = self
            .socket
            .try_clone()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let running = self.running.clone();
        let parse_errors = self.parse_errors.clone();

        let handle = std::thread::Builder::new()
            .name(format!("transport-{}", self.local_port))
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
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
                                warn!("socket read error: {}", e);
                            }
                            continue;
                        }
                    };

                    let packet = match Packet::parse(&buf[..n]) {
                        Ok(p) => p,
                        Err(e) => {
                            parse_errors.fetch_add(1, Ordering::Relaxed);
                            debug!("dropping malformed datagram: {}", e);
                            continue;
                        }
                    };

                    // Queue full: drop the newest packet
                    if let Err(TrySendError::Full(_)) = tx.try_send(packet) {
                        debug!("ingress queue full, dropping packet");
                    }
                }
                // tx drops here; receive() observes the closed channel
            })
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        *self.reader.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the ingress thread and close the queue. Bounded by the socket
    /// read deadline.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Marshal and send one datagram. Failures are reported, never
    /// retried.
    pub fn send(&self, packet: &Packet, dest: Ipv6Addr, port: u16) -> Result<(), TransportError> {
        let data = packet.marshal();
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PacketTooLarge(data.len()));
        }

        self.socket
            .send_to(&data, SocketAddrV6::new(dest, port, 0, 0))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Blocking pull of the next parsed inbound packet. Returns
    /// [`TransportError::Closed`] once the ingress thread has exited.
    pub fn receive(&self) -> Result<Packet, TransportError> {
        self.ingress_rx.recv().map_err(|_| TransportError::Closed)
    }

    /// Non-blocking variant of [`receive`](Self::receive)
    pub fn try_receive(&self) -> Option<Packet> {
        self.ingress_rx.try_recv().ok()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Count of inbound datagrams dropped as malformed
    pub fn parse_error_count(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;
    use std::time::Duration;

    // Loopback send/receive. Skips quietly when the host has no IPv6
    // stack, like the device-dependent capture tests.
    #[test]
    fn loopback_roundtrip() {
        let Ok(rx_side) = Transport::new(0) else {
            return;
        };
        let Ok(tx_side) = Transport::new(0) else {
            return;
        };
        rx_side.start().unwrap();

        let mut packet = Packet::new(
            PacketType::Metadata,
            Ipv6Addr::LOCALHOST,
            "TEST",
            b"hello".to_vec(),
        );
        packet.sequence = 7;

        tx_side
            .send(&packet, Ipv6Addr::LOCALHOST, rx_side.local_port())
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let received = loop {
            if let Some(p) = rx_side.try_receive() {
                break p;
            }
            assert!(std::time::Instant::now() < deadline, "no packet arrived");
            std::thread::sleep(Duration::from_millis(10));
        };

        assert_eq!(received, packet);
        rx_side.stop();
    }

    #[test]
    fn oversized_send_rejected() {
        let Ok(transport) = Transport::new(0) else {
            return;
        };
        let packet = Packet::new(
            PacketType::Audio,
            Ipv6Addr::LOCALHOST,
            "BIG",
            vec![0u8; MAX_DATAGRAM_SIZE],
        );
        assert!(matches!(
            transport.send(&packet, Ipv6Addr::LOCALHOST, 1),
            Err(TransportError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn malformed_datagrams_counted() {
        let Ok(transport) = Transport::new(0) else {
            return;
        };
        transport.start().unwrap();

        let sender =
            UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)).unwrap();
        sender
            .send_to(
                b"garbage",
                SocketAddrV6::new(Ipv6Addr::LOCALHOST, transport.local_port(), 0, 0),
            )
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while transport.parse_error_count() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(transport.parse_error_count(), 1);
        transport.stop();
    }
}
