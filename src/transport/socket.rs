//! Broadcast link over UDP.
//!
//! Emulates a shared radio medium on top of UDP. Every datagram carries a
//! small link envelope so receivers learn the sender's link address and can
//! discard frames addressed to someone else:
//!
//! ```text
//! +----------------------+---------------------+------------------+
//! | destination (6)      | source (6)          | packet           |
//! +----------------------+---------------------+------------------+
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::trace;

use crate::core::{ADDRESS_SIZE, MAX_PACKET_SIZE};
use crate::session::{Destination, Transmit};
use crate::wire::MacAddr;

/// Size of the link envelope.
pub const LINK_HEADER_SIZE: usize = 2 * ADDRESS_SIZE;

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;

/// Signal strength reported for every frame; UDP has no RSSI.
pub const DEFAULT_ASSUMED_RSSI: i8 = -40;

/// Wrap `packet` in a link envelope.
pub fn encode_envelope(destination: MacAddr, source: MacAddr, packet: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LINK_HEADER_SIZE + packet.len());
    frame.extend_from_slice(destination.as_bytes());
    frame.extend_from_slice(source.as_bytes());
    frame.extend_from_slice(packet);
    frame
}

/// Split a datagram into `(destination, source, packet)`.
pub fn decode_envelope(frame: &[u8]) -> Option<(MacAddr, MacAddr, &[u8])> {
    if frame.len() < LINK_HEADER_SIZE {
        return None;
    }
    let destination = MacAddr::from_slice(&frame[..ADDRESS_SIZE])?;
    let source = MacAddr::from_slice(&frame[ADDRESS_SIZE..LINK_HEADER_SIZE])?;
    Some((destination, source, &frame[LINK_HEADER_SIZE..]))
}

/// A frame addressed to this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Link address of the sender.
    pub from: MacAddr,
    /// Packet bytes without the envelope.
    pub bytes: Vec<u8>,
    /// Reported signal strength.
    pub rssi: i8,
}

/// UDP socket acting as one device on the shared medium.
///
/// Broadcasts go to every medium address. Unicasts go to the UDP address the
/// destination was last heard from, or to the whole medium if unknown.
#[derive(Debug)]
pub struct LinkSocket {
    socket: UdpSocket,
    link_addr: MacAddr,
    medium: Vec<SocketAddr>,
    neighbors: HashMap<MacAddr, SocketAddr>,
    assumed_rssi: i8,
    recv_buffer: Vec<u8>,
}

impl LinkSocket {
    /// Bind a link socket with default options.
    pub async fn bind(addr: SocketAddr, link_addr: MacAddr) -> io::Result<Self> {
        LinkSocketBuilder::new().bind(addr, link_addr).await
    }

    /// Get the local UDP address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Get this device's link address.
    pub fn link_addr(&self) -> MacAddr {
        self.link_addr
    }

    /// Add a UDP address that receives broadcasts.
    pub fn add_medium(&mut self, addr: SocketAddr) {
        if !self.medium.contains(&addr) {
            self.medium.push(addr);
        }
    }

    /// UDP addresses that receive broadcasts.
    pub fn medium(&self) -> &[SocketAddr] {
        &self.medium
    }

    /// Send a session transmission.
    pub async fn send(&self, transmit: &Transmit) -> io::Result<()> {
        let frame = encode_envelope(transmit.destination.addr(), self.link_addr, &transmit.bytes);

        let known = match transmit.destination {
            Destination::Unicast(addr) => self.neighbors.get(&addr).copied(),
            Destination::Broadcast => None,
        };
        if let Some(target) = known {
            self.socket.send_to(&frame, target).await?;
            return Ok(());
        }

        if self.medium.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no medium address configured",
            ));
        }
        for target in &self.medium {
            self.socket.send_to(&frame, *target).await?;
        }
        Ok(())
    }

    /// Receive the next frame addressed to this device or to everyone.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> io::Result<LinkFrame> {
        loop {
            let (len, udp_from) = self.socket.recv_from(&mut self.recv_buffer).await?;
            let Some((destination, source, packet)) = decode_envelope(&self.recv_buffer[..len])
            else {
                trace!(%udp_from, len, "dropping datagram without envelope");
                continue;
            };

            if source == self.link_addr {
                continue;
            }
            if destination != self.link_addr && !destination.is_broadcast() {
                trace!(%source, %destination, "frame for another device");
                continue;
            }

            self.neighbors.insert(source, udp_from);
            return Ok(LinkFrame {
                from: source,
                bytes: packet.to_vec(),
                rssi: self.assumed_rssi,
            });
        }
    }
}

/// Builder for [`LinkSocket`].
#[derive(Debug, Clone)]
pub struct LinkSocketBuilder {
    recv_buffer_size: usize,
    assumed_rssi: i8,
    broadcast: bool,
    medium: Vec<SocketAddr>,
}

impl Default for LinkSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSocketBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            assumed_rssi: DEFAULT_ASSUMED_RSSI,
            broadcast: false,
            medium: Vec::new(),
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(LINK_HEADER_SIZE + MAX_PACKET_SIZE);
        self
    }

    /// Set the signal strength reported for received frames.
    pub fn assumed_rssi(mut self, rssi: i8) -> Self {
        self.assumed_rssi = rssi;
        self
    }

    /// Enable `SO_BROADCAST`, needed when the medium is a broadcast address.
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    /// Add a UDP address that receives broadcasts.
    pub fn medium(mut self, addr: SocketAddr) -> Self {
        self.medium.push(addr);
        self
    }

    /// Bind to `addr` as the device `link_addr`.
    pub async fn bind(self, addr: SocketAddr, link_addr: MacAddr) -> io::Result<LinkSocket> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(self.broadcast)?;
        Ok(LinkSocket {
            socket,
            link_addr,
            medium: self.medium,
            neighbors: HashMap::new(),
            assumed_rssi: self.assumed_rssi,
            recv_buffer: vec![0u8; self.recv_buffer_size],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0A]);
    const B: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0B]);
    const C: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0C]);

    #[test]
    fn test_envelope() {
        let frame = encode_envelope(B, A, b"pkt");
        assert_eq!(frame.len(), LINK_HEADER_SIZE + 3);

        let (dst, src, packet) = decode_envelope(&frame).unwrap();
        assert_eq!((dst, src, packet), (B, A, &b"pkt"[..]));
        assert!(decode_envelope(&frame[..5]).is_none());
    }

    #[test]
    fn test_builder_keeps_minimum_buffer() {
        let builder = LinkSocketBuilder::new().recv_buffer_size(16).assumed_rssi(-60);
        assert_eq!(builder.recv_buffer_size, LINK_HEADER_SIZE + MAX_PACKET_SIZE);
        assert_eq!(builder.assumed_rssi, -60);
    }

    #[tokio::test]
    async fn test_broadcast_and_unicast_filtering() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut a = LinkSocket::bind(any, A).await.unwrap();
        let mut b = LinkSocket::bind(any, B).await.unwrap();
        a.add_medium(b.local_addr().unwrap());
        b.add_medium(a.local_addr().unwrap());

        a.send(&Transmit {
            destination: Destination::Unicast(C),
            bytes: b"not for b".to_vec(),
        })
        .await
        .unwrap();
        a.send(&Transmit {
            destination: Destination::Broadcast,
            bytes: b"hello".to_vec(),
        })
        .await
        .unwrap();

        let frame = b.recv().await.unwrap();
        assert_eq!(frame.from, A);
        assert_eq!(frame.bytes, b"hello");
        assert_eq!(frame.rssi, DEFAULT_ASSUMED_RSSI);

        b.send(&Transmit {
            destination: Destination::Unicast(A),
            bytes: b"reply".to_vec(),
        })
        .await
        .unwrap();
        let frame = a.recv().await.unwrap();
        assert_eq!((frame.from, frame.bytes), (B, b"reply".to_vec()));
    }

    #[tokio::test]
    async fn test_send_without_medium_fails() {
        let socket = LinkSocket::bind("127.0.0.1:0".parse().unwrap(), A)
            .await
            .unwrap();
        let err = socket
            .send(&Transmit {
                destination: Destination::Broadcast,
                bytes: vec![1],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
