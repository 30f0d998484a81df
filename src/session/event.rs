//! Events and transmissions produced by a session.

use std::fmt;
use std::time::Duration;

use crate::wire::MacAddr;

/// Symmetry-breaking role assigned by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// No handshake has completed.
    #[default]
    Unassigned,
    /// This side's Start was acknowledged.
    First,
    /// This side acknowledged the peer's Start.
    Second,
}

impl Role {
    /// Check if a role has been assigned.
    pub fn is_assigned(self) -> bool {
        self != Role::Unassigned
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unassigned => write!(f, "unassigned"),
            Role::First => write!(f, "first"),
            Role::Second => write!(f, "second"),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, handshake not started.
    Unconnected,
    /// Handshake in progress.
    Connecting,
    /// Paired with a peer.
    Connected,
    /// Handshake failed or the peer left; waiting for a restart.
    Lost,
    /// Closed by the owner. Terminal.
    Closed,
}

/// Handshake progress reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Broadcasting for a peer.
    HandshakeStarted,
    /// The peer acknowledged our Start.
    LocalStartAcked,
    /// The peer's Start arrived.
    PeerStartReceived,
    /// Pairing complete.
    Connected(Role),
    /// The handshake did not converge, or the peer started over.
    Lost,
}

/// Terminal outcome of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    /// The peer acknowledged the message, optionally with a reply payload.
    Acked(Option<Vec<u8>>),
    /// Every attempt went unacknowledged.
    Failed,
}

/// Everything a session reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake progress.
    Connection(ConnectionEvent),
    /// A new application message from the peer.
    MessageReceived(Vec<u8>),
    /// An outbound message completed.
    MessageResult {
        /// Acknowledged or failed.
        status: MessageStatus,
        /// The payload originally passed to `send_message`.
        payload: Vec<u8>,
    },
}

/// Where a transmission goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every listener on the medium.
    Broadcast,
    /// A single device.
    Unicast(MacAddr),
}

impl Destination {
    /// Link-layer address for this destination.
    pub fn addr(&self) -> MacAddr {
        match self {
            Destination::Broadcast => MacAddr::BROADCAST,
            Destination::Unicast(addr) => *addr,
        }
    }
}

/// A packet the owner must hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Where to send it.
    pub destination: Destination,
    /// Encoded packet.
    pub bytes: Vec<u8>,
}

/// Outcome of a physical transmission reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The transport sent the frame.
    Success,
    /// The transport gave up on the frame.
    Failed,
}

/// Session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Packets queued for transmission, retransmissions included.
    pub sent: u64,
    /// Retransmissions of the in-flight message.
    pub retransmissions: u64,
    /// Packets handed to the session.
    pub received: u64,
    /// Packets that failed to decode.
    pub malformed: u64,
    /// Packets for another mode, peer or state.
    pub foreign: u64,
    /// Retried packets already accepted once.
    pub duplicates: u64,
    /// Outbound messages acknowledged.
    pub acked: u64,
    /// Outbound messages that exhausted their attempts.
    pub failed: u64,
    /// Most recent unambiguous round-trip time.
    pub last_rtt: Option<Duration>,
}
