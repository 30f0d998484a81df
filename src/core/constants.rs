//! Protocol constants for the P2P Link wire format and timing.
//!
//! Wire values are shared by both peers and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// First byte of every packet.
pub const START_BYTE: u8 = b'p';

/// Transport address width (a radio MAC address).
pub const ADDRESS_SIZE: usize = 6;

/// Connect packet size (start byte + mode id + message type).
pub const CONNECT_PACKET_SIZE: usize = 3;

/// Common header size for every packet except Connect
/// (start byte + mode id + message type + sequence number + address).
pub const HEADER_SIZE: usize = CONNECT_PACKET_SIZE + 1 + ADDRESS_SIZE;

/// Smallest packet the codec will look at.
pub const MIN_PACKET_SIZE: usize = CONNECT_PACKET_SIZE;

/// Maximum application payload carried by a Data or DataAck packet.
pub const MAX_PAYLOAD_SIZE: usize = 245;

/// Largest packet the codec produces.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Connection broadcast.
pub const MSG_TYPE_CONNECT: u8 = 0x00;

/// Start message, sent during the handshake.
pub const MSG_TYPE_START: u8 = 0x01;

/// Plain acknowledgment.
pub const MSG_TYPE_ACK: u8 = 0x02;

/// Acknowledgment carrying a reply payload.
pub const MSG_TYPE_DATA_ACK: u8 = 0x03;

/// Application data.
pub const MSG_TYPE_DATA: u8 = 0x04;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Delay between retransmissions of an unacknowledged message.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(40);

/// Upper bound of the random jitter added to retry and broadcast intervals.
pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(10);

/// Retransmissions after the first transmission before a message fails.
pub const DEFAULT_MAX_RETRIES: u8 = 5;

/// Interval between Connect broadcasts while pairing.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(100);

/// Total time allowed for a handshake before the attempt is abandoned.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between an abandoned handshake and the next attempt.
pub const DEFAULT_REINIT_DELAY: Duration = Duration::from_secs(1);

/// Weakest signal strength (dBm) a Connect broadcast may have to be answered.
pub const DEFAULT_MIN_RSSI: i8 = -70;
