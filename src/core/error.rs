//! Error types for the P2P Link protocol.

use thiserror::Error;

use super::constants::MAX_PAYLOAD_SIZE;

/// Errors produced while decoding or encoding a packet.
///
/// A shared broadcast medium carries plenty of noise, so every decode error
/// results in a silent drop. Nothing is ever sent back in response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Packet shorter than its header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size for this packet.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// First byte is not the protocol start byte.
    #[error("bad start byte 0x{0:02x}")]
    BadStartByte(u8),

    /// Message type outside the known enumeration.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Payload does not fit in a single packet.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },
}

impl PacketError {
    /// Check if this error should result in a silent drop.
    ///
    /// Only encoding can fail loudly (an oversized payload handed in by the
    /// caller); everything seen on receive is dropped without a response.
    pub fn is_silent_drop(&self) -> bool {
        !matches!(self, PacketError::PayloadTooLarge { .. })
    }
}

/// Errors returned synchronously to a caller of `send_message`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// A message is already awaiting acknowledgment.
    #[error("a message is already in flight")]
    Busy,

    /// The session has no connected peer.
    #[error("session is not connected")]
    NotConnected,

    /// The session was closed.
    #[error("session is closed")]
    Closed,

    /// Payload does not fit in a single packet.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },
}

impl SendError {
    /// Build a `PayloadTooLarge` error for the given payload length.
    pub fn payload_too_large(len: usize) -> Self {
        SendError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        }
    }
}

/// Errors from session lifecycle operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// A handshake is already running.
    #[error("handshake already in progress")]
    AlreadyConnecting,

    /// The session is already connected to a peer.
    #[error("session already connected")]
    AlreadyConnected,

    /// The operation needs a connected peer.
    #[error("session is not connected")]
    NotConnected,

    /// A role override must name First or Second.
    #[error("role override must be first or second")]
    InvalidRole,

    /// The session was closed.
    #[error("session is closed")]
    Closed,
}

/// Invalid session configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration that must be non-zero is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The retry budget is zero.
    #[error("max_retries must be at least 1")]
    NoRetries,

    /// The local address cannot identify a single device.
    #[error("local address {0} is not a unicast address")]
    InvalidLocalAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_drop_errors() {
        assert!(PacketError::BadStartByte(b'x').is_silent_drop());
        assert!(PacketError::UnknownMessageType(9).is_silent_drop());
        assert!(
            PacketError::TooShort {
                expected: 10,
                actual: 3
            }
            .is_silent_drop()
        );

        assert!(
            !PacketError::PayloadTooLarge {
                len: 300,
                max: MAX_PAYLOAD_SIZE
            }
            .is_silent_drop()
        );
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = SendError::payload_too_large(300);
        assert_eq!(err.to_string(), "payload of 300 bytes exceeds maximum of 245");
    }
}
