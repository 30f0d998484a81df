//! Packet encoding and decoding.
//!
//! Wire format (every field one byte unless noted):
//! ```text
//! Connect:  +-------+---------+------+
//!           | 'p'   | mode id | type |
//!           +-------+---------+------+
//!
//! Others:   +-------+---------+------+-----+--------------------+-----------+
//!           | 'p'   | mode id | type | seq | sender (6 bytes)   | payload   |
//!           +-------+---------+------+-----+--------------------+-----------+
//! ```
//! Only Data and DataAck carry a payload.

use crate::core::{
    CONNECT_PACKET_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, MIN_PACKET_SIZE, MSG_TYPE_ACK,
    MSG_TYPE_CONNECT, MSG_TYPE_DATA, MSG_TYPE_DATA_ACK, MSG_TYPE_START, PacketError, START_BYTE,
};

use super::address::MacAddr;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Connection broadcast.
    Connect = MSG_TYPE_CONNECT,
    /// Handshake start message.
    Start = MSG_TYPE_START,
    /// Acknowledgment.
    Ack = MSG_TYPE_ACK,
    /// Acknowledgment with a reply payload.
    DataAck = MSG_TYPE_DATA_ACK,
    /// Application data.
    Data = MSG_TYPE_DATA,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            MSG_TYPE_CONNECT => Some(Self::Connect),
            MSG_TYPE_START => Some(Self::Start),
            MSG_TYPE_ACK => Some(Self::Ack),
            MSG_TYPE_DATA_ACK => Some(Self::DataAck),
            MSG_TYPE_DATA => Some(Self::Data),
            _ => None,
        }
    }

    /// Convert the message type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether packets of this type carry a payload after the header.
    pub fn carries_payload(self) -> bool {
        matches!(self, Self::Data | Self::DataAck)
    }
}

/// Header shared by every packet type except Connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Application protocol identifier.
    pub mode_id: u8,
    /// Sequence number.
    pub seq: u8,
    /// Address of the sending device.
    pub sender: MacAddr,
}

impl PacketHeader {
    /// Create a new header.
    pub fn new(mode_id: u8, seq: u8, sender: MacAddr) -> Self {
        Self {
            mode_id,
            seq,
            sender,
        }
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Connection broadcast, no sequence number or address.
    Connect {
        /// Application protocol identifier.
        mode_id: u8,
    },
    /// Handshake start message.
    Start(PacketHeader),
    /// Plain acknowledgment of `header.seq`.
    Ack(PacketHeader),
    /// Acknowledgment of `header.seq` carrying a reply payload.
    DataAck(PacketHeader, Vec<u8>),
    /// Application data.
    Data(PacketHeader, Vec<u8>),
}

impl Packet {
    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Connect { .. } => MessageType::Connect,
            Packet::Start(_) => MessageType::Start,
            Packet::Ack(_) => MessageType::Ack,
            Packet::DataAck(..) => MessageType::DataAck,
            Packet::Data(..) => MessageType::Data,
        }
    }

    /// Get the mode identifier.
    pub fn mode_id(&self) -> u8 {
        match self {
            Packet::Connect { mode_id } => *mode_id,
            Packet::Start(h) | Packet::Ack(h) | Packet::DataAck(h, _) | Packet::Data(h, _) => {
                h.mode_id
            }
        }
    }

    /// Get the common header, absent for Connect.
    pub fn header(&self) -> Option<&PacketHeader> {
        match self {
            Packet::Connect { .. } => None,
            Packet::Start(h) | Packet::Ack(h) | Packet::DataAck(h, _) | Packet::Data(h, _) => {
                Some(h)
            }
        }
    }

    /// Get the payload (empty for types that carry none).
    pub fn payload(&self) -> &[u8] {
        match self {
            Packet::DataAck(_, payload) | Packet::Data(_, payload) => payload,
            _ => &[],
        }
    }

    /// Total wire size.
    pub fn wire_size(&self) -> usize {
        match self {
            Packet::Connect { .. } => CONNECT_PACKET_SIZE,
            _ => HEADER_SIZE + self.payload().len(),
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = vec![0u8; self.wire_size()];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode into an existing buffer, returns bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let payload = self.payload();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let size = self.wire_size();
        if buf.len() < size {
            return Err(PacketError::TooShort {
                expected: size,
                actual: buf.len(),
            });
        }

        buf[0] = START_BYTE;
        buf[1] = self.mode_id();
        buf[2] = self.message_type().as_byte();

        if let Some(header) = self.header() {
            buf[3] = header.seq;
            buf[4..HEADER_SIZE].copy_from_slice(header.sender.as_bytes());
            buf[HEADER_SIZE..size].copy_from_slice(payload);
        }

        Ok(size)
    }

    /// Decode from wire format.
    ///
    /// Bytes beyond the header of a Connect, Start or Ack are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(PacketError::TooShort {
                expected: MIN_PACKET_SIZE,
                actual: data.len(),
            });
        }

        if data[0] != START_BYTE {
            return Err(PacketError::BadStartByte(data[0]));
        }

        let mode_id = data[1];
        let message_type =
            MessageType::from_byte(data[2]).ok_or(PacketError::UnknownMessageType(data[2]))?;

        if message_type == MessageType::Connect {
            return Ok(Packet::Connect { mode_id });
        }

        if data.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let sender = MacAddr::from_slice(&data[4..HEADER_SIZE]).ok_or(PacketError::TooShort {
            expected: HEADER_SIZE,
            actual: data.len(),
        })?;
        let header = PacketHeader::new(mode_id, data[3], sender);
        let payload = if message_type.carries_payload() {
            data[HEADER_SIZE..].to_vec()
        } else {
            Vec::new()
        };

        Ok(match message_type {
            MessageType::Connect => Packet::Connect { mode_id },
            MessageType::Start => Packet::Start(header),
            MessageType::Ack => Packet::Ack(header),
            MessageType::DataAck => Packet::DataAck(header, payload),
            MessageType::Data => Packet::Data(header, payload),
        })
    }
}
