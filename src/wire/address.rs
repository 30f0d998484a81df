//! Transport addresses.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

use crate::core::ADDRESS_SIZE;

/// A 48-bit transport address, written on the wire in network order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; ADDRESS_SIZE]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: Self = Self([0xFF; ADDRESS_SIZE]);

    /// Create an address from bytes.
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random, locally administered unicast address.
    pub fn random() -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        // Locally administered, unicast.
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        Self(bytes)
    }

    /// Read an address from the start of a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_SIZE] = bytes.get(..ADDRESS_SIZE)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get the address as bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Check if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Check if this address names a group rather than one device.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl From<[u8; ADDRESS_SIZE]> for MacAddr {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self::new(bytes)
    }
}

impl From<MacAddr> for [u8; ADDRESS_SIZE] {
    fn from(addr: MacAddr) -> [u8; ADDRESS_SIZE] {
        addr.0
    }
}

/// Error parsing a textual address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct ParseAddrError(String);

impl FromStr for MacAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ADDRESS_SIZE];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| ParseAddrError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseAddrError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseAddrError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}
