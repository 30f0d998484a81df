//! Sequence number tracking
//!
//! Assigns outgoing sequence numbers and detects retried inbound packets.

use std::collections::HashMap;

use crate::wire::MacAddr;

/// Outcome of checking an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// New packet, deliver it.
    Accept,
    /// Same sequence number as the last accepted packet from this sender.
    Duplicate,
}

/// Sequence tracker (one per session)
///
/// - `next_seq`: sequence number for the next newly transmitted message
/// - `last_accepted`: last sequence number accepted from each sender
///
/// Sequence numbers are one byte on the wire and wrap. Only the most recent
/// number is remembered per sender; a packet is a duplicate when it repeats
/// exactly that number, which is what a protocol-level retry looks like.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    next_seq: u8,
    last_accepted: HashMap<MacAddr, u8>,
}

impl SequenceTracker {
    /// Create a new tracker starting at sequence number zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next outgoing sequence number and advance the counter.
    pub fn next_outgoing(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Check an inbound sequence number from `from`.
    ///
    /// The first packet seen from a sender is always accepted.
    pub fn accept(&mut self, from: MacAddr, seq: u8) -> Acceptance {
        match self.last_accepted.insert(from, seq) {
            Some(last) if last == seq => Acceptance::Duplicate,
            _ => Acceptance::Accept,
        }
    }

    /// Last sequence number accepted from `from`, if any.
    pub fn last_accepted(&self, from: &MacAddr) -> Option<u8> {
        self.last_accepted.get(from).copied()
    }

    /// Forget every sender.
    ///
    /// The outgoing counter keeps running so a peer that still remembers
    /// our last number does not mistake the next packet for a retry.
    pub fn forget_peers(&mut self) {
        self.last_accepted.clear();
    }
}
