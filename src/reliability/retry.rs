//! Retry and acknowledgment tracking
//!
//! Owns the single unacknowledged outbound message and decides, each time its
//! retry timer fires, whether to retransmit or give up.

use std::time::{Duration, Instant};

use crate::core::{DEFAULT_MAX_RETRIES, SendError};
use crate::wire::MacAddr;

/// What the in-flight message is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlightKind {
    /// The local handshake Start message.
    Start,
    /// An application message, holding the original payload.
    Data(Vec<u8>),
}

/// The single outbound message awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// Encoded packet, retransmitted byte for byte.
    pub bytes: Vec<u8>,
    /// Address the packet is sent to and the ack is expected from.
    pub destination: MacAddr,
    /// Sequence number carried by the packet.
    pub seq: u8,
    /// Retransmissions so far (the first transmission is not counted).
    pub retries: u8,
    /// Start or Data.
    pub kind: InFlightKind,
    /// Time of the first transmission.
    pub sent_at: Instant,
}

impl InFlight {
    /// Create an in-flight record for a freshly transmitted packet.
    pub fn new(
        bytes: Vec<u8>,
        destination: MacAddr,
        seq: u8,
        kind: InFlightKind,
        now: Instant,
    ) -> Self {
        Self {
            bytes,
            destination,
            seq,
            retries: 0,
            kind,
            sent_at: now,
        }
    }
}

/// Decision taken when the retry timer fires.
#[derive(Debug)]
pub enum RetryDecision {
    /// Send these bytes again and re-arm the retry timer.
    Retransmit {
        /// Bytes to resend.
        bytes: Vec<u8>,
        /// Destination of the resend.
        destination: MacAddr,
        /// Retransmission count including this one.
        retries: u8,
    },
    /// Attempts are used up; the slot has been cleared.
    Exhausted(InFlight),
}

/// Acknowledgment engine
///
/// Holds at most one [`InFlight`] message. A new message is refused with
/// [`SendError::Busy`] until the current one is acknowledged or abandoned.
#[derive(Debug)]
pub struct RetryEngine {
    in_flight: Option<InFlight>,
    max_retries: u8,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryEngine {
    /// Create an engine allowing `max_retries` retransmissions per message.
    pub fn new(max_retries: u8) -> Self {
        Self {
            in_flight: None,
            max_retries,
        }
    }

    /// Check if a message is awaiting acknowledgment.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The message awaiting acknowledgment, if any.
    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Take ownership of a newly transmitted message.
    pub fn begin(&mut self, in_flight: InFlight) -> Result<(), SendError> {
        if self.in_flight.is_some() {
            return Err(SendError::Busy);
        }
        self.in_flight = Some(in_flight);
        Ok(())
    }

    /// The retry timer fired, or the transport reported a failed send.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn on_retry_due(&mut self) -> Option<RetryDecision> {
        let in_flight = self.in_flight.as_mut()?;

        if in_flight.retries >= self.max_retries {
            return self.in_flight.take().map(RetryDecision::Exhausted);
        }

        in_flight.retries += 1;
        Some(RetryDecision::Retransmit {
            bytes: in_flight.bytes.clone(),
            destination: in_flight.destination,
            retries: in_flight.retries,
        })
    }

    /// Process an acknowledgment for `seq` received from `from`.
    ///
    /// Returns the completed message when it matches the in-flight one.
    /// Stale or foreign acknowledgments return `None` and change nothing.
    pub fn on_ack(&mut self, from: MacAddr, seq: u8) -> Option<InFlight> {
        match &self.in_flight {
            Some(in_flight) if in_flight.seq == seq && in_flight.destination == from => {
                self.in_flight.take()
            }
            _ => None,
        }
    }

    /// Round-trip sample for an acknowledged message.
    ///
    /// Only messages that were never retransmitted give an unambiguous sample.
    pub fn rtt_sample(completed: &InFlight, now: Instant) -> Option<Duration> {
        (completed.retries == 0).then(|| now.saturating_duration_since(completed.sent_at))
    }

    /// Drop the in-flight message without a retry decision.
    pub fn abandon(&mut self) -> Option<InFlight> {
        self.in_flight.take()
    }
}
