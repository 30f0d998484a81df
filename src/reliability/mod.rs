//! P2P Link - Reliability Layer
//!
//! Implements:
//! - Outgoing sequence numbers and duplicate detection ([`SequenceTracker`])
//! - The single in-flight message with bounded retransmission ([`RetryEngine`])

mod retry;
mod sequence;

pub use retry::*;
pub use sequence::*;
