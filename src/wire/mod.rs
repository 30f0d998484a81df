//! P2P Link - Wire Layer
//!
//! Implements:
//! - Transport addresses ([`MacAddr`])
//! - Packet encoding and decoding ([`Packet`])
//!
//! Both peers compute identical header layouts, so field order, widths and
//! message type values here are fixed.

mod address;
mod packet;

pub use address::*;
pub use packet::*;
