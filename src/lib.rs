//! # P2P Link
//!
//! A two-peer reliable messaging protocol for devices sharing an unreliable,
//! connectionless broadcast medium (a radio link, or UDP broadcast).
//!
//! P2P Link provides:
//!
//! - **Discovery**: peers find each other through periodic Connect broadcasts
//! - **Roles**: a Start/Ack handshake assigns opposite roles (First, Second)
//! - **Reliability**: at-least-once delivery with bounded retries
//! - **Deduplication**: retried packets are delivered to the application once
//! - **Piggybacking**: a staged reply rides on the acknowledgment
//!
//! At most one message is in flight per session. There is no encryption, no
//! ordering across unrelated messages and no more than two peers per session.
//!
//! ## Feature Flags
//!
//! - `transport` (default): UDP link socket and tokio session driver
//!
//! ## Modules
//!
//! - [`core`]: Constants and error types (always included)
//! - [`wire`]: Addresses and the packet codec
//! - [`reliability`]: Sequence tracking and the retry engine
//! - [`session`]: The sans-IO session state machine
//! - [`transport`]: Async adapter (requires `transport` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use p2p_link::prelude::*;
//!
//! let config = SessionConfig::builder(b'd').build()?;
//! let mut session = Session::new(config, MacAddr::random())?;
//!
//! session.begin_connecting(Instant::now())?;
//! while let Some(transmit) = session.poll_transmit() {
//!     // hand `transmit.bytes` to the radio
//!     assert_eq!(transmit.destination, Destination::Broadcast);
//! }
//! assert_eq!(
//!     session.poll_event(),
//!     Some(SessionEvent::Connection(ConnectionEvent::HandshakeStarted))
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire format
pub mod wire;

// Sequence numbers and retries
pub mod reliability;

// Session state machine
pub mod session;

// Async adapter (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{ConfigError, PacketError, SendError, SessionError};

    pub use crate::wire::{MacAddr, Packet, PacketHeader};

    pub use crate::session::{
        ConnectionEvent, Destination, MessageStatus, Role, SendStatus, Session, SessionConfig,
        SessionEvent, SessionState, SessionStats, Transmit,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        LinkSocket, LinkSocketBuilder, SessionDriver, SessionHandle, TransportError,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{ConfigError, PacketError, SendError, SessionError};
pub use crate::session::{Role, Session, SessionConfig, SessionEvent};
pub use crate::wire::MacAddr;
