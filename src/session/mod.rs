//! P2P Link - Session Layer
//!
//! Implements:
//! - Session configuration ([`SessionConfig`])
//! - Handshake and role assignment ([`Handshake`])
//! - The per-peer session state machine ([`Session`])
//! - Deadline bookkeeping ([`TimerTable`])
//! - Events and transmissions handed to the owner

mod config;
mod event;
mod handshake;
#[allow(clippy::module_inception)]
mod session;
mod timer;

pub use config::*;
pub use event::*;
pub use handshake::*;
pub use session::*;
pub use timer::*;
