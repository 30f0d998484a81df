//! P2P Link - Transport Adapter
//!
//! Runs sessions over real sockets:
//!
//! - **Link socket**: [`LinkSocket`], a UDP emulation of a shared broadcast medium
//! - **Driver**: [`SessionDriver`], a tokio task owning one session, and its
//!   [`SessionHandle`]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application                     │
//! ├─────────────────────────────────────────┤
//! │   SessionHandle / event receiver        │
//! ├─────────────────────────────────────────┤
//! │   SessionDriver (one task per session)  │  ← This module
//! ├─────────────────────────────────────────┤
//! │   LinkSocket (UDP + link envelope)      │
//! └─────────────────────────────────────────┘
//! ```

mod driver;
mod socket;

pub use driver::*;
pub use socket::*;

use thiserror::Error;

use crate::core::{SendError, SessionError};

/// Errors surfaced by the async adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver task is no longer running.
    #[error("session driver stopped")]
    DriverStopped,

    /// The session refused a message.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The session refused a lifecycle operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}
