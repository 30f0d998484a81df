//! P2P Link - Core constants and error types.
//!
//! This module has no dependencies on the other layers.

mod constants;
mod error;

pub use constants::*;
pub use error::*;
