//! Protocol types for playclockd IPC
//!
//! This crate defines the stable API between playclockd and clients:
//! - Commands (requests from operator dashboards and lock clients)
//! - Responses
//! - Events (service -> clients)
//! - Versioning
//!
//! It also carries the shared domain types (`Session`, `Device`) so every
//! observer derives remaining time from the same fields with the same
//! formula.

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
