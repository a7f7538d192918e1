//! Shared utilities for playclockd
//!
//! This crate provides:
//! - ID types (DeviceId, SessionId, ClientId)
//! - The `Clock` abstraction (system and test clocks)
//! - Error types
//! - Rate limiting helpers
//! - Default paths for socket and data directories

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
