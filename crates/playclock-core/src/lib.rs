//! Core session engine for playclockd
//!
//! This crate is the heart of the daemon, containing:
//! - The session state machine (start, add time, pause, resume, end, expire)
//! - Per-device serialization of mutating operations
//! - The deadline queue and background expiry sweep
//! - Change notification fan-out for connected observers
//! - The device registry (catalog, connectivity tracking)

mod engine;
mod locks;
mod notify;
mod registry;
mod scheduler;

pub use engine::*;
pub use locks::*;
pub use notify::*;
pub use registry::*;
pub use scheduler::*;
