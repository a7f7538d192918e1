//! Unix-socket transport for playclockd.
//!
//! The daemon listens on a Unix domain socket and speaks newline-delimited
//! JSON: each line is one `Request`, `Response`, or `Event` envelope from
//! `playclock-api`. [`IpcServer`] owns the listener and per-connection
//! plumbing; [`IpcClient`] is the matching library side used by tooling and
//! the integration tests. Business logic stays out of this crate: requests
//! are handed to the daemon's dispatch loop, and event routing only looks at
//! a connection's subscription flag and device binding.

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// Transport-level failures, both sides of the socket
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed wire data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Peer closed the connection")]
    ConnectionClosed,

    #[error("Unexpected message: {0}")]
    InvalidMessage(String),

    #[error("Server reported an error: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
