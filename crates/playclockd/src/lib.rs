//! Service assembly for playclockd
//!
//! The binary in `main.rs` is a thin shell around [`service::Service`]; the
//! wiring lives here so integration tests can run the full daemon in-process
//! against a temporary socket and a controlled clock.

pub mod service;
