//! Error types for playclockd

use thiserror::Error;

use crate::DeviceId;

/// Core error type for playclockd operations
#[derive(Debug, Error)]
pub enum PlayclockError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("No session on device: {0}")]
    SessionNotFound(DeviceId),

    #[error("Device already has a session: {0}")]
    SessionConflict(DeviceId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlayclockError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::IpcError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PlayclockError>;
