//! Command types for the playclockd protocol

use playclock_util::{ClientId, DeviceId};
use serde::{Deserialize, Serialize};

use crate::API_VERSION;

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    DeviceNotFound,
    SessionNotFound,
    SessionConflict,
    InvalidState,
    RateLimited,
    StorageError,
    InternalError,
}

impl ErrorCode {
    /// The HTTP status an HTTP gateway should answer with for this code.
    /// Kept here so the mapping stays in one place.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::DeviceNotFound => 404,
            ErrorCode::SessionNotFound => 404,
            ErrorCode::SessionConflict => 409,
            ErrorCode::InvalidState => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::StorageError => 500,
            ErrorCode::InternalError => 500,
        }
    }
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start a timed session on a device
    StartSession {
        device_id: DeviceId,
        duration_minutes: i64,
        /// Amount charged; opaque to the daemon
        #[serde(default)]
        amount: i64,
    },

    /// Extend the current session on a device
    AddTime {
        device_id: DeviceId,
        extra_minutes: i64,
    },

    /// Pause the countdown on a device
    PauseSession { device_id: DeviceId },

    /// Resume a paused session
    ResumeSession { device_id: DeviceId },

    /// End the current session early (operator action)
    EndSession { device_id: DeviceId },

    /// List all devices with their current sessions
    ListDevices,

    /// Get one device with its current session
    GetDevice { device_id: DeviceId },

    /// List session history, newest first
    ListSessions {
        #[serde(default)]
        limit: Option<u32>,
    },

    /// Bind this connection as the lock client for a device.
    /// Marks the device online and routes its time-over events here.
    RegisterDevice { device_id: DeviceId },

    /// Periodic liveness signal from a registered device client
    Heartbeat { device_id: DeviceId },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// The committed session after a mutating command
    Session(crate::Session),
    Devices {
        devices: Vec<crate::DeviceView>,
    },
    Device(crate::DeviceView),
    Sessions {
        sessions: Vec<crate::Session>,
    },
    /// Snapshot returned to a freshly registered lock client, so a
    /// reconnecting terminal converges without waiting for events
    Registered {
        device: crate::Device,
        session: Option<crate::Session>,
    },
    HeartbeatAck,
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(crate::HealthStatus),
    Pong,
}
