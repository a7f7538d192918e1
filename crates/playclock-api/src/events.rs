//! Event types for playclockd -> client streaming

use chrono::{DateTime, Utc};
use playclock_util::DeviceId;
use serde::{Deserialize, Serialize};

use crate::API_VERSION;

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients.
///
/// Events carry no state beyond the device they concern: delivery is
/// best-effort and at-least-once, so observers re-fetch authoritative state
/// instead of trusting an event's snapshot of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Something about this device changed (session or connectivity).
    /// Subscribers re-fetch the device view.
    DeviceChanged { device_id: DeviceId },

    /// The device's session ran out of time. The terminal locks itself.
    TimeOver { device_id: DeviceId },

    /// Service is shutting down
    Shutdown,
}
