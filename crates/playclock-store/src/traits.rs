//! Store trait definitions

use chrono::{DateTime, Utc};
use playclock_api::{Connectivity, Device, Session};
use playclock_util::{DeviceId, SessionId};

use crate::StoreResult;

/// Main store trait.
///
/// Implementations must be safe to share across tasks; the engine serializes
/// writes per device above this layer, so the store only guarantees that each
/// call is individually atomic.
pub trait Store: Send + Sync {
    // Devices

    /// Insert a device, or refresh the name/kind of an existing one.
    /// Connectivity and last_seen of an existing row are left untouched.
    fn upsert_device(&self, device: &Device) -> StoreResult<()>;

    /// Get a device by ID
    fn get_device(&self, id: &DeviceId) -> StoreResult<Option<Device>>;

    /// List all devices, ordered by ID
    fn list_devices(&self) -> StoreResult<Vec<Device>>;

    /// Update a device's connectivity and last_seen
    fn set_connectivity(
        &self,
        id: &DeviceId,
        connectivity: Connectivity,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()>;

    // Sessions

    /// Insert a new session row
    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Rewrite an existing session row (matched by ID)
    fn update_session(&self, session: &Session) -> StoreResult<()>;

    /// Get a session by ID
    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// The device's current session: the at-most-one active or paused row
    fn current_session(&self, device_id: &DeviceId) -> StoreResult<Option<Session>>;

    /// All sessions with status `active`, across devices (startup recovery)
    fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Session history, newest first
    fn list_sessions(&self, limit: Option<u32>) -> StoreResult<Vec<Session>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
