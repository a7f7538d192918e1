//! Device catalog and connectivity tracking

use chrono::{DateTime, Utc};
use playclock_api::{Connectivity, Device, DeviceView};
use playclock_config::DeviceSeed;
use playclock_store::Store;
use playclock_util::{DeviceId, PlayclockError, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::Notifier;

/// The device catalog.
///
/// Devices come from configuration; the registry seeds them into the store at
/// boot and tracks their connectivity as agents check in and drop off.
/// Connectivity is advisory only and never blocks session operations.
pub struct DeviceRegistry {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Upsert the configured catalog. New devices start offline; existing
    /// ones keep their connectivity and last-seen but pick up renamed
    /// names and kinds.
    pub fn seed(&self, seeds: &[DeviceSeed]) -> Result<usize> {
        for seed in seeds {
            let device = Device {
                id: seed.id.clone(),
                name: seed.name.clone(),
                kind: seed.kind,
                connectivity: Connectivity::Offline,
                last_seen: None,
            };
            self.store.upsert_device(&device)?;
            debug!(device_id = %device.id, name = %device.name, "Device seeded");
        }
        if !seeds.is_empty() {
            info!(count = seeds.len(), "Device catalog seeded");
        }
        Ok(seeds.len())
    }

    pub fn get(&self, device_id: &DeviceId) -> Result<Device> {
        self.store
            .get_device(device_id)?
            .ok_or_else(|| PlayclockError::DeviceNotFound(device_id.clone()))
    }

    pub fn list(&self) -> Result<Vec<Device>> {
        Ok(self.store.list_devices()?)
    }

    /// Record a connectivity signal for a device.
    ///
    /// Every signal refreshes `last_seen`; a notice is published only when
    /// the online flag actually flips, so steady heartbeats stay quiet.
    pub fn set_connectivity(
        &self,
        device_id: &DeviceId,
        connectivity: Connectivity,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        let before = self.get(device_id)?;
        self.store.set_connectivity(device_id, connectivity, now)?;

        if before.connectivity != connectivity {
            info!(
                device_id = %device_id,
                connectivity = %connectivity,
                "Device connectivity changed"
            );
            self.notifier.device_changed(device_id);
        } else {
            debug!(device_id = %device_id, "Heartbeat");
        }

        self.get(device_id)
    }

    /// One device together with its current session and remaining time
    pub fn view(&self, device_id: &DeviceId, now: DateTime<Utc>) -> Result<DeviceView> {
        let device = self.get(device_id)?;
        let session = self.store.current_session(device_id)?;
        Ok(DeviceView::new(device, session, now))
    }

    /// Every device with its current session, ordered by device id
    pub fn views(&self, now: DateTime<Utc>) -> Result<Vec<DeviceView>> {
        let devices = self.store.list_devices()?;
        let mut views = Vec::with_capacity(devices.len());
        for device in devices {
            let session = self.store.current_session(&device.id)?;
            views.push(DeviceView::new(device, session, now));
        }
        Ok(views)
    }
}
