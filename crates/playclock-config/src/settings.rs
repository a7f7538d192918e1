//! Validated configuration structures

use crate::schema::{RawConfig, RawDevice};
use crate::validation::parse_kind;
use playclock_api::DeviceKind;
use playclock_util::DeviceId;
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Service settings
    pub service: ServiceConfig,

    /// Device catalog to seed into the store
    pub devices: Vec<DeviceSeed>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let devices = raw.devices.into_iter().map(DeviceSeed::from_raw).collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            devices,
        }
    }

    /// Get a device seed by ID
    pub fn get_device(&self, id: &DeviceId) -> Option<&DeviceSeed> {
        self.devices.iter().find(|d| &d.id == id)
    }
}

/// Service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    /// How often the expiry scheduler sweeps due deadlines
    pub tick_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: crate::schema::RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(playclock_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(playclock_util::default_data_dir),
            tick_interval: Duration::from_millis(raw.tick_interval_ms.unwrap_or(1000)),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: playclock_util::default_socket_path(),
            data_dir: playclock_util::default_data_dir(),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// A device as declared in config, before it exists in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSeed {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceSeed {
    fn from_raw(raw: RawDevice) -> Self {
        // Kind string was checked during validation
        let kind = parse_kind(&raw.kind).unwrap_or(DeviceKind::Computer);

        Self {
            id: DeviceId::new(raw.id),
            name: raw.name,
            kind,
        }
    }
}
