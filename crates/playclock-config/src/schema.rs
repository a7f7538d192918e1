//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Device catalog
    #[serde(default)]
    pub devices: Vec<RawDevice>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: XDG runtime dir)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Expiry sweep interval in milliseconds (default: 1000)
    pub tick_interval_ms: Option<u64>,
}

/// Raw device definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDevice {
    /// Unique stable ID (e.g. "pc-01")
    pub id: String,

    /// Display name
    pub name: String,

    /// Device kind: "computer" or "console"
    pub kind: String,
}
