//! Configuration validation

use crate::schema::{RawConfig, RawDevice};
use playclock_api::DeviceKind;
use std::collections::HashSet;
use thiserror::Error;

/// Bounds for the expiry sweep interval
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Device '{device_id}': {message}")]
    DeviceError { device_id: String, message: String },

    #[error("Duplicate device ID: {0}")]
    DuplicateDeviceId(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Tick interval bounds
    if let Some(ms) = config.service.tick_interval_ms
        && !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&ms)
    {
        errors.push(ValidationError::GlobalError(format!(
            "tick_interval_ms must be between {} and {}, got {}",
            MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS, ms
        )));
    }

    // Check for duplicate device IDs
    let mut seen_ids = HashSet::new();
    for device in &config.devices {
        if !seen_ids.insert(&device.id) {
            errors.push(ValidationError::DuplicateDeviceId(device.id.clone()));
        }
    }

    // Validate each device
    for device in &config.devices {
        errors.extend(validate_device(device));
    }

    errors
}

fn validate_device(device: &RawDevice) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if device.id.trim().is_empty() {
        errors.push(ValidationError::DeviceError {
            device_id: device.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if device.name.trim().is_empty() {
        errors.push(ValidationError::DeviceError {
            device_id: device.id.clone(),
            message: "name cannot be empty".into(),
        });
    }

    if let Err(e) = parse_kind(&device.kind) {
        errors.push(ValidationError::DeviceError {
            device_id: device.id.clone(),
            message: e,
        });
    }

    errors
}

/// Parse a device kind string. Accepts a few venue-floor spellings.
pub fn parse_kind(s: &str) -> Result<DeviceKind, String> {
    match s.to_lowercase().as_str() {
        "computer" | "pc" => Ok(DeviceKind::Computer),
        "console" | "ps5" => Ok(DeviceKind::Console),
        other => Err(format!("Unknown device kind: {}", other)),
    }
}
