//! Device discovery and tracked-set resolution.
//!
//! Discovery lists whole-disk SATA/IDE nodes under the device directory:
//! names matching `[sh]d` followed by letters only, so `sda` and `hdc`
//! qualify while partitions (`sda1`), NVMe namespaces and loop devices do
//! not. NVMe drives manage their own power states and are deliberately
//! outside this daemon's reach.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::config::Config;
use crate::core::errors::{DsdError, Result};
use crate::engine::state::DeviceId;

fn whole_disk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[sh]d[a-z]+$").unwrap())
}

/// Tracked set after reconciling configuration against present devices.
#[derive(Debug, Clone)]
pub struct ResolvedDevices {
    /// Devices the daemon will poll, sorted.
    pub devices: Vec<DeviceId>,
    /// True when the tracked list was empty and discovery supplied the set.
    pub discovered_all: bool,
    /// Configured devices with no node under the device directory.
    pub dropped: Vec<DeviceId>,
}

/// List whole-disk device nodes present under `device_dir`.
pub fn discover_devices(device_dir: &Path) -> Result<Vec<DeviceId>> {
    let entries = fs::read_dir(device_dir).map_err(|e| DsdError::io(device_dir, e))?;
    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DsdError::io(device_dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if whole_disk_pattern().is_match(name) {
            devices.push(DeviceId::normalize(name));
        }
    }
    devices.sort();
    devices.dedup();
    Ok(devices)
}

/// Resolve the configured tracked list against discovery.
///
/// An empty tracked list means "all present whole-disk devices". A
/// non-empty list is normalized and intersected with what is present;
/// entries with no matching node are reported in `dropped` so the caller
/// can warn once at startup instead of erroring every cycle.
pub fn resolve_tracked(config: &Config) -> Result<ResolvedDevices> {
    let device_dir = config.devices.effective_device_dir();
    let discovered = discover_devices(&device_dir)?;

    if config.devices.tracked.is_empty() {
        return Ok(ResolvedDevices {
            devices: discovered,
            discovered_all: true,
            dropped: Vec::new(),
        });
    }

    let mut devices = Vec::new();
    let mut dropped = Vec::new();
    for raw in &config.devices.tracked {
        let device = DeviceId::normalize(raw);
        if discovered.contains(&device) {
            devices.push(device);
        } else {
            dropped.push(device);
        }
    }
    devices.sort();
    devices.dedup();
    Ok(ResolvedDevices {
        devices,
        discovered_all: false,
        dropped,
    })
}
