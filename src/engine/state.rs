//! Per-device activity state: identifiers, counter snapshots, and the state
//! store owned by the poll loop.
//!
//! The store is plain data passed by reference into the classifier and the
//! controller — no ambient globals, no synchronization (the loop is strictly
//! sequential).

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Normalized block-device name (`sda`), stable across poll cycles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Normalize a raw config or kernel name: trim, strip any path prefix
    /// (`/dev/sda` → `sda`), lowercase.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        let leaf = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self(leaf.to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// OS path for handing to the power utilities (`/dev/sda`).
    #[must_use]
    pub fn os_path(&self, device_dir: &Path) -> PathBuf {
        device_dir.join(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read/written sector counters for one device at one instant.
///
/// Counters are monotonically non-decreasing for the lifetime of the device;
/// wraparound shows up as a plain inequality and therefore as activity.
/// Equality of both counters across two polls is the sole idle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub sectors_read: u64,
    pub sectors_written: u64,
}

/// One poll cycle's snapshot for all tracked devices present in the kernel
/// statistics. Hot-unplugged devices are simply absent.
pub type SnapshotMap = BTreeMap<DeviceId, CounterSnapshot>;

/// Coarse per-device activity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Counters changed since the previous poll, or first observation.
    Active,
    /// Counters unchanged; spin-down not yet issued.
    Idle,
    /// Continuously idle past the timeout and a spin-down has been confirmed.
    Poweroff,
}

impl ActivityState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Poweroff => "POWEROFF",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored classification plus the instant of the last *transition*.
///
/// `since` never moves on a same-state re-poll; that is what makes elapsed
/// idle time meaningful.
#[derive(Debug, Clone, Copy)]
pub struct DeviceState {
    pub state: ActivityState,
    pub since: Instant,
}

/// All per-device states, one entry per tracked device, created on first
/// successful classification and kept for the daemon's lifetime.
#[derive(Debug, Default)]
pub struct StateStore {
    states: BTreeMap<DeviceId, DeviceState>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, device: &DeviceId) -> Option<DeviceState> {
        self.states.get(device).copied()
    }

    /// Record a state transition, stamping `since` with the transition time.
    pub fn transition(&mut self, device: &DeviceId, state: ActivityState, now: Instant) {
        self.states
            .insert(device.clone(), DeviceState { state, since: now });
    }

    /// Drop entries for devices no longer tracked (config reload).
    pub fn retain_tracked(&mut self, tracked: &[DeviceId]) {
        self.states.retain(|device, _| tracked.contains(device));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &DeviceState)> {
        self.states.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
