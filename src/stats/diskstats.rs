//! /proc/diskstats reader.
//!
//! The kernel format is whitespace-separated positional fields, one line per
//! block device. Only three fields matter here (0-indexed):
//!
//!   2 — device name, 5 — sectors read, 9 — sectors written
//!
//! Newer kernels append discard and flush fields; older ones stop earlier.
//! Lines too short to carry field 9 are skipped rather than treated as an
//! error, so a partially unexpected format degrades to fewer devices, not a
//! dead daemon.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{DsdError, Result};
use crate::engine::state::{CounterSnapshot, DeviceId, SnapshotMap};

const DEVICE_NAME_FIELD: usize = 2;
const SECTORS_READ_FIELD: usize = 5;
const SECTORS_WRITTEN_FIELD: usize = 9;

/// Reads counter snapshots for a tracked set of devices from a
/// diskstats-formatted file.
#[derive(Debug, Clone)]
pub struct DiskstatsReader {
    path: PathBuf,
}

impl DiskstatsReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the stats source. Any read failure is returned as an
    /// error so the caller can skip the whole cycle; a successful read never
    /// fails on content.
    pub fn read(&self, tracked: &[DeviceId]) -> Result<SnapshotMap> {
        let raw = fs::read_to_string(&self.path).map_err(|e| DsdError::Diskstats {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        Ok(parse_diskstats(&raw, tracked))
    }
}

/// Parse diskstats text into snapshots for the tracked devices. Devices not
/// present in the text are simply absent from the result.
#[must_use]
pub fn parse_diskstats(raw: &str, tracked: &[DeviceId]) -> SnapshotMap {
    let mut map = SnapshotMap::new();
    for line in raw.lines() {
        if let Some((device, snapshot)) = parse_line(line) {
            if tracked.contains(&device) {
                map.insert(device, snapshot);
            }
        }
    }
    map
}

fn parse_line(line: &str) -> Option<(DeviceId, CounterSnapshot)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() <= SECTORS_WRITTEN_FIELD {
        return None;
    }
    let device = DeviceId::normalize(fields[DEVICE_NAME_FIELD]);
    let sectors_read = fields[SECTORS_READ_FIELD].parse().ok()?;
    let sectors_written = fields[SECTORS_WRITTEN_FIELD].parse().ok()?;
    Some((
        device,
        CounterSnapshot {
            sectors_read,
            sectors_written,
        },
    ))
}
