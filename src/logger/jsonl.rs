//! Line-delimited JSON activity log.
//!
//! One JSON object per line, assembled in memory and appended with a single
//! `write_all` so a concurrent `tail -f` never sees a torn line. Logging must
//! never take the daemon down, so writes degrade instead of failing:
//! primary file, then the fallback path, then stderr tagged `[DSD-JSONL]`,
//! then silent discard.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DsdError, Result};

const BUF_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Everything the daemon reports about itself and its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    StateChange,
    SpindownIssued,
    SpindownFailed,
    StandbyDetected,
    PollError,
    StateDump,
    ConfigReload,
    Error,
}

/// One log line. `ts`, `event` and `severity` are always present; the rest
/// is event-specific and omitted from the JSON when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    /// Seconds since the device's last transition, at decision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_secs: Option<u64>,
    /// Aggregate device→state map, for dump events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current UTC time and no optional fields.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            device: None,
            from_state: None,
            to_state: None,
            idle_secs: None,
            devices: None,
            uptime_secs: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Second-chance path on a different filesystem, tried when the primary
    /// cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotation threshold in bytes.
    pub max_size_bytes: u64,
    /// How many rotated files (`.1` … `.N`) to keep.
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/disk-spindown/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/dsd.jsonl")),
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

/// Which file a [`Sink::File`] currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileTarget {
    Primary,
    Fallback,
}

/// Current destination for log lines, in degradation order.
enum Sink {
    File {
        out: BufWriter<File>,
        target: FileTarget,
        written: u64,
    },
    Stderr,
    Discard,
}

/// Append-only JSONL writer with size-based rotation and degradation.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    last_fsync: SystemTime,
}

impl JsonlWriter {
    /// Open the log, walking the degradation chain as far as needed.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = match open_append(&config.path) {
            Ok((file, written)) => Sink::File {
                out: BufWriter::with_capacity(BUF_CAPACITY, file),
                target: FileTarget::Primary,
                written,
            },
            Err(_) => fallback_sink(&config),
        };
        Self {
            config,
            sink,
            last_fsync: SystemTime::now(),
        }
    }

    /// Serialize and append one entry as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.append(&line);
            }
            Err(e) => {
                // A non-serializable entry is a bug; report it and move on.
                let _ = writeln!(io::stderr(), "[DSD-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// Flush and sync file contents to disk.
    pub fn fsync(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
        self.last_fsync = SystemTime::now();
    }

    /// Degradation level as a short status word.
    pub fn state(&self) -> &str {
        match &self.sink {
            Sink::File {
                target: FileTarget::Primary,
                ..
            } => "normal",
            Sink::File {
                target: FileTarget::Fallback,
                ..
            } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    pub fn bytes_written(&self) -> u64 {
        match &self.sink {
            Sink::File { written, .. } => *written,
            _ => 0,
        }
    }

    /// Try to climb back to the primary file after a degradation. Called
    /// opportunistically; a failure leaves the current sink in place.
    pub fn try_recover(&mut self) {
        if matches!(
            self.sink,
            Sink::File {
                target: FileTarget::Primary,
                ..
            }
        ) {
            return;
        }
        if let Ok((file, written)) = open_append(&self.config.path) {
            self.sink = Sink::File {
                out: BufWriter::with_capacity(BUF_CAPACITY, file),
                target: FileTarget::Primary,
                written,
            };
            let _ = writeln!(
                io::stderr(),
                "[DSD-JSONL] recovered to primary path: {}",
                self.config.path.display()
            );
        }
    }

    fn append(&mut self, line: &str) {
        if let Sink::File { written, .. } = &self.sink {
            if written + line.len() as u64 > self.config.max_size_bytes {
                self.rotate();
            }
        }

        match &mut self.sink {
            Sink::File { out, written, .. } => {
                if out.write_all(line.as_bytes()).is_ok() {
                    *written += line.len() as u64;
                    self.fsync_if_due();
                } else {
                    self.degrade();
                    self.append(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[DSD-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    fn fsync_if_due(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    /// Drop one level in the chain after a write failure.
    fn degrade(&mut self) {
        let next = match &self.sink {
            Sink::File {
                target: FileTarget::Primary,
                ..
            } => fallback_sink(&self.config),
            Sink::File {
                target: FileTarget::Fallback,
                ..
            } => {
                let _ = writeln!(
                    io::stderr(),
                    "[DSD-JSONL] fallback write failed, using stderr"
                );
                Sink::Stderr
            }
            Sink::Stderr => Sink::Discard,
            Sink::Discard => Sink::Discard,
        };
        self.sink = next;
    }

    /// Shift `base.N-1` → `base.N`, current → `base.1`, reopen fresh.
    fn rotate(&mut self) {
        let Sink::File { out, target, .. } = &mut self.sink else {
            return;
        };
        let _ = out.flush();
        let base = match target {
            FileTarget::Primary => self.config.path.clone(),
            FileTarget::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
        };
        let target = *target;

        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, written)) => {
                self.sink = Sink::File {
                    out: BufWriter::with_capacity(BUF_CAPACITY, file),
                    target,
                    written,
                };
            }
            Err(_) => self.degrade(),
        }
    }
}

/// Build the post-primary sink: the fallback file when one is configured and
/// openable, stderr otherwise.
fn fallback_sink(config: &JsonlConfig) -> Sink {
    if let Some(fb) = &config.fallback_path {
        if let Ok((file, written)) = open_append(fb) {
            let _ = writeln!(
                io::stderr(),
                "[DSD-JSONL] primary path failed, using fallback: {}",
                fb.display()
            );
            return Sink::File {
                out: BufWriter::with_capacity(BUF_CAPACITY, file),
                target: FileTarget::Fallback,
                written,
            };
        }
    }
    let _ = writeln!(
        io::stderr(),
        "[DSD-JSONL] no writable log path, using stderr"
    );
    Sink::Stderr
}

/// Open (creating parents and the file as needed) for append; returns the
/// file and its current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DsdError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DsdError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

// ──────────────────── tests ────────────────────
