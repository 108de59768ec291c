//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DsdError, Result};

/// Full disk-spindown configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub devices: DevicesConfig,
    pub spindown: SpindownConfig,
    pub commands: CommandsConfig,
    pub paths: PathsConfig,
}

/// Which block devices the daemon watches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DevicesConfig {
    /// Device names to track (`sda` or `/dev/sda` forms accepted).
    /// An empty list means "discover all candidate disks".
    pub tracked: Vec<String>,
    /// Directory containing the device nodes.
    pub device_dir: PathBuf,
}

/// Idle-detection timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpindownConfig {
    /// Seconds a device must be continuously idle before spin-down.
    pub idle_timeout_secs: u64,
    /// Seconds between poll cycles.
    pub polling_interval_secs: u64,
}

/// External power-management utilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsConfig {
    /// Standby-query utility (exit code 2 means "already asleep").
    pub query_bin: PathBuf,
    /// Spin-down utility.
    pub spindown_bin: PathBuf,
}

/// Filesystem paths used by dsd.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Kernel disk-statistics source polled each cycle.
    pub diskstats: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for SpindownConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1_800,
            polling_interval_secs: 10,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            query_bin: PathBuf::from("smartctl"),
            spindown_bin: PathBuf::from("hdparm"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("/etc/disk-spindown/config.toml"),
            diskstats: PathBuf::from("/proc/diskstats"),
            jsonl_log: PathBuf::from("/var/log/disk-spindown/activity.jsonl"),
        }
    }
}

impl DevicesConfig {
    /// Where device nodes live; falls back to `/dev` when left empty.
    #[must_use]
    pub fn effective_device_dir(&self) -> PathBuf {
        if self.device_dir.as_os_str().is_empty() {
            PathBuf::from("/dev")
        } else {
            self.device_dir.clone()
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from the default path;
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DsdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DsdError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.spindown.idle_timeout_secs)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.spindown.polling_interval_secs)
    }

    /// Deterministic hash of the effective config for reload change detection.
    ///
    /// Uses FNV-1a for cross-process-stable hashing (no `DefaultHasher` whose
    /// seed may vary across Rust releases).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DSD_DEVICES_TRACKED") {
            self.devices.tracked = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup("DSD_DEVICES_DEVICE_DIR") {
            self.devices.device_dir = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("DSD_SPINDOWN_IDLE_TIMEOUT_SECS") {
            self.spindown.idle_timeout_secs = parse_env_u64("DSD_SPINDOWN_IDLE_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DSD_SPINDOWN_POLLING_INTERVAL_SECS") {
            self.spindown.polling_interval_secs =
                parse_env_u64("DSD_SPINDOWN_POLLING_INTERVAL_SECS", &raw)?;
        }

        if let Some(raw) = lookup("DSD_COMMANDS_QUERY_BIN") {
            self.commands.query_bin = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DSD_COMMANDS_SPINDOWN_BIN") {
            self.commands.spindown_bin = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("DSD_PATHS_DISKSTATS") {
            self.paths.diskstats = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DSD_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.spindown.idle_timeout_secs == 0 {
            return Err(DsdError::InvalidConfig {
                details: "spindown.idle_timeout_secs must be >= 1".to_string(),
            });
        }
        if self.spindown.polling_interval_secs == 0 {
            return Err(DsdError::InvalidConfig {
                details: "spindown.polling_interval_secs must be >= 1".to_string(),
            });
        }
        // A poll interval longer than the idle timeout means the timeout can
        // only ever be observed late; reject it at startup instead.
        if self.spindown.polling_interval_secs > self.spindown.idle_timeout_secs {
            return Err(DsdError::InvalidConfig {
                details: format!(
                    "spindown.polling_interval_secs ({}) must be <= idle_timeout_secs ({})",
                    self.spindown.polling_interval_secs, self.spindown.idle_timeout_secs,
                ),
            });
        }

        for name in &self.devices.tracked {
            if name.trim().is_empty() {
                return Err(DsdError::InvalidConfig {
                    details: "devices.tracked contains a blank entry".to_string(),
                });
            }
        }

        if self.commands.query_bin.as_os_str().is_empty()
            || self.commands.spindown_bin.as_os_str().is_empty()
        {
            return Err(DsdError::InvalidConfig {
                details: "commands.query_bin and commands.spindown_bin must be non-empty"
                    .to_string(),
            });
        }

        if self.paths.diskstats.as_os_str().is_empty() {
            return Err(DsdError::InvalidConfig {
                details: "paths.diskstats must be non-empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| DsdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
