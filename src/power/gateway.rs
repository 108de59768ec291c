//! Power command gateway: blocking invocations of the standby-query and
//! spin-down utilities, with the exit-code policy as the entire contract.
//!
//! The query utility (smartctl `-n standby`) reports exit code 2 both when
//! the device is already asleep *and* when the query itself failed. That is
//! an upstream ambiguity, not a bug here: both cases are treated as STANDBY
//! so the daemon never wakes a sleeping disk with a redundant command.
//!
//! The trait keeps the call boundary narrow so tests mock it without
//! touching real system utilities.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::config::Config;
use crate::core::errors::{DsdError, Result};
use crate::engine::state::DeviceId;

/// Result of the standby-query utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyQuery {
    /// Exit code 2: device asleep, or the query tool itself failed —
    /// indistinguishable by contract, resolved conservatively.
    Standby,
    /// Any other exit code: device is spun up.
    NotStandby,
    /// The utility could not be invoked or was killed by a signal.
    Unknown,
}

/// Result of the spin-down utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyRequest {
    Issued,
    Failed,
}

/// Outcome of the composite ensure-standby operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Query said the device is already in a low-power state.
    AlreadyStandby,
    /// Device was spun up; spin-down command issued and exited zero.
    SpunDown,
    /// Spin-down failed or the query was inconclusive; retried next cycle.
    Failed,
}

/// Narrow seam around the two external power utilities.
pub trait PowerGateway {
    fn query_standby(&self, device: &DeviceId) -> StandbyQuery;

    fn request_standby(&self, device: &DeviceId) -> StandbyRequest;

    /// Query first — the physical disk may have been spun down or woken by
    /// something outside this daemon — and only request a spin-down when the
    /// query says NOT_STANDBY.
    fn ensure_standby(&self, device: &DeviceId) -> EnsureOutcome {
        match self.query_standby(device) {
            StandbyQuery::Standby => EnsureOutcome::AlreadyStandby,
            StandbyQuery::NotStandby => match self.request_standby(device) {
                StandbyRequest::Issued => EnsureOutcome::SpunDown,
                StandbyRequest::Failed => EnsureOutcome::Failed,
            },
            StandbyQuery::Unknown => EnsureOutcome::Failed,
        }
    }
}

/// Gateway backed by smartctl (`-n standby`) and hdparm (`-yY`).
#[derive(Debug, Clone)]
pub struct HdparmGateway {
    query_bin: PathBuf,
    spindown_bin: PathBuf,
    device_dir: PathBuf,
}

impl HdparmGateway {
    #[must_use]
    pub fn new(
        query_bin: impl Into<PathBuf>,
        spindown_bin: impl Into<PathBuf>,
        device_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            query_bin: query_bin.into(),
            spindown_bin: spindown_bin.into(),
            device_dir: device_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.commands.query_bin,
            &config.commands.spindown_bin,
            config.devices.effective_device_dir(),
        )
    }

    /// Run a utility against the device node, discarding all output and
    /// capturing only the exit status. Spawn failures surface as `DSD-2101`.
    fn run(&self, bin: &Path, args: &[&str], device: &DeviceId) -> Result<std::process::ExitStatus> {
        Command::new(bin)
            .args(args)
            .arg(device.os_path(&self.device_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| DsdError::CommandSpawn {
                command: bin.display().to_string(),
                details: source.to_string(),
            })
    }
}

impl PowerGateway for HdparmGateway {
    fn query_standby(&self, device: &DeviceId) -> StandbyQuery {
        match self.run(&self.query_bin, &["-n", "standby"], device) {
            Ok(status) => match status.code() {
                Some(2) => StandbyQuery::Standby,
                Some(_) => StandbyQuery::NotStandby,
                // Killed by a signal: no exit code to interpret.
                None => StandbyQuery::Unknown,
            },
            Err(e) => {
                eprintln!("[DSD-DAEMON] {e}");
                StandbyQuery::Unknown
            }
        }
    }

    fn request_standby(&self, device: &DeviceId) -> StandbyRequest {
        match self.run(&self.spindown_bin, &["-yY"], device) {
            Ok(status) if status.success() => StandbyRequest::Issued,
            Ok(_) => StandbyRequest::Failed,
            Err(e) => {
                eprintln!("[DSD-DAEMON] {e}");
                StandbyRequest::Failed
            }
        }
    }
}
