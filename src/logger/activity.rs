//! High-level activity log: one method per daemon event, building the
//! JSONL entry so callers never assemble `LogEntry` fields by hand.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::state::{DeviceId, StateStore};
use crate::engine::StateChange;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Facade over [`JsonlWriter`] with the daemon's event vocabulary.
pub struct ActivityLog {
    writer: JsonlWriter,
}

impl ActivityLog {
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            writer: JsonlWriter::open(config),
        }
    }

    /// Degradation state of the underlying writer, for diagnostics.
    pub fn writer_state(&self) -> &str {
        self.writer.state()
    }

    /// Bytes written to the current log file since open or last rotation.
    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    /// Give a degraded writer a chance to climb back to its primary file.
    pub fn try_recover(&mut self) {
        self.writer.try_recover();
    }

    pub fn daemon_started(&mut self, devices: &[DeviceId], discovered_all: bool) {
        let mut entry = LogEntry::new(EventType::DaemonStart, Severity::Info);
        entry.details = Some(format!(
            "tracking {} device(s){}: {}",
            devices.len(),
            if discovered_all { " (discovered)" } else { "" },
            join_devices(devices),
        ));
        self.writer.write_entry(&entry);
        self.writer.flush();
    }

    pub fn daemon_stopped(&mut self, uptime: Duration) {
        let mut entry = LogEntry::new(EventType::DaemonStop, Severity::Info);
        entry.uptime_secs = Some(uptime.as_secs());
        self.writer.write_entry(&entry);
        self.writer.fsync();
    }

    pub fn state_change(&mut self, change: &StateChange) {
        let mut entry = LogEntry::new(EventType::StateChange, Severity::Info);
        entry.device = Some(change.device.as_str().to_string());
        entry.from_state = change.from.map(|s| s.as_str().to_string());
        entry.to_state = Some(change.to.as_str().to_string());
        self.writer.write_entry(&entry);
    }

    pub fn spindown_issued(&mut self, device: &DeviceId, idle: Duration) {
        let mut entry = LogEntry::new(EventType::SpindownIssued, Severity::Info);
        entry.device = Some(device.as_str().to_string());
        entry.idle_secs = Some(idle.as_secs());
        self.writer.write_entry(&entry);
    }

    /// Spin-down command failed or the standby query was inconclusive.
    pub fn spindown_failed(&mut self, device: &DeviceId, idle: Duration) {
        let mut entry = LogEntry::new(EventType::SpindownFailed, Severity::Warning);
        entry.device = Some(device.as_str().to_string());
        entry.idle_secs = Some(idle.as_secs());
        entry.details = Some("state held, will retry next cycle".to_string());
        self.writer.write_entry(&entry);
    }

    /// Standby query found the device asleep before any command was sent.
    /// Exit code 2 also covers query-tool failure, so the record notes the
    /// ambiguity instead of claiming certainty.
    pub fn standby_detected(&mut self, device: &DeviceId, idle: Duration) {
        let mut entry = LogEntry::new(EventType::StandbyDetected, Severity::Info);
        entry.device = Some(device.as_str().to_string());
        entry.idle_secs = Some(idle.as_secs());
        entry.details =
            Some("already in standby per query exit code (or query failed)".to_string());
        self.writer.write_entry(&entry);
    }

    /// A polling cycle was skipped because the stats source was unreadable.
    pub fn poll_error(&mut self, code: &str, message: &str) {
        let mut entry = LogEntry::new(EventType::PollError, Severity::Warning);
        entry.error_code = Some(code.to_string());
        entry.error_message = Some(message.to_string());
        self.writer.write_entry(&entry);
    }

    pub fn config_reloaded(&mut self, details: &str) {
        let mut entry = LogEntry::new(EventType::ConfigReload, Severity::Info);
        entry.details = Some(details.to_string());
        self.writer.write_entry(&entry);
        self.writer.flush();
    }

    /// Dump the full device→state map, after transitions or on SIGUSR1.
    pub fn state_dump(&mut self, store: &StateStore) {
        let mut entry = LogEntry::new(EventType::StateDump, Severity::Info);
        let map: BTreeMap<String, String> = store
            .iter()
            .map(|(dev, ds)| (dev.as_str().to_string(), ds.state.to_string()))
            .collect();
        entry.devices = Some(map);
        self.writer.write_entry(&entry);
        self.writer.flush();
    }

    pub fn error(&mut self, code: &str, message: &str) {
        let mut entry = LogEntry::new(EventType::Error, Severity::Critical);
        entry.error_code = Some(code.to_string());
        entry.error_message = Some(message.to_string());
        self.writer.write_entry(&entry);
        self.writer.flush();
    }

    pub fn flush(&mut self) {
        self.writer.flush();
    }
}

fn join_devices(devices: &[DeviceId]) -> String {
    devices
        .iter()
        .map(DeviceId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ActivityState;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Instant;

    fn log_at(path: PathBuf) -> ActivityLog {
        ActivityLog::open(JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 2,
            fsync_interval_secs: 60,
        })
    }

    fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn lifecycle_events_carry_tracking_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut log = log_at(path.clone());

        log.daemon_started(
            &[DeviceId::normalize("sda"), DeviceId::normalize("sdb")],
            true,
        );
        log.daemon_stopped(Duration::from_secs(42));

        let events = read_events(&path);
        assert_eq!(events[0]["event"], "daemon_start");
        let details = events[0]["details"].as_str().unwrap();
        assert!(details.contains("2 device(s)"));
        assert!(details.contains("sda,sdb"));
        assert_eq!(events[1]["event"], "daemon_stop");
        assert_eq!(events[1]["uptime_secs"], 42);
    }

    #[test]
    fn state_change_records_both_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut log = log_at(path.clone());

        log.state_change(&StateChange {
            device: DeviceId::normalize("sda"),
            from: Some(ActivityState::Active),
            to: ActivityState::Idle,
        });
        log.flush();

        let events = read_events(&path);
        assert_eq!(events[0]["device"], "sda");
        assert_eq!(events[0]["from_state"], "ACTIVE");
        assert_eq!(events[0]["to_state"], "IDLE");
    }

    #[test]
    fn bytes_written_tracks_flushed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut log = log_at(path.clone());
        assert_eq!(log.bytes_written(), 0);

        log.spindown_issued(&DeviceId::normalize("sda"), Duration::from_secs(1800));
        log.flush();

        let on_disk = fs::metadata(&path).unwrap().len();
        assert_eq!(log.bytes_written(), on_disk);
        assert!(on_disk > 0);
    }

    #[test]
    fn state_dump_lists_every_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut log = log_at(path.clone());

        let t0 = Instant::now();
        let mut store = StateStore::new();
        store.transition(&DeviceId::normalize("sda"), ActivityState::Poweroff, t0);
        store.transition(&DeviceId::normalize("sdb"), ActivityState::Active, t0);
        log.state_dump(&store);

        let events = read_events(&path);
        assert_eq!(events[0]["event"], "state_dump");
        assert_eq!(events[0]["devices"]["sda"], "POWEROFF");
        assert_eq!(events[0]["devices"]["sdb"], "ACTIVE");
    }
}
