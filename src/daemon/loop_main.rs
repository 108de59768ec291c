//! Main polling loop: sequential read → classify → control cycles.
//!
//! Architecture: a single thread owns everything. Each cycle reads the stats
//! source once, classifies every tracked device against the previous
//! snapshot, then lets the controller dispatch blocking power commands for
//! devices past the idle timeout. Cycles never overlap; a slow command
//! sequence simply delays the next poll. Between cycles the loop sleeps in
//! short slices so shutdown signals are honored promptly.
//!
//! The previous snapshot is replaced only after a successful read. When the
//! stats source is unreadable the whole cycle is skipped — no
//! classification, no commands — and the next successful read compares
//! against the last good snapshot, so activity spanning the outage is still
//! detected.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{DsdError, Result};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat};
use crate::engine::classifier::classify_all;
use crate::engine::controller::SpindownController;
use crate::engine::state::{DeviceId, SnapshotMap, StateStore};
use crate::logger::activity::ActivityLog;
use crate::logger::jsonl::JsonlConfig;
use crate::power::{EnsureOutcome, HdparmGateway, PowerGateway};
use crate::stats::discovery::resolve_tracked;
use crate::stats::diskstats::DiskstatsReader;

/// Granularity of the inter-cycle sleep; bounds shutdown latency.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

// ──────────────────── daemon configuration ────────────────────

/// Arguments for `dsd daemon`. The daemon always runs in the foreground;
/// systemd (or the invoking shell) owns backgrounding.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Optional PID file path for non-systemd setups.
    pub pidfile: Option<PathBuf>,
    /// Systemd watchdog timeout in seconds (0 = disabled).
    pub watchdog_sec: u64,
}

// ──────────────────── main daemon struct ────────────────────

/// The polling daemon: owns the tracked set, state store, and power gateway.
pub struct PollDaemon {
    config: Config,
    devices: Vec<DeviceId>,
    reader: DiskstatsReader,
    gateway: Box<dyn PowerGateway>,
    controller: SpindownController,
    store: StateStore,
    /// Last successfully read snapshot; `None` until the first good cycle.
    previous: Option<SnapshotMap>,
    log: ActivityLog,
    signals: SignalHandler,
    watchdog: WatchdogHeartbeat,
    polling_interval: Duration,
    pidfile: Option<PathBuf>,
    start_time: Instant,
}

impl std::fmt::Debug for PollDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollDaemon")
            .field("devices", &self.devices)
            .field("polling_interval", &self.polling_interval)
            .field("pidfile", &self.pidfile)
            .finish_non_exhaustive()
    }
}

impl PollDaemon {
    /// Build and initialize the daemon from configuration.
    pub fn init(config: Config, args: &DaemonArgs) -> Result<Self> {
        let gateway = Box::new(HdparmGateway::from_config(&config));
        Self::init_with_gateway(config, args, gateway, SignalHandler::new())
    }

    /// Build the daemon with an injected gateway and signal handler. Used by
    /// `init` and by tests that script command outcomes.
    pub fn init_with_gateway(
        config: Config,
        args: &DaemonArgs,
        gateway: Box<dyn PowerGateway>,
        signals: SignalHandler,
    ) -> Result<Self> {
        let start_time = Instant::now();

        // 1. Resolve the tracked device set against what is present.
        let resolved = resolve_tracked(&config)?;
        if resolved.discovered_all {
            eprintln!(
                "[DSD-DAEMON] no devices configured, discovered {} whole-disk device(s)",
                resolved.devices.len()
            );
        }
        for dropped in &resolved.dropped {
            eprintln!("[DSD-DAEMON] configured device not present, skipping: {dropped}");
        }
        if resolved.devices.is_empty() {
            return Err(DsdError::InvalidConfig {
                details: "no tracked devices present".to_string(),
            });
        }

        // 2. Activity log.
        let log = ActivityLog::open(JsonlConfig {
            path: config.paths.jsonl_log.clone(),
            ..JsonlConfig::default()
        });

        // 3. Watchdog.
        let watchdog = if args.watchdog_sec > 0 {
            WatchdogHeartbeat::new(args.watchdog_sec)
        } else {
            WatchdogHeartbeat::disabled()
        };

        // 4. PID file for non-systemd setups.
        if let Some(path) = &args.pidfile {
            fs::write(path, format!("{}\n", std::process::id()))
                .map_err(|source| DsdError::io(path, source))?;
        }

        let reader = DiskstatsReader::new(&config.paths.diskstats);
        let controller = SpindownController::new(config.idle_timeout());
        let polling_interval = config.polling_interval();

        Ok(Self {
            config,
            devices: resolved.devices,
            reader,
            gateway,
            controller,
            store: StateStore::new(),
            previous: None,
            log,
            signals,
            watchdog,
            polling_interval,
            pidfile: args.pidfile.clone(),
            start_time,
        })
    }

    /// Run the polling loop until shutdown is requested.
    ///
    /// This is the main entry point for `dsd daemon`.
    pub fn run(&mut self) -> Result<()> {
        let discovered_all = self.config.devices.tracked.is_empty();
        self.log.daemon_started(&self.devices, discovered_all);
        eprintln!(
            "[DSD-DAEMON] started: {} device(s), timeout={}s, interval={}s",
            self.devices.len(),
            self.controller.timeout().as_secs(),
            self.polling_interval.as_secs()
        );

        loop {
            // 1. Check shutdown signal.
            if self.signals.should_shutdown() {
                eprintln!("[DSD-DAEMON] shutdown requested");
                break;
            }

            // 2. Check config reload signal.
            if self.signals.should_reload() {
                self.handle_config_reload();
            }

            // 3. State dump signal (SIGUSR1).
            if self.signals.should_dump() {
                self.log.state_dump(&self.store);
            }

            // 4. One full read → classify → control cycle.
            self.run_cycle(Instant::now());

            // 5. Watchdog heartbeat; let a degraded log retry its primary.
            self.log.try_recover();
            self.watchdog.maybe_notify(&format!(
                "polling {} device(s), log={} ({} bytes)",
                self.devices.len(),
                self.log.writer_state(),
                self.log.bytes_written()
            ));

            // 6. Sleep until the next cycle, in shutdown-aware slices.
            self.sleep_interruptible(self.polling_interval);
        }

        self.shutdown();
        Ok(())
    }

    // ──────────────────── polling cycle ────────────────────

    /// Execute one cycle at the given instant. Split from `run` so tests can
    /// drive the timeline explicitly.
    fn run_cycle(&mut self, now: Instant) {
        let current = match self.reader.read(&self.devices) {
            Ok(map) => map,
            Err(e) => {
                // Skip the whole cycle: states, `since` values, and the last
                // good snapshot all stay untouched.
                eprintln!("[DSD-DAEMON] poll failed, skipping cycle: {e}");
                self.log.poll_error(e.code(), &e.to_string());
                return;
            }
        };

        let changes = classify_all(
            &mut self.store,
            &self.devices,
            self.previous.as_ref(),
            &current,
            now,
        );
        for change in &changes {
            self.log.state_change(change);
        }

        let events = self
            .controller
            .run_cycle(&mut self.store, self.gateway.as_ref(), now);
        let mut any_poweroff = false;
        for event in &events {
            match event.outcome {
                EnsureOutcome::SpunDown => {
                    self.log.spindown_issued(&event.device, event.idle);
                }
                EnsureOutcome::AlreadyStandby => {
                    self.log.standby_detected(&event.device, event.idle);
                }
                EnsureOutcome::Failed => {
                    eprintln!(
                        "[DSD-DAEMON] spin-down failed for {}, holding state",
                        event.device
                    );
                    self.log.spindown_failed(&event.device, event.idle);
                }
            }
            any_poweroff = any_poweroff || event.state_changed;
        }

        // Dump the aggregate picture whenever anything moved.
        if !changes.is_empty() || any_poweroff {
            self.log.state_dump(&self.store);
        }

        self.previous = Some(current);
    }

    // ──────────────────── config reload ────────────────────

    fn handle_config_reload(&mut self) {
        eprintln!("[DSD-DAEMON] config reload requested (SIGHUP)");

        match Config::load(Some(&self.config.paths.config_file)) {
            Ok(new_config) => {
                let old_hash = self.config.stable_hash().unwrap_or_default();
                let new_hash = new_config.stable_hash().unwrap_or_default();

                if old_hash == new_hash {
                    eprintln!("[DSD-DAEMON] config unchanged, skipping reload");
                    return;
                }

                // Re-resolve the tracked set; a reload that empties it is
                // rejected rather than leaving the daemon with nothing to do.
                let resolved = match resolve_tracked(&new_config) {
                    Ok(r) if !r.devices.is_empty() => r,
                    Ok(_) => {
                        eprintln!("[DSD-DAEMON] reload rejected: no tracked devices present");
                        self.log
                            .error("DSD-1001", "config reload left no tracked devices");
                        return;
                    }
                    Err(e) => {
                        eprintln!("[DSD-DAEMON] reload failed resolving devices: {e}");
                        self.log.error(e.code(), &e.to_string());
                        return;
                    }
                };
                for dropped in &resolved.dropped {
                    eprintln!("[DSD-DAEMON] configured device not present, skipping: {dropped}");
                }

                self.controller.set_timeout(new_config.idle_timeout());
                self.polling_interval = new_config.polling_interval();
                self.devices = resolved.devices;
                // Forget state and snapshots for devices no longer tracked;
                // surviving devices keep their state and `since`.
                self.store.retain_tracked(&self.devices);
                if let Some(prev) = &mut self.previous {
                    prev.retain(|dev, _| self.devices.contains(dev));
                }

                // Command binaries and paths are fixed at startup; changing
                // them requires a restart.
                self.log
                    .config_reloaded(&format!("config hash: {old_hash} -> {new_hash}"));
                self.config = new_config;
                eprintln!("[DSD-DAEMON] config reloaded successfully");
            }
            Err(e) => {
                eprintln!("[DSD-DAEMON] config reload failed: {e}");
                self.log.error(e.code(), &format!("config reload failed: {e}"));
            }
        }
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(&mut self) {
        let uptime = self.start_time.elapsed();

        if let Some(path) = &self.pidfile {
            let _ = fs::remove_file(path);
        }

        self.log.daemon_stopped(uptime);
        eprintln!(
            "[DSD-DAEMON] shutdown complete (uptime={}s)",
            uptime.as_secs()
        );
    }

    fn sleep_interruptible(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.signals.should_shutdown() {
                return;
            }
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ActivityState;
    use crate::power::{StandbyQuery, StandbyRequest};
    use std::cell::RefCell;
    use std::fs::File;
    use std::path::Path;

    /// Gateway whose per-device results can be reprogrammed between cycles.
    struct ScriptedGateway {
        query: RefCell<StandbyQuery>,
        request: RefCell<StandbyRequest>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new() -> Self {
            Self {
                query: RefCell::new(StandbyQuery::NotStandby),
                request: RefCell::new(StandbyRequest::Issued),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PowerGateway for ScriptedGateway {
        fn query_standby(&self, device: &DeviceId) -> StandbyQuery {
            self.calls.borrow_mut().push(format!("query {device}"));
            *self.query.borrow()
        }

        fn request_standby(&self, device: &DeviceId) -> StandbyRequest {
            self.calls.borrow_mut().push(format!("request {device}"));
            *self.request.borrow()
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        daemon: PollDaemon,
    }

    /// Stand up a daemon with one tracked device `sda`, a writable diskstats
    /// file, and a scripted gateway. Timeout 100s, interval 10s.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("dev");
        fs::create_dir(&dev_dir).unwrap();
        File::create(dev_dir.join("sda")).unwrap();

        let mut config = Config::default();
        config.devices.tracked = vec!["sda".to_string()];
        config.devices.device_dir = dev_dir;
        config.spindown.idle_timeout_secs = 100;
        config.spindown.polling_interval_secs = 10;
        config.paths.diskstats = dir.path().join("diskstats");
        config.paths.jsonl_log = dir.path().join("activity.jsonl");

        write_stats(&config.paths.diskstats, 100, 50);

        let daemon = PollDaemon::init_with_gateway(
            config,
            &DaemonArgs::default(),
            Box::new(ScriptedGateway::new()),
            SignalHandler::detached(),
        )
        .unwrap();

        Fixture { dir, daemon }
    }

    fn write_stats(path: &Path, reads: u64, writes: u64) {
        fs::write(
            path,
            format!("   8       0 sda 10 2 {reads} 40 5 1 {writes} 20 0 30 60\n"),
        )
        .unwrap();
    }

    fn state_of(daemon: &PollDaemon, name: &str) -> ActivityState {
        daemon
            .store
            .get(&DeviceId::normalize(name))
            .unwrap()
            .state
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn first_cycle_marks_devices_active() {
        let mut fx = fixture();
        fx.daemon.run_cycle(Instant::now());
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Active);
    }

    #[test]
    fn unchanged_counters_move_to_idle_then_poweroff_after_timeout() {
        let mut fx = fixture();
        let t0 = Instant::now();

        fx.daemon.run_cycle(t0);
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Active);

        // Second cycle, no counter movement: IDLE with since = t0+10.
        fx.daemon.run_cycle(t0 + secs(10));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Idle);

        // Idle for 90s: below the 100s timeout, nothing dispatched.
        fx.daemon.run_cycle(t0 + secs(100));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Idle);

        // Idle for 100s: due, spun down.
        fx.daemon.run_cycle(t0 + secs(110));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Poweroff);
    }

    #[test]
    fn activity_wakes_a_powered_off_device() {
        let mut fx = fixture();
        let t0 = Instant::now();

        fx.daemon.run_cycle(t0);
        fx.daemon.run_cycle(t0 + secs(10));
        fx.daemon.run_cycle(t0 + secs(110));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Poweroff);

        // Counter movement while POWEROFF: straight back to ACTIVE.
        write_stats(&fx.daemon.config.paths.diskstats, 200, 50);
        fx.daemon.run_cycle(t0 + secs(120));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Active);
    }

    #[test]
    fn unreadable_stats_skip_cycle_and_keep_last_snapshot() {
        let mut fx = fixture();
        let t0 = Instant::now();

        fx.daemon.run_cycle(t0);
        fx.daemon.run_cycle(t0 + secs(10));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Idle);

        // Stats source vanishes: cycle skipped, state and since untouched.
        fs::remove_file(&fx.daemon.config.paths.diskstats).unwrap();
        fx.daemon.run_cycle(t0 + secs(20));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Idle);

        // Source returns with activity that happened during the outage;
        // comparison against the last good snapshot detects it.
        write_stats(&fx.daemon.config.paths.diskstats, 150, 50);
        fx.daemon.run_cycle(t0 + secs(30));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Active);
    }

    #[test]
    fn ambiguous_standby_query_marks_poweroff_without_request() {
        let mut fx = fixture();
        let t0 = Instant::now();

        fx.daemon.run_cycle(t0);
        fx.daemon.run_cycle(t0 + secs(10));

        // Query reports standby (exit code 2): no spin-down command follows.
        let gw = ScriptedGateway::new();
        *gw.query.borrow_mut() = StandbyQuery::Standby;
        fx.daemon.gateway = Box::new(gw);
        fx.daemon.run_cycle(t0 + secs(110));

        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Poweroff);
        // Downcast not available through the trait object; verify via the
        // JSONL log instead.
        let log = fs::read_to_string(fx.dir.path().join("activity.jsonl")).unwrap();
        assert!(log.contains("standby_detected"));
        assert!(!log.contains("spindown_issued"));
    }

    #[test]
    fn failed_spindown_is_retried_next_cycle() {
        let mut fx = fixture();
        let t0 = Instant::now();

        fx.daemon.run_cycle(t0);
        fx.daemon.run_cycle(t0 + secs(10));

        let gw = ScriptedGateway::new();
        *gw.request.borrow_mut() = StandbyRequest::Failed;
        fx.daemon.gateway = Box::new(gw);
        fx.daemon.run_cycle(t0 + secs(110));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Idle);

        // Command recovers: next cycle completes the spin-down.
        let gw = ScriptedGateway::new();
        fx.daemon.gateway = Box::new(gw);
        fx.daemon.run_cycle(t0 + secs(120));
        assert_eq!(state_of(&fx.daemon, "sda"), ActivityState::Poweroff);
    }

    #[test]
    fn init_rejects_empty_tracked_set() {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("dev");
        fs::create_dir(&dev_dir).unwrap();
        // Present devices don't include the configured one.
        File::create(dev_dir.join("sdb")).unwrap();

        let mut config = Config::default();
        config.devices.tracked = vec!["sda".to_string()];
        config.devices.device_dir = dev_dir;
        config.paths.diskstats = dir.path().join("diskstats");
        config.paths.jsonl_log = dir.path().join("activity.jsonl");

        let err = PollDaemon::init_with_gateway(
            config,
            &DaemonArgs::default(),
            Box::new(ScriptedGateway::new()),
            SignalHandler::detached(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "DSD-1001");
    }

    #[test]
    fn pidfile_written_on_init_and_removed_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("dev");
        fs::create_dir(&dev_dir).unwrap();
        File::create(dev_dir.join("sda")).unwrap();
        let pidfile = dir.path().join("dsd.pid");

        let mut config = Config::default();
        config.devices.tracked = vec!["sda".to_string()];
        config.devices.device_dir = dev_dir;
        config.paths.diskstats = dir.path().join("diskstats");
        config.paths.jsonl_log = dir.path().join("activity.jsonl");
        write_stats(&config.paths.diskstats, 1, 1);

        let args = DaemonArgs {
            pidfile: Some(pidfile.clone()),
            ..DaemonArgs::default()
        };
        let mut daemon = PollDaemon::init_with_gateway(
            config,
            &args,
            Box::new(ScriptedGateway::new()),
            SignalHandler::detached(),
        )
        .unwrap();

        let pid: u32 = fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(pid, std::process::id());

        daemon.shutdown();
        assert!(!pidfile.exists());
    }

    #[test]
    fn run_exits_when_shutdown_already_requested() {
        let mut fx = fixture();
        fx.daemon.signals.request_shutdown();
        fx.daemon.run().unwrap();
    }

    #[test]
    fn default_args() {
        let args = DaemonArgs::default();
        assert!(args.pidfile.is_none());
        assert_eq!(args.watchdog_sec, 0);
    }
}
