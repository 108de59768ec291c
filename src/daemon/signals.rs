//! Signal wiring for the poll loop: SIGTERM/SIGINT stop the daemon, SIGHUP
//! reloads configuration, SIGUSR1 dumps per-device state, and an optional
//! sd_notify heartbeat keeps the systemd watchdog fed.
//!
//! Nothing here blocks. `signal-hook` sets atomic flags from the signal
//! context and the loop polls them once per iteration.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Polled signal flags shared with the OS signal context.
///
/// `Relaxed` ordering throughout: each flag is independent and the loop
/// re-reads them every iteration anyway.
#[derive(Clone, Default)]
pub struct SignalHandler {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    dump: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create the handler and hook the process signals. A registration
    /// failure is reported on stderr and the daemon runs without that hook.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.hook(signal_hook::consts::SIGTERM, &handler.shutdown);
        handler.hook(signal_hook::consts::SIGINT, &handler.shutdown);
        handler.hook(signal_hook::consts::SIGHUP, &handler.reload);
        handler.hook(signal_hook::consts::SIGUSR1, &handler.dump);
        handler
    }

    /// Flags without any OS hooks; tests drive them through the `request_*`
    /// methods.
    pub fn detached() -> Self {
        Self::default()
    }

    fn hook(&self, signal: i32, flag: &Arc<AtomicBool>) {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(flag)) {
            eprintln!("[DSD-SIGNAL] failed to register signal {signal}: {e}");
        }
    }

    /// Shutdown is level-triggered: once set it stays set.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Reload is edge-triggered: reading it consumes the request.
    pub fn should_reload(&self) -> bool {
        self.reload.swap(false, Ordering::Relaxed)
    }

    /// State-dump is edge-triggered, like reload.
    pub fn should_dump(&self) -> bool {
        self.dump.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::Relaxed);
    }

    pub fn request_dump(&self) {
        self.dump.store(true, Ordering::Relaxed);
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Rate-limited `sd_notify(WATCHDOG=1)` sender.
///
/// systemd expects a heartbeat well inside `WatchdogSec`; sending at half
/// the timeout leaves one missed poll cycle of slack.
pub struct WatchdogHeartbeat {
    period: Duration,
    last_sent: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    pub fn new(watchdog_sec: u64) -> Self {
        Self {
            period: Duration::from_secs(watchdog_sec / 2),
            last_sent: Instant::now(),
            enabled: watchdog_sec > 0,
        }
    }

    /// Heartbeat that never fires, for runs outside systemd.
    pub fn disabled() -> Self {
        Self {
            period: Duration::ZERO,
            last_sent: Instant::now(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send a heartbeat if one is due. Returns whether it was sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_sent.elapsed() < self.period {
            return false;
        }
        self.last_sent = Instant::now();
        sd_notify(status);
        true
    }
}

/// Best-effort `WATCHDOG=1` + `STATUS=` datagram to `$NOTIFY_SOCKET`.
/// A no-op when the variable is unset or the socket is unreachable.
#[cfg(target_os = "linux")]
fn sd_notify(status: &str) {
    use std::os::unix::net::UnixDatagram;

    let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    if socket_path.is_empty() {
        return;
    }
    let Ok(sock) = UnixDatagram::unbound() else {
        return;
    };
    let msg = format!("WATCHDOG=1\nSTATUS={status}\n");
    let _ = sock.send_to(msg.as_bytes(), &socket_path);
}

#[cfg(not(target_os = "linux"))]
fn sd_notify(_status: &str) {}

// ──────────────────── tests ────────────────────
