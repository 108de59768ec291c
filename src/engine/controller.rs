//! Spin-down controller: decides which idle devices have exceeded the
//! timeout and drives the power gateway for each of them.
//!
//! The controller runs after classification in the same cycle and walks
//! devices in their stored order, one blocking command sequence at a time.
//! A device in POWEROFF remains due every cycle: if an ensure attempt
//! failed, or an external actor woke the disk without generating tracked
//! I/O, the next cycle repairs it.

use std::time::{Duration, Instant};

use crate::engine::state::{ActivityState, DeviceId, StateStore};
use crate::power::{EnsureOutcome, PowerGateway};

/// One spin-down attempt made during a cycle, for logging.
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub device: DeviceId,
    /// Time since the device's last transition, at decision time.
    pub idle: Duration,
    pub outcome: EnsureOutcome,
    /// Whether the attempt moved the device into POWEROFF this cycle.
    pub state_changed: bool,
}

/// Applies the idle-timeout policy to the state store.
#[derive(Debug)]
pub struct SpindownController {
    timeout: Duration,
}

impl SpindownController {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Replace the timeout, e.g. after a config reload. Takes effect from
    /// the next cycle; elapsed idle time is measured against the new value.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one control pass: for every device idle (or already powered off)
    /// past the timeout, query-then-request standby through the gateway.
    pub fn run_cycle(
        &self,
        store: &mut StateStore,
        gateway: &dyn PowerGateway,
        now: Instant,
    ) -> Vec<ControlEvent> {
        let due: Vec<(DeviceId, Duration)> = store
            .iter()
            .filter(|(_, ds)| {
                matches!(ds.state, ActivityState::Idle | ActivityState::Poweroff)
            })
            .map(|(dev, ds)| (dev.clone(), now.saturating_duration_since(ds.since)))
            .filter(|(_, idle)| *idle >= self.timeout)
            .collect();

        let mut events = Vec::with_capacity(due.len());
        for (device, idle) in due {
            let outcome = gateway.ensure_standby(&device);
            let state_changed = self.apply_outcome(store, &device, outcome, now);
            events.push(ControlEvent {
                device,
                idle,
                outcome,
                state_changed,
            });
        }
        events
    }

    /// Map an ensure outcome onto the store. Returns true when the device
    /// newly entered POWEROFF.
    fn apply_outcome(
        &self,
        store: &mut StateStore,
        device: &DeviceId,
        outcome: EnsureOutcome,
        now: Instant,
    ) -> bool {
        match outcome {
            EnsureOutcome::SpunDown => {
                store.transition(device, ActivityState::Poweroff, now);
                true
            }
            EnsureOutcome::AlreadyStandby => {
                // Found asleep without our command. Record POWEROFF, but do
                // not reset `since` for a device already known to be off.
                let already_off = store
                    .get(device)
                    .is_some_and(|ds| ds.state == ActivityState::Poweroff);
                if already_off {
                    false
                } else {
                    store.transition(device, ActivityState::Poweroff, now);
                    true
                }
            }
            // Command failure is non-fatal: state holds, retried next cycle.
            EnsureOutcome::Failed => false,
        }
    }
}
