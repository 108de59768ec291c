//! Activity classifier: turns two successive counter snapshots into a coarse
//! per-device activity state.
//!
//! Rules (per device, per cycle):
//! - absent from the current snapshot → no data, state untouched
//! - first observation or counters changed → ACTIVE (from any state,
//!   including POWEROFF — the disk was woken by something outside the daemon)
//! - counters unchanged → ACTIVE becomes IDLE once; IDLE and POWEROFF keep
//!   their state *and* their `since` timestamp, so the idle clock is never
//!   reset by continued inactivity
//!
//! The classifier never produces POWEROFF; only the controller may set it.

use std::time::Instant;

use crate::engine::state::{ActivityState, CounterSnapshot, DeviceId, SnapshotMap, StateStore};

/// A recorded state transition, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub device: DeviceId,
    /// `None` on first observation.
    pub from: Option<ActivityState>,
    pub to: ActivityState,
}

/// Classify a single device. Returns the transition if one occurred.
pub fn classify_device(
    store: &mut StateStore,
    device: &DeviceId,
    previous: Option<&CounterSnapshot>,
    current: Option<&CounterSnapshot>,
    now: Instant,
) -> Option<StateChange> {
    // No data this cycle (hot-unplugged or stats gap): leave state untouched.
    let current = current?;

    let stored = store.get(device);
    let changed = previous.is_none_or(|prev| prev != current);

    if changed {
        // Counter movement (or first sighting) forces ACTIVE from any state.
        if stored.is_some_and(|ds| ds.state == ActivityState::Active) {
            return None;
        }
        store.transition(device, ActivityState::Active, now);
        return Some(StateChange {
            device: device.clone(),
            from: stored.map(|ds| ds.state),
            to: ActivityState::Active,
        });
    }

    match stored {
        Some(ds) if ds.state == ActivityState::Active => {
            store.transition(device, ActivityState::Idle, now);
            Some(StateChange {
                device: device.clone(),
                from: Some(ActivityState::Active),
                to: ActivityState::Idle,
            })
        }
        // Already IDLE or POWEROFF: timestamp untouched.
        Some(_) => None,
        // Unreachable in practice (a previous snapshot implies a stored
        // state), but treat it as a first observation if it ever happens.
        None => {
            store.transition(device, ActivityState::Active, now);
            Some(StateChange {
                device: device.clone(),
                from: None,
                to: ActivityState::Active,
            })
        }
    }
}

/// Classify every tracked device for one cycle.
///
/// `previous` is `None` on the very first cycle, which makes every present
/// device ACTIVE with `since = now` — never immediately eligible for
/// spin-down.
pub fn classify_all(
    store: &mut StateStore,
    tracked: &[DeviceId],
    previous: Option<&SnapshotMap>,
    current: &SnapshotMap,
    now: Instant,
) -> Vec<StateChange> {
    tracked
        .iter()
        .filter_map(|device| {
            classify_device(
                store,
                device,
                previous.and_then(|map| map.get(device)),
                current.get(device),
                now,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dev(name: &str) -> DeviceId {
        DeviceId::normalize(name)
    }

    fn snap(read: u64, written: u64) -> CounterSnapshot {
        CounterSnapshot {
            sectors_read: read,
            sectors_written: written,
        }
    }

    #[test]
    fn first_observation_is_active() {
        let mut store = StateStore::new();
        let now = Instant::now();
        let change = classify_device(&mut store, &dev("sda"), None, Some(&snap(100, 50)), now);

        assert_eq!(
            change,
            Some(StateChange {
                device: dev("sda"),
                from: None,
                to: ActivityState::Active,
            })
        );
        let ds = store.get(&dev("sda")).unwrap();
        assert_eq!(ds.state, ActivityState::Active);
        assert_eq!(ds.since, now);
    }

    #[test]
    fn unchanged_counters_move_active_to_idle() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(10);
        let s = snap(100, 50);

        classify_device(&mut store, &dev("sda"), None, Some(&s), t0);
        let change = classify_device(&mut store, &dev("sda"), Some(&s), Some(&s), t1);

        assert_eq!(change.unwrap().to, ActivityState::Idle);
        assert_eq!(store.get(&dev("sda")).unwrap().since, t1);
    }

    #[test]
    fn continued_idle_never_touches_since() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let s = snap(100, 50);

        classify_device(&mut store, &dev("sda"), None, Some(&s), t0);
        classify_device(
            &mut store,
            &dev("sda"),
            Some(&s),
            Some(&s),
            t0 + Duration::from_secs(10),
        );
        let idle_since = store.get(&dev("sda")).unwrap().since;

        for i in 2..10 {
            let change = classify_device(
                &mut store,
                &dev("sda"),
                Some(&s),
                Some(&s),
                t0 + Duration::from_secs(10 * i),
            );
            assert!(change.is_none());
            assert_eq!(store.get(&dev("sda")).unwrap().since, idle_since);
        }
    }

    #[test]
    fn any_counter_change_forces_active_from_poweroff() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let wake = t0 + Duration::from_secs(3_600);
        store.transition(&dev("sda"), ActivityState::Poweroff, t0);

        let change = classify_device(
            &mut store,
            &dev("sda"),
            Some(&snap(100, 50)),
            Some(&snap(100, 51)),
            wake,
        );

        let change = change.unwrap();
        assert_eq!(change.from, Some(ActivityState::Poweroff));
        assert_eq!(change.to, ActivityState::Active);
        assert_eq!(store.get(&dev("sda")).unwrap().since, wake);
    }

    #[test]
    fn change_in_read_counter_alone_counts_as_activity() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        store.transition(&dev("sda"), ActivityState::Idle, t0);

        let change = classify_device(
            &mut store,
            &dev("sda"),
            Some(&snap(100, 50)),
            Some(&snap(101, 50)),
            t0 + Duration::from_secs(10),
        );
        assert_eq!(change.unwrap().to, ActivityState::Active);
    }

    #[test]
    fn repeated_activity_does_not_retransition() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        classify_device(&mut store, &dev("sda"), None, Some(&snap(1, 1)), t0);

        let change = classify_device(
            &mut store,
            &dev("sda"),
            Some(&snap(1, 1)),
            Some(&snap(2, 2)),
            t0 + Duration::from_secs(10),
        );
        // Still ACTIVE, no transition recorded, since untouched.
        assert!(change.is_none());
        assert_eq!(store.get(&dev("sda")).unwrap().since, t0);
    }

    #[test]
    fn absent_from_current_leaves_state_untouched() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        store.transition(&dev("sda"), ActivityState::Idle, t0);

        let change = classify_device(
            &mut store,
            &dev("sda"),
            Some(&snap(100, 50)),
            None,
            t0 + Duration::from_secs(10),
        );
        assert!(change.is_none());
        let ds = store.get(&dev("sda")).unwrap();
        assert_eq!(ds.state, ActivityState::Idle);
        assert_eq!(ds.since, t0);
    }

    #[test]
    fn classifier_never_sets_poweroff() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let s = snap(5, 5);

        // Exercise every branch; the resulting state is never POWEROFF.
        for cycle in 0..20 {
            let prev = if cycle == 0 { None } else { Some(&s) };
            classify_device(
                &mut store,
                &dev("sda"),
                prev,
                Some(&s),
                t0 + Duration::from_secs(cycle),
            );
            assert_ne!(
                store.get(&dev("sda")).unwrap().state,
                ActivityState::Poweroff
            );
        }
    }

    #[test]
    fn classify_all_first_cycle_marks_present_devices_active() {
        let mut store = StateStore::new();
        let tracked = vec![dev("sda"), dev("sdb"), dev("sdc")];
        let mut current = SnapshotMap::new();
        current.insert(dev("sda"), snap(1, 1));
        current.insert(dev("sdb"), snap(2, 2));
        // sdc absent from the kernel stats this cycle.

        let changes = classify_all(&mut store, &tracked, None, &current, Instant::now());
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.to == ActivityState::Active));
        assert!(store.get(&dev("sdc")).is_none());
    }

    #[test]
    fn device_reappearing_after_gap_is_active_again() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let s = snap(7, 7);
        store.transition(&dev("sda"), ActivityState::Idle, t0);

        // Previous cycle had no row for sda (it was unplugged), so its
        // reappearance counts as a first observation.
        let change = classify_device(
            &mut store,
            &dev("sda"),
            None,
            Some(&s),
            t0 + Duration::from_secs(30),
        );
        assert_eq!(change.unwrap().to, ActivityState::Active);
    }
}
