//! Activity state machine: per-device states, counter-based classification,
//! and the idle-timeout spin-down controller.

pub mod classifier;
pub mod controller;
pub mod state;

pub use classifier::{classify_all, classify_device, StateChange};
pub use controller::{ControlEvent, SpindownController};
pub use state::{ActivityState, CounterSnapshot, DeviceId, DeviceState, SnapshotMap, StateStore};
