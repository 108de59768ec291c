//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use disk_spindown::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DsdError, Result};

// Engine
pub use crate::engine::classifier::{StateChange, classify_all, classify_device};
pub use crate::engine::controller::{ControlEvent, SpindownController};
pub use crate::engine::state::{
    ActivityState, CounterSnapshot, DeviceId, DeviceState, SnapshotMap, StateStore,
};

// Stats
pub use crate::stats::discovery::{ResolvedDevices, discover_devices, resolve_tracked};
pub use crate::stats::diskstats::{DiskstatsReader, parse_diskstats};

// Power
pub use crate::power::gateway::{EnsureOutcome, HdparmGateway, PowerGateway, StandbyQuery};

// Logging
pub use crate::logger::activity::ActivityLog;
pub use crate::logger::jsonl::{JsonlConfig, JsonlWriter};
