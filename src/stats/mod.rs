//! Activity statistics: kernel diskstats parsing and device discovery.

pub mod discovery;
pub mod diskstats;

pub use discovery::{discover_devices, resolve_tracked, ResolvedDevices};
pub use diskstats::{parse_diskstats, DiskstatsReader};
