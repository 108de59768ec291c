#![forbid(unsafe_code)]

//! Disk Spin-down Daemon (dsd) — powers down rotational disks that have been
//! idle past a configurable timeout.
//!
//! The core loop is deliberately simple:
//! 1. **Read** /proc/diskstats counters for each tracked device
//! 2. **Classify** every device as ACTIVE, IDLE, or POWEROFF by comparing
//!    against the previous snapshot
//! 3. **Control** — once a device has been idle past the timeout, query its
//!    power state and issue a spin-down command if it is still spun up
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use disk_spindown::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use disk_spindown::core::config::Config;
//! use disk_spindown::stats::diskstats::DiskstatsReader;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod engine;
pub mod logger;
pub mod power;
pub mod stats;
