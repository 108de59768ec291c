//! JSONL activity logging with rotation and graceful degradation.

pub mod activity;
pub mod jsonl;

pub use activity::ActivityLog;
pub use jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
