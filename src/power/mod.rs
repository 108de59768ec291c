//! External power-management commands and their exit-code policy.

pub mod gateway;

pub use gateway::{EnsureOutcome, HdparmGateway, PowerGateway, StandbyQuery, StandbyRequest};
