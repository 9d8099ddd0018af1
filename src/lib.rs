pub mod cli;
pub mod config;
mod logging;
pub mod planner;

pub use logging::{json_log::JsonFileLog, multilog::MultiLogger};
pub use planner::Planner;

/// Version of the blkplan binary.
pub const BLKPLAN_VERSION: &str = env!("CARGO_PKG_VERSION");
