//! Resource controller (cgroup) access for extended accounting
//!
//! Owns the per-process controller folder and the fault-path-safe stat reads.

pub mod controller;
pub mod path;

// Re-export commonly used items
pub use controller::{read_stat_file, ResourceController, StatReadError};
pub use path::StatPath;
