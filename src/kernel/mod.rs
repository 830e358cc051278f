//! Kernel primitives
//!
//! - `cgroup`: per-process resource controller folder and stat reads
//! - `clock`: process clock ticks
//! - `signal`: fault notification routing
//! - `vmmap`: memory map visitor contract

pub mod cgroup;
pub mod clock;
pub mod signal;
pub mod vmmap;
