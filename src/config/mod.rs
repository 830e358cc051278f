//! Configuration
//!
//! Accounting configuration, the manifest snapshot format, and shared types.

pub mod loader;
pub mod types;
