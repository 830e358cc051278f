//! quotabox: resource accounting and only-once finalization for sandboxed processes
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::cgroup`]: Per-process resource controller folder, no-alloc stat reads
//! - [`kernel::signal`]: Fault signal routing (async-signal-safe handler)
//! - [`kernel::clock`]: Process CPU clock
//! - [`kernel::vmmap`]: Memory map view for the diagnostic dump
//!
//! ## Accounting ([`accounting`])
//! - [`accounting::channels`]: Per-class channel quota aggregation
//! - [`accounting::collector`]: Native and extended system metrics strategies
//! - [`accounting::report`]: Report assembly, text format, write-once slot
//!
//! ## Termination Control ([`exec`])
//! - [`exec::state`]: `Running -> Finalizing -> Terminated` phase machine
//! - [`exec::finalizer`]: Shared finalization for normal exit and fault abort
//!
//! ## Runtime Core ([`core`])
//! - [`core::sandbox`]: Sandbox instance handle
//! - [`core::manifest`]: Channel registry
//! - [`core::supervisor`]: Report publication to the supervisor
//! - [`core::process`]: Process exit primitive
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured setup events
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: Accounting config and sandbox manifest loading
//! - [`config::types`]: Shared type definitions and the crate error
//!
//! # Design Principles
//!
//! 1. **One exit** - Both termination paths run the same sequence, exactly once
//! 2. **Fault path is allocation-free** - Buffers and paths are prepared at setup
//! 3. **A report is always published** - The baseline stands in for missing data
//! 4. **Minimal unsafe** - Thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Accounting
pub mod accounting;

// Termination Control
pub mod exec;

// Sandbox runtime core
pub mod core;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
