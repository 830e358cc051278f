//! Sandbox core.
//!
//! The sandbox instance handle, its channel registry, and the primitives
//! finalization consumes: report publication and process exit.

pub mod manifest;
pub mod process;
pub mod sandbox;
pub mod supervisor;
