//! Observability
//!
//! Structured audit events for setup-time decisions.

pub mod audit;
