//! Termination control
//!
//! Only-once finalization shared by the normal exit and the fault path.

pub mod finalizer;
pub mod state;

pub use finalizer::{abort_setup, Finalization, FinalizationController};
pub use state::TerminationState;
