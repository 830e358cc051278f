/// Process termination state
///
/// `Running -> Finalizing -> Terminated`, stored in atomics so the transition
/// can be attempted from a signal handler. Leaving `Running` is a single
/// compare-and-swap: exactly one caller wins it.
use crate::config::types::{Outcome, Phase};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

pub struct TerminationState {
    phase: AtomicU8,
    faulted: AtomicBool,
    code: AtomicI32,
}

impl TerminationState {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Running as u8),
            faulted: AtomicBool::new(false),
            code: AtomicI32::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn outcome(&self) -> Outcome {
        if self.faulted.load(Ordering::Acquire) {
            Outcome::Faulted(self.code.load(Ordering::Acquire))
        } else {
            Outcome::Clean
        }
    }

    /// Enter `Finalizing` with `outcome`
    ///
    /// Fails with the current phase if finalization was already entered. The
    /// losing caller changes nothing. Does not allocate.
    pub fn begin_finalizing(&self, outcome: Outcome) -> Result<(), Phase> {
        self.phase
            .compare_exchange(
                Phase::Running as u8,
                Phase::Finalizing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(Phase::from_u8)?;

        if let Outcome::Faulted(code) = outcome {
            self.code.store(code, Ordering::Release);
            self.faulted.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// `Finalizing -> Terminated`
    pub fn mark_terminated(&self) {
        self.phase.store(Phase::Terminated as u8, Ordering::Release);
    }
}

impl Default for TerminationState {
    fn default() -> Self {
        Self::new()
    }
}
