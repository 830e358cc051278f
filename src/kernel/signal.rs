use log::{debug, info};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Fault notification routing
///
/// A fault signal can arrive at any instruction boundary. The handler does
/// nothing but look up the registered target and hand it the signal number;
/// the target (the finalization controller) is responsible for making a
/// second entry harmless.
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::types::{QuotaboxError, Result};

/// Signals routed into finalization
pub const FAULT_SIGNALS: [Signal; 10] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSYS,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGHUP,
];

/// Receiver of fault notifications
pub trait FaultTarget: Sync {
    /// Called from signal context; must not allocate or lock before its own
    /// reentrancy guard has been passed
    fn on_fault(&self, signal: i32);
}

/// Registered once; read lock-free from the handler
static FAULT_TARGET: OnceCell<&'static dyn FaultTarget> = OnceCell::new();

static HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Async-safe signal handler
/// Only an atomic load and a call into the target
extern "C" fn fault_handler(signal: libc::c_int) {
    if let Some(target) = FAULT_TARGET.get() {
        target.on_fault(signal);
    }
}

/// Fault handler registration
pub struct FaultHandler;

impl FaultHandler {
    /// Route fault signals to `target`
    ///
    /// The target can be registered only once per process. Handlers use
    /// `SA_RESETHAND`: a fault repeating while finalization is already running
    /// takes the default action instead of looping back here.
    pub fn install(target: &'static dyn FaultTarget) -> Result<()> {
        if FAULT_TARGET.set(target).is_err() {
            return Err(QuotaboxError::Signal(
                "fault target already registered".to_string(),
            ));
        }

        let action = SigAction::new(
            SigHandler::Handler(fault_handler),
            SaFlags::SA_RESETHAND,
            SigSet::empty(),
        );

        for sig in FAULT_SIGNALS {
            unsafe {
                signal::sigaction(sig, &action)
                    .map_err(|e| QuotaboxError::Signal(format!("Failed to install {:?} handler: {}", sig, e)))?;
            }
        }

        HANDLERS_INSTALLED.store(true, Ordering::SeqCst);
        info!("Fault handlers installed ({} signals)", FAULT_SIGNALS.len());
        Ok(())
    }

    /// Restore default dispositions
    ///
    /// Safe to call when nothing was installed. Does not allocate on success.
    pub fn uninstall() -> Result<()> {
        if !HANDLERS_INSTALLED.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for sig in FAULT_SIGNALS {
            unsafe {
                signal::sigaction(sig, &action)
                    .map_err(|errno| QuotaboxError::SignalReset {
                        signal: sig as i32,
                        errno: errno as i32,
                    })?;
            }
        }

        debug!("Fault handlers removed");
        Ok(())
    }

    pub fn installed() -> bool {
        HANDLERS_INSTALLED.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    struct Recorder(AtomicI32);

    impl FaultTarget for Recorder {
        fn on_fault(&self, signal: i32) {
            self.0.store(signal, Ordering::SeqCst);
        }
    }

    static RECORDER: Recorder = Recorder(AtomicI32::new(0));

    #[test]
    fn test_install_route_and_uninstall() {
        FaultHandler::install(&RECORDER).unwrap();
        assert!(FaultHandler::installed());

        signal::raise(Signal::SIGHUP).unwrap();
        assert_eq!(RECORDER.0.load(Ordering::SeqCst), libc::SIGHUP);

        // second registration is refused
        assert!(FaultHandler::install(&RECORDER).is_err());

        FaultHandler::uninstall().unwrap();
        assert!(!FaultHandler::installed());
        FaultHandler::uninstall().unwrap();
    }
}
