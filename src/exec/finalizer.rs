/// Only-once finalization of the sandbox process
///
/// Both exits (normal program exit and fault abort) funnel into the same
/// sequence:
/// 1. diagnostic dump, only for faulted outcomes, while everything is live
/// 2. channel registry teardown (counters stay readable)
/// 3. report assembly, sealing and publication
/// 4. fault handler removal and subsystem teardown
/// 5. `Terminated`, then process exit with the stored code
///
/// Entry is guarded by one compare-and-swap on the phase. A second entry,
/// typically a fault interrupting a pass already in progress, is a no-op that
/// returns [`Finalization::Rejected`]; the first pass runs to completion.
use crate::accounting::channels::ChannelQuotaAggregator;
use crate::accounting::collector::{select_collector, AccountingCollector};
use crate::accounting::report::{ReportAssembler, ReportSlot, SealError};
use crate::config::loader::AccountingConfig;
use crate::config::types::{
    AccountingReport, ChannelUsage, Outcome, Phase, QuotaboxError, Result, UnsupportedKindPolicy,
};
use crate::core::process::ProcessExit;
use crate::core::sandbox::Sandbox;
use crate::core::supervisor::ReportSink;
use crate::exec::state::TerminationState;
use crate::kernel::signal::{FaultHandler, FaultTarget};
use crate::kernel::vmmap;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// Result of one call into finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// This call ran the whole sequence and handed `code` to the exit primitive
    Completed { code: i32 },
    /// Finalization was already entered; nothing was done
    Rejected(Phase),
}

/// Subsystem teardown callback run during step 4
pub struct TeardownHook {
    name: &'static str,
    run: Box<dyn Fn() + Send + Sync>,
}

pub struct FinalizationController {
    sandbox: Sandbox,
    aggregator: ChannelQuotaAggregator,
    collector: Box<dyn AccountingCollector>,
    sink: Box<dyn ReportSink>,
    exit: Box<dyn ProcessExit>,
    state: TerminationState,
    report: ReportSlot,
    dump_level: log::Level,
    teardown_hooks: Vec<TeardownHook>,
    handles_signals: AtomicBool,
}

impl FinalizationController {
    pub fn new(
        sandbox: Sandbox,
        collector: Box<dyn AccountingCollector>,
        sink: Box<dyn ReportSink>,
        exit: Box<dyn ProcessExit>,
    ) -> Self {
        Self {
            sandbox,
            aggregator: ChannelQuotaAggregator::default(),
            collector,
            sink,
            exit,
            state: TerminationState::new(),
            report: ReportSlot::new(),
            dump_level: log::Level::Trace,
            teardown_hooks: Vec::new(),
            handles_signals: AtomicBool::new(false),
        }
    }

    /// Build from configuration, selecting the accounting strategy for this pid
    ///
    /// `Allocation` errors from strategy setup are returned; the caller is
    /// expected to hand them to [`abort_setup`].
    pub fn from_config(
        config: &AccountingConfig,
        sandbox: Sandbox,
        sink: Box<dyn ReportSink>,
        exit: Box<dyn ProcessExit>,
    ) -> Result<Self> {
        let collector = select_collector(
            config,
            std::process::id(),
            sandbox.heap_extent(),
            sandbox.stack_reservation(),
        )?;
        info!(
            "Accounting ready: strategy={}, channels={}, policy={}",
            collector.strategy_name(),
            sandbox.channels().len(),
            config.unsupported_kind_policy
        );

        Ok(Self::new(sandbox, collector, sink, exit)
            .with_policy(config.unsupported_kind_policy)
            .with_dump_level(config.dump_level))
    }

    pub fn with_policy(mut self, policy: UnsupportedKindPolicy) -> Self {
        self.aggregator = ChannelQuotaAggregator::new(policy);
        self
    }

    pub fn with_dump_level(mut self, level: log::Level) -> Self {
        self.dump_level = level;
        self
    }

    /// Register a subsystem teardown; hooks run in reverse registration order
    pub fn register_teardown<F>(&mut self, name: &'static str, run: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown_hooks.push(TeardownHook {
            name,
            run: Box::new(run),
        });
    }

    /// Route fault signals into [`abort_from_fault`](Self::abort_from_fault)
    pub fn install_fault_handlers(&'static self) -> Result<()> {
        FaultHandler::install(self)?;
        self.handles_signals.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn collector(&self) -> &dyn AccountingCollector {
        self.collector.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn outcome(&self) -> Outcome {
        self.state.outcome()
    }

    /// Report text; the baseline until finalization has sealed a report
    pub fn get_accounting_info(&self) -> &str {
        self.report.text()
    }

    pub fn report(&self) -> Option<AccountingReport> {
        self.report.report()
    }

    /// Normal program exit
    pub fn normal_exit(&self, code: i32) -> Finalization {
        let outcome = if code == 0 {
            Outcome::Clean
        } else {
            Outcome::Faulted(code)
        };
        self.finalize(outcome)
    }

    /// Fault notification; may run in signal context at any program point
    ///
    /// Exits with the code the sandbox recorded, or `128 + signal` when none
    /// was recorded.
    pub fn abort_from_fault(&self, signal: i32) -> Finalization {
        let recorded = self.sandbox.exit_code();
        let code = if recorded != 0 { recorded } else { 128i32.wrapping_add(signal) };
        self.finalize(Outcome::Faulted(code))
    }

    fn finalize(&self, outcome: Outcome) -> Finalization {
        if let Err(phase) = self.state.begin_finalizing(outcome) {
            return Finalization::Rejected(phase);
        }
        let code = outcome.exit_code();
        self.sandbox.record_exit_code(code);

        if !outcome.is_clean() {
            self.final_dump();
        }

        self.sandbox.channels().teardown();

        self.publish_report();

        self.teardown_subsystems();

        self.state.mark_terminated();
        self.exit.exit(code);
        Finalization::Completed { code }
    }

    fn final_dump(&self) {
        let level = self.dump_level;
        log::log!(level, "exiting -- printing sandbox details");
        self.sandbox.print_details(level);
        log::log!(level, "Dumping vmmap");
        vmmap::log_regions(self.sandbox.memory_map(), level);
        log::log!(level, "Done");
    }

    /// Collect and aggregate without sealing anything
    pub fn assemble_report(&self) -> AccountingReport {
        let metrics = self.collector.collect();
        let usage = match self.aggregator.aggregate(self.sandbox.channels().channels()) {
            Ok(usage) => usage,
            Err(_) => {
                error!("channel accounting failed, reporting zero usage");
                ChannelUsage::default()
            }
        };
        ReportAssembler::assemble(metrics, usage)
    }

    fn publish_report(&self) {
        let report = self.assemble_report();
        match self.report.seal(&report) {
            Ok(_) => {}
            Err(SealError::AlreadySealed) => {
                warn!("accounting report already sealed, keeping the first one")
            }
            Err(SealError::Overflow) => {
                error!("accounting report does not fit its buffer, publishing baseline")
            }
        }

        if self.sink.publish(self.report.text()).is_err() {
            error!("cannot publish accounting report");
        }
    }

    fn teardown_subsystems(&self) {
        if self.handles_signals.swap(false, Ordering::SeqCst) {
            if FaultHandler::uninstall().is_err() {
                warn!("cannot restore default fault dispositions");
            }
        }

        for hook in self.teardown_hooks.iter().rev() {
            debug!("Tearing down {}", hook.name);
            (hook.run)();
        }

        if self.collector.shutdown().is_err() {
            warn!("accounting strategy shutdown failed");
        }
    }
}

impl FaultTarget for FinalizationController {
    fn on_fault(&self, signal: i32) {
        // a rejected entry returns into whatever was interrupted
        let _ = self.abort_from_fault(signal);
    }
}

/// Fatal setup failure: log and exit with the error's code, no report
pub fn abort_setup(err: &QuotaboxError, exit: &dyn ProcessExit) -> i32 {
    let code = err.exit_code();
    error!("fatal setup failure, exiting with {}: {}", code, err);
    exit.exit(code);
    code
}
