// Finalization integration tests
// Step ordering, only-once entry, baseline accessor and the fatal setup path

use quotabox::accounting::collector::AccountingCollector;
use quotabox::accounting::report::BASELINE_ACCOUNTING;
use quotabox::config::loader::AccountingConfig;
use quotabox::core::process::ProcessExit;
use quotabox::core::sandbox::Sandbox;
use quotabox::core::supervisor::ReportSink;
use quotabox::exec::{abort_setup, Finalization, FinalizationController};
use quotabox::kernel::signal::FaultHandler;
use quotabox::kernel::vmmap::{prot, MemoryMap, MemoryRegion};
use quotabox::{ChannelDescriptor, Outcome, Phase, QuotaboxError, Result, SourceKind, StrategyKind, SystemMetrics};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

type EventLog = Arc<Mutex<Vec<&'static str>>>;
type ControllerRef = Arc<OnceLock<&'static FinalizationController>>;

struct RecordingMap(EventLog);

impl MemoryMap for RecordingMap {
    fn visit(&self, visitor: &mut dyn FnMut(&MemoryRegion)) {
        self.0.lock().unwrap().push("dump");
        visitor(&MemoryRegion { page_number: 0x400, page_count: 16, protection: prot::READ | prot::EXEC });
    }
}

/// Collector that can inject a fault while the report is being collected
struct RecordingCollector {
    events: EventLog,
    controller: ControllerRef,
    fault_during_collect: bool,
    reentry: Arc<Mutex<Vec<Finalization>>>,
    real_cpu: AtomicI64,
}

impl AccountingCollector for RecordingCollector {
    fn strategy_name(&self) -> &'static str {
        "recording"
    }

    fn collect(&self) -> SystemMetrics {
        let closed = self
            .controller
            .get()
            .map(|c| c.sandbox().channels().is_closed())
            .unwrap_or(false);
        self.events
            .lock()
            .unwrap()
            .push(if closed { "collect-after-teardown" } else { "collect-before-teardown" });

        if self.fault_during_collect {
            if let Some(controller) = self.controller.get() {
                let result = controller.abort_from_fault(libc::SIGSEGV);
                self.reentry.lock().unwrap().push(result);
            }
        }

        // a second pass would report a different value
        let real_cpu_ms = self.real_cpu.fetch_add(1000, Ordering::SeqCst);
        SystemMetrics { real_cpu_ms, user_cpu_ms: 0, memory_bytes: 4096, swap_bytes: 0 }
    }

    fn shutdown(&self) -> Result<()> {
        self.events.lock().unwrap().push("shutdown");
        Ok(())
    }
}

struct RecordingSink {
    events: EventLog,
    published: Arc<Mutex<Vec<String>>>,
}

impl ReportSink for RecordingSink {
    fn publish(&self, report: &str) -> Result<()> {
        self.events.lock().unwrap().push("publish");
        self.published.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

struct RecordingExit {
    events: EventLog,
    codes: Arc<Mutex<Vec<i32>>>,
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.events.lock().unwrap().push("exit");
        self.codes.lock().unwrap().push(code);
    }
}

struct Harness {
    controller: &'static FinalizationController,
    events: EventLog,
    published: Arc<Mutex<Vec<String>>>,
    codes: Arc<Mutex<Vec<i32>>>,
    reentry: Arc<Mutex<Vec<Finalization>>>,
}

fn harness(fault_during_collect: bool) -> Harness {
    let events: EventLog = Arc::default();
    let published = Arc::new(Mutex::new(Vec::new()));
    let codes = Arc::new(Mutex::new(Vec::new()));
    let reentry = Arc::new(Mutex::new(Vec::new()));
    let slot: ControllerRef = Arc::new(OnceLock::new());

    let sandbox = Sandbox::new(
        vec![
            ChannelDescriptor::with_counters("input", SourceKind::Regular, [3, 30, 1, 5]),
            ChannelDescriptor::with_counters("socket", SourceKind::Network, [2, 20, 0, 0]),
        ],
        Box::new(RecordingMap(events.clone())),
        4096,
        0,
    );
    let release_events = events.clone();
    let sandbox = sandbox.with_registry_teardown(Box::new(move |_: &[ChannelDescriptor]| {
        release_events.lock().unwrap().push("registry-teardown")
    }));
    let collector = RecordingCollector {
        events: events.clone(),
        controller: slot.clone(),
        fault_during_collect,
        reentry: reentry.clone(),
        real_cpu: AtomicI64::new(10),
    };
    let mut controller = FinalizationController::new(
        sandbox,
        Box::new(collector),
        Box::new(RecordingSink { events: events.clone(), published: published.clone() }),
        Box::new(RecordingExit { events: events.clone(), codes: codes.clone() }),
    );
    let hook_events = events.clone();
    controller.register_teardown("registry", move || hook_events.lock().unwrap().push("hook"));

    let controller: &'static FinalizationController = Box::leak(Box::new(controller));
    let _ = slot.set(controller);

    Harness { controller, events, published, codes, reentry }
}

#[test]
fn test_accessor_returns_baseline_before_finalization() {
    let h = harness(false);
    assert_eq!(h.controller.phase(), Phase::Running);
    assert_eq!(h.controller.get_accounting_info(), BASELINE_ACCOUNTING);
    assert!(!h.controller.get_accounting_info().is_empty());
    assert!(h.controller.report().is_none());
}

#[test]
fn test_clean_exit_steps_in_order() {
    let h = harness(false);
    assert_eq!(h.controller.normal_exit(0), Finalization::Completed { code: 0 });

    assert_eq!(
        *h.events.lock().unwrap(),
        vec!["registry-teardown", "collect-after-teardown", "publish", "hook", "shutdown", "exit"]
    );
    assert_eq!(*h.codes.lock().unwrap(), vec![0]);
    assert_eq!(h.controller.phase(), Phase::Terminated);
}

#[test]
fn test_fault_dumps_before_teardown() {
    let h = harness(false);
    assert_eq!(h.controller.abort_from_fault(libc::SIGBUS), Finalization::Completed { code: 128 + libc::SIGBUS });

    assert_eq!(
        *h.events.lock().unwrap(),
        vec!["dump", "registry-teardown", "collect-after-teardown", "publish", "hook", "shutdown", "exit"]
    );
    assert_eq!(h.controller.outcome(), Outcome::Faulted(128 + libc::SIGBUS));
}

#[test]
fn test_report_is_idempotent() {
    let h = harness(false);
    h.controller.normal_exit(0);

    let first = h.controller.get_accounting_info().to_string();
    assert_eq!(first, "10 0 4096 0 3 30 1 5 2 20 0 0");
    assert_eq!(h.controller.get_accounting_info(), first);

    assert_eq!(h.controller.normal_exit(0), Finalization::Rejected(Phase::Terminated));
    assert_eq!(h.controller.abort_from_fault(libc::SIGSEGV), Finalization::Rejected(Phase::Terminated));
    assert_eq!(h.controller.get_accounting_info(), first);
    assert_eq!(*h.published.lock().unwrap(), vec![first]);
}

#[test]
fn test_fault_during_finalization_folds_into_first_pass() {
    let h = harness(true);
    assert_eq!(h.controller.normal_exit(0), Finalization::Completed { code: 0 });

    assert_eq!(*h.reentry.lock().unwrap(), vec![Finalization::Rejected(Phase::Finalizing)]);

    let events = h.events.lock().unwrap();
    assert_eq!(events.iter().filter(|e| e.starts_with("collect")).count(), 1);
    assert!(!events.contains(&"dump"));
    assert_eq!(*h.published.lock().unwrap(), vec!["10 0 4096 0 3 30 1 5 2 20 0 0".to_string()]);
    assert_eq!(*h.codes.lock().unwrap(), vec![0]);
    assert_eq!(h.controller.outcome(), Outcome::Clean);
}

#[test]
fn test_unsupported_channel_still_publishes() {
    let published = Arc::new(Mutex::new(Vec::new()));
    let events: EventLog = Arc::default();
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sandbox = Sandbox::new(
        vec![
            ChannelDescriptor::with_counters("input", SourceKind::Regular, [3, 30, 1, 5]),
            ChannelDescriptor::with_counters("odd", SourceKind::Other(12), [1, 1, 1, 1]),
        ],
        Box::new(RecordingMap(events.clone())),
        1_048_576,
        65_536,
    );
    let controller = FinalizationController::new(
        sandbox,
        Box::new(quotabox::accounting::NativeCollector::with_clock(1_048_576, 65_536, || 0, 1_000_000)),
        Box::new(RecordingSink { events: events.clone(), published: published.clone() }),
        Box::new(RecordingExit { events, codes }),
    );

    controller.normal_exit(0);
    assert_eq!(*published.lock().unwrap(), vec!["0 0 1114112 0 0 0 0 0 0 0 0 0".to_string()]);
}

#[test]
fn test_allocation_failure_aborts_without_report() {
    // a controller root whose folder path cannot fit the fixed path buffer
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a".repeat(200)).join("b".repeat(200));
    std::fs::create_dir_all(&root).unwrap();

    let config = AccountingConfig {
        strategy: StrategyKind::Extended,
        cgroup_root: root,
        ..AccountingConfig::default()
    };
    let events: EventLog = Arc::default();
    let published = Arc::new(Mutex::new(Vec::new()));
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink { events: events.clone(), published: published.clone() };
    let exit = RecordingExit { events: events.clone(), codes: codes.clone() };

    let sandbox = Sandbox::new(Vec::new(), Box::new(RecordingMap(events.clone())), 0, 0);
    let err = match FinalizationController::from_config(
        &config,
        sandbox,
        Box::new(sink),
        Box::new(RecordingExit { events: events.clone(), codes: Arc::default() }),
    ) {
        Ok(_) => panic!("setup should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, QuotaboxError::Allocation(_)));

    assert_eq!(abort_setup(&err, &exit), libc::ENOMEM);
    assert_eq!(*codes.lock().unwrap(), vec![libc::ENOMEM]);
    assert!(published.lock().unwrap().is_empty());
    assert_eq!(*events.lock().unwrap(), vec!["exit"]);
}

#[test]
fn test_publish_counts_stay_single_across_threads() {
    let h = harness(false);
    let calls = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let calls = calls.clone();
            let controller = h.controller;
            std::thread::spawn(move || {
                let result = if i % 2 == 0 {
                    controller.normal_exit(0)
                } else {
                    controller.abort_from_fault(libc::SIGTERM)
                };
                if matches!(result, Finalization::Completed { .. }) {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.published.lock().unwrap().len(), 1);
    assert_eq!(h.codes.lock().unwrap().len(), 1);
}

// the only test in this binary that installs process-wide fault handlers
#[test]
fn test_signal_enters_finalization_once_and_removes_handlers() {
    let h = harness(false);
    h.controller.install_fault_handlers().unwrap();
    assert!(FaultHandler::installed());

    nix::sys::signal::raise(nix::sys::signal::Signal::SIGXCPU).unwrap();

    let code = 128 + libc::SIGXCPU;
    assert_eq!(h.controller.phase(), Phase::Terminated);
    assert_eq!(h.controller.outcome(), Outcome::Faulted(code));
    assert_eq!(*h.published.lock().unwrap(), vec!["10 0 4096 0 3 30 1 5 2 20 0 0".to_string()]);
    assert_eq!(*h.codes.lock().unwrap(), vec![code]);
    assert!(!FaultHandler::installed());
    assert_eq!(h.events.lock().unwrap().first(), Some(&"dump"));

    assert_eq!(h.controller.normal_exit(0), Finalization::Rejected(Phase::Terminated));
    assert_eq!(h.published.lock().unwrap().len(), 1);
}

#[test]
fn test_out_of_range_signal_does_not_overflow() {
    let h = harness(false);
    let code = 128i32.wrapping_add(i32::MAX);
    assert_eq!(h.controller.abort_from_fault(i32::MAX), Finalization::Completed { code });
    assert_eq!(*h.codes.lock().unwrap(), vec![code]);
}
