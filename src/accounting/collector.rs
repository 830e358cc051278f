//! System metrics collection
//!
//! Two strategies behind [`AccountingCollector`]: the native fallback derives
//! memory from the sandbox layout and CPU from the process clock; the extended
//! one reads the per-process resource controller folder. The strategy is
//! chosen once by [`select_collector`] and fixed for the process lifetime.

use crate::config::loader::AccountingConfig;
use crate::config::types::{QuotaboxError, Result, StrategyKind, SystemMetrics, STAT_UNAVAILABLE};
use crate::kernel::cgroup::{read_stat_file, ResourceController, StatPath};
use crate::kernel::clock;
use log::{error, info, warn};

pub trait AccountingCollector: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    /// Gather current metrics. Never fails: unreadable fields carry
    /// [`STAT_UNAVAILABLE`].
    fn collect(&self) -> SystemMetrics;

    /// Release whatever the strategy set up
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Native fallback: no syscalls besides the process clock
pub struct NativeCollector {
    heap_extent: i64,
    stack_reservation: i64,
    clock: fn() -> i64,
    ticks_per_second: i64,
}

impl NativeCollector {
    pub fn new(heap_extent: i64, stack_reservation: i64) -> Self {
        Self::with_clock(
            heap_extent,
            stack_reservation,
            clock::process_clock_ticks,
            clock::ticks_per_second(),
        )
    }

    /// Use a custom tick source (tests, other clocks)
    pub fn with_clock(
        heap_extent: i64,
        stack_reservation: i64,
        clock: fn() -> i64,
        ticks_per_second: i64,
    ) -> Self {
        Self {
            heap_extent,
            stack_reservation,
            clock,
            ticks_per_second,
        }
    }
}

impl AccountingCollector for NativeCollector {
    fn strategy_name(&self) -> &'static str {
        "native"
    }

    fn collect(&self) -> SystemMetrics {
        SystemMetrics {
            real_cpu_ms: clock::ticks_to_ms((self.clock)(), self.ticks_per_second),
            user_cpu_ms: 0,
            memory_bytes: self.heap_extent.wrapping_add(self.stack_reservation),
            swap_bytes: 0,
        }
    }
}

/// Extended accounting over a resource controller folder
pub struct ExtendedCollector {
    controller: ResourceController,
}

const NANOS_PER_MILLI: i64 = 1_000_000;

impl ExtendedCollector {
    pub fn new(controller: ResourceController) -> Self {
        Self { controller }
    }

    fn read(&self, path: &StatPath) -> i64 {
        match read_stat_file(path) {
            Ok(value) => value,
            Err(e) => {
                error!("error statistics reading for {}: {}", path, e);
                STAT_UNAVAILABLE
            }
        }
    }
}

impl AccountingCollector for ExtendedCollector {
    fn strategy_name(&self) -> &'static str {
        "extended"
    }

    fn collect(&self) -> SystemMetrics {
        let user_cpu = self.read(self.controller.user_cpu_path());
        SystemMetrics {
            // not measured by the controller
            real_cpu_ms: 0,
            user_cpu_ms: if user_cpu == STAT_UNAVAILABLE {
                STAT_UNAVAILABLE
            } else {
                user_cpu / NANOS_PER_MILLI
            },
            memory_bytes: self.read(self.controller.memory_path()),
            swap_bytes: self.read(self.controller.swap_path()),
        }
    }

    fn shutdown(&self) -> Result<()> {
        self.controller.teardown()
    }
}

/// Choose and prepare the accounting strategy
///
/// `Auto` picks extended when the controller root exists. A failed extended
/// setup falls back to native unless `strict_mode` is set. `Allocation`
/// errors are always returned: they are fatal to the caller.
pub fn select_collector(
    config: &AccountingConfig,
    pid: u32,
    heap_extent: i64,
    stack_reservation: i64,
) -> Result<Box<dyn AccountingCollector>> {
    let native = || -> Box<dyn AccountingCollector> {
        Box::new(NativeCollector::new(heap_extent, stack_reservation))
    };

    info!(
        "Accounting strategy selection: requested={:?}, strict_mode={}, root={}",
        config.strategy,
        config.strict_mode,
        config.cgroup_root.display()
    );

    if config.strategy == StrategyKind::Native {
        return Ok(native());
    }

    match ResourceController::setup(&config.cgroup_root, pid, &config.stat_names) {
        Ok(Some(controller)) => Ok(Box::new(ExtendedCollector::new(controller))),
        Ok(None) => {
            if config.strategy == StrategyKind::Extended && config.strict_mode {
                Err(QuotaboxError::Cgroup(format!(
                    "extended accounting requested but {} is missing",
                    config.cgroup_root.display()
                )))
            } else {
                Ok(native())
            }
        }
        Err(e @ QuotaboxError::Allocation(_)) => Err(e),
        Err(e) => {
            if config.strict_mode {
                Err(e)
            } else {
                warn!("Extended accounting setup failed, using native accounting: {}", e);
                Ok(native())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::StatNames;

    fn fixed_clock() -> i64 {
        2_500_000
    }

    #[test]
    fn test_native_memory_is_heap_plus_stack() {
        let metrics = NativeCollector::new(1_048_576, 65_536).collect();
        assert_eq!(metrics.memory_bytes, 1_114_112);
        assert_eq!(metrics.user_cpu_ms, 0);
        assert_eq!(metrics.swap_bytes, 0);
        assert!(metrics.real_cpu_ms >= 0);
    }

    #[test]
    fn test_native_cpu_conversion() {
        let collector = NativeCollector::with_clock(0, 0, fixed_clock, 1_000_000);
        assert_eq!(collector.collect().real_cpu_ms, 2500);
    }

    #[test]
    fn test_extended_reads_and_degrades_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let names = StatNames::default();
        let controller = ResourceController::setup(dir.path(), 100, &names).unwrap().unwrap();
        let folder = controller.folder().to_path_buf();
        std::fs::write(folder.join(&names.user_cpu), "3000000000\n").unwrap();
        std::fs::write(folder.join(&names.memory), "8192\n").unwrap();
        std::fs::remove_file(folder.join(&names.swap)).unwrap();

        let metrics = ExtendedCollector::new(controller).collect();
        assert_eq!(
            metrics,
            SystemMetrics {
                real_cpu_ms: 0,
                user_cpu_ms: 3000,
                memory_bytes: 8192,
                swap_bytes: STAT_UNAVAILABLE,
            }
        );
    }

    #[test]
    fn test_select_native_when_requested() {
        let config = AccountingConfig {
            strategy: StrategyKind::Native,
            ..Default::default()
        };
        let collector = select_collector(&config, 1, 10, 20).unwrap();
        assert_eq!(collector.strategy_name(), "native");
    }

    #[test]
    fn test_auto_without_root_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccountingConfig {
            strategy: StrategyKind::Auto,
            cgroup_root: dir.path().join("missing"),
            strict_mode: true,
            ..Default::default()
        };
        let collector = select_collector(&config, 1, 10, 20).unwrap();
        assert_eq!(collector.strategy_name(), "native");
    }

    #[test]
    fn test_strict_extended_without_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccountingConfig {
            strategy: StrategyKind::Extended,
            cgroup_root: dir.path().join("missing"),
            strict_mode: true,
            ..Default::default()
        };
        assert!(matches!(
            select_collector(&config, 1, 10, 20),
            Err(QuotaboxError::Cgroup(_))
        ));
    }

    #[test]
    fn test_overlong_root_is_fatal_even_when_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let mut root = dir.path().to_path_buf();
        while root.as_os_str().len() < crate::kernel::cgroup::path::PATH_CAPACITY {
            root.push("deep-directory-name");
        }
        std::fs::create_dir_all(&root).unwrap();

        let config = AccountingConfig {
            strategy: StrategyKind::Auto,
            cgroup_root: root,
            strict_mode: false,
            ..Default::default()
        };
        assert!(matches!(
            select_collector(&config, 1, 10, 20),
            Err(QuotaboxError::Allocation(_))
        ));
    }

    #[test]
    fn test_select_extended_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccountingConfig {
            strategy: StrategyKind::Extended,
            cgroup_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let collector = select_collector(&config, 55, 10, 20).unwrap();
        assert_eq!(collector.strategy_name(), "extended");

        // counters written at setup are regular files here; clear them first
        for entry in std::fs::read_dir(dir.path().join("55")).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        collector.shutdown().unwrap();
        assert!(!dir.path().join("55").exists());
    }
}
