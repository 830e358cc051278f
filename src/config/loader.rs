/// Configuration loading from quotabox.json
use crate::config::types::{
    ChannelDescriptor, ChannelSpec, QuotaboxError, Result, StrategyKind, UnsupportedKindPolicy,
};
use crate::kernel::vmmap::MemoryRegion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment override for the accounting strategy
pub const STRATEGY_ENV: &str = "QUOTABOX_ACCOUNTING";

/// Default configuration file name, looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "quotabox.json";

/// Names of the counter files inside the resource controller folder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatNames {
    /// User CPU time, nanoseconds
    pub user_cpu: String,
    /// Peak memory, bytes
    pub memory: String,
    /// Peak memory plus swap, bytes
    pub swap: String,
    /// Task list the process attaches itself to
    pub tasks: String,
}

impl Default for StatNames {
    fn default() -> Self {
        Self {
            user_cpu: "cpuacct.usage_user".to_string(),
            memory: "memory.max_usage_in_bytes".to_string(),
            swap: "memory.memsw.max_usage_in_bytes".to_string(),
            tasks: "tasks".to_string(),
        }
    }
}

/// Accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Which collector to use
    pub strategy: StrategyKind,
    /// Resource controller root; the per-process folder is created below it
    pub cgroup_root: PathBuf,
    pub stat_names: StatNames,
    /// Strict mode: fail setup instead of falling back to native accounting
    pub strict_mode: bool,
    pub unsupported_kind_policy: UnsupportedKindPolicy,
    /// Log level of the diagnostic dump on faulted exits
    pub dump_level: log::Level,
    /// Install fault handlers that route into finalization
    pub handle_signals: bool,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Auto,
            cgroup_root: PathBuf::from("/sys/fs/cgroup/quotabox"),
            stat_names: StatNames::default(),
            strict_mode: false,
            unsupported_kind_policy: UnsupportedKindPolicy::ShortCircuit,
            dump_level: log::Level::Trace,
            handle_signals: true,
        }
    }
}

impl AccountingConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| QuotaboxError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: AccountingConfig = serde_json::from_str(&content)
            .map_err(|e| QuotaboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.apply_env()?;
        Ok(config)
    }

    /// Load ./quotabox.json, or defaults when it is absent
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| QuotaboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::debug!("{} not found, using default accounting config", DEFAULT_CONFIG_FILE);
            let mut config = Self::default();
            config.apply_env()?;
            return Ok(config);
        }

        Self::load_from_file(config_path)
    }

    /// Apply `QUOTABOX_ACCOUNTING` if set
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(STRATEGY_ENV) {
            self.strategy = value.parse()?;
            log::info!("Accounting strategy overridden by {}: {:?}", STRATEGY_ENV, self.strategy);
        }
        Ok(())
    }
}

/// Snapshot of the sandbox configuration the runtime hands to accounting
///
/// The real manifest is parsed elsewhere; this is the harness format used by
/// the CLI and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxManifest {
    /// Bytes between the start of the user heap and its current end
    pub heap_extent: i64,
    /// Bytes reserved for the user stack
    pub stack_reservation: i64,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub memory_map: Vec<MemoryRegion>,
}

impl SandboxManifest {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| QuotaboxError::Config(format!("Failed to read manifest: {}", e)))?;

        let manifest: SandboxManifest = serde_json::from_str(&content)
            .map_err(|e| QuotaboxError::Config(format!("Failed to parse manifest JSON: {}", e)))?;

        if manifest.heap_extent < 0 || manifest.stack_reservation < 0 {
            return Err(QuotaboxError::Config(
                "heap_extent and stack_reservation must not be negative".to_string(),
            ));
        }

        Ok(manifest)
    }

    pub fn channel_descriptors(&self) -> Vec<ChannelDescriptor> {
        self.channels.iter().map(ChannelDescriptor::from).collect()
    }
}
