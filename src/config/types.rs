/// Core types and structures for quotabox
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Source kind of a configured I/O channel
///
/// Only the first three kinds are classified by accounting. Anything else the
/// manifest produced (pipes, sockets, unknown codes) is carried as `Other` so the
/// aggregator can reject it explicitly instead of guessing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Regular file on the host
    Regular,
    /// Character device
    Character,
    /// Network endpoint
    Network,
    /// Kind the accounting does not know how to classify
    Other(u32),
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Regular => write!(f, "regular"),
            SourceKind::Character => write!(f, "character"),
            SourceKind::Network => write!(f, "network"),
            SourceKind::Other(code) => write!(f, "other({})", code),
        }
    }
}

/// Per-channel counter index
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CounterKind {
    GetsCount,
    GetBytes,
    PutsCount,
    PutBytes,
}

impl CounterKind {
    pub const COUNT: usize = 4;

    pub const ALL: [CounterKind; CounterKind::COUNT] = [
        CounterKind::GetsCount,
        CounterKind::GetBytes,
        CounterKind::PutsCount,
        CounterKind::PutBytes,
    ];

    pub fn index(self) -> usize {
        match self {
            CounterKind::GetsCount => 0,
            CounterKind::GetBytes => 1,
            CounterKind::PutsCount => 2,
            CounterKind::PutBytes => 3,
        }
    }
}

/// One configured I/O channel
///
/// Counters are atomics so that the fault path can read the table while the
/// interrupted program was in the middle of an update. A torn update shows up
/// as a slightly stale value, never as undefined behaviour.
#[derive(Debug)]
pub struct ChannelDescriptor {
    name: String,
    source: SourceKind,
    counters: [AtomicI64; CounterKind::COUNT],
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, source: SourceKind) -> Self {
        Self::with_counters(name, source, [0; CounterKind::COUNT])
    }

    /// Build a descriptor with preloaded counters (manifest snapshots, tests)
    pub fn with_counters(
        name: impl Into<String>,
        source: SourceKind,
        counters: [i64; CounterKind::COUNT],
    ) -> Self {
        Self {
            name: name.into(),
            source,
            counters: counters.map(AtomicI64::new),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn counter(&self, kind: CounterKind) -> i64 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }

    /// Snapshot of all counters in `CounterKind::ALL` order
    pub fn counters(&self) -> [i64; CounterKind::COUNT] {
        CounterKind::ALL.map(|kind| self.counter(kind))
    }

    /// Account one read of `bytes` bytes
    pub fn record_get(&self, bytes: i64) {
        self.counters[CounterKind::GetsCount.index()].fetch_add(1, Ordering::Relaxed);
        self.counters[CounterKind::GetBytes.index()].fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account one write of `bytes` bytes
    pub fn record_put(&self, bytes: i64) {
        self.counters[CounterKind::PutsCount.index()].fetch_add(1, Ordering::Relaxed);
        self.counters[CounterKind::PutBytes.index()].fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Serializable channel snapshot as it appears in a manifest file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelSpec {
    pub name: String,
    pub source: SourceKind,
    #[serde(default)]
    pub counters: [i64; CounterKind::COUNT],
}

impl From<&ChannelSpec> for ChannelDescriptor {
    fn from(spec: &ChannelSpec) -> Self {
        ChannelDescriptor::with_counters(spec.name.clone(), spec.source, spec.counters)
    }
}

/// Summed counters of one channel class
///
/// Addition wraps on overflow. Counters are assumed to stay within `i64`; the
/// accounting neither checks nor saturates.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IoBucket {
    pub gets_count: i64,
    pub get_bytes: i64,
    pub puts_count: i64,
    pub put_bytes: i64,
}

impl IoBucket {
    pub fn add(&mut self, counters: [i64; CounterKind::COUNT]) {
        self.gets_count = self.gets_count.wrapping_add(counters[CounterKind::GetsCount.index()]);
        self.get_bytes = self.get_bytes.wrapping_add(counters[CounterKind::GetBytes.index()]);
        self.puts_count = self.puts_count.wrapping_add(counters[CounterKind::PutsCount.index()]);
        self.put_bytes = self.put_bytes.wrapping_add(counters[CounterKind::PutBytes.index()]);
    }
}

/// Channel usage split into the local and network classes
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelUsage {
    pub local: IoBucket,
    pub network: IoBucket,
}

/// System-level metrics produced by an accounting collector
///
/// A field holding [`STAT_UNAVAILABLE`] could not be read.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemMetrics {
    pub real_cpu_ms: i64,
    pub user_cpu_ms: i64,
    pub memory_bytes: i64,
    pub swap_bytes: i64,
}

/// Sentinel for a stat that could not be read
pub const STAT_UNAVAILABLE: i64 = -1;

/// Final resource accounting record
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountingReport {
    pub metrics: SystemMetrics,
    pub local: IoBucket,
    pub network: IoBucket,
}

/// Lifecycle phase of the sandbox process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    Finalizing = 1,
    Terminated = 2,
}

impl Phase {
    pub fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::Running,
            1 => Phase::Finalizing,
            _ => Phase::Terminated,
        }
    }
}

/// How the sandboxed program ended
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Faulted(i32),
}

impl Outcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Outcome::Clean)
    }

    /// Exit code this outcome terminates the process with
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Clean => 0,
            Outcome::Faulted(code) => *code,
        }
    }
}

/// What the aggregator does with a channel of an unclassified kind
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedKindPolicy {
    /// Fail the whole aggregation; the report carries all-zero channel buckets
    #[default]
    ShortCircuit,
    /// Skip the channel, warn, and keep the totals of the others
    Partial,
}

impl std::fmt::Display for UnsupportedKindPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnsupportedKindPolicy::ShortCircuit => write!(f, "short_circuit"),
            UnsupportedKindPolicy::Partial => write!(f, "partial"),
        }
    }
}

/// Accounting strategy requested by configuration
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Heap/stack extents and the process clock
    Native,
    /// Per-process resource controller folder
    Extended,
    /// Extended when the controller root exists, native otherwise
    #[default]
    Auto,
}

impl std::str::FromStr for StrategyKind {
    type Err = QuotaboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(StrategyKind::Native),
            "extended" => Ok(StrategyKind::Extended),
            "auto" => Ok(StrategyKind::Auto),
            other => Err(QuotaboxError::Config(format!(
                "Unknown accounting strategy: {}",
                other
            ))),
        }
    }
}

/// Custom error types for quotabox
#[derive(Error, Debug)]
pub enum QuotaboxError {
    #[error("Cgroup error: {0}")]
    Cgroup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel {channel} has unsupported source kind {kind}")]
    UnsupportedChannelKind { channel: usize, kind: SourceKind },

    #[error("Allocation failure: {0}")]
    Allocation(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Report write failed on fd {fd}: errno {errno}")]
    PublishWrite { fd: i32, errno: i32 },

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Cannot reset handler for signal {signal}: errno {errno}")]
    SignalReset { signal: i32, errno: i32 },
}

impl QuotaboxError {
    /// Process exit code used when this error aborts setup
    pub fn exit_code(&self) -> i32 {
        match self {
            QuotaboxError::Allocation(_) => libc::ENOMEM,
            QuotaboxError::Cgroup(_) => libc::EACCES,
            QuotaboxError::Config(_) => libc::EINVAL,
            _ => 1,
        }
    }
}

/// Result type alias for quotabox operations
pub type Result<T> = std::result::Result<T, QuotaboxError>;
