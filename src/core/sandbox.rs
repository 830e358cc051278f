use crate::config::loader::SandboxManifest;
use crate::config::types::ChannelDescriptor;
use crate::core::manifest::{ChannelRegistry, RegistryTeardown};
use crate::kernel::vmmap::{MemoryMap, RegionTable};
/// Sandbox instance handle
///
/// Per-process runtime state of one execution of untrusted code, as far as
/// accounting and finalization need it. Passed by reference instead of living
/// in a global.
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

pub struct Sandbox {
    run_id: Uuid,
    channels: ChannelRegistry,
    memory_map: Box<dyn MemoryMap>,
    heap_extent: i64,
    stack_reservation: i64,
    exit_code: AtomicI32,
}

impl Sandbox {
    pub fn new(
        channels: Vec<ChannelDescriptor>,
        memory_map: Box<dyn MemoryMap>,
        heap_extent: i64,
        stack_reservation: i64,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            channels: ChannelRegistry::new(channels),
            memory_map,
            heap_extent,
            stack_reservation,
            exit_code: AtomicI32::new(0),
        }
    }

    pub fn from_manifest(manifest: &SandboxManifest) -> Self {
        Self::new(
            manifest.channel_descriptors(),
            Box::new(RegionTable::new(manifest.memory_map.clone())),
            manifest.heap_extent,
            manifest.stack_reservation,
        )
    }

    /// Release primitive run when finalization tears down the channel registry
    pub fn with_registry_teardown(mut self, release: Box<dyn RegistryTeardown>) -> Self {
        self.channels.set_teardown(release);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn memory_map(&self) -> &dyn MemoryMap {
        self.memory_map.as_ref()
    }

    pub fn heap_extent(&self) -> i64 {
        self.heap_extent
    }

    pub fn stack_reservation(&self) -> i64 {
        self.stack_reservation
    }

    /// Exit code the runtime intends to terminate with
    pub fn record_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Log instance details at `level`
    pub fn print_details(&self, level: log::Level) {
        log::log!(level, "sandbox {}:", self.run_id);
        log::log!(level, "  heap extent {:#x}", self.heap_extent);
        log::log!(level, "  stack reservation {:#x}", self.stack_reservation);
        log::log!(level, "  recorded exit code {}", self.exit_code());
        log::log!(
            level,
            "  channels {} ({})",
            self.channels.len(),
            if self.channels.is_closed() { "closed" } else { "open" }
        );
        for (index, channel) in self.channels.channels().iter().enumerate() {
            let [gets, get_bytes, puts, put_bytes] = channel.counters();
            log::log!(
                level,
                "  channel {} {} [{}] gets={} get_bytes={} puts={} put_bytes={}",
                index,
                channel.name(),
                channel.source(),
                gets,
                get_bytes,
                puts,
                put_bytes
            );
        }
    }
}
