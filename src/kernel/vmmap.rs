//! Memory map visitor contract used by the diagnostic dump
//!
//! The walker that knows the sandbox address space lives with the loader; the
//! dump only needs to visit regions in order. `RegionTable` is the snapshot
//! implementation the runtime fills at load time.

use serde::{Deserialize, Serialize};

/// Protection bits of a mapped region
pub mod prot {
    pub const NONE: u32 = 0x0;
    pub const READ: u32 = 0x1;
    pub const WRITE: u32 = 0x2;
    pub const EXEC: u32 = 0x4;
}

/// One mapped region of the sandbox address space
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryRegion {
    pub page_number: u64,
    pub page_count: u64,
    pub protection: u32,
}

/// Anything that can walk the sandbox memory map
///
/// Implementations must not allocate while visiting: the dump runs on the
/// fault path.
pub trait MemoryMap: Send + Sync {
    fn visit(&self, visitor: &mut dyn FnMut(&MemoryRegion));
}

/// Memory map snapshot held in a preallocated table
#[derive(Clone, Debug, Default)]
pub struct RegionTable {
    regions: Vec<MemoryRegion>,
}

impl RegionTable {
    pub fn new(regions: Vec<MemoryRegion>) -> Self {
        Self { regions }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl MemoryMap for RegionTable {
    fn visit(&self, visitor: &mut dyn FnMut(&MemoryRegion)) {
        for region in &self.regions {
            visitor(region);
        }
    }
}

/// Log every region at `level`, one line per field
pub fn log_regions(map: &dyn MemoryMap, level: log::Level) {
    log::log!(level, "memory map:");
    map.visit(&mut |region| {
        log::log!(level, "page num 0x{:06x}", region.page_number);
        log::log!(level, "num pages {}", region.page_count);
        log::log!(level, "prot bits {:x}", region.protection);
    });
}
