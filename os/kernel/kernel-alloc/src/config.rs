//! # Memory Configuration
//!
//! Everything [`KernelMemory::init_paging`](crate::KernelMemory::init_paging)
//! needs to know about the machine and the heap layout.

use crate::heap::HeapConfig;
use kernel_info::boot::BootMemoryInfo;
use kernel_info::memory::{DEFAULT_PHYSICAL_MEMORY, KERNEL_HEAP_INDEX_CAPACITY};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Bytes of physical memory, a whole number of frames.
    pub physical_memory: u32,
    pub heap: HeapConfig,
    /// Holes the heap can track at once.
    pub index_capacity: usize,
}

impl MemoryConfig {
    /// The kernel heap layout on a machine with `physical_memory` bytes.
    #[must_use]
    pub const fn kernel(physical_memory: u32) -> Self {
        Self {
            physical_memory,
            heap: HeapConfig::kernel(),
            index_capacity: KERNEL_HEAP_INDEX_CAPACITY,
        }
    }

    /// The kernel layout, sized to the memory the boot loader reported.
    #[must_use]
    pub fn from_boot_info(info: &BootMemoryInfo) -> Self {
        Self::kernel(info.physical_memory_size())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::kernel(DEFAULT_PHYSICAL_MEMORY)
    }
}
