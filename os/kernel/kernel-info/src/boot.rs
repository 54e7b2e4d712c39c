//! # Boot Memory Information

use crate::memory::{DEFAULT_PHYSICAL_MEMORY, PAGE_SIZE};

/// `flags` bit telling that `mem_lower`/`mem_upper` are valid.
pub const MULTIBOOT_INFO_MEMORY: u32 = 1 << 0;

/// The leading, memory-related part of the multiboot information block.
///
/// Keep this `#[repr(C)]`; the boot loader hands the kernel a pointer to
/// the full structure and only these fields are read here.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BootMemoryInfo {
    /// Validity flags for the remaining fields.
    pub flags: u32,

    /// KiB of conventional memory starting at address 0.
    pub mem_lower: u32,

    /// KiB of memory starting at 1 MiB, up to the first hole.
    pub mem_upper: u32,
}

impl BootMemoryInfo {
    /// Information as reported by a boot loader that detected memory.
    #[must_use]
    pub const fn new(mem_lower_kib: u32, mem_upper_kib: u32) -> Self {
        Self {
            flags: MULTIBOOT_INFO_MEMORY,
            mem_lower: mem_lower_kib,
            mem_upper: mem_upper_kib,
        }
    }

    /// Whether the boot loader filled in the memory fields.
    #[must_use]
    pub const fn has_memory_info(&self) -> bool {
        self.flags & MULTIBOOT_INFO_MEMORY != 0
    }

    /// Size of physical memory in bytes, rounded down to whole frames.
    ///
    /// Falls back to [`DEFAULT_PHYSICAL_MEMORY`] if the boot loader did not
    /// report memory. `mem_upper` counts from the 1 MiB mark, so the result
    /// is `1 MiB + mem_upper KiB`, saturated at the 4 GiB boundary.
    #[must_use]
    pub fn physical_memory_size(&self) -> u32 {
        if !self.has_memory_info() {
            return DEFAULT_PHYSICAL_MEMORY;
        }

        let total = 0x10_0000 + u64::from(self.mem_upper) * 1024;
        let bytes = u32::try_from(total).unwrap_or(u32::MAX);
        bytes & !(PAGE_SIZE - 1)
    }
}
