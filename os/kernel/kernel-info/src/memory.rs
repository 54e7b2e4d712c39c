//! # Memory Layout

/// Size of a page and of a physical frame.
pub const PAGE_SIZE: u32 = 4096;

/// Mask selecting the byte offset within a page.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Number of bits an address is shifted to obtain its page number.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in a page table and in a page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of address space covered by one page table.
pub const TABLE_COVERAGE: u32 = PAGE_SIZE * 1024;

/// Physical memory assumed when the boot loader reports none.
pub const DEFAULT_PHYSICAL_MEMORY: u32 = 0x0100_0000; // 16 MiB

/// Where the kernel heap begins in the virtual address space.
pub const KERNEL_HEAP_START: u32 = 0xC000_0000;

/// Bytes mapped for the kernel heap when it is created.
pub const KERNEL_HEAP_INITIAL_SIZE: u32 = 0x0010_0000;

/// Upper bound the kernel heap may never grow past.
pub const KERNEL_HEAP_MAX: u32 = 0xCFFF_F000;

/// The kernel heap is never contracted below this span.
pub const KERNEL_HEAP_MIN_SIZE: u32 = 0x0007_0000;

/// Number of free holes the kernel heap can track at once.
pub const KERNEL_HEAP_INDEX_CAPACITY: usize = 0x2_0000;

/// Exception vector raised by the MMU on a failed translation.
pub const PAGE_FAULT_VECTOR: u8 = 14;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(TABLE_COVERAGE / PAGE_SIZE == ENTRIES_PER_TABLE as u32);
    assert!(KERNEL_HEAP_START.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_MAX.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_INITIAL_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_MIN_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_MIN_SIZE <= KERNEL_HEAP_INITIAL_SIZE);
    assert!(KERNEL_HEAP_START + KERNEL_HEAP_INITIAL_SIZE <= KERNEL_HEAP_MAX);
    assert!(DEFAULT_PHYSICAL_MEMORY.is_multiple_of(PAGE_SIZE));
};
