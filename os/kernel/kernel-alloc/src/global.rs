//! # Kernel-Wide Allocator Surface
//!
//! The one [`KernelMemory`] of the running kernel, reachable from anywhere.
//! Every call takes the lock with interrupts disabled, so an interrupt
//! handler that allocates can never observe a half-finished operation.
//!
//! ```ignore
//! init_kernel_memory(KernelMemory::new(BootstrapAllocator::new(window)));
//! let table = kmalloc_aligned(4096);
//! with_kernel_memory(|mem| mem.init_paging(&config, heap_region, &mut idt));
//! kfree(table);
//! ```

use crate::fatal::OrFatal;
use crate::kmalloc::{AllocFlags, Allocation, KernelMemory};
use kernel_sync::{SpinMutex, SyncOnceCell};
use kernel_vmem::{PhysAddr, VirtAddr};

static KERNEL_MEMORY: SyncOnceCell<SpinMutex<KernelMemory<'static>>> = SyncOnceCell::new();

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlobalError {
    #[error("kernel memory is already initialized")]
    AlreadyInitialized,
    #[error("kernel memory is not initialized")]
    Uninitialized,
}

/// Installs the kernel's memory owner. Only the first call succeeds.
///
/// # Panics
/// If called twice.
#[track_caller]
pub fn init_kernel_memory(memory: KernelMemory<'static>) {
    KERNEL_MEMORY
        .set(SpinMutex::new(memory))
        .map(|_| ())
        .map_err(|_| GlobalError::AlreadyInitialized)
        .or_fatal("init_kernel_memory");
}

/// Whether [`init_kernel_memory`] has run.
pub fn is_initialized() -> bool {
    KERNEL_MEMORY.get().is_some()
}

/// Runs `f` on the kernel's memory inside a critical section.
///
/// # Panics
/// Before [`init_kernel_memory`].
#[track_caller]
pub fn with_kernel_memory<U>(f: impl FnOnce(&mut KernelMemory<'static>) -> U) -> U {
    let memory = KERNEL_MEMORY
        .get()
        .ok_or(GlobalError::Uninitialized)
        .or_fatal("kernel memory access");
    memory.with_lock_irq(f)
}

/// Allocates `len` bytes as `flags` ask.
#[track_caller]
pub fn kmalloc_with(len: u32, flags: AllocFlags) -> Allocation {
    with_kernel_memory(|mem| mem.allocate(len, flags))
}

#[track_caller]
pub fn kmalloc(len: u32) -> VirtAddr {
    kmalloc_with(len, AllocFlags::empty()).virt
}

#[track_caller]
pub fn kmalloc_zeroed(len: u32) -> VirtAddr {
    kmalloc_with(len, AllocFlags::ZEROED).virt
}

/// `len` bytes starting on a page boundary.
#[track_caller]
pub fn kmalloc_aligned(len: u32) -> VirtAddr {
    kmalloc_with(len, AllocFlags::PAGE_ALIGNED).virt
}

/// `len` bytes and the physical address of the first one.
#[track_caller]
pub fn kmalloc_physical(len: u32) -> (VirtAddr, PhysAddr) {
    with_kernel_memory(|mem| mem.allocate_physical(len, AllocFlags::empty()))
}

#[track_caller]
pub fn kmalloc_aligned_physical(len: u32) -> (VirtAddr, PhysAddr) {
    with_kernel_memory(|mem| mem.allocate_physical(len, AllocFlags::PAGE_ALIGNED))
}

/// Returns memory from any `kmalloc*` call.
#[track_caller]
pub fn kfree(ptr: VirtAddr) {
    with_kernel_memory(|mem| mem.free(ptr));
}
