//! # Page Faults
//!
//! Every page fault is fatal in this kernel: there is no demand paging, so a
//! failed translation means a bug. The handler decodes what happened, logs it
//! and halts via `panic!`.

use crate::addresses::VirtAddr;
use bitfield_struct::bitfield;
use core::fmt;
pub use kernel_info::memory::PAGE_FAULT_VECTOR;
use log::error;

/// Page-fault error code layout (IA-32).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn not_present(&self) -> bool {
        !self.present()
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.instruction_fetch() {
            "Instruction fetch on protected page"
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// What the interrupt layer hands a fault handler.
///
/// Mirrors the frame the common ISR stub pushes: the vector, the CPU's
/// error code and the interrupted instruction.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct FaultContext {
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

/// A decoded page fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageFault {
    /// The linear address whose translation failed (CR2).
    pub address: VirtAddr,
    pub error: PageFaultError,
    pub eip: u32,
}

impl PageFault {
    #[must_use]
    pub fn new(address: VirtAddr, ctx: &FaultContext) -> Self {
        Self {
            address,
            error: PageFaultError::from_bits(ctx.error_code),
            eip: ctx.eip,
        }
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.error;
        write!(f, "page fault at {} (", self.address)?;
        f.write_str(if e.present() {
            "protection"
        } else {
            "not-present"
        })?;
        f.write_str(if e.write() { " write" } else { " read" })?;
        f.write_str(if e.user() { " user-mode" } else { " kernel-mode" })?;
        if e.reserved_bit() {
            f.write_str(" reserved-bit")?;
        }
        if e.instruction_fetch() {
            f.write_str(" instruction-fetch")?;
        }
        write!(f, ") eip={:#010x}: {}", self.eip, e.explain())
    }
}

/// Reports `fault` and halts. Page faults are never recovered from.
pub fn report_page_fault(fault: &PageFault) -> ! {
    error!("{fault}");
    error!("{:#?}", fault.error);
    panic!("{fault}");
}

/// The interrupt layer's way of dispatching exceptions.
pub trait FaultRegistry {
    fn register_fault_handler(&mut self, vector: u8, handler: fn(&FaultContext));
}

/// Registers the page-fault handler for vector 14.
pub fn install_page_fault_handler<R: FaultRegistry + ?Sized>(registry: &mut R) {
    registry.register_fault_handler(PAGE_FAULT_VECTOR, page_fault_handler);
}

/// Reads CR2, decodes the fault and halts.
pub fn page_fault_handler(ctx: &FaultContext) {
    let fault = PageFault::new(faulting_address(), ctx);
    report_page_fault(&fault);
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn faulting_address() -> VirtAddr {
    use kernel_registers::{Cr2, LoadRegisterUnsafe};
    // Safety: runs in the fault handler at ring 0.
    VirtAddr::new(unsafe { Cr2::load_unsafe() }.address())
}

/// Hosted builds have no CR2.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
const fn faulting_address() -> VirtAddr {
    VirtAddr::new(0)
}
