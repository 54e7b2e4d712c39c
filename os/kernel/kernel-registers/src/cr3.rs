#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// CR3: Page-Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical base address of the page directory and the
/// cache-control flags used when the MMU reads it.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2: Reserved (must be 0).
    #[bits(3)]
    _reserved0: u8,

    /// Bit 3: PWT: Page-level Write-Through for the directory.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for the directory.
    pub pcd: bool,

    /// Bits 5–11: Reserved (must be 0 when written).
    #[bits(7)]
    _reserved1: u8,

    /// Bits 12–31: Page directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// Create a `Cr3` value from a page directory's physical base.
    ///
    /// `directory_phys` must be 4 KiB-aligned.
    #[must_use]
    pub fn from_directory_phys(directory_phys: u32, pwt: bool, pcd: bool) -> Self {
        debug_assert_eq!(
            directory_phys & 0xFFF,
            0,
            "page directory base must be 4K-aligned"
        );
        Self::new()
            .with_pwt(pwt)
            .with_pcd(pcd)
            .with_directory_base_4k(directory_phys >> 12)
    }

    /// Physical address of the page directory.
    #[must_use]
    pub const fn directory_phys(&self) -> u32 {
        self.directory_base_4k() << 12
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
