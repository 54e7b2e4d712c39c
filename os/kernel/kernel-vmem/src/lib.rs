//! # Virtual Memory Support
//!
//! 32-bit (non-PAE) paging structures for the kernel's memory core.
//!
//! ## What you get
//! - Tiny [`PhysAddr`]/[`VirtAddr`] newtypes (u32) to avoid mixing address kinds.
//! - A hardware-layout [`PageEntry`] bitfield.
//! - A 4 KiB-aligned [`PageTable`] and the [`PageDirectory`] that owns them.
//! - [`PageDirectory::get_or_create_page`], fed by a [`TableAlloc`].
//! - Address-space activation (`switch_active_directory`, bare metal only).
//! - Page-fault decoding and the (fatal) [`page_fault`] handler.
//!
//! ## IA-32 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 ─► Page Directory ─► Page Table ─► 4 KiB Frame
//!            (1024 PDEs)      (1024 PTEs)
//! ```
//!
//! | Level | Table name         | Entry name | Description                                        |
//! |:------|:-------------------|:-----------|:---------------------------------------------------|
//! | 1     | **Page Directory** | **PDE**    | Each entry points to a page table; CR3 holds the directory's physical base. |
//! | 2     | **Page Table**     | **PTE**    | Each entry maps one 4 KiB frame.                    |
//!
//! One directory therefore spans the full 4 GiB, each table 4 MiB.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod addresses;
mod directory;
mod page_entry;
pub mod page_fault;
mod page_table;

pub use crate::addresses::{EntryIndex, PhysAddr, TableIndex, VirtAddr};
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use crate::directory::switch_active_directory;
pub use crate::directory::{
    MapError, NoTableAlloc, PageDirectory, TableAlloc, invalidate_tlb_page,
};
pub use crate::page_entry::PageEntry;
pub use crate::page_table::PageTable;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Align `x` down to the nearest multiple of `a` (which must be a power of two).
///
/// # Examples
/// ```
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0x1234, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (which must be a power of two).
///
/// Returns `None` if the result does not fit into 32 bits.
///
/// # Examples
/// ```
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
/// assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
/// assert_eq!(align_up(0xFFFF_F001, 0x1000), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> Option<u32> {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
