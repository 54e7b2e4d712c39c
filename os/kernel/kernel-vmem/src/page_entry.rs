use crate::addresses::PhysAddr;
use bitfield_struct::bitfield;

/// A single 32-bit page table (or page directory) entry.
///
/// The layout is the one the MMU walks, so a [`PageTable`](crate::PageTable)
/// of these can be handed to the hardware unchanged.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning                                 |
/// |-------|-----------------|-----------------------------------------|
/// | 0     | `P`             | Present; entry references a frame       |
/// | 1     | `RW`            | Writable                                |
/// | 2     | `US`            | User-mode accessible                    |
/// | 3     | `PWT`           | Write-through caching                   |
/// | 4     | `PCD`           | Cache disable                           |
/// | 5     | `A`             | Accessed (set by the CPU)               |
/// | 6     | `D`             | Dirty (set by the CPU, leaf only)       |
/// | 7     | `PAT` / `PS`    | PAT in a PTE, page size in a PDE        |
/// | 8     | `G`             | Global                                  |
/// | 9–11  | avail           | Free for software use                   |
/// | 12–31 | `frame`         | Frame index (physical address >> 12)    |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntry, PhysAddr};
/// let mut e = PageEntry::new();
/// e.map_frame(0x123, true, false);
/// assert!(e.present());
/// assert_eq!(e.frame_address(), Some(PhysAddr::new(0x0012_3000)));
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    /// Present (P, bit 0).
    ///
    /// A present entry is what "references a frame" means for the frame
    /// allocator.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Clear restricts the page to ring 0.
    pub user: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6).
    pub dirty: bool,

    /// PAT (bit 7) in a page table entry; page size in a directory entry.
    pub pat: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// Bits 9–11, ignored by the MMU.
    #[bits(3)]
    pub available: u8,

    /// Bits 12–31, the frame index.
    #[bits(20)]
    pub frame: u32,
}

impl PageEntry {
    /// Point this entry at `frame` and mark it present.
    ///
    /// Accessed/dirty history is reset; the entry now describes a fresh
    /// mapping.
    #[inline]
    pub fn map_frame(&mut self, frame: u32, writable: bool, user: bool) {
        *self = Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(user)
            .with_frame(frame);
    }

    /// Forget the frame and every flag.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// The frame index, if the entry is present.
    #[inline]
    #[must_use]
    pub const fn frame_index(&self) -> Option<u32> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }

    /// The physical address of the mapped frame, if the entry is present.
    #[inline]
    #[must_use]
    pub const fn frame_address(&self) -> Option<PhysAddr> {
        match self.frame_index() {
            Some(frame) => Some(PhysAddr::from_frame(frame)),
            None => None,
        }
    }

    /// A directory entry pointing at a page table; present, writable, user.
    ///
    /// User access is decided per page by the leaf entries, so directory
    /// entries are always permissive.
    #[inline]
    #[must_use]
    pub fn table_link(table_phys: PhysAddr) -> Self {
        debug_assert!(table_phys.is_page_aligned(), "page tables are 4K-aligned");
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_frame(table_phys.frame_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_hardware() {
        let mut e = PageEntry::new();
        e.map_frame(0xABCDE, true, true);
        assert_eq!(e.into_bits(), 0xABCD_E007);

        e.map_frame(1, false, false);
        assert_eq!(e.into_bits(), 0x0000_1001);
    }

    #[test]
    fn table_link_is_tagged_present_writable_user() {
        let e = PageEntry::table_link(PhysAddr::new(0x0040_0000));
        assert_eq!(e.into_bits(), 0x0040_0000 | 0x7);
    }

    #[test]
    fn absent_entries_have_no_frame() {
        let e = PageEntry::from_bits(0x1234_5000);
        assert_eq!(e.frame_index(), None);
        assert_eq!(e.frame_address(), None);
    }

    #[test]
    fn clear_resets_everything() {
        let mut e = PageEntry::from_bits(0xFFFF_FFFF);
        e.clear();
        assert_eq!(e.into_bits(), 0);
    }
}
