//! # Page Directory
//!
//! The root of a 32-bit address space. The directory keeps two parallel views
//! of its 1024 page tables:
//!
//! * `tables`: where the kernel can reach each table through its own
//!   (virtual) addresses, used to walk and edit mappings,
//! * `tables_phys`: the hardware view, one directory entry per table holding
//!   the table's *physical* address. This array is what CR3 points at.
//!
//! Page tables are created lazily by [`PageDirectory::get_or_create_page`];
//! storage comes from whatever [`TableAlloc`] the caller passes in. Before
//! the heap exists that is the bootstrap allocator, afterwards the heap.

use crate::addresses::{PhysAddr, TableIndex, VirtAddr};
use crate::page_entry::PageEntry;
use crate::page_table::PageTable;
use core::ptr::NonNull;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_registers::Cr3;
use log::trace;

/// Errors from building up the directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("no storage left for the page table covering {0}")]
    OutOfTableStorage(VirtAddr),
}

/// Provides storage for new page tables.
///
/// # Safety
/// Implementors must hand out storage that is page-aligned, zero-filled and
/// not aliased by anything else, and that stays valid at the reported
/// physical address for as long as any directory links to it.
pub unsafe trait TableAlloc {
    /// A fresh table plus its physical address, or `None` when exhausted.
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysAddr)>;
}

/// A table source that never has storage.
///
/// Useful where every table is known to exist already, e.g. for a heap
/// whose tables were created up front.
pub struct NoTableAlloc;

// Safety: never hands out storage.
unsafe impl TableAlloc for NoTableAlloc {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysAddr)> {
        None
    }
}

/// A page directory and the tables it owns.
///
/// All-zero storage is a valid, empty directory whose hardware view sits at
/// physical address 0; call [`locate_at`](Self::locate_at) once the real
/// location is known.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    /// Hardware view: present/writable/user links to each table.
    tables_phys: [PageEntry; ENTRIES_PER_TABLE],

    /// Kernel view of the same tables.
    tables: [Option<NonNull<PageTable>>; ENTRIES_PER_TABLE],

    /// Physical address of `tables_phys`, the value loaded into CR3.
    tables_phys_addr: PhysAddr,
}

// Safety: the directory exclusively owns its tables (`TableAlloc` contract).
unsafe impl Send for PageDirectory {}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables_phys: [PageEntry::new(); ENTRIES_PER_TABLE],
            tables: [None; ENTRIES_PER_TABLE],
            tables_phys_addr: PhysAddr::new(0),
        }
    }

    /// Records that this directory lives at physical address `directory_phys`.
    pub fn locate_at(&mut self, directory_phys: PhysAddr) {
        debug_assert!(directory_phys.is_page_aligned());
        let offset = core::mem::offset_of!(Self, tables_phys);
        let offset = u32::try_from(offset).unwrap_or(0);
        self.tables_phys_addr = directory_phys + offset;
    }

    /// Physical address of the hardware view, i.e. what CR3 must hold.
    #[inline]
    #[must_use]
    pub const fn tables_phys_addr(&self) -> PhysAddr {
        self.tables_phys_addr
    }

    /// The CR3 value that activates this directory.
    #[must_use]
    pub fn cr3(&self) -> Cr3 {
        Cr3::from_directory_phys(self.tables_phys_addr.as_u32(), false, false)
    }

    /// The hardware entry linking table `i`.
    #[inline]
    #[must_use]
    pub const fn table_link(&self, i: TableIndex) -> PageEntry {
        self.tables_phys[i.as_usize()]
    }

    /// Whether a table covering `address` exists.
    #[inline]
    #[must_use]
    pub fn has_table(&self, address: VirtAddr) -> bool {
        self.tables[address.table_index().as_usize()].is_some()
    }

    /// Number of tables created so far.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.iter().filter(|t| t.is_some()).count()
    }

    #[must_use]
    pub fn table(&self, i: TableIndex) -> Option<&PageTable> {
        // Safety: linked tables stay valid and unaliased (`TableAlloc` contract).
        self.tables[i.as_usize()].map(|t| unsafe { t.as_ref() })
    }

    pub fn table_mut(&mut self, i: TableIndex) -> Option<&mut PageTable> {
        // Safety: as above; `&mut self` makes the access exclusive.
        self.tables[i.as_usize()].map(|mut t| unsafe { t.as_mut() })
    }

    /// The entry mapping `address`, if its table exists.
    #[must_use]
    pub fn page(&self, address: VirtAddr) -> Option<&PageEntry> {
        self.table(address.table_index())
            .map(|t| t.entry(address.entry_index()))
    }

    /// The entry mapping `address`, if its table exists.
    pub fn page_mut(&mut self, address: VirtAddr) -> Option<&mut PageEntry> {
        self.table_mut(address.table_index())
            .map(|t| t.entry_mut(address.entry_index()))
    }

    /// Resolves `address` to its physical address through the mapping.
    ///
    /// Returns `None` if the page is not present.
    #[must_use]
    pub fn translate(&self, address: VirtAddr) -> Option<PhysAddr> {
        let frame = self.page(address)?.frame_address()?;
        Some(frame + address.page_offset())
    }

    /// Returns the entry that maps `address`.
    ///
    /// With `create` unset, a missing table yields `Ok(None)`. With `create`
    /// set, a missing table is allocated from `tables`, linked into the
    /// hardware view as present/writable/user, and the (empty) entry is
    /// returned.
    ///
    /// # Errors
    /// [`MapError::OutOfTableStorage`] if `tables` has nothing left.
    pub fn get_or_create_page<A: TableAlloc + ?Sized>(
        &mut self,
        address: VirtAddr,
        create: bool,
        tables: &mut A,
    ) -> Result<Option<&mut PageEntry>, MapError> {
        let index = address.table_index();
        if self.tables[index.as_usize()].is_none() {
            if !create {
                return Ok(None);
            }

            let (table, phys) = tables
                .alloc_table()
                .ok_or(MapError::OutOfTableStorage(address))?;
            self.link_table(index, table, phys);
        }

        Ok(self.page_mut(address))
    }

    fn link_table(&mut self, index: TableIndex, table: NonNull<PageTable>, phys: PhysAddr) {
        trace!(
            "page table {:#05x} at {phys} covers {:#010x}..",
            index.as_usize(),
            index.as_usize() << 22
        );
        self.tables[index.as_usize()] = Some(table);
        self.tables_phys[index.as_usize()] = PageEntry::table_link(phys);
    }
}

/// Makes `directory` the active address space and turns paging on.
///
/// Loads CR3 with the directory's hardware view, then sets CR0.PG.
///
/// # Safety
/// Everything the CPU touches next (the executing code, the stack, the
/// directory and its tables) must be mapped by `directory`, and every table
/// link must hold a correct physical address.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn switch_active_directory(directory: &PageDirectory) {
    use kernel_registers::{Cr0, LoadRegisterUnsafe, StoreRegisterUnsafe};

    log::info!(
        "switching to page directory at {}",
        directory.tables_phys_addr()
    );
    unsafe {
        directory.cr3().store_unsafe();
        let cr0 = Cr0::load_unsafe();
        cr0.with_paging_enabled().store_unsafe();
    }
}

/// Drops any cached translation for the page containing `address`.
///
/// A no-op on hosted builds.
///
/// # Safety
/// Requires ring 0.
#[inline]
pub unsafe fn invalidate_tlb_page(address: VirtAddr) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) address.as_u32(),
            options(nostack, preserves_flags)
        );
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = address;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::EntryIndex;

    /// Leaks boxed tables and reports made-up physical addresses.
    struct TestTables {
        next_phys: u32,
        remaining: usize,
    }

    impl TestTables {
        fn new(remaining: usize) -> Self {
            Self {
                next_phys: 0x0020_0000,
                remaining,
            }
        }
    }

    unsafe impl TableAlloc for TestTables {
        fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysAddr)> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            let table = NonNull::from(Box::leak(Box::new(PageTable::zeroed())));
            let phys = PhysAddr::new(self.next_phys);
            self.next_phys += 0x1000;
            Some((table, phys))
        }
    }

    #[test]
    fn missing_table_without_create_is_no_mapping() {
        let mut dir = Box::new(PageDirectory::new());
        let mut tables = TestTables::new(1);
        let entry = dir
            .get_or_create_page(VirtAddr::new(0xC000_0000), false, &mut tables)
            .unwrap();
        assert!(entry.is_none());
        assert_eq!(dir.table_count(), 0);
    }

    #[test]
    fn create_links_table_in_hardware_view() {
        let mut dir = Box::new(PageDirectory::new());
        let mut tables = TestTables::new(1);
        let va = VirtAddr::new(0xC000_5000);

        let entry = dir.get_or_create_page(va, true, &mut tables).unwrap();
        let entry = entry.expect("table was created");
        assert!(!entry.present());
        entry.map_frame(0x77, true, false);

        let link = dir.table_link(va.table_index());
        assert_eq!(link.into_bits(), 0x0020_0000 | 0x7);
        assert_eq!(dir.translate(va + 0x10), Some(PhysAddr::new(0x0007_7010)));
    }

    #[test]
    fn pages_sharing_a_table_reuse_it() {
        let mut dir = Box::new(PageDirectory::new());
        let mut tables = TestTables::new(1);

        for page in 0..16 {
            let va = VirtAddr::new(0xC000_0000 + page * 0x1000);
            assert!(dir.get_or_create_page(va, true, &mut tables).unwrap().is_some());
        }
        assert_eq!(dir.table_count(), 1);
    }

    #[test]
    fn exhausted_table_storage_is_reported() {
        let mut dir = Box::new(PageDirectory::new());
        let mut tables = TestTables::new(0);
        let va = VirtAddr::new(0x0040_0000);
        let err = dir.get_or_create_page(va, true, &mut tables).unwrap_err();
        assert_eq!(err, MapError::OutOfTableStorage(va));
    }

    #[test]
    fn translate_requires_present_entry() {
        let mut dir = Box::new(PageDirectory::new());
        let mut tables = TestTables::new(1);
        let va = VirtAddr::new(0x0000_3000);
        dir.get_or_create_page(va, true, &mut tables).unwrap();
        assert_eq!(dir.translate(va), None);

        dir.table_mut(va.table_index())
            .unwrap()
            .entry_mut(EntryIndex::new(3))
            .map_frame(3, false, true);
        assert_eq!(dir.translate(va), Some(PhysAddr::new(0x3000)));
    }

    #[test]
    fn cr3_points_at_the_hardware_view() {
        let mut dir = Box::new(PageDirectory::new());
        dir.locate_at(PhysAddr::new(0x0011_0000));
        assert_eq!(dir.tables_phys_addr(), PhysAddr::new(0x0011_0000));
        assert_eq!(dir.cr3().directory_phys(), 0x0011_0000);
    }
}
