use crate::addresses::EntryIndex;
use crate::page_entry::PageEntry;
use kernel_info::memory::ENTRIES_PER_TABLE;

/// One 4 KiB page table: 1024 entries, each mapping a 4 KiB page.
///
/// All-zero storage is a valid, empty table, which is how fresh tables are
/// obtained from the allocators.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRIES_PER_TABLE],
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PageTable {
    /// A table with no present entries.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, i: EntryIndex) -> &PageEntry {
        &self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn entry_mut(&mut self, i: EntryIndex) -> &mut PageEntry {
        &mut self.entries[i.as_usize()]
    }

    /// Number of entries that currently reference a frame.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }

    /// Set all entries to zero.
    #[inline]
    pub fn zero(&mut self) {
        for e in &mut self.entries {
            e.clear();
        }
    }
}

const _: () = {
    assert!(core::mem::size_of::<PageTable>() == 4096);
    assert!(core::mem::align_of::<PageTable>() == 4096);
};
