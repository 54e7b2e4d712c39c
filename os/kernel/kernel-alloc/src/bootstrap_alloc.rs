//! # Bootstrap Allocator
//!
//! A forward-only bump allocator over the memory right after the kernel
//! image. It serves every allocation the kernel makes before its heap
//! exists: the frame bitset, the page directory, early page tables, the
//! heap's hole index.
//!
//! Memory granted here is never returned. The window is identity-mapped
//! while the allocator is in use, so a grant's virtual address doubles as
//! its physical address.
//!
//! **WARNING:** once the heap is online the allocator is retired and any
//! further use is an error; grants handed out afterwards would not be
//! covered by the identity map.

use crate::region::Region;
use core::ptr::NonNull;
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::{PageTable, PhysAddr, TableAlloc, VirtAddr, align_up};
use log::{debug, trace};

/// Where a grant landed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub virt: VirtAddr,
    /// Same number as `virt`; valid because the window is identity-mapped.
    pub phys: PhysAddr,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap memory exhausted: {requested:#x} bytes at {cursor}, window ends at {end}")]
    Exhausted {
        requested: u32,
        cursor: VirtAddr,
        end: VirtAddr,
    },
    #[error("bootstrap allocator used after the heap took over")]
    Retired,
}

pub struct BootstrapAllocator<'a> {
    region: Region<'a>,
    cursor: VirtAddr,
    retired: bool,
}

impl<'a> BootstrapAllocator<'a> {
    /// Hands out `region` front to back, starting at its first byte.
    ///
    /// For page-aligned grants to be usable as page tables, page-aligned
    /// virtual addresses must also be page-aligned in host memory.
    #[must_use]
    pub fn new(region: Region<'a>) -> Self {
        let cursor = region.start();
        Self {
            region,
            cursor,
            retired: false,
        }
    }

    /// The next free address.
    #[must_use]
    pub const fn cursor(&self) -> VirtAddr {
        self.cursor
    }

    /// One past the last address this allocator may hand out.
    #[must_use]
    pub const fn end(&self) -> VirtAddr {
        self.region.end()
    }

    #[must_use]
    pub const fn is_retired(&self) -> bool {
        self.retired
    }

    /// Stops serving allocations; the heap owns dynamic memory from now on.
    pub fn retire(&mut self) {
        debug!("bootstrap allocator retired at {}", self.cursor);
        self.retired = true;
    }

    /// Grants `len` bytes, first rounding the cursor up to a page boundary
    /// if `page_aligned` is set.
    ///
    /// The memory is not cleared.
    ///
    /// # Errors
    /// [`BootstrapError::Retired`] after [`retire`](Self::retire),
    /// [`BootstrapError::Exhausted`] when the window is used up.
    pub fn allocate(&mut self, len: u32, page_aligned: bool) -> Result<Placement, BootstrapError> {
        let align = if page_aligned { PAGE_SIZE } else { 1 };
        self.allocate_aligned(len, align)
    }

    /// As [`allocate`](Self::allocate), with the grant zero-filled.
    ///
    /// # Errors
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_zeroed(
        &mut self,
        len: u32,
        page_aligned: bool,
    ) -> Result<Placement, BootstrapError> {
        let placement = self.allocate(len, page_aligned)?;
        self.region.fill(placement.virt, len, 0);
        Ok(placement)
    }

    /// Zero-initialized storage for `count` values of `T`.
    ///
    /// # Errors
    /// As for [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// The all-zero bit pattern must be a valid `T`.
    pub unsafe fn allocate_slice<T>(&mut self, count: usize) -> Result<&'a mut [T], BootstrapError> {
        let len = core::mem::size_of::<T>()
            .checked_mul(count)
            .and_then(|len| u32::try_from(len).ok())
            .unwrap_or(u32::MAX);
        let align = u32::try_from(core::mem::align_of::<T>()).unwrap_or(PAGE_SIZE);

        let placement = self.allocate_aligned(len, align)?;
        self.region.fill(placement.virt, len, 0);
        let ptr = self.region.as_mut_ptr(placement.virt, len).cast::<T>();

        // Safety: fresh, zeroed, aligned and never handed out again.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), count) })
    }

    /// Zero-initialized, page-aligned storage for one `T`.
    ///
    /// # Errors
    /// As for [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// The all-zero bit pattern must be a valid `T`.
    pub unsafe fn allocate_object<T>(&mut self) -> Result<(&'a mut T, PhysAddr), BootstrapError> {
        let len = u32::try_from(core::mem::size_of::<T>()).unwrap_or(u32::MAX);
        let placement = self.allocate_zeroed(len, true)?;
        let ptr = self.region.as_mut_ptr(placement.virt, len).cast::<T>();

        // Safety: as for `allocate_slice`; page alignment covers `T`'s.
        Ok((unsafe { &mut *ptr.as_ptr() }, placement.phys))
    }

    /// Zero-fills `[addr, addr + len)` of memory already granted.
    pub fn zero(&mut self, addr: VirtAddr, len: u32) {
        debug_assert!(addr + len <= self.cursor, "zeroing memory never granted");
        self.region.fill(addr, len, 0);
    }

    fn allocate_aligned(&mut self, len: u32, align: u32) -> Result<Placement, BootstrapError> {
        if self.retired {
            return Err(BootstrapError::Retired);
        }

        let exhausted = BootstrapError::Exhausted {
            requested: len,
            cursor: self.cursor,
            end: self.end(),
        };
        let start = align_up(self.cursor.as_u32(), align)
            .map(VirtAddr::new)
            .ok_or(exhausted)?;
        let end = start.checked_add(len).ok_or(exhausted)?;
        if end > self.end() {
            return Err(exhausted);
        }

        self.cursor = end;
        trace!("bootstrap grant {start}+{len:#x}");
        Ok(Placement {
            virt: start,
            phys: PhysAddr::new(start.as_u32()),
        })
    }
}

// Safety: grants are zeroed, page-aligned and permanent.
unsafe impl TableAlloc for BootstrapAllocator<'_> {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysAddr)> {
        // Safety: an all-zero table is an empty table.
        let (table, phys) = unsafe { self.allocate_object::<PageTable>() }.ok()?;
        Some((NonNull::from(table), phys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PageBuffer;

    #[test]
    fn grants_are_consecutive() {
        let mut mem = PageBuffer::new(2);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));

        let a = boot.allocate(10, false).unwrap();
        let b = boot.allocate(6, false).unwrap();
        assert_eq!(a.virt, VirtAddr::new(0x0010_0000));
        assert_eq!(b.virt, VirtAddr::new(0x0010_000A));
        assert_eq!(boot.cursor(), VirtAddr::new(0x0010_0010));
    }

    #[test]
    fn page_alignment_rounds_the_cursor_first() {
        let mut mem = PageBuffer::new(3);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));

        boot.allocate(1, false).unwrap();
        let p = boot.allocate(0x100, true).unwrap();
        assert_eq!(p.virt, VirtAddr::new(0x0010_1000));
        assert_eq!(p.phys, PhysAddr::new(0x0010_1000));
        assert_eq!(boot.cursor(), VirtAddr::new(0x0010_1100));

        // Already aligned: no extra padding.
        let mut fresh = PageBuffer::new(1);
        let mut boot = BootstrapAllocator::new(fresh.region(0x0020_0000));
        assert_eq!(
            boot.allocate(4, true).unwrap().virt,
            VirtAddr::new(0x0020_0000)
        );
    }

    #[test]
    fn zeroed_grants_are_cleared() {
        let mut mem = PageBuffer::new(1);
        mem.bytes_mut().fill(0xCC);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));
        boot.allocate(4, false).unwrap();
        boot.allocate_zeroed(8, false).unwrap();
        drop(boot);

        let bytes = mem.bytes_mut();
        assert_eq!(&bytes[..4], &[0xCC; 4]);
        assert_eq!(&bytes[4..12], &[0; 8]);
        assert_eq!(bytes[12], 0xCC);
    }

    #[test]
    fn window_end_is_enforced() {
        let mut mem = PageBuffer::new(1);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));
        boot.allocate(0x1000, false).unwrap();
        let err = boot.allocate(1, false).unwrap_err();
        assert!(matches!(err, BootstrapError::Exhausted { requested: 1, .. }));
    }

    #[test]
    fn retired_allocator_refuses() {
        let mut mem = PageBuffer::new(1);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));
        boot.retire();
        assert_eq!(boot.allocate(1, false), Err(BootstrapError::Retired));
        assert!(boot.alloc_table().is_none());
    }

    #[test]
    fn tables_are_page_aligned_and_identity_addressed() {
        let mut mem = PageBuffer::new(3);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));
        boot.allocate(3, false).unwrap();

        let (table, phys) = boot.alloc_table().unwrap();
        assert_eq!(phys, PhysAddr::new(0x0010_1000));
        assert_eq!(table.as_ptr() as usize % 4096, 0);
        // Safety: fresh table from the allocator.
        assert_eq!(unsafe { table.as_ref() }.present_count(), 0);
    }

    #[test]
    fn slices_respect_type_alignment() {
        let mut mem = PageBuffer::new(1);
        let mut boot = BootstrapAllocator::new(mem.region(0x0010_0000));
        boot.allocate(1, false).unwrap();

        // Safety: zero is a valid u32.
        let words = unsafe { boot.allocate_slice::<u32>(4) }.unwrap();
        assert_eq!(words, &[0u32; 4]);
        assert_eq!(words.as_ptr() as usize % 4, 0);
        assert_eq!(boot.cursor(), VirtAddr::new(0x0010_0014));
    }
}
