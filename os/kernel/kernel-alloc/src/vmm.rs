//! Minimal Virtual Memory Manager (VMM) for the kernel heap.
//!
//! Ties the page directory and the frame allocator together so the heap can
//! grow and shrink: [`KernelPager`] backs a heap page with a fresh frame and
//! releases it again, invalidating the stale translation.
//!
//! # Example
//! ```ignore
//! let mut pager = KernelPager::new(&mut directory, &mut frames, &mut NoTableAlloc);
//! heap.allocate(&mut pager, 64, false)?;
//! ```

use crate::frame_alloc::{FrameAllocator, FrameError};
use crate::heap::HeapPager;
use kernel_vmem::{MapError, PageDirectory, TableAlloc, VirtAddr, invalidate_tlb_page};
use log::trace;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error(transparent)]
    OutOfFrames(#[from] FrameError),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Maps heap pages in `directory`, backed by `frames`.
///
/// Missing page tables are taken from `tables`. The kernel heap's tables
/// all exist before the heap does, so there it is a [`NoTableAlloc`].
///
/// [`NoTableAlloc`]: kernel_vmem::NoTableAlloc
pub struct KernelPager<'p, 'f, T: TableAlloc + ?Sized> {
    directory: &'p mut PageDirectory,
    frames: &'p mut FrameAllocator<'f>,
    tables: &'p mut T,
}

impl<'p, 'f, T: TableAlloc + ?Sized> KernelPager<'p, 'f, T> {
    pub const fn new(
        directory: &'p mut PageDirectory,
        frames: &'p mut FrameAllocator<'f>,
        tables: &'p mut T,
    ) -> Self {
        Self {
            directory,
            frames,
            tables,
        }
    }
}

impl<T: TableAlloc + ?Sized> HeapPager for KernelPager<'_, '_, T> {
    fn map_page(
        &mut self,
        page: VirtAddr,
        supervisor: bool,
        read_only: bool,
    ) -> Result<(), VmmError> {
        let entry = self
            .directory
            .get_or_create_page(page, true, self.tables)?
            .ok_or(MapError::OutOfTableStorage(page))?;
        self.frames.allocate_frame(entry, supervisor, !read_only)?;
        trace!("vmm: mapped {page}");
        Ok(())
    }

    fn unmap_page(&mut self, page: VirtAddr) {
        let Some(entry) = self.directory.page_mut(page) else {
            return;
        };
        self.frames.free_frame(entry);
        // Safety: the kernel runs in ring 0.
        unsafe { invalidate_tlb_page(page) };
        trace!("vmm: unmapped {page}");
    }
}
