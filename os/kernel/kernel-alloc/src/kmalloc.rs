//! # Kernel Memory Front End
//!
//! [`KernelMemory`] owns every piece of the memory core and routes requests
//! to whichever allocator is live:
//!
//! ```text
//!   boot ──► bootstrap phase ──init_paging──► heap phase
//!            (bump, identity)                 (boundary-tag heap)
//! ```
//!
//! - Before [`init_paging`](KernelMemory::init_paging) every request is a
//!   bump allocation right after the kernel image. Nothing is ever freed.
//! - `init_paging` builds the page directory, identity-maps everything the
//!   bootstrap allocator handed out, backs the initial heap and creates it.
//!   The bootstrap allocator is retired at that point.
//! - Afterwards requests go to the heap. Physical addresses are resolved
//!   through the page directory.
//!
//! Every operation comes in two flavors: `try_*` returning a
//! [`MemoryError`], and a plain one treating any error as fatal.

use crate::bootstrap_alloc::{BootstrapAllocator, BootstrapError};
use crate::config::MemoryConfig;
use crate::fatal::OrFatal;
use crate::frame_alloc::{FrameAllocator, FrameError};
use crate::heap::{Heap, HeapError, HeapPager, Hole};
use crate::region::Region;
use crate::vmm::{KernelPager, VmmError};
use bitflags::bitflags;
use core::ptr::NonNull;
use kernel_info::memory::{PAGE_SIZE, TABLE_COVERAGE};
use kernel_vmem::page_fault::{FaultRegistry, install_page_fault_handler};
use kernel_vmem::{
    MapError, NoTableAlloc, PageDirectory, PageEntry, PageTable, PhysAddr, TableAlloc, VirtAddr,
    align_down, invalidate_tlb_page,
};
use log::{info, trace, warn};

bitflags! {
    /// How a request should be served.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct AllocFlags: u8 {
        /// Zero-fill the memory.
        const ZEROED = 1 << 0;
        /// Start the memory on a page boundary.
        const PAGE_ALIGNED = 1 << 1;
        /// Report the physical address of the first byte.
        const PHYSICAL = 1 << 2;
    }
}

/// A served request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub virt: VirtAddr,
    /// Set if [`AllocFlags::PHYSICAL`] was requested.
    pub phys: Option<PhysAddr>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error("paging is not set up yet")]
    PagingInactive,
    #[error("paging is already set up")]
    PagingActive,
    #[error("{0} is not mapped")]
    Unmapped(VirtAddr),
}

impl From<FrameError> for MemoryError {
    fn from(e: FrameError) -> Self {
        Self::Vmm(e.into())
    }
}

impl From<MapError> for MemoryError {
    fn from(e: MapError) -> Self {
        Self::Vmm(e.into())
    }
}

/// The frame bitset and the directory, once paging is set up.
struct Paging<'a> {
    frames: FrameAllocator<'a>,
    directory: &'a mut PageDirectory,
}

impl<'a> Paging<'a> {
    fn pager<'p, T: TableAlloc + ?Sized>(&'p mut self, tables: &'p mut T) -> KernelPager<'p, 'a, T> {
        KernelPager::new(self.directory, &mut self.frames, tables)
    }

    /// Makes sure a page table covers `va`.
    ///
    /// Storage comes from the bootstrap allocator until the heap is online
    /// and from the heap afterwards.
    fn prepare_table(
        &mut self,
        va: VirtAddr,
        bootstrap: &mut BootstrapAllocator<'a>,
        heap: Option<&mut Heap<'a>>,
    ) -> Result<(), MemoryError> {
        if self.directory.has_table(va) {
            return Ok(());
        }

        match heap {
            None => {
                self.directory.get_or_create_page(va, true, bootstrap)?;
            }
            Some(heap) => {
                let mut table = OneShotTable(Some(self.heap_table(heap)?));
                self.directory.get_or_create_page(va, true, &mut table)?;
            }
        }
        Ok(())
    }

    /// A zeroed page table carved out of the heap.
    fn heap_table(
        &mut self,
        heap: &mut Heap<'a>,
    ) -> Result<(NonNull<PageTable>, PhysAddr), MemoryError> {
        let virt = heap.allocate(&mut self.pager(&mut NoTableAlloc), PAGE_SIZE, true)?;
        heap.zero(virt, PAGE_SIZE);
        let phys = self
            .directory
            .translate(virt)
            .ok_or(MemoryError::Unmapped(virt))?;
        let table = heap.as_mut_ptr(virt, PAGE_SIZE).cast::<PageTable>();
        trace!("page table storage from the heap at {virt} ({phys})");
        Ok((table, phys))
    }
}

/// Hands out exactly one table prepared in advance.
struct OneShotTable(Option<(NonNull<PageTable>, PhysAddr)>);

// Safety: the table is a zeroed, page-aligned heap block that is never freed.
unsafe impl TableAlloc for OneShotTable {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysAddr)> {
        self.0.take()
    }
}

/// Owner of the frame allocator, the page directory, the bootstrap
/// allocator and the heap.
pub struct KernelMemory<'a> {
    bootstrap: BootstrapAllocator<'a>,
    paging: Option<Paging<'a>>,
    heap: Option<Heap<'a>>,
}

impl<'a> KernelMemory<'a> {
    /// Starts out in the bootstrap phase, allocating from `bootstrap`.
    #[must_use]
    pub const fn new(bootstrap: BootstrapAllocator<'a>) -> Self {
        Self {
            bootstrap,
            paging: None,
            heap: None,
        }
    }

    /// Sets up paging and brings the heap online.
    ///
    /// In order:
    ///
    /// 1. the frame bitset, the page directory, every page table of the heap
    ///    range and the heap's hole index are taken from bootstrap memory,
    /// 2. every page from 0 up to the bootstrap cursor is identity-mapped
    ///    (readable, not writable, from user mode),
    /// 3. the initial heap pages are backed with frames,
    /// 4. the page-fault handler is registered with `faults`,
    /// 5. the directory is activated (bare metal only),
    /// 6. the heap is created over `heap_region` and the bootstrap allocator
    ///    is retired.
    ///
    /// # Errors
    /// When bootstrap memory or frames run out, or the heap configuration is
    /// inconsistent.
    pub fn try_init_paging<R: FaultRegistry + ?Sized>(
        &mut self,
        config: &MemoryConfig,
        heap_region: Region<'a>,
        faults: &mut R,
    ) -> Result<(), MemoryError> {
        if self.paging.is_some() {
            return Err(MemoryError::PagingActive);
        }

        let bootstrap = &mut self.bootstrap;
        let heap_config = config.heap;

        // Safety: zero is a free frame.
        let words = unsafe {
            bootstrap.allocate_slice::<u32>(FrameAllocator::words_for(config.physical_memory))
        }?;
        let mut frames = FrameAllocator::new(words, config.physical_memory);
        info!(
            "frame allocator tracks {} frames ({:#x} bytes)",
            frames.total_frames(),
            config.physical_memory
        );

        // Safety: an all-zero directory is empty.
        let (directory, directory_phys) = unsafe { bootstrap.allocate_object::<PageDirectory>() }?;
        directory.locate_at(directory_phys);

        let mut table = VirtAddr::new(align_down(heap_config.start.as_u32(), TABLE_COVERAGE));
        while table < heap_config.max {
            directory.get_or_create_page(table, true, bootstrap)?;
            match table.checked_add(TABLE_COVERAGE) {
                Some(next) => table = next,
                None => break,
            }
        }
        info!(
            "heap tables prepared for {}..{}",
            heap_config.start, heap_config.max
        );

        // Safety: an all-zero hole is a valid placeholder.
        let holes = unsafe { bootstrap.allocate_slice::<Hole>(config.index_capacity) }?;

        // Tables created here move the cursor, so it is re-read every page.
        let mut page = VirtAddr::new(0);
        while page < bootstrap.cursor() {
            let entry = directory
                .get_or_create_page(page, true, bootstrap)?
                .ok_or(MapError::OutOfTableStorage(page))?;
            frames.allocate_frame(entry, false, false)?;
            page = page + PAGE_SIZE;
        }
        info!("identity mapped {}..{page}", VirtAddr::new(0));

        let mut no_tables = NoTableAlloc;
        let mut pager = KernelPager::new(directory, &mut frames, &mut no_tables);
        let mut page = heap_config.start;
        while page < heap_config.end {
            pager.map_page(page, heap_config.supervisor, heap_config.read_only)?;
            page = page + PAGE_SIZE;
        }

        install_page_fault_handler(faults);

        #[cfg(all(target_arch = "x86", target_os = "none"))]
        // Safety: the kernel image, its stack and all bootstrap memory are
        // identity mapped above.
        unsafe {
            kernel_vmem::switch_active_directory(directory);
        }

        let heap = Heap::new(heap_config, heap_region, holes)?;
        info!(
            "kernel heap online at {}..{} (max {})",
            heap.addr_start(),
            heap.addr_end(),
            heap.addr_max()
        );

        bootstrap.retire();
        self.paging = Some(Paging { frames, directory });
        self.heap = Some(heap);
        Ok(())
    }

    /// As [`try_init_paging`](Self::try_init_paging); errors are fatal.
    #[track_caller]
    pub fn init_paging<R: FaultRegistry + ?Sized>(
        &mut self,
        config: &MemoryConfig,
        heap_region: Region<'a>,
        faults: &mut R,
    ) {
        self.try_init_paging(config, heap_region, faults)
            .or_fatal("paging setup failed");
    }

    /// Serves `len` bytes as `flags` ask.
    ///
    /// # Errors
    /// When the live allocator cannot serve the request.
    pub fn try_allocate(&mut self, len: u32, flags: AllocFlags) -> Result<Allocation, MemoryError> {
        let page_aligned = flags.contains(AllocFlags::PAGE_ALIGNED);
        let zeroed = flags.contains(AllocFlags::ZEROED);
        let physical = flags.contains(AllocFlags::PHYSICAL);

        let allocation = match (&mut self.heap, &mut self.paging) {
            (Some(heap), Some(paging)) => {
                let virt = heap.allocate(&mut paging.pager(&mut NoTableAlloc), len, page_aligned)?;
                if zeroed {
                    heap.zero(virt, len);
                }
                let phys = if physical {
                    let phys = paging
                        .directory
                        .translate(virt)
                        .ok_or(MemoryError::Unmapped(virt))?;
                    Some(phys)
                } else {
                    None
                };
                Allocation { virt, phys }
            }
            _ => {
                let placement = if zeroed {
                    self.bootstrap.allocate_zeroed(len, page_aligned)?
                } else {
                    self.bootstrap.allocate(len, page_aligned)?
                };
                Allocation {
                    virt: placement.virt,
                    phys: physical.then_some(placement.phys),
                }
            }
        };

        trace!("kmalloc({len:#x}, {flags:?}) = {}", allocation.virt);
        Ok(allocation)
    }

    /// As [`try_allocate`](Self::try_allocate); errors are fatal.
    #[track_caller]
    pub fn allocate(&mut self, len: u32, flags: AllocFlags) -> Allocation {
        self.try_allocate(len, flags).or_fatal("kmalloc failed")
    }

    /// Serves `len` bytes and reports where they start in physical memory.
    #[track_caller]
    pub fn allocate_physical(&mut self, len: u32, flags: AllocFlags) -> (VirtAddr, PhysAddr) {
        let allocation = self.allocate(len, flags | AllocFlags::PHYSICAL);
        match allocation.phys {
            Some(phys) => (allocation.virt, phys),
            None => Err(MemoryError::Unmapped(allocation.virt)).or_fatal("kmalloc failed"),
        }
    }

    /// Returns memory to the heap.
    ///
    /// Bootstrap memory is never reclaimed, so before the heap is online
    /// this only logs a warning.
    ///
    /// # Errors
    /// When `ptr` is not a live heap block or the heap is corrupted.
    pub fn try_free(&mut self, ptr: VirtAddr) -> Result<(), MemoryError> {
        match (&mut self.heap, &mut self.paging) {
            (Some(heap), Some(paging)) => heap.free(&mut paging.pager(&mut NoTableAlloc), ptr)?,
            _ => warn!("kfree({ptr}) before the heap is online; bootstrap memory stays allocated"),
        }
        Ok(())
    }

    /// As [`try_free`](Self::try_free); errors are fatal.
    #[track_caller]
    pub fn free(&mut self, ptr: VirtAddr) {
        self.try_free(ptr).or_fatal("kfree failed");
    }

    /// The entry mapping `va`, creating its page table if `create` is set.
    ///
    /// # Errors
    /// Before paging is set up, or when no table storage is left.
    pub fn try_get_or_create_page(
        &mut self,
        va: VirtAddr,
        create: bool,
    ) -> Result<Option<&mut PageEntry>, MemoryError> {
        let paging = self.paging.as_mut().ok_or(MemoryError::PagingInactive)?;
        if create {
            paging.prepare_table(va, &mut self.bootstrap, self.heap.as_mut())?;
        }
        Ok(paging.directory.page_mut(va))
    }

    /// As [`try_get_or_create_page`](Self::try_get_or_create_page); errors
    /// are fatal.
    #[track_caller]
    pub fn get_or_create_page(&mut self, va: VirtAddr, create: bool) -> Option<&mut PageEntry> {
        self.try_get_or_create_page(va, create)
            .or_fatal("page lookup failed")
    }

    /// Backs the page containing `va` with a frame, creating its table if
    /// needed. An already backed page is left alone.
    ///
    /// # Errors
    /// Before paging is set up, or when frames or table storage run out.
    pub fn try_allocate_frame(
        &mut self,
        va: VirtAddr,
        is_kernel: bool,
        is_writable: bool,
    ) -> Result<(), MemoryError> {
        let paging = self.paging.as_mut().ok_or(MemoryError::PagingInactive)?;
        paging.prepare_table(va, &mut self.bootstrap, self.heap.as_mut())?;
        let entry = paging
            .directory
            .page_mut(va)
            .ok_or(MapError::OutOfTableStorage(va))?;
        paging.frames.allocate_frame(entry, is_kernel, is_writable)?;
        Ok(())
    }

    /// As [`try_allocate_frame`](Self::try_allocate_frame); errors are fatal.
    #[track_caller]
    pub fn allocate_frame(&mut self, va: VirtAddr, is_kernel: bool, is_writable: bool) {
        self.try_allocate_frame(va, is_kernel, is_writable)
            .or_fatal("frame allocation failed");
    }

    /// Unmaps the page containing `va` and returns its frame.
    pub fn free_frame(&mut self, va: VirtAddr) {
        let Some(paging) = self.paging.as_mut() else {
            return;
        };
        if let Some(entry) = paging.directory.page_mut(va) {
            paging.frames.free_frame(entry);
            // Safety: the kernel runs in ring 0.
            unsafe { invalidate_tlb_page(va) };
        }
    }

    /// The physical address `va` maps to, once paging is set up.
    #[must_use]
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.paging.as_ref()?.directory.translate(va)
    }

    #[must_use]
    pub const fn is_heap_online(&self) -> bool {
        self.heap.is_some()
    }

    #[must_use]
    pub const fn bootstrap(&self) -> &BootstrapAllocator<'a> {
        &self.bootstrap
    }

    #[must_use]
    pub fn frames(&self) -> Option<&FrameAllocator<'a>> {
        self.paging.as_ref().map(|p| &p.frames)
    }

    #[must_use]
    pub fn directory(&self) -> Option<&PageDirectory> {
        self.paging.as_ref().map(|p| &*p.directory)
    }

    #[must_use]
    pub const fn heap(&self) -> Option<&Heap<'a>> {
        self.heap.as_ref()
    }
}
