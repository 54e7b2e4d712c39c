//! # Kernel Heap
//!
//! A boundary-tag allocator over a growable virtual region. Every span in
//! `[addr_start, addr_end)`, allocated or free, is bracketed by a header and
//! a footer:
//!
//! ```text
//! +--------------------+---------------------------+-------------------+
//! | Header (12 bytes)  |  payload                  | Footer (8 bytes)  |
//! | magic|is_hole|size |                           | magic|header      |
//! +--------------------+---------------------------+-------------------+
//! ^ header             ^ pointer handed out        ^ header + size - 8
//! ```
//!
//! - `size` counts the whole span, tags included.
//! - `footer.header` points back at the header, so the span before any
//!   header can be found in O(1) and merged on free.
//! - Free spans ("holes") are tracked in an [`OrderedIndex`] sorted by size;
//!   the first fitting hole is therefore the smallest fitting hole.
//!
//! When no hole fits, the region grows page by page up to `addr_max`. When
//! the last span is freed, trailing pages are handed back, down to a
//! configured minimum size.
//!
//! Page mapping is delegated to a [`HeapPager`]; the heap itself never
//! touches page tables or frames.

use crate::ordered_index::OrderedIndex;
use crate::region::Region;
use crate::vmm::VmmError;
use core::cmp::Ordering;
use core::ptr::NonNull;
use kernel_info::memory::{
    KERNEL_HEAP_INITIAL_SIZE, KERNEL_HEAP_MAX, KERNEL_HEAP_MIN_SIZE, KERNEL_HEAP_START, PAGE_SIZE,
};
use kernel_vmem::{VirtAddr, align_up};
use log::{debug, trace};

pub const HEADER_MAGIC: u32 = 0x1238_90AB;
pub const FOOTER_MAGIC: u32 = 0xBA09_8321;

/// Bytes of a header: magic, hole flag, size.
pub const HEADER_SIZE: u32 = 12;
/// Bytes of a footer: magic, header address.
pub const FOOTER_SIZE: u32 = 8;
/// Bytes of bookkeeping around every span.
pub const TAG_OVERHEAD: u32 = HEADER_SIZE + FOOTER_SIZE;

/// Growth plus one retry always suffices; the cap guards against a
/// miscomputed growth size spinning forever.
const MAX_ATTEMPTS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Header {
    magic: u32,
    is_hole: bool,
    size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Footer {
    magic: u32,
    header: VirtAddr,
}

/// A free span as tracked by the index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Hole {
    /// Address of the hole's header.
    pub addr: VirtAddr,
    /// Total bytes, tags included.
    pub span: u32,
}

impl Hole {
    pub const EMPTY: Self = Self {
        addr: VirtAddr::new(0),
        span: 0,
    };

    /// Index ordering: smallest span first.
    #[must_use]
    pub fn by_span(a: &Self, b: &Self) -> Ordering {
        a.span.cmp(&b.span)
    }

    const fn end(self) -> VirtAddr {
        VirtAddr::new(self.addr.as_u32() + self.span)
    }
}

type HoleIndex<'a> = OrderedIndex<'a, Hole>;

/// Where the heap lives and how its pages are mapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    pub start: VirtAddr,
    /// Initial end of the region; `[start, end)` must already be mapped.
    pub end: VirtAddr,
    /// The region never grows past this address.
    pub max: VirtAddr,
    /// Contraction never shrinks the region below this many bytes.
    pub min_size: u32,
    /// Map grown pages kernel-only.
    pub supervisor: bool,
    /// Map grown pages read-only.
    pub read_only: bool,
}

impl HeapConfig {
    /// The kernel heap at `0xC000_0000`.
    #[must_use]
    pub const fn kernel() -> Self {
        Self {
            start: VirtAddr::new(KERNEL_HEAP_START),
            end: VirtAddr::new(KERNEL_HEAP_START + KERNEL_HEAP_INITIAL_SIZE),
            max: VirtAddr::new(KERNEL_HEAP_MAX),
            min_size: KERNEL_HEAP_MIN_SIZE,
            supervisor: false,
            read_only: false,
        }
    }

    /// Bytes between start and the growth limit.
    #[must_use]
    pub const fn max_span(&self) -> u32 {
        self.max.as_u32() - self.start.as_u32()
    }

    fn validate(&self, region: &Region<'_>) -> Result<(), HeapError> {
        if !self.start.is_page_aligned() || !self.end.is_page_aligned() {
            return Err(HeapError::InvalidConfig("heap bounds must be page aligned"));
        }
        if self.end < self.start || self.max < self.end {
            return Err(HeapError::InvalidConfig("heap bounds out of order"));
        }
        let span = self.end - self.start;
        if span < TAG_OVERHEAD || span < self.min_size {
            return Err(HeapError::InvalidConfig("initial heap smaller than its minimum"));
        }
        if region.start() != self.start || region.end() < self.max {
            return Err(HeapError::InvalidConfig("region does not cover the heap range"));
        }
        Ok(())
    }
}

/// Heap failures. All of them are fatal to the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap cannot grow to {requested:#x} bytes (limit {limit:#x})")]
    Exhausted { requested: u32, limit: u32 },
    #[error("heap header at {addr} is corrupted")]
    HeaderCorrupted { addr: VirtAddr },
    #[error("heap footer at {addr} is corrupted")]
    FooterCorrupted { addr: VirtAddr },
    #[error("{addr} is not a heap address")]
    OutOfBounds { addr: VirtAddr },
    #[error("{addr} is not an allocated block (double free?)")]
    NotAllocated { addr: VirtAddr },
    #[error("hole at {addr} is missing from the index")]
    MissingHole { addr: VirtAddr },
    #[error("heap hole index is full")]
    IndexFull,
    #[error("no room for {size:#x} bytes even after growing the heap")]
    RetryExhausted { size: u32 },
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Vmm(#[from] VmmError),
}

/// Backs and releases the pages of a growing or shrinking heap.
pub trait HeapPager {
    /// Maps `page` to a fresh frame.
    ///
    /// # Errors
    /// When no frame or no page table is available.
    fn map_page(&mut self, page: VirtAddr, supervisor: bool, read_only: bool)
    -> Result<(), VmmError>;

    /// Unmaps `page` and returns its frame.
    fn unmap_page(&mut self, page: VirtAddr);
}

/// Totals from a full walk of the heap, see [`Heap::verify`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub holes: usize,
    /// Span bytes of allocated blocks, tags included.
    pub used_bytes: u32,
    /// Span bytes of holes, tags included.
    pub free_bytes: u32,
}

pub struct Heap<'a> {
    region: Region<'a>,
    index: HoleIndex<'a>,
    addr_start: VirtAddr,
    addr_end: VirtAddr,
    addr_max: VirtAddr,
    min_size: u32,
    supervisor: bool,
    read_only: bool,
}

impl<'a> Heap<'a> {
    /// Creates a heap over `config.start..config.end`, all of it one hole.
    ///
    /// `region` must cover `[config.start, config.max)`; `holes` is the
    /// index storage and bounds how fragmented the heap can become.
    ///
    /// # Errors
    /// [`HeapError::InvalidConfig`] if the configuration is inconsistent.
    pub fn new(
        config: HeapConfig,
        region: Region<'a>,
        holes: &'a mut [Hole],
    ) -> Result<Self, HeapError> {
        config.validate(&region)?;
        if holes.is_empty() {
            return Err(HeapError::InvalidConfig("hole index has no capacity"));
        }

        let mut heap = Self {
            region,
            index: HoleIndex::new(holes, Hole::by_span),
            addr_start: config.start,
            addr_end: config.end,
            addr_max: config.max,
            min_size: config.min_size,
            supervisor: config.supervisor,
            read_only: config.read_only,
        };

        let hole = Hole {
            addr: config.start,
            span: heap.span(),
        };
        heap.write_hole(hole);
        heap.index.try_insert(hole).map_err(|_| HeapError::IndexFull)?;
        Ok(heap)
    }

    #[must_use]
    pub const fn addr_start(&self) -> VirtAddr {
        self.addr_start
    }

    #[must_use]
    pub const fn addr_end(&self) -> VirtAddr {
        self.addr_end
    }

    #[must_use]
    pub const fn addr_max(&self) -> VirtAddr {
        self.addr_max
    }

    /// Bytes currently mapped.
    #[must_use]
    pub fn span(&self) -> u32 {
        self.addr_end - self.addr_start
    }

    /// The tracked holes, smallest first.
    #[must_use]
    pub fn holes(&self) -> &[Hole] {
        self.index.as_slice()
    }

    /// Allocates `size` bytes and returns the payload address.
    ///
    /// With `page_align` the payload starts on a page boundary.
    ///
    /// # Errors
    /// When the heap would have to grow past `addr_max`, when growing fails
    /// to map pages, or when the hole index overflows.
    pub fn allocate<P: HeapPager + ?Sized>(
        &mut self,
        pager: &mut P,
        size: u32,
        page_align: bool,
    ) -> Result<VirtAddr, HeapError> {
        let needed = size
            .checked_add(TAG_OVERHEAD)
            .ok_or(HeapError::Exhausted {
                requested: size,
                limit: self.max_span(),
            })?;

        let mut attempts = 0;
        loop {
            if let Some((i, offset)) = self.find_smallest_hole(needed, page_align) {
                let ptr = self.carve(i, offset, needed)?;
                trace!("heap: {size:#x} bytes at {ptr}");
                return Ok(ptr);
            }

            attempts += 1;
            if attempts == MAX_ATTEMPTS {
                return Err(HeapError::RetryExhausted { size });
            }
            self.grow_for(pager, needed, page_align)?;
        }
    }

    /// Releases the block whose payload starts at `ptr`.
    ///
    /// The freed span merges with free neighbors on either side. If it ends
    /// up at the end of the region, trailing pages are unmapped. Freeing
    /// address zero does nothing.
    ///
    /// # Errors
    /// [`HeapError::HeaderCorrupted`] / [`HeapError::FooterCorrupted`] when
    /// the block's tags are damaged, [`HeapError::NotAllocated`] when it is
    /// already free, [`HeapError::IndexFull`] when the freed span would need
    /// an index slot and none is left. On `IndexFull` the heap is unchanged.
    pub fn free<P: HeapPager + ?Sized>(
        &mut self,
        pager: &mut P,
        ptr: VirtAddr,
    ) -> Result<(), HeapError> {
        if ptr.as_u32() == 0 {
            return Ok(());
        }

        let (header_addr, header) = self.block_at(ptr)?;
        let freed = Hole {
            addr: header_addr,
            span: header.size,
        };
        let left = self.left_neighbor_hole(header_addr);
        let right = self.right_neighbor_hole(freed.end());
        if left.is_none() && right.is_none() && self.index.is_full() && !self.releases_whole(freed)
        {
            return Err(HeapError::IndexFull);
        }

        // Marked first so a stale copy left inside a merged hole still
        // reads as free.
        self.write_header(header_addr, true, header.size);

        let mut hole = freed;
        if let Some(left) = left {
            self.unindex(left)?;
            hole = Hole {
                addr: left.addr,
                span: left.span + hole.span,
            };
        }

        if let Some(right) = right {
            self.unindex(right)?;
            hole.span += right.span;
        }

        if hole.end() == self.addr_end {
            let offset = hole.addr - self.addr_start;
            let keep = if hole.addr.is_page_aligned() {
                offset
            } else {
                offset.saturating_add(TAG_OVERHEAD)
            };

            let old_span = self.span();
            if keep < old_span {
                let reclaimed = old_span - self.contract(pager, keep);
                if reclaimed == hole.span {
                    trace!("heap: freed {ptr}, trailing hole released");
                    return Ok(());
                }
                hole.span -= reclaimed;
            }
        }

        self.write_hole(hole);
        self.index.try_insert(hole).map_err(|_| HeapError::IndexFull)?;
        trace!("heap: freed {ptr}");
        Ok(())
    }

    /// Payload bytes of the block at `ptr`.
    ///
    /// # Errors
    /// As for [`free`](Self::free).
    pub fn usable_size(&self, ptr: VirtAddr) -> Result<u32, HeapError> {
        let (_, header) = self.block_at(ptr)?;
        Ok(header.size - TAG_OVERHEAD)
    }

    /// Zero-fills `[addr, addr + len)`.
    pub fn zero(&mut self, addr: VirtAddr, len: u32) {
        self.region.fill(addr, len, 0);
    }

    /// Host pointer to `[addr, addr + len)`.
    pub fn as_mut_ptr(&mut self, addr: VirtAddr, len: u32) -> NonNull<u8> {
        self.region.as_mut_ptr(addr, len)
    }

    /// Walks every span from `addr_start` to `addr_end`, checking tags and
    /// that holes and index entries correspond one to one.
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn verify(&self) -> Result<HeapStats, HeapError> {
        let mut stats = HeapStats::default();
        let mut at = self.addr_start;

        while at < self.addr_end {
            let header = self.checked_header(at)?;
            self.checked_footer(at, header.size)?;

            if header.is_hole {
                let hole = Hole {
                    addr: at,
                    span: header.size,
                };
                if self.index.iter().filter(|&&h| h == hole).count() != 1 {
                    return Err(HeapError::MissingHole { addr: at });
                }
                stats.holes += 1;
                stats.free_bytes += header.size;
            } else {
                stats.blocks += 1;
                stats.used_bytes += header.size;
            }
            at = at + header.size;
        }

        if stats.holes != self.index.len() {
            let stray = self
                .index
                .iter()
                .find(|h| !self.is_hole_at(h.addr, h.span))
                .map_or(self.addr_start, |h| h.addr);
            return Err(HeapError::MissingHole { addr: stray });
        }

        Ok(stats)
    }

    const fn max_span(&self) -> u32 {
        self.addr_max.as_u32() - self.addr_start.as_u32()
    }

    /// First hole (smallest first) that fits `needed` bytes, and the bytes
    /// to skip at its start for a page-aligned payload.
    fn find_smallest_hole(&self, needed: u32, page_align: bool) -> Option<(usize, u32)> {
        self.index.iter().enumerate().find_map(|(i, hole)| {
            let offset = if page_align {
                Self::align_offset(hole.addr)?
            } else {
                0
            };
            (hole.span.checked_sub(offset)? >= needed).then_some((i, offset))
        })
    }

    /// Bytes to skip from `addr` so the payload after a header placed there
    /// starts on a page boundary.
    ///
    /// The skipped bytes become a hole of their own, so a gap too small to
    /// hold a tag pair is pushed out by another page.
    fn align_offset(addr: VirtAddr) -> Option<u32> {
        let payload = addr.checked_add(HEADER_SIZE)?.as_u32();
        let mut gap = align_up(payload, PAGE_SIZE)? - payload;
        if gap != 0 && gap < TAG_OVERHEAD {
            gap += PAGE_SIZE;
        }
        Some(gap)
    }

    /// Turns hole `i` into a block of `needed` bytes `offset` bytes in,
    /// keeping what is left over on either side as holes.
    fn carve(&mut self, i: usize, offset: u32, needed: u32) -> Result<VirtAddr, HeapError> {
        let hole = self.index.lookup(i);
        let available = hole.span - offset;
        let size = if available - needed < TAG_OVERHEAD {
            available
        } else {
            needed
        };

        let new_holes = usize::from(offset > 0) + usize::from(available > size);
        if self.index.len() - 1 + new_holes > self.index.capacity() {
            return Err(HeapError::IndexFull);
        }
        self.index.remove(i);

        if offset > 0 {
            let lead = Hole {
                addr: hole.addr,
                span: offset,
            };
            self.write_hole(lead);
            self.index.try_insert(lead).map_err(|_| HeapError::IndexFull)?;
        }

        let block = hole.addr + offset;
        self.write_header(block, false, size);
        self.write_footer(block, size);

        if available > size {
            let tail = Hole {
                addr: block + size,
                span: available - size,
            };
            self.write_hole(tail);
            self.index.try_insert(tail).map_err(|_| HeapError::IndexFull)?;
        }

        Ok(block + HEADER_SIZE)
    }

    /// Grows the region so that a request of `needed` bytes fits, folding the
    /// new pages into the hole at the end of the region if there is one.
    fn grow_for<P: HeapPager + ?Sized>(
        &mut self,
        pager: &mut P,
        needed: u32,
        page_align: bool,
    ) -> Result<(), HeapError> {
        let old_end = self.addr_end;
        let tail = self.index.position(|h| h.end() == old_end);
        let base = tail.map_or(old_end, |i| self.index.lookup(i).addr);

        let exhausted = HeapError::Exhausted {
            requested: u32::MAX,
            limit: self.max_span(),
        };
        let offset = if page_align {
            Self::align_offset(base).ok_or(exhausted)?
        } else {
            0
        };
        let required = (base - self.addr_start)
            .checked_add(offset)
            .and_then(|r| r.checked_add(needed))
            .ok_or(exhausted)?;

        self.expand(pager, required)?;
        let grown = self.addr_end - old_end;

        let hole = match tail {
            Some(i) => {
                let mut hole = self.index.remove(i);
                hole.span += grown;
                hole
            }
            None => Hole {
                addr: old_end,
                span: grown,
            },
        };
        self.write_hole(hole);
        self.index.try_insert(hole).map_err(|_| HeapError::IndexFull)
    }

    /// Maps pages until the region spans `new_span` bytes, rounded up to a
    /// page.
    fn expand<P: HeapPager + ?Sized>(
        &mut self,
        pager: &mut P,
        new_span: u32,
    ) -> Result<(), HeapError> {
        let exhausted = HeapError::Exhausted {
            requested: new_span,
            limit: self.max_span(),
        };
        let new_span = align_up(new_span, PAGE_SIZE).ok_or(exhausted)?;
        let new_end = self
            .addr_start
            .checked_add(new_span)
            .filter(|&end| end <= self.addr_max)
            .ok_or(exhausted)?;
        if new_end <= self.addr_end {
            return Ok(());
        }

        let mut page = self.addr_end;
        while page < new_end {
            pager.map_page(page, self.supervisor, self.read_only)?;
            page = page + PAGE_SIZE;
        }

        debug!("heap: grown {}..{} to {new_end}", self.addr_start, self.addr_end);
        self.addr_end = new_end;
        Ok(())
    }

    /// Unmaps trailing pages until the region spans `new_span` bytes,
    /// rounded up to a page and never below the minimum. Returns the
    /// resulting span.
    fn contract<P: HeapPager + ?Sized>(&mut self, pager: &mut P, new_span: u32) -> u32 {
        let new_span = self.contracted_span(new_span);
        let Some(new_end) = self
            .addr_start
            .checked_add(new_span)
            .filter(|&end| end < self.addr_end)
        else {
            return self.span();
        };

        let mut page = self.addr_end;
        while page > new_end {
            page = page - PAGE_SIZE;
            pager.unmap_page(page);
        }

        debug!("heap: shrunk {}..{} to {new_end}", self.addr_start, self.addr_end);
        self.addr_end = new_end;
        new_span
    }

    fn contracted_span(&self, new_span: u32) -> u32 {
        align_up(new_span, PAGE_SIZE)
            .unwrap_or(u32::MAX)
            .max(self.min_size)
    }

    /// Whether freeing `hole` unmaps all of it, leaving nothing to index.
    fn releases_whole(&self, hole: Hole) -> bool {
        let offset = hole.addr - self.addr_start;
        hole.end() == self.addr_end
            && hole.addr.is_page_aligned()
            && offset < self.span()
            && self.contracted_span(offset) == offset
    }

    /// Header address and header of the allocated block at payload `ptr`.
    fn block_at(&self, ptr: VirtAddr) -> Result<(VirtAddr, Header), HeapError> {
        let header_addr = ptr
            .checked_sub(HEADER_SIZE)
            .filter(|&a| a >= self.addr_start && ptr <= self.addr_end)
            .ok_or(HeapError::OutOfBounds { addr: ptr })?;

        let header = self.checked_header(header_addr)?;
        if header.is_hole {
            return Err(HeapError::NotAllocated { addr: ptr });
        }
        self.checked_footer(header_addr, header.size)?;
        Ok((header_addr, header))
    }

    /// Reads the header at `addr`, requiring its magic and a span that fits.
    fn checked_header(&self, addr: VirtAddr) -> Result<Header, HeapError> {
        let corrupted = HeapError::HeaderCorrupted { addr };
        if addr.checked_add(HEADER_SIZE).is_none_or(|end| end > self.addr_end) {
            return Err(corrupted);
        }
        let header = self.read_header(addr);
        let fits = addr
            .checked_add(header.size)
            .is_some_and(|end| end <= self.addr_end);
        if header.magic != HEADER_MAGIC || header.size < TAG_OVERHEAD || !fits {
            return Err(corrupted);
        }
        Ok(header)
    }

    /// Checks the footer of the span `size` bytes long at `header_addr`.
    fn checked_footer(&self, header_addr: VirtAddr, size: u32) -> Result<(), HeapError> {
        let addr = header_addr + size - FOOTER_SIZE;
        let footer = self.read_footer(addr);
        if footer.magic != FOOTER_MAGIC || footer.header != header_addr {
            return Err(HeapError::FooterCorrupted { addr });
        }
        Ok(())
    }

    /// The hole ending right at `header_addr`, found through its footer.
    fn left_neighbor_hole(&self, header_addr: VirtAddr) -> Option<Hole> {
        let footer_addr = header_addr
            .checked_sub(FOOTER_SIZE)
            .filter(|&a| a >= self.addr_start)?;
        let footer = self.read_footer(footer_addr);
        if footer.magic != FOOTER_MAGIC || footer.header < self.addr_start {
            return None;
        }

        let header = self.checked_header(footer.header).ok()?;
        (header.is_hole && footer.header + header.size == header_addr).then_some(Hole {
            addr: footer.header,
            span: header.size,
        })
    }

    /// The hole starting right at `addr`, if any.
    fn right_neighbor_hole(&self, addr: VirtAddr) -> Option<Hole> {
        let header = self.checked_header(addr).ok()?;
        header.is_hole.then_some(Hole {
            addr,
            span: header.size,
        })
    }

    fn is_hole_at(&self, addr: VirtAddr, span: u32) -> bool {
        self.checked_header(addr)
            .is_ok_and(|h| h.is_hole && h.size == span)
    }

    /// Drops `hole` from the index.
    fn unindex(&mut self, hole: Hole) -> Result<(), HeapError> {
        let i = self
            .index
            .position(|&h| h == hole)
            .ok_or(HeapError::MissingHole { addr: hole.addr })?;
        self.index.remove(i);
        Ok(())
    }

    fn write_hole(&mut self, hole: Hole) {
        self.write_header(hole.addr, true, hole.span);
        if hole.end() <= self.addr_end {
            self.write_footer(hole.addr, hole.span);
        }
    }

    fn read_header(&self, addr: VirtAddr) -> Header {
        Header {
            magic: self.region.read_u32(addr),
            is_hole: self.region.read_u32(addr + 4) != 0,
            size: self.region.read_u32(addr + 8),
        }
    }

    fn write_header(&mut self, addr: VirtAddr, is_hole: bool, size: u32) {
        self.region.write_u32(addr, HEADER_MAGIC);
        self.region.write_u32(addr + 4, u32::from(is_hole));
        self.region.write_u32(addr + 8, size);
    }

    fn read_footer(&self, addr: VirtAddr) -> Footer {
        Footer {
            magic: self.region.read_u32(addr),
            header: VirtAddr::new(self.region.read_u32(addr + 4)),
        }
    }

    fn write_footer(&mut self, header_addr: VirtAddr, size: u32) {
        let addr = header_addr + size - FOOTER_SIZE;
        self.region.write_u32(addr, FOOTER_MAGIC);
        self.region.write_u32(addr + 4, header_addr.as_u32());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::FrameError;
    use crate::test_support::PageBuffer;

    const START: u32 = 0x1000;
    const MAX: u32 = 0x4_0000;

    #[derive(Default)]
    struct RecordingPager {
        mapped: Vec<(VirtAddr, bool, bool)>,
        unmapped: Vec<VirtAddr>,
    }

    impl HeapPager for RecordingPager {
        fn map_page(
            &mut self,
            page: VirtAddr,
            supervisor: bool,
            read_only: bool,
        ) -> Result<(), VmmError> {
            self.mapped.push((page, supervisor, read_only));
            Ok(())
        }

        fn unmap_page(&mut self, page: VirtAddr) {
            self.unmapped.push(page);
        }
    }

    struct NoFrames;

    impl HeapPager for NoFrames {
        fn map_page(&mut self, _: VirtAddr, _: bool, _: bool) -> Result<(), VmmError> {
            Err(FrameError::Exhausted { total: 0 }.into())
        }

        fn unmap_page(&mut self, _: VirtAddr) {}
    }

    fn config(max: u32) -> HeapConfig {
        HeapConfig {
            start: VirtAddr::new(START),
            end: VirtAddr::new(0x2000),
            max: VirtAddr::new(max),
            min_size: 0x1000,
            supervisor: true,
            read_only: false,
        }
    }

    /// One-page heap at `0x1000` that may grow to `max`.
    fn heap_with_max<'a>(mem: &'a mut PageBuffer, holes: &'a mut [Hole], max: u32) -> Heap<'a> {
        Heap::new(config(max), mem.region(START), holes).unwrap()
    }

    fn buffer() -> PageBuffer {
        PageBuffer::new(((MAX - START) / PAGE_SIZE) as usize)
    }

    fn va(addr: u32) -> VirtAddr {
        VirtAddr::new(addr)
    }

    #[test]
    fn new_heap_is_one_hole() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let heap = heap_with_max(&mut mem, &mut holes, MAX);

        assert_eq!(heap.holes(), &[Hole { addr: va(0x1000), span: 0x1000 }]);
        let stats = heap.verify().unwrap();
        assert_eq!(stats.holes, 1);
        assert_eq!(stats.free_bytes, 0x1000);
    }

    #[test]
    fn freeing_the_only_block_restores_one_hole() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let p = heap.allocate(&mut pager, 100, false).unwrap();
        assert_eq!(p, va(0x100C));
        assert_eq!(heap.usable_size(p), Ok(100));

        heap.free(&mut pager, p).unwrap();
        assert_eq!(heap.holes(), &[Hole { addr: va(0x1000), span: 0x1000 }]);
        assert_eq!(heap.holes()[0].span - TAG_OVERHEAD, 0x1000 - 20);
        assert_eq!(heap.addr_end(), va(0x2000));
        assert!(pager.mapped.is_empty());
        assert!(pager.unmapped.is_empty());
    }

    #[test]
    fn oversized_request_expands_the_region() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let p = heap.allocate(&mut pager, 0x1000, false).unwrap();
        assert_eq!(p, va(0x100C));
        assert_eq!(heap.addr_end(), va(0x3000));
        assert_eq!(pager.mapped, [(va(0x2000), true, false)]);

        assert_eq!(heap.holes(), &[Hole { addr: va(0x2014), span: 0xFEC }]);
        let stats = heap.verify().unwrap();
        assert_eq!((stats.blocks, stats.holes), (1, 1));
    }

    #[test]
    fn growth_without_a_trailing_hole_adds_one() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        // Exactly fills the first page; no hole is left behind.
        let a = heap.allocate(&mut pager, 0x1000 - TAG_OVERHEAD, false).unwrap();
        assert!(heap.holes().is_empty());

        let b = heap.allocate(&mut pager, 0x1000 - TAG_OVERHEAD, false).unwrap();
        assert_eq!(a, va(0x100C));
        assert_eq!(b, va(0x200C));
        assert_eq!(heap.addr_end(), va(0x3000));
        assert!(heap.holes().is_empty());
        assert_eq!(heap.verify().unwrap().blocks, 2);
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 50, false).unwrap();
        let b = heap.allocate(&mut pager, 50, false).unwrap();
        let _guard = heap.allocate(&mut pager, 50, false).unwrap();
        let span = 50 + TAG_OVERHEAD;

        heap.free(&mut pager, a).unwrap();
        heap.free(&mut pager, b).unwrap();

        assert_eq!(heap.holes()[0], Hole { addr: va(0x1000), span: 2 * span });
        assert_eq!(heap.verify().unwrap().holes, 2);
    }

    #[test]
    fn coalescing_works_in_either_order() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 50, false).unwrap();
        let b = heap.allocate(&mut pager, 50, false).unwrap();
        let c = heap.allocate(&mut pager, 50, false).unwrap();

        heap.free(&mut pager, c).unwrap();
        heap.free(&mut pager, a).unwrap();
        heap.free(&mut pager, b).unwrap();

        assert_eq!(heap.holes(), &[Hole { addr: va(0x1000), span: 0x1000 }]);
        heap.verify().unwrap();
    }

    #[test]
    fn two_blocks_freed_leave_one_hole() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 50, false).unwrap();
        let b = heap.allocate(&mut pager, 50, false).unwrap();
        heap.free(&mut pager, a).unwrap();
        heap.free(&mut pager, b).unwrap();

        assert_eq!(heap.holes(), &[Hole { addr: va(0x1000), span: 0x1000 }]);
    }

    #[test]
    fn page_aligned_payloads_land_on_page_boundaries() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        heap.allocate(&mut pager, 8, false).unwrap();
        let p = heap.allocate(&mut pager, 0x100, true).unwrap();

        assert!(p.is_page_aligned());
        assert_eq!(p, va(0x2000));
        // The skipped bytes stay available as a hole.
        assert!(heap.holes().contains(&Hole { addr: va(0x101C), span: 0xFD8 }));
        heap.verify().unwrap();
    }

    #[test]
    fn alignment_gap_too_small_for_tags_skips_a_page() {
        assert_eq!(Heap::align_offset(va(0x1FF4)), Some(0));
        assert_eq!(Heap::align_offset(va(0x1000)), Some(0x1000 - HEADER_SIZE));
        assert_eq!(Heap::align_offset(va(0x1FF0)), Some(4 + PAGE_SIZE));
        assert_eq!(Heap::align_offset(va(0x1FE0)), Some(20));
    }

    #[test]
    fn growth_stops_at_the_limit() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, 0x3000);
        let mut pager = RecordingPager::default();

        let err = heap.allocate(&mut pager, 0x2000, false).unwrap_err();
        assert!(matches!(err, HeapError::Exhausted { limit: 0x2000, .. }));
        assert_eq!(heap.addr_end(), va(0x2000));
        assert!(pager.mapped.is_empty());
    }

    #[test]
    fn aligned_growth_fits_right_below_the_limit() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, 0x4000);
        let mut pager = RecordingPager::default();

        heap.allocate(&mut pager, 0xFCC, false).unwrap();
        assert_eq!(heap.holes(), &[Hole { addr: va(0x1FE0), span: 0x20 }]);

        let p = heap.allocate(&mut pager, 0x1000, true).unwrap();
        assert_eq!(p, va(0x2000));
        assert_eq!(heap.addr_end(), va(0x4000));
        // Grown once, by exactly the pages the request needs.
        assert_eq!(pager.mapped, [(va(0x2000), true, false), (va(0x3000), true, false)]);
        assert!(heap.holes().contains(&Hole { addr: va(0x1FE0), span: TAG_OVERHEAD }));

        let stats = heap.verify().unwrap();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.used_bytes + stats.free_bytes, 0x3000);
    }

    #[test]
    fn full_index_refuses_a_free_and_leaves_the_heap_intact() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 2];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 100, false).unwrap();
        let b = heap.allocate(&mut pager, 100, false).unwrap();
        let c = heap.allocate(&mut pager, 100, false).unwrap();
        let _d = heap.allocate(&mut pager, 100, false).unwrap();

        heap.free(&mut pager, a).unwrap();
        assert_eq!(heap.holes().len(), 2);

        // `c` sits between two blocks, so it would need a third slot.
        assert_eq!(heap.free(&mut pager, c), Err(HeapError::IndexFull));
        assert_eq!(heap.free(&mut pager, c), Err(HeapError::IndexFull));
        assert_eq!(heap.usable_size(c), Ok(100));
        let stats = heap.verify().unwrap();
        assert_eq!((stats.blocks, stats.holes), (3, 2));

        // Merging needs no new slot.
        heap.free(&mut pager, b).unwrap();
        heap.free(&mut pager, c).unwrap();
        assert_eq!(heap.holes()[0], Hole { addr: va(0x1000), span: 0x168 });
        let stats = heap.verify().unwrap();
        assert_eq!((stats.blocks, stats.holes), (1, 2));
    }

    #[test]
    fn mapping_failures_surface() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);

        let err = heap.allocate(&mut NoFrames, 0x1000, false).unwrap_err();
        assert_eq!(
            err,
            HeapError::Vmm(VmmError::OutOfFrames(FrameError::Exhausted { total: 0 }))
        );
    }

    #[test]
    fn freeing_the_tail_contracts_to_the_minimum() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 0x2000, false).unwrap();
        assert_eq!(heap.addr_end(), va(0x4000));

        heap.free(&mut pager, a).unwrap();
        assert_eq!(heap.addr_end(), va(0x2000));
        assert_eq!(pager.unmapped, [va(0x3000), va(0x2000)]);
        assert_eq!(heap.holes(), &[Hole { addr: va(0x1000), span: 0x1000 }]);
        assert!(heap.span() >= 0x1000);
        heap.verify().unwrap();
    }

    #[test]
    fn contraction_shrinks_the_surviving_hole() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        heap.allocate(&mut pager, 100, false).unwrap();
        let b = heap.allocate(&mut pager, 0x1000, false).unwrap();
        assert_eq!(heap.addr_end(), va(0x3000));

        heap.free(&mut pager, b).unwrap();
        assert_eq!(heap.addr_end(), va(0x2000));
        assert_eq!(pager.unmapped, [va(0x2000)]);
        assert_eq!(heap.holes(), &[Hole { addr: va(0x1078), span: 0xF88 }]);
        heap.verify().unwrap();
    }

    #[test]
    fn contraction_can_release_the_whole_hole() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        heap.allocate(&mut pager, 0x1000 - TAG_OVERHEAD, false).unwrap();
        let b = heap.allocate(&mut pager, 0x1000 - TAG_OVERHEAD, false).unwrap();

        heap.free(&mut pager, b).unwrap();
        assert_eq!(heap.addr_end(), va(0x2000));
        assert!(heap.holes().is_empty());
        let stats = heap.verify().unwrap();
        assert_eq!((stats.blocks, stats.holes), (1, 0));
    }

    #[test]
    fn double_free_is_detected() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 50, false).unwrap();
        let b = heap.allocate(&mut pager, 50, false).unwrap();
        heap.allocate(&mut pager, 50, false).unwrap();

        heap.free(&mut pager, a).unwrap();
        heap.free(&mut pager, b).unwrap();
        assert_eq!(heap.free(&mut pager, b), Err(HeapError::NotAllocated { addr: b }));
        assert_eq!(heap.free(&mut pager, a), Err(HeapError::NotAllocated { addr: a }));
    }

    #[test]
    fn freeing_null_does_nothing() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        heap.free(&mut pager, va(0)).unwrap();
        assert_eq!(heap.holes().len(), 1);
    }

    #[test]
    fn damaged_tags_are_reported() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        let a = heap.allocate(&mut pager, 50, false).unwrap();
        let b = heap.allocate(&mut pager, 50, false).unwrap();

        heap.zero(a - HEADER_SIZE, 4);
        assert_eq!(
            heap.free(&mut pager, a),
            Err(HeapError::HeaderCorrupted { addr: a - HEADER_SIZE })
        );
        assert!(heap.verify().is_err());

        // The footer sits right after the payload.
        let footer = b + 50;
        heap.zero(footer, 4);
        assert_eq!(
            heap.free(&mut pager, b),
            Err(HeapError::FooterCorrupted { addr: footer })
        );
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();

        assert_eq!(
            heap.free(&mut pager, va(0x0800)),
            Err(HeapError::OutOfBounds { addr: va(0x0800) })
        );
        assert_eq!(
            heap.free(&mut pager, va(0x3000)),
            Err(HeapError::OutOfBounds { addr: va(0x3000) })
        );
    }

    #[test]
    fn inconsistent_configurations_are_refused() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 8];

        let mut unaligned = config(MAX);
        unaligned.end = va(0x2010);
        assert!(matches!(
            Heap::new(unaligned, mem.region(START), &mut holes),
            Err(HeapError::InvalidConfig(_))
        ));

        let mut too_small = config(MAX);
        too_small.min_size = 0x2000;
        assert!(matches!(
            Heap::new(too_small, mem.region(START), &mut holes),
            Err(HeapError::InvalidConfig(_))
        ));

        let short_region = mem.region_at(START, 0, 0x2000);
        assert!(matches!(
            Heap::new(config(MAX), short_region, &mut holes),
            Err(HeapError::InvalidConfig(_))
        ));

        assert!(matches!(
            Heap::new(config(MAX), mem.region(START), &mut []),
            Err(HeapError::InvalidConfig(_))
        ));
    }

    #[test]
    fn kernel_config_matches_the_layout() {
        let config = HeapConfig::kernel();
        assert_eq!(config.start, va(0xC000_0000));
        assert_eq!(config.end, va(0xC010_0000));
        assert_eq!(config.max_span(), 0x0FFF_F000);
        assert!(config.min_size <= config.end - config.start);
    }

    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }
    }

    #[test]
    fn random_workload_keeps_blocks_disjoint_and_inside() {
        let mut mem = buffer();
        let mut holes = [Hole::EMPTY; 256];
        let mut heap = heap_with_max(&mut mem, &mut holes, MAX);
        let mut pager = RecordingPager::default();
        let mut rng = XorShift(0x9E37_79B9);
        let mut live: Vec<(VirtAddr, u32)> = Vec::new();

        for _ in 0..2_000 {
            if live.len() > 48 || (!live.is_empty() && rng.next() % 3 == 0) {
                let (p, _) = live.swap_remove(rng.next() as usize % live.len());
                heap.free(&mut pager, p).unwrap();
            } else {
                let size = 1 + rng.next() % 600;
                let page_align = rng.next() % 8 == 0;
                let p = heap.allocate(&mut pager, size, page_align).unwrap();

                assert!(p >= heap.addr_start() && p + size <= heap.addr_end());
                if page_align {
                    assert!(p.is_page_aligned());
                }
                for &(q, len) in &live {
                    assert!(p + size <= q || q + len <= p, "{p}+{size:#x} overlaps {q}+{len:#x}");
                }
                live.push((p, size));
            }

            let stats = heap.verify().unwrap();
            assert_eq!(stats.blocks, live.len());
            assert_eq!(stats.used_bytes + stats.free_bytes, heap.span());
            assert!(heap.span() >= 0x1000 && heap.span() <= MAX - START);
            assert!(heap.holes().windows(2).all(|w| w[0].span <= w[1].span));
        }

        for (p, _) in live {
            heap.free(&mut pager, p).unwrap();
        }
        assert_eq!(heap.holes().len(), 1);
        assert_eq!(heap.span(), 0x1000);
    }
}
