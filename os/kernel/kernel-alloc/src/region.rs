//! # Memory Regions
//!
//! A [`Region`] is a window of kernel-addressable memory described by the
//! virtual address of its first byte and its length. The heap lays its
//! boundary tags out through a region and the bootstrap allocator carves
//! its grants from one; neither ever dereferences a raw address directly.
//!
//! Every access is bounds-checked against the window. A region does not know
//! which of its pages are actually mapped; the heap only touches
//! `[addr_start, addr_end)` of its window.

use core::marker::PhantomData;
use core::ptr::NonNull;
use kernel_vmem::VirtAddr;

/// A bounds-checked window of memory addressed by kernel virtual addresses.
pub struct Region<'a> {
    start: VirtAddr,
    base: NonNull<u8>,
    len: u32,
    _memory: PhantomData<&'a mut [u8]>,
}

// Safety: the region is the only handle to its memory.
unsafe impl Send for Region<'_> {}

impl<'a> Region<'a> {
    /// A region backed by `bytes`, whose first byte answers to `start`.
    ///
    /// # Panics
    /// If `bytes` is longer than the 32-bit address space allows.
    #[must_use]
    pub fn from_slice(start: VirtAddr, bytes: &'a mut [u8]) -> Self {
        let Ok(len) = u32::try_from(bytes.len()) else {
            panic!("region larger than 4 GiB");
        };
        assert!(
            start.checked_add(len).is_some() || len == 0,
            "region wraps the address space"
        );
        Self {
            start,
            base: NonNull::from(bytes).cast(),
            len,
            _memory: PhantomData,
        }
    }

    /// A region over `len` bytes at host pointer `base`, addressed as `start`.
    ///
    /// # Safety
    /// `base..base + len` must be valid for reads and writes for `'a` and
    /// not be accessed through any other path while the region lives, at
    /// least for the parts the owner of the region actually touches.
    #[must_use]
    pub const unsafe fn from_raw_parts(start: VirtAddr, base: NonNull<u8>, len: u32) -> Self {
        Self {
            start,
            base,
            len,
            _memory: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtAddr {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address in the window.
    ///
    /// Saturates at the 4 GiB boundary for a window that ends there.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtAddr {
        match self.start.checked_add(self.len) {
            Some(end) => end,
            None => VirtAddr::new(u32::MAX),
        }
    }

    /// Whether `[addr, addr + len)` lies inside the window.
    #[must_use]
    pub fn contains(&self, addr: VirtAddr, len: u32) -> bool {
        addr >= self.start
            && (addr - self.start)
                .checked_add(len)
                .is_some_and(|end| end <= self.len)
    }

    /// Host pointer for `addr`.
    ///
    /// # Panics
    /// If `[addr, addr + len)` is outside the window.
    #[track_caller]
    pub fn as_mut_ptr(&mut self, addr: VirtAddr, len: u32) -> NonNull<u8> {
        self.host(addr, len)
    }

    #[track_caller]
    pub fn read_u32(&self, addr: VirtAddr) -> u32 {
        let ptr = self.host(addr, 4).cast::<u32>();
        // Safety: bounds-checked; tags need not be naturally aligned.
        unsafe { ptr.as_ptr().read_unaligned() }
    }

    #[track_caller]
    pub fn write_u32(&mut self, addr: VirtAddr, value: u32) {
        let ptr = self.host(addr, 4).cast::<u32>();
        // Safety: bounds-checked; `&mut self` gives exclusive access.
        unsafe { ptr.as_ptr().write_unaligned(value) }
    }

    /// Sets `len` bytes starting at `addr` to `byte`.
    #[track_caller]
    pub fn fill(&mut self, addr: VirtAddr, len: u32, byte: u8) {
        let ptr = self.host(addr, len);
        // Safety: bounds-checked; `&mut self` gives exclusive access.
        unsafe { ptr.as_ptr().write_bytes(byte, len as usize) }
    }

    #[track_caller]
    fn host(&self, addr: VirtAddr, len: u32) -> NonNull<u8> {
        assert!(
            self.contains(addr, len),
            "access to {addr}+{len:#x} outside region {}..{}",
            self.start,
            self.end()
        );
        let offset = (addr - self.start) as usize;
        // Safety: the offset lies within the window.
        unsafe { self.base.add(offset) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_land_at_their_addresses() {
        let mut bytes = vec![0u8; 64];
        let mut region = Region::from_slice(VirtAddr::new(0x1000), &mut bytes);
        region.write_u32(VirtAddr::new(0x1003), 0xDEAD_BEEF);
        assert_eq!(region.read_u32(VirtAddr::new(0x1003)), 0xDEAD_BEEF);
        drop(region);
        assert_eq!(&bytes[3..7], &0xDEAD_BEEF_u32.to_ne_bytes());
    }

    #[test]
    fn fill_stays_inside_the_range() {
        let mut bytes = vec![0xAAu8; 16];
        let mut region = Region::from_slice(VirtAddr::new(0x2000), &mut bytes);
        region.fill(VirtAddr::new(0x2004), 8, 0);
        drop(region);
        assert_eq!(bytes[3], 0xAA);
        assert!(bytes[4..12].iter().all(|&b| b == 0));
        assert_eq!(bytes[12], 0xAA);
    }

    #[test]
    fn containment_checks_both_ends() {
        let mut bytes = vec![0u8; 32];
        let region = Region::from_slice(VirtAddr::new(0x1000), &mut bytes);
        assert!(region.contains(VirtAddr::new(0x1000), 32));
        assert!(!region.contains(VirtAddr::new(0x0FFF), 4));
        assert!(!region.contains(VirtAddr::new(0x101D), 4));
        assert_eq!(region.end(), VirtAddr::new(0x1020));
    }

    #[test]
    fn raw_parts_address_a_sub_window() {
        let mut bytes = vec![0u8; 4096];
        let base = NonNull::from(&mut bytes[1024..]).cast::<u8>();
        // Safety: `bytes` is not touched again until the region is dropped.
        let mut region = unsafe { Region::from_raw_parts(VirtAddr::new(0xC000_0400), base, 3072) };
        region.write_u32(VirtAddr::new(0xC000_0400), 7);
        assert_eq!(region.end(), VirtAddr::new(0xC000_1000));
        drop(region);
        assert_eq!(&bytes[1024..1028], &7u32.to_ne_bytes());
    }

    #[test]
    #[should_panic(expected = "outside region")]
    fn out_of_window_access_panics() {
        let mut bytes = vec![0u8; 8];
        let region = Region::from_slice(VirtAddr::new(0x1000), &mut bytes);
        let _ = region.read_u32(VirtAddr::new(0x1006));
    }
}
