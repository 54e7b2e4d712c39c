//! Page-aligned host memory standing in for kernel address ranges.

use crate::region::Region;
use core::ptr::NonNull;
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::VirtAddr;

#[repr(C, align(4096))]
#[derive(Clone)]
struct Page([u8; PAGE_SIZE as usize]);

pub struct PageBuffer {
    pages: Vec<Page>,
}

impl PageBuffer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages: vec![Page([0; PAGE_SIZE as usize]); pages],
        }
    }

    /// The whole buffer, addressed as if it started at `start`.
    pub fn region(&mut self, start: u32) -> Region<'_> {
        Region::from_slice(VirtAddr::new(start), self.bytes_mut())
    }

    /// A window into the buffer that answers to a different start address.
    ///
    /// Lets a test keep one host buffer while the code under test treats
    /// only part of it as its memory.
    pub fn region_at(&mut self, start: u32, offset: usize, len: usize) -> Region<'_> {
        Region::from_slice(VirtAddr::new(start), &mut self.bytes_mut()[offset..offset + len])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.pages.len() * PAGE_SIZE as usize;
        let base = NonNull::from(self.pages.as_mut_slice()).cast::<u8>();
        // Safety: `Page` is plain bytes with no padding.
        unsafe { core::slice::from_raw_parts_mut(base.as_ptr(), len) }
    }
}
