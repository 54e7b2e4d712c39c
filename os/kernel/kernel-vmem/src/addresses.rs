//! # Virtual and Physical Memory Addresses

use core::fmt;
use core::ops::{Add, Sub};
use kernel_info::memory::{ENTRIES_PER_TABLE, PAGE_OFFSET_MASK, PAGE_SHIFT, PAGE_SIZE};

/// A **virtual** memory address (kernel address space).
///
/// Newtype over `u32` to prevent mixing with physical addresses.
/// No alignment guarantees by itself.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u32);

/// A **physical** memory address (machine bus address).
///
/// Newtype over `u32` to prevent mixing with virtual addresses.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u32);

/// Index of a page table within the page directory (bits 31–22).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TableIndex(usize);

/// Index of an entry within a page table (bits 21–12).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct EntryIndex(usize);

impl TableIndex {
    /// Panics if `i` is not below 1024.
    #[inline]
    #[must_use]
    pub const fn new(i: usize) -> Self {
        assert!(i < ENTRIES_PER_TABLE);
        Self(i)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl EntryIndex {
    /// Panics if `i` is not below 1024.
    #[inline]
    #[must_use]
    pub const fn new(i: usize) -> Self {
        assert!(i < ENTRIES_PER_TABLE);
        Self(i)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl VirtAddr {
    #[inline]
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The directory slot whose table maps this address.
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> TableIndex {
        TableIndex((self.0 >> 22) as usize)
    }

    /// The slot within that table.
    #[inline]
    #[must_use]
    pub const fn entry_index(self) -> EntryIndex {
        EntryIndex(((self.0 >> PAGE_SHIFT) & 0x3ff) as usize)
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & PAGE_OFFSET_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// The start of the page containing this address.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(crate::align_down(self.0, PAGE_SIZE))
    }

    /// Adds `bytes`, returning `None` past the 4 GiB boundary.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtracts `bytes`, returning `None` below address zero.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, bytes: u32) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The physical address of the first byte of `frame`.
    #[inline]
    #[must_use]
    pub const fn from_frame(frame: u32) -> Self {
        Self(frame << PAGE_SHIFT)
    }

    /// The index of the frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_OFFSET_MASK == 0
    }
}

impl Add<u32> for VirtAddr {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub<u32> for VirtAddr {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: u32) -> Self {
        Self(self.0 - rhs)
    }
}

/// Distance in bytes between two virtual addresses.
impl Sub<Self> for VirtAddr {
    type Output = u32;

    #[inline]
    fn sub(self, rhs: Self) -> u32 {
        self.0 - rhs.0
    }
}

impl Add<u32> for PhysAddr {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
