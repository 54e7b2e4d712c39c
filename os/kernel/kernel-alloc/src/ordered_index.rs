//! # Ordered Index
//!
//! A fixed-capacity array kept sorted by a caller-supplied ordering. The
//! heap uses one to track its holes by size; lookup by position is O(1),
//! insertion and removal shift the tail.
//!
//! The index never allocates. Its storage is a slice handed in at
//! construction, which in the kernel comes from the bootstrap allocator
//! before the heap exists.

use core::cmp::Ordering;

/// The index is at capacity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ordered index is full ({capacity} entries)")]
pub struct IndexFull {
    pub capacity: usize,
}

/// Items kept in ascending order under `cmp`.
///
/// A new item goes ahead of the items it compares equal to, so equal items
/// come out newest first.
pub struct OrderedIndex<'a, T, C = fn(&T, &T) -> Ordering> {
    slots: &'a mut [T],
    len: usize,
    cmp: C,
}

impl<'a, T: Copy + Ord> OrderedIndex<'a, T> {
    /// An index ordered by `T`'s own [`Ord`].
    #[must_use]
    pub fn natural(storage: &'a mut [T]) -> Self {
        Self::new(storage, T::cmp)
    }
}

impl<'a, T, C> OrderedIndex<'a, T, C>
where
    T: Copy,
    C: Fn(&T, &T) -> Ordering,
{
    /// An empty index over `storage`; its capacity is `storage.len()`.
    pub const fn new(storage: &'a mut [T], cmp: C) -> Self {
        Self {
            slots: storage,
            len: 0,
            cmp,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Places `item` before the first stored item not less than it.
    ///
    /// # Panics
    /// If the index is full.
    pub fn insert(&mut self, item: T) {
        if let Err(e) = self.try_insert(item) {
            panic!("{e}");
        }
    }

    /// As [`insert`](Self::insert), reporting a full index as an error.
    ///
    /// # Errors
    /// [`IndexFull`] if there is no room left.
    pub fn try_insert(&mut self, item: T) -> Result<(), IndexFull> {
        if self.is_full() {
            return Err(IndexFull {
                capacity: self.capacity(),
            });
        }

        let at = self.slots[..self.len]
            .iter()
            .position(|existing| (self.cmp)(existing, &item) != Ordering::Less)
            .unwrap_or(self.len);

        self.slots.copy_within(at..self.len, at + 1);
        self.slots[at] = item;
        self.len += 1;
        Ok(())
    }

    /// The item at position `i`.
    ///
    /// # Panics
    /// If `i` is not below [`len`](Self::len).
    #[must_use]
    #[track_caller]
    pub fn lookup(&self, i: usize) -> T {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        self.slots[i]
    }

    /// Removes and returns the item at position `i`, shifting later items down.
    ///
    /// # Panics
    /// If `i` is not below [`len`](Self::len).
    #[track_caller]
    pub fn remove(&mut self, i: usize) -> T {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        let item = self.slots[i];
        self.slots.copy_within(i + 1..self.len, i);
        self.len -= 1;
        item
    }

    /// Position of the first item matching `pred`.
    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.as_slice().iter().position(pred)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.as_slice().iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.slots[..self.len]
    }
}
