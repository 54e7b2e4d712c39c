use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A value protected by a raw lock `R`.
pub struct Mutex<T, R> {
    raw: R,
    cell: UnsafeCell<T>,
}

// Safety: access to the cell is serialized by `raw`.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            cell: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    mutex: &'a Mutex<T, R>,
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves the lock is held.
        unsafe { &*self.mutex.cell.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves the lock is held exclusively.
        unsafe { &mut *self.mutex.cell.get() }
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        // Safety: a guard only exists while the lock is held.
        unsafe { self.mutex.raw.raw_unlock() }
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        if self.raw.raw_try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Runs `f` with the lock held and releases it afterwards.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }
}
