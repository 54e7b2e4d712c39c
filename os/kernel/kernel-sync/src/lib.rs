//! # Kernel synchronization primitives
//!
//! The memory core itself is written for a single execution context; the
//! kernel-wide allocator surface wraps its state in these primitives so that
//! an interrupt arriving in the middle of an allocation cannot observe or
//! mutate half-updated frame bitsets, directories or hole indexes.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;
mod sync_once_cell;

pub use irq::{IrqGuard, IrqMutex};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use sync_once_cell::SyncOnceCell;

/// A mutex that busy-waits on a single flag.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The lock must be held by the caller.
    unsafe fn raw_unlock(&self);
}
