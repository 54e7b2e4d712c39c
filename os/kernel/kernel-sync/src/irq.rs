use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};

/// EFLAGS interrupt-enable flag.
const EFLAGS_IF: u32 = 1 << 9;

/// A mutex guard that also keeps interrupts disabled while held.
///
/// Created via [`Mutex::lock_irq`], it
///
/// 1. saves the current interrupt state and disables interrupts, then
/// 2. acquires the underlying mutex,
///
/// and releases both in reverse order on drop. An interrupt handler can
/// therefore never re-enter code holding the same lock on this CPU.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinMutex;
///
/// static FRAMES_IN_USE: SpinMutex<u32> = SpinMutex::new(0);
///
/// {
///     let mut used = FRAMES_IN_USE.lock_irq();
///     *used += 1;
/// }
/// assert_eq!(*FRAMES_IN_USE.lock(), 1);
/// ```
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    // Field order matters: the lock is released before interrupts return.
    guard: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqMutex { guard, _irq: irq }
    }

    /// Runs `f` inside a critical section: interrupts off, lock held.
    #[inline]
    pub fn with_lock_irq<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock_irq();
        f(&mut guard)
    }
}

/// Whether the interrupt flag can actually be manipulated.
///
/// Only a bare-metal x86 build runs at ring 0; hosted builds (tests, tools)
/// treat the interrupt state as always disabled and skip `cli`/`sti`.
const BARE_METAL: bool = cfg!(all(target_arch = "x86", target_os = "none"));

/// Disables hardware interrupts (`cli`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `cli` is permitted.
#[inline]
pub fn cli_stop_interrupts() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Enables hardware interrupts (`sti`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `sti` is permitted.
#[inline]
pub fn sti_enable_interrupts() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Returns the current `EFLAGS` value (via `pushfd/pop`).
///
/// On hosted builds this reports interrupts as disabled.
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let flags: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) flags, options(preserves_flags)) }
        flags
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        0
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`; on drop it executes `sti` **only** if they were enabled
/// before, so nested guards compose.
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = BARE_METAL && eflags() & EFLAGS_IF != 0;
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether interrupts will be re-enabled when this guard drops.
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}
