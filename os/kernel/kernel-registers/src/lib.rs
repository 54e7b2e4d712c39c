//! # Typed IA-32 Control Registers
//!
//! The three control registers the memory core touches, modelled as 32-bit
//! bitfields:
//!
//! * [`Cr0`](cr0::Cr0) carries the paging-enable bit,
//! * [`Cr2`](cr2::Cr2) holds the linear address of the last page fault,
//! * [`Cr3`](cr3::Cr3) points at the active page directory.
//!
//! Reading and writing the hardware registers is only available with the
//! `asm` feature when compiling for `x86`; on any other target the types are
//! plain values, which keeps them usable in host-side tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr0;
pub mod cr2;
pub mod cr3;

pub use cr0::Cr0;
pub use cr2::Cr2;
pub use cr3::Cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Control register access is privileged and requires ring 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing a control register changes how every subsequent memory access
    /// is translated; the new value must describe a valid configuration.
    unsafe fn store_unsafe(self);
}
