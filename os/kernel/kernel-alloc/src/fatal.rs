//! Turning errors into kernel halts.
//!
//! Nothing above the memory core can recover from running out of memory or
//! from a corrupted heap, so the kernel-facing surface ends every failed
//! operation here. The panic handler halts the machine.

use core::fmt::Display;
use log::error;

pub trait OrFatal<T> {
    /// The success value, or a logged halt naming `context` and the caller.
    fn or_fatal(self, context: &str) -> T;
}

impl<T, E: Display> OrFatal<T> for Result<T, E> {
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                let location = core::panic::Location::caller();
                error!("{context}: {e} ({location})");
                panic!("{context}: {e}");
            }
        }
    }
}
