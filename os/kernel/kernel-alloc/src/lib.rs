//! # Kernel Memory Allocation
//!
//! Physical frame allocation, the kernel heap and the allocator front end
//! built on top of them. The paging structures themselves live in
//! `kernel-vmem`; this crate decides which frames and which heap spans go
//! where.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Front end (kmalloc / global)               │
//! │    • bootstrap phase, then heap phase               │
//! │    • zeroed / page-aligned / physical variants      │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │                         │
//! ┌───────────▼────────────┐ ┌──────────▼───────────────┐
//! │  Bootstrap allocator   │ │  Heap (boundary tags)    │
//! │  • bump, never frees   │ │  • smallest-fit          │
//! │  • identity-mapped     │ │  • split and coalesce    │
//! └────────────────────────┘ │  • grows and shrinks     │
//!                            └──────────┬───────────────┘
//!                                       │ HeapPager
//!                            ┌──────────▼───────────────┐
//!                            │  VMM (KernelPager)       │
//!                            │  • page directory        │
//!                            │  • frame allocator       │
//!                            └──────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame allocator ([`frame_alloc`])
//!
//! One bit per physical frame. Frames are handed out lowest-first and are
//! bound to a page entry when allocated.
//!
//! ### Bootstrap allocator ([`bootstrap_alloc`])
//!
//! Serves everything the kernel needs before its heap exists, right after
//! the kernel image. It also supplies the early page tables.
//!
//! ### Ordered index ([`ordered_index`]) and heap ([`heap`])
//!
//! The heap brackets every span with a header and a footer and keeps its
//! holes in an ordered index sorted by size. Growing and shrinking goes
//! through a [`HeapPager`](heap::HeapPager); [`vmm::KernelPager`] is the
//! kernel's.
//!
//! ### Front end ([`kmalloc`], [`global`])
//!
//! [`KernelMemory`] owns all of the above. [`global`] wraps the kernel's
//! one instance behind a spin lock taken with interrupts disabled.
//!
//! ## Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Kernel image                   │ identity-mapped
//!             ├─────────────────────────────────┤
//!             │  Bootstrap allocations          │ identity-mapped
//!             ├─────────────────────────────────┤
//!             │  ...                            │
//! 0xC000_0000 ├─────────────────────────────────┤
//!             │  Kernel heap (grows upward)     │
//! 0xCFFF_F000 ├─────────────────────────────────┤
//!             │  ...                            │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Failure Model
//!
//! Running out of memory and heap corruption cannot be recovered from this
//! early. The building blocks return typed errors; [`KernelMemory`] and
//! [`global`] turn them into a logged halt (see [`OrFatal`]).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap_alloc;
pub mod config;
mod fatal;
pub mod frame_alloc;
pub mod global;
pub mod heap;
pub mod kmalloc;
pub mod ordered_index;
pub mod region;
pub mod vmm;

#[cfg(test)]
mod test_support;

pub use crate::bootstrap_alloc::{BootstrapAllocator, BootstrapError, Placement};
pub use crate::config::MemoryConfig;
pub use crate::fatal::OrFatal;
pub use crate::frame_alloc::{FrameAllocator, FrameError};
pub use crate::heap::{Heap, HeapConfig, HeapError, HeapPager, HeapStats, Hole};
pub use crate::kmalloc::{AllocFlags, Allocation, KernelMemory, MemoryError};
pub use crate::ordered_index::{IndexFull, OrderedIndex};
pub use crate::region::Region;
pub use crate::vmm::{KernelPager, VmmError};
