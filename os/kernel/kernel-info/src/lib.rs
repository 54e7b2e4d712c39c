//! # Kernel Memory Configuration and Boot Interface
//!
//! This crate is the single source of truth for the numbers the memory core
//! is built around: the page size, where the kernel heap lives in the
//! virtual address space, how far it may grow, and how much physical memory
//! the machine has. Every other memory crate (`kernel-vmem`, `kernel-alloc`)
//! reads its layout from here so that the frame bitset, the page tables and
//! the heap agree on the same picture.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the 32-bit protected-mode layout:
//! * **Paging geometry**: 4 KiB pages, 1024 entries per table and directory
//! * **Kernel heap**: start, initial size, growth ceiling and shrink floor
//! * **Free-hole index**: capacity of the heap's ordered index
//! * **Faults**: the page-fault exception vector
//!
//! ### Boot Information ([`boot`])
//! The memory fields of the multiboot information block, used to size the
//! frame bitset from what the boot loader discovered instead of a
//! hard-coded constant.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000        ┌─────────────────────────────────┐
//!                    │  Identity-mapped low memory     │
//!                    │  (kernel image + bootstrap      │
//!                    │   allocations, user-readable)   │
//! placement cursor   ├─────────────────────────────────┤
//!                    │           unmapped              │
//! KERNEL_HEAP_START  ├─────────────────────────────────┤ 0xC000_0000
//!                    │  Kernel heap, mapped on demand  │
//!                    │  [start, start + span)          │
//! KERNEL_HEAP_MAX    ├─────────────────────────────────┤ 0xCFFF_F000
//!                    │           unmapped              │
//! 0xFFFF_FFFF        └─────────────────────────────────┘
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │       Kernel Image              │
//!             ├─────────────────────────────────┤ <- bootstrap cursor
//!             │  Bootstrap allocations          │
//!             │  (frame bitset, directory,      │
//!             │   page tables, hole index)      │
//!             ├─────────────────────────────────┤
//!             │  Frames handed out on demand    │
//!             └─────────────────────────────────┘ physical memory size
//! ```
//!
//! All layout constants are validated at compile time; this crate contains
//! no unsafe code.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
