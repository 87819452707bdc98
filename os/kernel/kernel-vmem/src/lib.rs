//! # Virtual Memory Support
//!
//! 32-bit x86 paging (no PAE) for a small teaching kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) walker over a page directory.
//! - x86 paging entry bits ([`PageEntryBits`]) with the templates the kernel
//!   installs.
//! - 4 KiB-aligned [`PageDirectory`] and [`PageTable`] wrappers with typed
//!   index helpers.
//! - The page-fault error code ([`PageFaultError`]) and fault record
//!   ([`PageFault`]).
//! - A physical-memory access interface ([`PhysMapper`]) and a hosted
//!   implementation backed by the heap ([`EmulatedPhysMemory`]).
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Page Table → Physical Page
//!          │                │
//!          │                └───► PTE (Page Table Entry)      → maps 4 KiB page
//!          └────────────────────► PDE (Page Directory Entry)  → points to a PT
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | One per address space, referenced by CR3. Each entry covers 4 MiB. |
//! | 2 | **PT** (Page Table) | **PTE** | Each entry maps a 4 KiB physical page. |
//!
//! Both tables hold 1024 entries of 4 bytes and fill exactly one frame.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod address_space;
pub mod emulated;
mod fault;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::AddressSpace;
pub use crate::emulated::EmulatedPhysMemory;
pub use crate::fault::{PageFault, PageFaultError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};

use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// Typical patterns:
/// - **Kernel**: the low memory holding the frame pools is identity mapped;
///   a physical address is a usable pointer.
/// - **Tests**: [`EmulatedPhysMemory`] offsets into a heap buffer.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped as writable for `'a`.
    /// - `T` must match the bytes at `pa`, and no other reference may alias
    ///   them while the returned one is live.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View `len` bytes of physical memory starting at `pa`.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8];

    /// View the frame `frame` as a byte array.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut).
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: FrameNumber) -> &'a mut [u8; 4096] {
        unsafe { self.phys_to_mut(frame.base()) }
    }
}

/// Errors raised while editing an address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("no page table covers {0}")]
    MissingTable(VirtualAddress),
    #[error("the page at {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("a page table for {0} is already installed")]
    TablePresent(VirtualAddress),
}
