//! # Two-Level Page Tables
//!
//! 32-bit x86 paging without PAE splits a virtual address into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! - [`pd`]: the page directory (one per address space, referenced by CR3).
//! - [`pt`]: second-level page tables, each mapping 4 MiB in 4 KiB pages.

pub mod pd;
pub mod pt;

use kernel_memory_addresses::VirtualAddress;
use pd::DirectoryIndex;
use pt::TableIndex;

/// Entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: u16 = 1024;

/// Bytes of virtual address space covered by one page table.
pub const BYTES_PER_TABLE: u32 = 4 * 1024 * 1024;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

/// Virtual address of the page selected by a directory and table index.
#[inline]
#[must_use]
pub fn join_indices(dir: DirectoryIndex, table: TableIndex) -> VirtualAddress {
    VirtualAddress::new((u32::from(dir.as_u16()) << 22) | (u32::from(table.as_u16()) << 12))
}
