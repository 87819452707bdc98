//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and frame numbers
//! used by the frame pools and the two-level paging code.
//!
//! ## Overview
//!
//! The kernel works with a flat 32-bit address space split into 4 KiB frames
//! (physical) and 4 KiB pages (virtual). Mixing the two kinds of address is the
//! classic paging bug, so every address carries its kind in its type:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | An address in physical memory (RAM, page-table frames). |
//! | [`VirtualAddress`] | An address translated through the page tables. |
//! | [`FrameNumber`] | The index of a 4 KiB physical frame (`address >> 12`). |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0020_1234);
//! let frame = pa.frame();
//! assert_eq!(frame.as_u32(), 0x201);
//! assert_eq!(frame.base().as_u32(), 0x0020_1000);
//! assert_eq!(pa.offset(), 0x234);
//!
//! let va = VirtualAddress::new(0x4000_0fff);
//! assert_eq!(va.page_base().as_u32(), 0x4000_0000);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys or for FFI use.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;

use core::fmt;

pub use crate::frame_number::FrameNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Size of a physical frame and of a virtual page, in bytes.
pub const FRAME_SIZE: u32 = 4096;

/// log2 of [`FRAME_SIZE`]; the number of in-page offset bits.
pub const FRAME_SHIFT: u32 = 12;

/// Principal raw memory address ([virtual](VirtualAddress) or [physical](PhysicalAddress)).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u32);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The offset within the 4 KiB page that contains this address.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 & (FRAME_SIZE - 1)
    }

    /// Align down to the containing 4 KiB boundary.
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(FRAME_SIZE - 1))
    }

    /// Returns `true` if the address is a multiple of `align` (a power of two).
    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, align: u32) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    /// Checked addition of a byte count; `None` if the 32-bit space overflows.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryAddress(0x{:08X})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Number of whole frames (pages) needed to hold `bytes` bytes.
///
/// ```rust
/// # use kernel_memory_addresses::frames_for;
/// assert_eq!(frames_for(0), 0);
/// assert_eq!(frames_for(1), 1);
/// assert_eq!(frames_for(4096), 1);
/// assert_eq!(frames_for(4097), 2);
/// ```
#[inline]
#[must_use]
pub const fn frames_for(bytes: u32) -> u32 {
    bytes.div_ceil(FRAME_SIZE)
}
