//! # Kernel Memory Configuration
//!
//! This crate defines the memory layout constants that govern how physical
//! memory is split into frame pools and how much of every address space is
//! mapped eagerly. It is the single source of truth shared by the frame pool,
//! paging and bootstrap code.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the standard 32 MiB machine:
//! * **Kernel pool**: frames that back page directories and page tables
//! * **Process pool**: frames handed out on page faults
//! * **Memory hole**: a physical range inside the process pool that must never
//!   be allocated
//! * **Directly mapped region**: the low 4 MiB, identity mapped in every space
//!
//! ### Runtime layout ([`MemoryLayout`])
//! The same information as a value, so that bootstrap code and tests can run
//! against smaller or differently placed pools without recompiling. The
//! [`MemoryLayout::STANDARD`] layout is built from the constants.
//!
//! ## Configuration Management
//!
//! All layout constants are `const` values with compile-time assertions; a
//! [`MemoryLayout`] built at runtime is checked by the consumer before use.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;

use kernel_memory_addresses::FrameNumber;

/// A contiguous range of physical frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameRange {
    /// First frame of the range.
    pub start: FrameNumber,
    /// Number of frames in the range.
    pub frames: u32,
}

impl FrameRange {
    #[must_use]
    pub const fn new(start: u32, frames: u32) -> Self {
        Self {
            start: FrameNumber::new(start),
            frames,
        }
    }

    /// One past the last frame of the range.
    #[must_use]
    pub const fn end(&self) -> FrameNumber {
        FrameNumber::new(self.start.as_u32() + self.frames)
    }

    #[must_use]
    pub const fn contains_range(&self, other: &Self) -> bool {
        other.start.as_u32() >= self.start.as_u32()
            && other.start.as_u32() + other.frames <= self.start.as_u32() + self.frames
    }
}

/// Physical memory layout consumed by the memory manager bootstrap.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Frames backing page directories and page tables.
    pub kernel_pool: FrameRange,
    /// Frames handed out for user data on page faults.
    pub process_pool: FrameRange,
    /// Range inside the process pool that must never be allocated.
    pub memory_hole: Option<FrameRange>,
    /// Size of the region shared by all address spaces, in bytes.
    pub shared_size: u32,
}

impl MemoryLayout {
    /// Layout of the standard 32 MiB machine (see [`memory`]).
    pub const STANDARD: Self = Self {
        kernel_pool: FrameRange::new(
            memory::KERNEL_POOL_START_FRAME,
            memory::KERNEL_POOL_SIZE,
        ),
        process_pool: FrameRange::new(
            memory::PROCESS_POOL_START_FRAME,
            memory::PROCESS_POOL_SIZE,
        ),
        memory_hole: Some(FrameRange::new(
            memory::MEM_HOLE_START_FRAME,
            memory::MEM_HOLE_SIZE,
        )),
        shared_size: memory::SHARED_SIZE,
    };
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::STANDARD
    }
}
