//! # Memory Layout
//!
//! ```text
//! Physical memory (32 MiB machine):
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory + kernel image      │  identity mapped, not pooled
//! 0x0020_0000 ├─────────────────────────────────┤  KERNEL_POOL_START_FRAME (2 MiB)
//!             │  Kernel frame pool              │  page directories / page tables
//! 0x0040_0000 ├─────────────────────────────────┤  PROCESS_POOL_START_FRAME (4 MiB)
//!             │  Process frame pool             │  user data pages
//! 0x00F0_0000 │   ├ memory hole (1 MiB)         │  MEM_HOLE_START_FRAME (15 MiB)
//! 0x0100_0000 │   ┘                             │
//! 0x0200_0000 └─────────────────────────────────┘  (32 MiB)
//! ```

use kernel_memory_addresses::FRAME_SIZE;

const MIB: u32 = 1024 * 1024;

/// First frame of the kernel pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = (2 * MIB) / FRAME_SIZE;

/// Number of frames in the kernel pool (2 MiB worth).
pub const KERNEL_POOL_SIZE: u32 = (2 * MIB) / FRAME_SIZE;

/// First frame of the process pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = (4 * MIB) / FRAME_SIZE;

/// Number of frames in the process pool (28 MiB worth).
pub const PROCESS_POOL_SIZE: u32 = (28 * MIB) / FRAME_SIZE;

/// First frame of the physical memory hole inside the process pool (15 MiB).
pub const MEM_HOLE_START_FRAME: u32 = (15 * MIB) / FRAME_SIZE;

/// Number of frames in the memory hole (1 MiB worth).
pub const MEM_HOLE_SIZE: u32 = MIB / FRAME_SIZE;

/// Bytes identity-mapped at the bottom of every address space.
///
/// Exactly what one second-level table covers: 1024 entries of 4 KiB.
pub const DIRECTLY_MAPPED_BYTES: u32 = 4 * MIB;

/// Size of the region shared by all address spaces (kernel code and data).
pub const SHARED_SIZE: u32 = 4 * MIB;

/// Total physical memory the layout above assumes.
pub const PHYS_MEMORY_BYTES: u32 = 32 * MIB;

const _: () = {
    assert!(KERNEL_POOL_SIZE.is_multiple_of(8));
    assert!(PROCESS_POOL_SIZE.is_multiple_of(8));
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_SIZE <= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(
        MEM_HOLE_START_FRAME + MEM_HOLE_SIZE <= PROCESS_POOL_START_FRAME + PROCESS_POOL_SIZE
    );
    assert!((PROCESS_POOL_START_FRAME + PROCESS_POOL_SIZE) * FRAME_SIZE <= PHYS_MEMORY_BYTES);
    assert!(DIRECTLY_MAPPED_BYTES == 1024 * FRAME_SIZE);
};
