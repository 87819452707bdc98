//! # Kernel Memory Management
//!
//! Physical frame pools, demand paging and virtual memory pools for a 32-bit
//! x86 teaching kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  VM Pools ([`VmPool`])              │
//! │    • Page-granular regions of a virtual range       │
//! │    • Region directory in the pool's first page      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ legitimacy, page release
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  Paging ([`Paging`])                │
//! │    • Page tables with the low 4 MiB identity mapped │
//! │    • Page fault handling, CR0/CR3 control           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ kernel frames / process frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Frame Pools ([`FramePools`])               │
//! │    • Contiguous runs with a two-bit state map       │
//! │    • Release by frame number across all pools       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame pools ([`frame_pool`], [`frame_pools`])
//! * Each [`ContFramePool`] covers a fixed range of frames and tracks every
//!   frame as free, head of an allocated run, or part of one.
//! * The map lives in the pool's own first frames or in frames provided by
//!   the caller, see [`needed_info_frames`].
//! * [`FramePools`] finds the owner of a frame so runs can be released
//!   without naming their pool.
//!
//! ### Paging ([`paging`])
//! * [`init_paging`] fixes which pool backs page tables and which backs pages.
//! * Page tables are created, loaded into CR3 and switched on through CR0.
//! * [`Paging::handle_fault`] installs page tables and pages on demand and
//!   rejects protection violations and addresses outside every VM pool.
//!
//! ### VM pools ([`vm_pool`])
//! * Regions are allocated back to back and released by their start address;
//!   releasing returns every backing frame.
//!
//! ### Bootstrap ([`bootstrap()`])
//! Builds the pools for a [`MemoryLayout`](kernel_info::MemoryLayout) and
//! turns paging on.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{ContFramePool, FramePools, VmPool, init_paging};
//! use kernel_memory_addresses::{FrameNumber, VirtualAddress};
//! use kernel_registers::EmulatedControlRegisters;
//! use kernel_vmem::EmulatedPhysMemory;
//!
//! let ram = EmulatedPhysMemory::with_frames(1024 + 256);
//! let mut frames = FramePools::new();
//! let kernel = unsafe { ContFramePool::new(&ram, FrameNumber::new(512), 256, None, 0) }?;
//! let process = unsafe { ContFramePool::new(&ram, FrameNumber::new(1024), 256, None, 0) }?;
//! let kernel = frames.register(kernel)?;
//! let process = frames.register(process)?;
//!
//! let registers = EmulatedControlRegisters::new();
//! let mut paging = init_paging(&ram, registers, frames, kernel, process, 4 << 20)?;
//! let table = paging.create_page_table()?;
//! paging.load(table)?;
//! paging.enable_paging()?;
//!
//! let base = VirtualAddress::new(0x4000_0000);
//! let mut heap = VmPool::new(&mut paging, base, 1 << 20, process, table)?;
//! let buffer = heap.allocate(&mut paging, 100)?;
//! paging.write_bytes(table, buffer, b"hello")?;
//! heap.release(&mut paging, buffer)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod frame_pool;
pub mod frame_pools;
mod frame_state;
pub mod paging;
pub mod vm_pool;

pub use crate::bootstrap::{BootstrapError, bootstrap};
pub use crate::frame_pool::{
    ContFramePool, FRAMES_PER_INFO_FRAME, FramePoolError, needed_info_frames,
};
pub use crate::frame_pools::{FramePools, MAX_FRAME_POOLS, PoolId};
pub use crate::frame_state::FrameState;
pub use crate::paging::{
    FaultError, FaultResolution, PageTableId, Paging, PagingError, VmRange, init_paging,
};
pub use crate::vm_pool::{Region, VmPool, VmPoolError};
