//! # Memory Manager Bootstrap
//!
//! Brings up the frame pools and paging in the order the kernel needs them:
//!
//! 1. The kernel pool, keeping its bitmap in its own first frame.
//! 2. The process pool, whose bitmap lives in frames taken from the kernel pool.
//! 3. The memory hole inside the process pool, marked inaccessible.
//! 4. Paging: the first page table is created, loaded and enabled.

use crate::frame_pool::{ContFramePool, FramePoolError, needed_info_frames};
use crate::frame_pools::FramePools;
use crate::paging::{PageTableId, Paging, PagingError, init_paging};
use kernel_info::memory::DIRECTLY_MAPPED_BYTES;
use kernel_info::{FrameRange, MemoryLayout};
use kernel_memory_addresses::FRAME_SIZE;
use kernel_registers::ControlRegisters;
use kernel_vmem::PhysMapper;

/// Errors from bringing up the memory manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootstrapError {
    #[error("kernel pool {0:?} is not inside the directly mapped region")]
    KernelPoolNotMapped(FrameRange),
    #[error("memory hole {0:?} is not inside the process pool")]
    HoleOutsideProcessPool(FrameRange),
    #[error(transparent)]
    Frames(#[from] FramePoolError),
    #[error(transparent)]
    Paging(#[from] PagingError),
}

fn validate(layout: &MemoryLayout) -> Result<(), BootstrapError> {
    let mapped = FrameRange::new(0, DIRECTLY_MAPPED_BYTES / FRAME_SIZE);
    if !mapped.contains_range(&layout.kernel_pool) {
        return Err(BootstrapError::KernelPoolNotMapped(layout.kernel_pool));
    }
    if let Some(hole) = layout.memory_hole
        && !layout.process_pool.contains_range(&hole)
    {
        return Err(BootstrapError::HoleOutsideProcessPool(hole));
    }
    Ok(())
}

/// Set up frame pools and paging for `layout` and switch paging on.
///
/// Returns the paging context and the page table that is now loaded.
///
/// # Errors
/// - [`BootstrapError::KernelPoolNotMapped`] or
///   [`BootstrapError::HoleOutsideProcessPool`] for an inconsistent layout.
/// - [`BootstrapError::Frames`] if a pool cannot be built or registered.
/// - [`BootstrapError::Paging`] if the first page table cannot be created.
///
/// # Safety
/// Every frame of both pools must be reachable through `mapper` and owned
/// exclusively by the memory manager for `'m`.
pub unsafe fn bootstrap<'m, M: PhysMapper, R: ControlRegisters>(
    mapper: &'m M,
    registers: R,
    layout: &MemoryLayout,
) -> Result<(Paging<'m, M, R>, PageTableId), BootstrapError> {
    validate(layout).inspect_err(|e| log::error!("invalid memory layout: {e}"))?;
    let mut frames = FramePools::new();

    let kernel = &layout.kernel_pool;
    // SAFETY: The caller hands the whole kernel pool to us.
    let pool = unsafe { ContFramePool::new(mapper, kernel.start, kernel.frames, None, 0) }?;
    let kernel_pool = frames.register(pool)?;

    let process = &layout.process_pool;
    let n_info_frames = needed_info_frames(process.frames);
    let info = frames.get_frames(kernel_pool, n_info_frames)?;
    // SAFETY: `info` was just allocated for this bitmap.
    let pool = unsafe {
        ContFramePool::new(mapper, process.start, process.frames, Some(info), n_info_frames)
    }?;
    let process_pool = frames.register(pool)?;

    if let Some(hole) = layout.memory_hole {
        frames.mark_inaccessible(process_pool, hole.start, hole.frames)?;
        log::info!("memory hole at frame {} ({} frames) reserved", hole.start, hole.frames);
    }

    let mut paging = init_paging(
        mapper,
        registers,
        frames,
        kernel_pool,
        process_pool,
        layout.shared_size,
    )?;
    let table = paging.create_page_table()?;
    paging.load(table)?;
    paging.enable_paging()?;
    Ok((paging, table))
}
