//! # Virtual Memory Pools
//!
//! A [`VmPool`] hands out page-granular regions of a virtual range. It never
//! touches frames itself: pages are backed lazily by the page fault handler
//! and returned on [`release`](VmPool::release).
//!
//! The first page of the range holds the region directory and is never
//! handed out:
//!
//! ```text
//!  base               base + 4 KiB                            base + size
//!  │                  │                                                 │
//!  ▼                  ▼                                                 ▼
//!  ┌──────────────────┬──────────┬──────────┬──────────┬────────────────┐
//!  │ count │ regions… │ region 0 │ region 1 │   ...    │      free      │
//!  └──────────────────┴──────────┴──────────┴──────────┴────────────────┘
//!   region directory   allocated back to back
//! ```
//!
//! Regions are appended after the last live one; releasing a region closes
//! the gap in the directory but not in the address range.

use crate::frame_pools::PoolId;
use crate::paging::{FaultError, PageTableId, Paging, PagingError, VmRange};
use kernel_memory_addresses::{FRAME_SIZE, VirtualAddress, frames_for};
use kernel_registers::ControlRegisters;
use kernel_vmem::PhysMapper;

/// Region entries that fit next to the header in one page.
pub const MAX_REGIONS: usize = 511;

/// One allocated region as stored in the directory page.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    base: u32,
    pages: u32,
}

impl Region {
    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.pages) * u64::from(FRAME_SIZE)
    }

    /// First address past the region.
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + self.size_bytes()
    }
}

#[repr(C, align(4096))]
struct RegionDirectory {
    count: u32,
    _reserved: u32,
    regions: [Region; MAX_REGIONS],
}

const _: () = assert!(size_of::<RegionDirectory>() == FRAME_SIZE as usize);

/// Errors from VM pool bookkeeping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("cannot allocate an empty region")]
    ZeroSize,
    #[error("the region directory is full")]
    DirectoryFull,
    #[error("not enough virtual space left for {requested} bytes")]
    OutOfVirtualSpace { requested: u32 },
    #[error("{0} is not a region start")]
    NotARegionStart(VirtualAddress),
    #[error("{size:#x} bytes at {base} cannot hold a VM pool")]
    InvalidRange { base: VirtualAddress, size: u32 },
    #[error("a pool of {0} bytes leaves no room past its directory page")]
    TooSmall(u32),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error(transparent)]
    Paging(#[from] PagingError),
}

/// A range of virtual memory carved into regions on demand.
#[derive(Debug)]
pub struct VmPool {
    base: VirtualAddress,
    size: u32,
    frame_pool: PoolId,
    page_table: PageTableId,
}

impl VmPool {
    /// Set up a pool over `base .. base + size` in `page_table` and register
    /// the range for fault handling.
    ///
    /// The directory page is faulted in and cleared, so this takes one frame
    /// from the process pool, plus one from the kernel pool if no page table
    /// covers `base` yet.
    ///
    /// # Errors
    /// - [`VmPoolError::InvalidRange`] if `base` or `size` is not page-aligned,
    ///   the range wraps the address space, or it starts inside the prefix
    ///   shared with the kernel (see [`Paging::shared_end`]).
    /// - [`VmPoolError::TooSmall`] if `size` does not exceed one page.
    /// - [`VmPoolError::Paging`] if `page_table` is unknown or has no room for
    ///   another range; [`VmPoolError::Fault`] if the directory page cannot be
    ///   faulted in, in which case the range is registered no longer.
    pub fn new<M: PhysMapper, R: ControlRegisters>(
        paging: &mut Paging<'_, M, R>,
        base: VirtualAddress,
        size: u32,
        frame_pool: PoolId,
        page_table: PageTableId,
    ) -> Result<Self, VmPoolError> {
        let wraps = u64::from(base.as_u32()) + u64::from(size) > 1 << 32;
        if !base.is_aligned_to(FRAME_SIZE) || !size.is_multiple_of(FRAME_SIZE) || wraps {
            log::error!("VM pool at {base}: invalid range of {size:#x} bytes");
            return Err(VmPoolError::InvalidRange { base, size });
        }
        if size <= FRAME_SIZE {
            log::error!("VM pool at {base}: {size} bytes is too small");
            return Err(VmPoolError::TooSmall(size));
        }

        if paging.is_shared(base) {
            log::error!(
                "VM pool at {base}: overlaps the shared region ending at {:#010x}",
                paging.shared_end()
            );
            return Err(VmPoolError::InvalidRange { base, size });
        }

        let range = VmRange::new(base, size);
        paging.register_pool(page_table, range)?;
        let pool = Self {
            base,
            size,
            frame_pool,
            page_table,
        };
        if let Err(e) = pool.directory(paging).map(|directory| directory.count = 0) {
            log::error!("VM pool at {base}: directory page unavailable: {e}");
            paging.unregister_pool(page_table, range)?;
            return Err(e.into());
        }

        log::info!(
            "VM pool at {base}: {} KiB in {page_table}, frames from {frame_pool}",
            size / 1024
        );
        Ok(pool)
    }

    #[inline]
    #[must_use]
    pub const fn base_address(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> PoolId {
        self.frame_pool
    }

    #[inline]
    #[must_use]
    pub const fn page_table(&self) -> PageTableId {
        self.page_table
    }

    fn end(&self) -> u64 {
        u64::from(self.base.as_u32()) + u64::from(self.size)
    }

    fn directory<'p, M: PhysMapper, R: ControlRegisters>(
        &self,
        paging: &'p mut Paging<'_, M, R>,
    ) -> Result<&'p mut RegionDirectory, FaultError> {
        // SAFETY: The directory is plain integers and its page belongs to this pool.
        unsafe { paging.access_mut::<RegionDirectory>(self.page_table, self.base) }
    }

    /// Reserve `size` bytes, rounded up to whole pages, after the last live
    /// region.
    ///
    /// # Errors
    /// - [`VmPoolError::ZeroSize`] if `size` is zero.
    /// - [`VmPoolError::DirectoryFull`] if [`MAX_REGIONS`] regions are live.
    /// - [`VmPoolError::OutOfVirtualSpace`] if the region would end past the
    ///   pool.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate<M: PhysMapper, R: ControlRegisters>(
        &mut self,
        paging: &mut Paging<'_, M, R>,
        size: u32,
    ) -> Result<VirtualAddress, VmPoolError> {
        if size == 0 {
            log::warn!("VM pool at {}: refusing empty allocation", self.base);
            return Err(VmPoolError::ZeroSize);
        }

        let pages = frames_for(size);
        let pool_end = self.end();
        let first_base = u64::from(self.base.as_u32()) + u64::from(FRAME_SIZE);
        let directory = self.directory(paging)?;
        let count = directory.count as usize;
        if count >= MAX_REGIONS {
            log::warn!("VM pool at {}: region directory full", self.base);
            return Err(VmPoolError::DirectoryFull);
        }

        let start = count
            .checked_sub(1)
            .map_or(first_base, |last| directory.regions[last].end());
        let end = start + u64::from(pages) * u64::from(FRAME_SIZE);
        if end > pool_end {
            log::warn!("VM pool at {}: no room for {size} bytes", self.base);
            return Err(VmPoolError::OutOfVirtualSpace { requested: size });
        }

        // `end <= pool_end <= 2^32`, so `start` fits.
        let start = start as u32;
        directory.regions[count] = Region { base: start, pages };
        directory.count += 1;

        let start = VirtualAddress::new(start);
        log::debug!("VM pool at {}: region of {pages} pages at {start}", self.base);
        Ok(start)
    }

    /// Free the region starting at `start` and every page backing it.
    ///
    /// Pages go back to their frame pools in ascending order, the directory
    /// closes the gap, and the page table is reloaded if it is current.
    ///
    /// # Errors
    /// - [`VmPoolError::NotARegionStart`] if no live region starts at `start`.
    /// - [`VmPoolError::Paging`] if a frame cannot be returned.
    pub fn release<M: PhysMapper, R: ControlRegisters>(
        &mut self,
        paging: &mut Paging<'_, M, R>,
        start: VirtualAddress,
    ) -> Result<(), VmPoolError> {
        let directory = self.directory(paging)?;
        let count = (directory.count as usize).min(MAX_REGIONS);
        let Some(index) = directory.regions[..count]
            .iter()
            .position(|r| r.base == start.as_u32())
        else {
            log::warn!("VM pool at {}: {start} is not a region start", self.base);
            return Err(VmPoolError::NotARegionStart(start));
        };
        let region = directory.regions[index];

        for page in 0..region.pages {
            let va = VirtualAddress::new(region.base + page * FRAME_SIZE);
            paging.free_page(self.page_table, va)?;
        }

        let directory = self.directory(paging)?;
        directory.regions.copy_within(index + 1..count, index);
        directory.count -= 1;
        paging.flush_tlb(self.page_table)?;

        log::debug!(
            "VM pool at {}: released {} pages at {start}",
            self.base,
            region.pages
        );
        Ok(())
    }

    /// Whether `va` lies within `base ..= base + size`.
    #[must_use]
    pub fn is_legitimate(&self, va: VirtualAddress) -> bool {
        VmRange::new(self.base, self.size).contains(va)
    }

    /// The live regions in allocation order.
    ///
    /// # Errors
    /// [`VmPoolError::Fault`] if the directory page cannot be faulted in.
    pub fn regions<'p, M: PhysMapper, R: ControlRegisters>(
        &self,
        paging: &'p mut Paging<'_, M, R>,
    ) -> Result<&'p [Region], VmPoolError> {
        let directory = self.directory(paging)?;
        let count = (directory.count as usize).min(MAX_REGIONS);
        Ok(&directory.regions[..count])
    }

    /// Number of live regions.
    ///
    /// # Errors
    /// As [`regions`](Self::regions).
    pub fn region_count<M: PhysMapper, R: ControlRegisters>(
        &self,
        paging: &mut Paging<'_, M, R>,
    ) -> Result<usize, VmPoolError> {
        Ok(self.regions(paging)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::ContFramePool;
    use crate::frame_pools::FramePools;
    use crate::frame_state::FrameState;
    use crate::paging::init_paging;
    use kernel_memory_addresses::FrameNumber;
    use kernel_registers::EmulatedControlRegisters;
    use kernel_vmem::EmulatedPhysMemory;

    type TestPaging<'m> = Paging<'m, EmulatedPhysMemory, EmulatedControlRegisters>;

    const BASE: VirtualAddress = VirtualAddress::new(0x4000_0000);
    const SIZE: u32 = 16 * FRAME_SIZE;

    fn ram() -> EmulatedPhysMemory {
        EmulatedPhysMemory::with_frames(1024 + 128)
    }

    fn setup(ram: &EmulatedPhysMemory) -> (TestPaging<'_>, PageTableId) {
        let mut frames = FramePools::new();
        let pool = |base, n| {
            unsafe { ContFramePool::new(ram, FrameNumber::new(base), n, None, 0) }.unwrap()
        };
        let kernel = frames.register(pool(512, 64)).unwrap();
        let process = frames.register(pool(1024, 128)).unwrap();
        let mut paging =
            init_paging(ram, EmulatedControlRegisters::new(), frames, kernel, process, 4 << 20)
                .unwrap();
        let id = paging.create_page_table().unwrap();
        paging.load(id).unwrap();
        paging.enable_paging().unwrap();
        (paging, id)
    }

    fn pool(paging: &mut TestPaging<'_>, id: PageTableId) -> VmPool {
        let process = paging.process_pool();
        VmPool::new(paging, BASE, SIZE, process, id).unwrap()
    }

    fn process_free(paging: &TestPaging<'_>) -> u32 {
        paging.frames().pool(paging.process_pool()).unwrap().n_free_frames()
    }

    fn assert_disjoint(regions: &[Region]) {
        for (i, r) in regions.iter().enumerate() {
            for other in &regions[i + 1..] {
                let other_base = u64::from(other.base().as_u32());
                let r_base = u64::from(r.base().as_u32());
                assert!(
                    r.end() <= other_base || other.end() <= r_base,
                    "{r:?} overlaps {other:?}"
                );
            }
        }
    }

    #[test]
    fn construction_validates_range() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let process = paging.process_pool();

        let misaligned = VirtualAddress::new(0x4000_0010);
        assert_eq!(
            VmPool::new(&mut paging, misaligned, SIZE, process, id).unwrap_err(),
            VmPoolError::InvalidRange { base: misaligned, size: SIZE }
        );
        assert_eq!(
            VmPool::new(&mut paging, BASE, FRAME_SIZE, process, id).unwrap_err(),
            VmPoolError::TooSmall(FRAME_SIZE)
        );
        let top = VirtualAddress::new(0xFFFF_F000);
        assert!(matches!(
            VmPool::new(&mut paging, top, 2 * FRAME_SIZE, process, id),
            Err(VmPoolError::InvalidRange { .. })
        ));
    }

    #[test]
    fn construction_clears_directory_and_registers_range() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        paging.write_bytes(id, BASE, &[0xFF; 8]).unwrap();

        let pool = pool(&mut paging, id);
        assert_eq!(pool.region_count(&mut paging).unwrap(), 0);
        assert!(paging.is_legitimate(id, BASE).unwrap());
        assert!(!paging.is_legitimate(id, VirtualAddress::new(0x5000_0000)).unwrap());
    }

    #[test]
    fn regions_are_allocated_back_to_back() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let mut pool = pool(&mut paging, id);

        let a = pool.allocate(&mut paging, 1).unwrap();
        let b = pool.allocate(&mut paging, FRAME_SIZE + 1).unwrap();
        let c = pool.allocate(&mut paging, FRAME_SIZE).unwrap();
        assert_eq!(a, BASE + FRAME_SIZE);
        assert_eq!(b, a + FRAME_SIZE);
        assert_eq!(c, b + 2 * FRAME_SIZE);

        let pages: [u32; 3] = core::array::from_fn(|i| pool.regions(&mut paging).unwrap()[i].pages());
        assert_eq!(pages, [1, 2, 1]);
    }

    #[test]
    fn allocation_rejects_empty_and_oversized_requests() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let mut pool = pool(&mut paging, id);

        assert_eq!(pool.allocate(&mut paging, 0), Err(VmPoolError::ZeroSize));
        assert_eq!(
            pool.allocate(&mut paging, SIZE),
            Err(VmPoolError::OutOfVirtualSpace { requested: SIZE })
        );
        let all = pool.allocate(&mut paging, SIZE - FRAME_SIZE).unwrap();
        assert_eq!(all, BASE + FRAME_SIZE);
        assert_eq!(
            pool.allocate(&mut paging, 1),
            Err(VmPoolError::OutOfVirtualSpace { requested: 1 })
        );
    }

    #[test]
    fn directory_capacity_is_bounded() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let process = paging.process_pool();
        let size = (MAX_REGIONS as u32 + 2) * FRAME_SIZE;
        let mut pool = VmPool::new(&mut paging, BASE, size, process, id).unwrap();

        for _ in 0..MAX_REGIONS {
            pool.allocate(&mut paging, FRAME_SIZE).unwrap();
        }
        assert_eq!(pool.allocate(&mut paging, 1), Err(VmPoolError::DirectoryFull));
    }

    #[test]
    fn release_compacts_and_returns_frames() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let mut pool = pool(&mut paging, id);

        let a = pool.allocate(&mut paging, FRAME_SIZE).unwrap();
        let b = pool.allocate(&mut paging, 3 * FRAME_SIZE).unwrap();
        let c = pool.allocate(&mut paging, FRAME_SIZE).unwrap();

        let before = process_free(&paging);
        paging.write_bytes(id, b, &[1; 3 * FRAME_SIZE as usize]).unwrap();
        assert_eq!(process_free(&paging), before - 3);

        let cr3_writes = paging.registers().cr3_writes();
        pool.release(&mut paging, b).unwrap();
        assert_eq!(process_free(&paging), before);
        assert_eq!(paging.registers().cr3_writes(), cr3_writes + 1);
        assert_eq!(paging.translate(id, b).unwrap(), None);

        let bases: [VirtualAddress; 2] =
            core::array::from_fn(|i| pool.regions(&mut paging).unwrap()[i].base());
        assert_eq!(bases, [a, c]);
        assert_eq!(pool.region_count(&mut paging).unwrap(), 2);

        let d = pool.allocate(&mut paging, 2 * FRAME_SIZE).unwrap();
        assert_eq!(d, c + FRAME_SIZE);
        let regions = pool.regions(&mut paging).unwrap().to_vec();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[2].base(), d);
        assert_eq!(regions[2].pages(), 2);
        assert_disjoint(&regions);
    }

    #[test]
    fn allocation_after_releasing_the_last_region_reuses_its_space() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let mut pool = pool(&mut paging, id);

        let a = pool.allocate(&mut paging, FRAME_SIZE).unwrap();
        let b = pool.allocate(&mut paging, 2 * FRAME_SIZE).unwrap();
        let c = pool.allocate(&mut paging, 3 * FRAME_SIZE).unwrap();
        paging.write_bytes(id, c, &[7; 8]).unwrap();

        pool.release(&mut paging, c).unwrap();
        let d = pool.allocate(&mut paging, FRAME_SIZE).unwrap();
        assert_eq!(d, b + 2 * FRAME_SIZE);
        let regions = pool.regions(&mut paging).unwrap().to_vec();
        assert_eq!(regions.iter().map(Region::base).collect::<Vec<_>>(), [a, b, d]);
        assert_disjoint(&regions);

        // `c` was unmapped on release
        assert_eq!(paging.translate(id, d).unwrap(), None);
    }

    #[test]
    fn shared_region_cannot_host_a_pool() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let process = paging.process_pool();
        let kernel = paging.kernel_pool();
        let kernel_free = paging.frames().pool(kernel).unwrap().n_free_frames();

        for base in [0x0020_0000, 0x003F_0000] {
            let base = VirtualAddress::new(base);
            assert_eq!(
                VmPool::new(&mut paging, base, SIZE, process, id).unwrap_err(),
                VmPoolError::InvalidRange { base, size: SIZE }
            );
        }

        let pools = paging.frames();
        let kernel_pool = pools.pool(kernel).unwrap();
        assert_eq!(kernel_pool.state(FrameNumber::new(512)), Some(FrameState::HeadOfSequence));
        assert_eq!(kernel_pool.n_free_frames(), kernel_free);
        let next = paging.frames_mut().get_frames(kernel, 1).unwrap();
        assert_ne!(next, FrameNumber::new(512));
    }

    #[test]
    fn failed_directory_fault_unregisters_the_range() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let process = paging.process_pool();
        let other = VirtualAddress::new(0x5000_0000);
        VmPool::new(&mut paging, other, SIZE, process, id).unwrap();

        let remaining = process_free(&paging);
        let drained = paging.frames_mut().get_frames(process, remaining).unwrap();
        assert!(matches!(
            VmPool::new(&mut paging, BASE, SIZE, process, id),
            Err(VmPoolError::Fault(FaultError::OutOfFrames(_)))
        ));
        assert!(!paging.is_legitimate(id, BASE).unwrap());
        assert!(paging.is_legitimate(id, other).unwrap());

        paging.frames_mut().release_frames(drained).unwrap();
        VmPool::new(&mut paging, BASE, SIZE, process, id).unwrap();
        assert!(paging.is_legitimate(id, BASE).unwrap());
    }

    #[test]
    fn release_requires_exact_start() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let mut pool = pool(&mut paging, id);
        let a = pool.allocate(&mut paging, 2 * FRAME_SIZE).unwrap();

        let inside = a + FRAME_SIZE;
        assert_eq!(
            pool.release(&mut paging, inside),
            Err(VmPoolError::NotARegionStart(inside))
        );
        pool.release(&mut paging, a).unwrap();
        assert_eq!(
            pool.release(&mut paging, a),
            Err(VmPoolError::NotARegionStart(a))
        );
    }

    #[test]
    fn legitimacy_includes_the_end() {
        let ram = ram();
        let (mut paging, id) = setup(&ram);
        let pool = pool(&mut paging, id);

        assert!(pool.is_legitimate(BASE));
        assert!(pool.is_legitimate(BASE + SIZE));
        assert!(!pool.is_legitimate(BASE + SIZE + 1));
        assert!(!pool.is_legitimate(VirtualAddress::new(BASE.as_u32() - 1)));
    }
}
