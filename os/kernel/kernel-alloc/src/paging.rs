//! # Demand Paging
//!
//! [`Paging`] owns the frame pools, the control registers and every page
//! table the kernel created. A page table starts out with the first 4 MiB
//! identity mapped and nothing else; user pages appear one at a time as the
//! CPU faults on them.
//!
//! ```text
//!  #PF ──► handle_fault
//!            │ present bit set?          ──► ProtectionViolation
//!            │ outside every VM range?   ──► IllegitimateAddress
//!            │ no page table?            ──► kernel frame → new table (all absent, user)
//!            │ page already present?     ──► Spurious
//!            └─ process frame → PTE (present | writable | user)
//! ```
//!
//! Page tables are addressed through their physical frames, so every frame
//! the kernel pool hands out must be reachable through the [`PhysMapper`].

use crate::frame_pool::FramePoolError;
use crate::frame_pools::{FramePools, PoolId};
use crate::frame_state::FrameState;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_registers::{ControlRegisters, Cr3};
use kernel_vmem::page_table::ENTRIES_PER_TABLE;
use kernel_vmem::{AddressSpace, PageEntryBits, PageFault, PageFaultError, PhysMapper, VmemError};

/// Upper bound on page tables alive at the same time.
pub const MAX_PAGE_TABLES: usize = 16;

/// Upper bound on VM ranges registered with a single page table.
pub const MAX_VM_RANGES_PER_TABLE: usize = 8;

/// Handle to a page table created by [`Paging::create_page_table`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageTableId(u8);

impl PageTableId {
    #[inline]
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl core::fmt::Display for PageTableId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "page table #{}", self.0)
    }
}

/// A virtual range whose faults a page table may serve.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VmRange {
    base: VirtualAddress,
    size: u32,
}

impl VmRange {
    #[inline]
    #[must_use]
    pub const fn new(base: VirtualAddress, size: u32) -> Self {
        Self { base, size }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Whether `base <= va <= base + size`. The upper end is inclusive.
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        let va = u64::from(va.as_u32());
        let base = u64::from(self.base.as_u32());
        va >= base && va <= base + u64::from(self.size)
    }
}

/// Outcome of a successfully handled page fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultResolution {
    /// `page` now backs the faulting address. `table` is set when a page
    /// table had to be installed first.
    Mapped {
        page: FrameNumber,
        table: Option<FrameNumber>,
    },
    /// The page was already present; nothing changed.
    Spurious,
}

/// Errors from page table bookkeeping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error(transparent)]
    Frames(#[from] FramePoolError),
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error("{0} is not registered")]
    UnknownPool(PoolId),
    #[error("{0} does not exist")]
    UnknownTable(PageTableId),
    #[error("cannot create more than {MAX_PAGE_TABLES} page tables")]
    TableLimit,
    #[error("cannot register more than {MAX_VM_RANGES_PER_TABLE} VM ranges with {0}")]
    VmRangeLimit(PageTableId),
    #[error("no page table is loaded")]
    NoTableLoaded,
    #[error("{0} lies in the shared kernel region")]
    SharedRegion(VirtualAddress),
}

/// Errors from serving a page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("protection violation at {address}: {}", .error.explain())]
    ProtectionViolation {
        address: VirtualAddress,
        error: PageFaultError,
    },
    #[error("{0} does not belong to any VM pool")]
    IllegitimateAddress(VirtualAddress),
    #[error("out of frames: {0}")]
    OutOfFrames(#[from] FramePoolError),
    #[error("page at {0} is still not mapped")]
    Unmapped(VirtualAddress),
    #[error("access of {len} bytes at {address} does not fit")]
    InvalidAccess { address: VirtualAddress, len: usize },
    #[error(transparent)]
    Paging(#[from] PagingError),
}

#[derive(Copy, Clone, Debug)]
struct PageTableRecord {
    directory: FrameNumber,
    identity_table: FrameNumber,
    vm_ranges: [Option<VmRange>; MAX_VM_RANGES_PER_TABLE],
}

impl PageTableRecord {
    const fn new(directory: FrameNumber, identity_table: FrameNumber) -> Self {
        Self {
            directory,
            identity_table,
            vm_ranges: [None; MAX_VM_RANGES_PER_TABLE],
        }
    }

    fn ranges(&self) -> impl Iterator<Item = &VmRange> {
        self.vm_ranges.iter().flatten()
    }

    /// With no ranges registered every address is accepted.
    fn is_legitimate(&self, va: VirtualAddress) -> bool {
        let mut ranges = self.ranges().peekable();
        ranges.peek().is_none() || ranges.any(|r| r.contains(va))
    }
}

/// The kernel's paging state.
pub struct Paging<'m, M: PhysMapper, R: ControlRegisters> {
    mapper: &'m M,
    registers: R,
    frames: FramePools<'m>,
    kernel_pool: PoolId,
    process_pool: PoolId,
    shared_size: u32,
    tables: [Option<PageTableRecord>; MAX_PAGE_TABLES],
    current: Option<PageTableId>,
    paging_enabled: bool,
}

/// Record the pools and the shared size every later page table uses.
///
/// Kernel frames back page directories and page tables; process frames back
/// faulted-in pages. `shared_size` is the kernel-owned prefix of each
/// address space; VM ranges and page frees below it, or below the identity
/// mapped 4 MiB if that is larger, are refused.
///
/// # Errors
/// [`PagingError::UnknownPool`] if either pool is not registered in `frames`.
pub fn init_paging<'m, M: PhysMapper, R: ControlRegisters>(
    mapper: &'m M,
    registers: R,
    frames: FramePools<'m>,
    kernel_pool: PoolId,
    process_pool: PoolId,
    shared_size: u32,
) -> Result<Paging<'m, M, R>, PagingError> {
    for id in [kernel_pool, process_pool] {
        if frames.pool(id).is_none() {
            log::error!("cannot initialize paging: {id} is not registered");
            return Err(PagingError::UnknownPool(id));
        }
    }

    log::info!(
        "paging initialized: kernel frames from {kernel_pool}, process frames from {process_pool}, shared {} KiB",
        shared_size / 1024
    );
    Ok(Paging {
        mapper,
        registers,
        frames,
        kernel_pool,
        process_pool,
        shared_size,
        tables: [None; MAX_PAGE_TABLES],
        current: None,
        paging_enabled: false,
    })
}

impl<'m, M: PhysMapper, R: ControlRegisters> Paging<'m, M, R> {
    #[inline]
    #[must_use]
    pub const fn kernel_pool(&self) -> PoolId {
        self.kernel_pool
    }

    #[inline]
    #[must_use]
    pub const fn process_pool(&self) -> PoolId {
        self.process_pool
    }

    #[inline]
    #[must_use]
    pub const fn shared_size(&self) -> u32 {
        self.shared_size
    }

    /// First address past the prefix every address space shares with the
    /// kernel: `shared_size`, but never less than the identity-mapped table.
    #[must_use]
    pub fn shared_end(&self) -> u32 {
        self.shared_size.max(u32::from(ENTRIES_PER_TABLE) * FRAME_SIZE)
    }

    /// Whether `va` lies in the shared prefix.
    #[must_use]
    pub fn is_shared(&self, va: VirtualAddress) -> bool {
        va.as_u32() < self.shared_end()
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FramePools<'m> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FramePools<'m> {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn registers(&self) -> &R {
        &self.registers
    }

    #[inline]
    pub const fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// The table last passed to [`load`](Self::load).
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<PageTableId> {
        self.current
    }

    #[inline]
    #[must_use]
    pub const fn is_paging_enabled(&self) -> bool {
        self.paging_enabled
    }

    fn record(&self, id: PageTableId) -> Result<&PageTableRecord, PagingError> {
        self.tables
            .get(id.as_usize())
            .and_then(Option::as_ref)
            .ok_or(PagingError::UnknownTable(id))
    }

    fn record_mut(&mut self, id: PageTableId) -> Result<&mut PageTableRecord, PagingError> {
        self.tables
            .get_mut(id.as_usize())
            .and_then(Option::as_mut)
            .ok_or(PagingError::UnknownTable(id))
    }

    /// A walker over the directory of table `id`.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn address_space(&self, id: PageTableId) -> Result<AddressSpace<'m, M>, PagingError> {
        let directory = self.record(id)?.directory;
        Ok(AddressSpace::from_directory(self.mapper, directory))
    }

    /// Frame holding the page directory of table `id`.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn directory_frame(&self, id: PageTableId) -> Result<FrameNumber, PagingError> {
        Ok(self.record(id)?.directory)
    }

    /// Frame holding the identity-mapping page table of table `id`.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn identity_table_frame(&self, id: PageTableId) -> Result<FrameNumber, PagingError> {
        Ok(self.record(id)?.identity_table)
    }

    /// Build a new page table from two kernel frames: a directory and a
    /// table identity mapping the first 4 MiB.
    ///
    /// # Errors
    /// - [`PagingError::TableLimit`] if [`MAX_PAGE_TABLES`] tables exist.
    /// - [`PagingError::Frames`] if the kernel pool cannot supply two frames.
    ///   No frames stay allocated in that case.
    #[allow(clippy::cast_possible_truncation)]
    pub fn create_page_table(&mut self) -> Result<PageTableId, PagingError> {
        let Some(slot) = self.tables.iter().position(Option::is_none) else {
            log::error!("cannot create page table: limit of {MAX_PAGE_TABLES} reached");
            return Err(PagingError::TableLimit);
        };

        let directory = self.frames.get_frames(self.kernel_pool, 1)?;
        let identity_table = match self.frames.get_frames(self.kernel_pool, 1) {
            Ok(frame) => frame,
            Err(e) => {
                self.release_quietly(directory);
                log::error!("cannot create page table: {e}");
                return Err(e.into());
            }
        };

        AddressSpace::create(self.mapper, directory, identity_table);
        self.tables[slot] = Some(PageTableRecord::new(directory, identity_table));

        let id = PageTableId(slot as u8);
        log::info!("created {id}: directory at frame {directory}, identity table at frame {identity_table}");
        Ok(id)
    }

    fn release_quietly(&mut self, frame: FrameNumber) {
        if let Err(e) = self.frames.release_frames(frame) {
            log::error!("failed to return frame {frame}: {e}");
        }
    }

    /// Make table `id` the current address space by writing its directory
    /// into CR3.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn load(&mut self, id: PageTableId) -> Result<(), PagingError> {
        let directory = self.record(id)?.directory;
        self.registers.set_cr3(Cr3::from_directory_frame(directory));
        self.current = Some(id);
        log::debug!("loaded {id}");
        Ok(())
    }

    /// Rewrite CR3 if `id` is the current table, discarding stale
    /// translations.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn flush_tlb(&mut self, id: PageTableId) -> Result<(), PagingError> {
        let directory = self.record(id)?.directory;
        if self.current == Some(id) {
            self.registers.set_cr3(Cr3::from_directory_frame(directory));
        }
        Ok(())
    }

    /// Turn paging on by setting CR0.PG. Calling it again is a no-op.
    ///
    /// # Errors
    /// [`PagingError::NoTableLoaded`] if no table was loaded first.
    pub fn enable_paging(&mut self) -> Result<(), PagingError> {
        if self.current.is_none() {
            log::error!("refusing to enable paging without a loaded page table");
            return Err(PagingError::NoTableLoaded);
        }
        if self.paging_enabled {
            log::debug!("paging already enabled");
            return Ok(());
        }

        let cr0 = self.registers.cr0().with_pg_paging(true);
        self.registers.set_cr0(cr0);
        self.paging_enabled = true;
        log::info!("paging enabled");
        Ok(())
    }

    /// Register `range` as a region table `id` serves faults for.
    ///
    /// Once any range is registered, faults outside every range are rejected.
    ///
    /// # Errors
    /// - [`PagingError::UnknownTable`].
    /// - [`PagingError::SharedRegion`] if the range starts in the shared prefix.
    /// - [`PagingError::VmRangeLimit`] if the table has no free range slot.
    pub fn register_pool(&mut self, id: PageTableId, range: VmRange) -> Result<(), PagingError> {
        if self.is_shared(range.base()) {
            log::error!(
                "cannot register VM range at {}: shared region ends at {:#010x}",
                range.base(),
                self.shared_end()
            );
            return Err(PagingError::SharedRegion(range.base()));
        }
        let record = self.record_mut(id)?;
        let Some(slot) = record.vm_ranges.iter_mut().find(|r| r.is_none()) else {
            log::error!("cannot register VM range at {} with {id}", range.base());
            return Err(PagingError::VmRangeLimit(id));
        };
        *slot = Some(range);
        log::debug!("{id} serves {} bytes at {}", range.size(), range.base());
        Ok(())
    }

    /// Forget a range previously passed to [`register_pool`](Self::register_pool).
    ///
    /// Returns whether the range was registered.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn unregister_pool(&mut self, id: PageTableId, range: VmRange) -> Result<bool, PagingError> {
        let record = self.record_mut(id)?;
        let Some(slot) = record.vm_ranges.iter_mut().find(|r| **r == Some(range)) else {
            return Ok(false);
        };
        *slot = None;
        log::debug!("{id} no longer serves {}", range.base());
        Ok(true)
    }

    /// Whether a fault at `va` in table `id` may be served.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn is_legitimate(&self, id: PageTableId, va: VirtualAddress) -> Result<bool, PagingError> {
        Ok(self.record(id)?.is_legitimate(va))
    }

    /// Serve a page fault in the current address space.
    ///
    /// # Errors
    /// [`FaultError::Paging`] with [`PagingError::NoTableLoaded`] if nothing
    /// is loaded; otherwise as [`handle_fault_in`](Self::handle_fault_in).
    pub fn handle_fault(&mut self, fault: PageFault) -> Result<FaultResolution, FaultError> {
        let id = self.current.ok_or(PagingError::NoTableLoaded)?;
        self.handle_fault_in(id, fault)
    }

    /// Serve a page fault against table `id`.
    ///
    /// # Errors
    /// - [`FaultError::ProtectionViolation`] if the error code reports a
    ///   present page.
    /// - [`FaultError::IllegitimateAddress`] if VM ranges are registered and
    ///   none contains the address.
    /// - [`FaultError::OutOfFrames`] if a pool is exhausted.
    pub fn handle_fault_in(
        &mut self,
        id: PageTableId,
        fault: PageFault,
    ) -> Result<FaultResolution, FaultError> {
        let address = fault.address;
        if fault.is_protection_violation() {
            log::error!("page fault at {address}: {}", fault.error.explain());
            return Err(FaultError::ProtectionViolation {
                address,
                error: fault.error,
            });
        }

        let record = self.record(id)?;
        if !record.is_legitimate(address) {
            log::error!("page fault at {address}: not part of any VM pool of {id}");
            return Err(FaultError::IllegitimateAddress(address));
        }
        let space = AddressSpace::from_directory(self.mapper, record.directory);

        let mut table = None;
        match space.table_entry(address) {
            None => {
                let frame = self.frames.get_frames(self.kernel_pool, 1).inspect_err(|e| {
                    log::error!("no kernel frame for the page table of {address}: {e}");
                })?;
                space
                    .install_table(address, frame, PageEntryBits::absent_user())
                    .map_err(PagingError::from)?;
                table = Some(frame);
            }
            Some(entry) if entry.is_present() => {
                log::debug!("spurious page fault at {address}");
                return Ok(FaultResolution::Spurious);
            }
            Some(_) => {}
        }

        let page = self.frames.get_frames(self.process_pool, 1).inspect_err(|e| {
            log::error!("no process frame for {address}: {e}");
        })?;
        space
            .map_page(address, page, PageEntryBits::user_rw())
            .map_err(PagingError::from)?;

        log::debug!("page fault at {address}: mapped frame {page}");
        Ok(FaultResolution::Mapped { page, table })
    }

    /// Unmap the page containing `va` from table `id` and return its frame
    /// to whichever pool owns it.
    ///
    /// Returns the released frame, or `None` if the page was not present.
    /// The TLB is not flushed; see [`flush_tlb`](Self::flush_tlb).
    ///
    /// # Errors
    /// - [`PagingError::UnknownTable`].
    /// - [`PagingError::SharedRegion`] if `va` lies in the shared prefix.
    /// - [`PagingError::Frames`] if no pool would take the frame back; the
    ///   mapping is left in place.
    pub fn free_page(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
    ) -> Result<Option<FrameNumber>, PagingError> {
        if self.is_shared(va) {
            log::error!("refusing to free {va}: page belongs to the shared region");
            return Err(PagingError::SharedRegion(va));
        }
        let space = self.address_space(id)?;
        let Some(frame) = space.table_entry(va).and_then(|entry| entry.frame()) else {
            return Ok(None);
        };

        let Some(owner) = self.frames.owner_of(frame) else {
            log::error!("cannot free {va}: frame {frame} is not in any pool");
            return Err(FramePoolError::FrameNotFound(frame).into());
        };
        let state = self.frames.pool(owner).and_then(|pool| pool.state(frame));
        if state != Some(FrameState::HeadOfSequence) {
            log::error!("cannot free {va}: frame {frame} does not start a run in {owner}");
            return Err(FramePoolError::NotHeadOfSequence(frame).into());
        }

        space.unmap_page(va);
        self.frames.release_frames(frame)?;
        log::trace!("freed page {} (frame {frame})", va.page_base());
        Ok(Some(frame))
    }

    /// Physical address `va` maps to in table `id`, if the page is present.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn translate(
        &self,
        id: PageTableId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, PagingError> {
        Ok(self.address_space(id)?.translate(va))
    }

    /// Resolve `va` in table `id`, faulting the page in the way the CPU
    /// would if it is missing.
    ///
    /// # Errors
    /// Whatever [`handle_fault_in`](Self::handle_fault_in) reports.
    pub fn access(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
        write: bool,
    ) -> Result<PhysicalAddress, FaultError> {
        if let Some(pa) = self.translate(id, va)? {
            return Ok(pa);
        }
        let fault = PageFault::new(va, PageFaultError::not_present(write, false));
        self.handle_fault_in(id, fault)?;
        self.translate(id, va)?.ok_or(FaultError::Unmapped(va))
    }

    /// A reference to a `T` stored at `va` in table `id`, faulting the page
    /// in if needed.
    ///
    /// # Errors
    /// - [`FaultError::InvalidAccess`] if the `T` would straddle a page.
    /// - Whatever [`access`](Self::access) reports.
    ///
    /// # Safety
    /// Every bit pattern must be a valid `T`, `va` must be aligned for `T`,
    /// and the bytes must not be reachable through another live reference.
    pub unsafe fn access_mut<T>(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
    ) -> Result<&mut T, FaultError> {
        let len = size_of::<T>();
        if va.offset() as usize + len > FRAME_SIZE as usize {
            return Err(FaultError::InvalidAccess { address: va, len });
        }
        let pa = self.access(id, va, true)?;
        // SAFETY: The page is mapped and the caller vouches for `T`.
        Ok(unsafe { self.mapper.phys_to_mut::<T>(pa) })
    }

    /// Copy `data` to `va` in table `id`, faulting pages in as needed.
    ///
    /// # Errors
    /// - [`FaultError::InvalidAccess`] if the range wraps the address space.
    /// - Whatever [`access`](Self::access) reports.
    pub fn write_bytes(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
        data: &[u8],
    ) -> Result<(), FaultError> {
        self.for_each_chunk(id, va, data.len(), true, |pa, range, mapper| {
            // SAFETY: `pa` is mapped and the chunk stays inside its page.
            let dst = unsafe { mapper.phys_bytes_mut(pa, range.len()) };
            dst.copy_from_slice(&data[range]);
        })
    }

    /// Copy bytes at `va` in table `id` into `buf`, faulting pages in as
    /// needed.
    ///
    /// # Errors
    /// As [`write_bytes`](Self::write_bytes).
    pub fn read_bytes(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), FaultError> {
        self.for_each_chunk(id, va, buf.len(), false, |pa, range, mapper| {
            // SAFETY: `pa` is mapped and the chunk stays inside its page.
            let src = unsafe { mapper.phys_bytes_mut(pa, range.len()) };
            buf[range].copy_from_slice(src);
        })
    }

    /// Split `len` bytes at `va` along page boundaries and hand each chunk's
    /// physical address and buffer range to `f`.
    fn for_each_chunk(
        &mut self,
        id: PageTableId,
        va: VirtualAddress,
        len: usize,
        write: bool,
        mut f: impl FnMut(PhysicalAddress, core::ops::Range<usize>, &'m M),
    ) -> Result<(), FaultError> {
        let invalid = FaultError::InvalidAccess { address: va, len };
        let mut done = 0;
        while done < len {
            let at = u32::try_from(done)
                .ok()
                .and_then(|d| va.checked_add(d))
                .ok_or(invalid)?;
            let chunk = (len - done).min((FRAME_SIZE - at.offset()) as usize);
            let pa = self.access(id, at, write)?;
            f(pa, done..done + chunk, self.mapper);
            done += chunk;
        }
        Ok(())
    }
}

impl<M: PhysMapper, R: ControlRegisters> core::fmt::Debug for Paging<'_, M, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Paging")
            .field("frames", &self.frames)
            .field("kernel_pool", &self.kernel_pool)
            .field("process_pool", &self.process_pool)
            .field("current", &self.current)
            .field("paging_enabled", &self.paging_enabled)
            .finish_non_exhaustive()
    }
}
