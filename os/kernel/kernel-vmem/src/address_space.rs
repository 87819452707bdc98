//! # Address Space (32-bit x86, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space: one [`PageDirectory`] and the [`PageTable`]s it points to.
//!
//! ## Highlights
//!
//! - [`AddressSpace::create`] builds a fresh directory whose first entry
//!   identity-maps the low 4 MiB for the kernel.
//! - [`AddressSpace::install_table`] links a new second-level table.
//! - [`AddressSpace::map_page`] / [`AddressSpace::unmap_page`] edit one PTE.
//! - [`AddressSpace::translate`] walks a VA to its PA.
//!
//! ## Design
//!
//! The walker never allocates: table and page frames are handed in by the
//! caller, who owns the frame pools. `unsafe` is confined to turning a table
//! frame into a typed reference through the [`PhysMapper`].
//!
//! ## Safety
//!
//! Mutating active mappings requires TLB maintenance (a CR3 reload); the
//! walker leaves that to its caller.

use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use crate::page_table::{ENTRIES_PER_TABLE, split_indices};
use crate::{PageEntryBits, PhysMapper, VmemError};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    directory: FrameNumber,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View an existing address space rooted at `directory`.
    #[inline]
    pub const fn from_directory(mapper: &'m M, directory: FrameNumber) -> Self {
        Self { directory, mapper }
    }

    /// Initialize a new address space in two caller-provided frames.
    ///
    /// `identity_table` gets 1024 supervisor read/write entries mapping page
    /// `n` to frame `n`; it becomes directory entry 0. Every other directory
    /// entry is cleared.
    pub fn create(mapper: &'m M, directory: FrameNumber, identity_table: FrameNumber) -> Self {
        debug_assert_ne!(directory, identity_table);
        let space = Self::from_directory(mapper, directory);

        // SAFETY: Both frames were just handed to us and nothing else refers to them.
        let table = unsafe { space.table_mut(identity_table) };
        for i in 0..ENTRIES_PER_TABLE {
            let frame = FrameNumber::new(u32::from(i));
            table.set(
                TableIndex::new(i),
                PtEntry::make_page(frame, PageEntryBits::supervisor_rw()),
            );
        }

        let pd = unsafe { space.directory_mut() };
        pd.zero();
        pd.set(
            DirectoryIndex::new(0),
            PdEntry::make_table(identity_table, PageEntryBits::supervisor_rw()),
        );

        log::trace!("address space at {directory:?}: identity table {identity_table:?}");
        space
    }

    /// Frame of the page directory.
    #[inline]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.directory
    }

    /// Physical address of the page directory, as loaded into CR3.
    #[inline]
    pub const fn directory_phys(&self) -> PhysicalAddress {
        self.directory.base()
    }

    /// # Safety
    /// No other reference to the directory frame may be live while the
    /// returned one is used.
    #[inline]
    unsafe fn directory_mut(&self) -> &'m mut PageDirectory {
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.directory.base()) }
    }

    /// # Safety
    /// `frame` must hold a page table (or be about to be initialized as one)
    /// and no other reference to it may be live.
    #[inline]
    unsafe fn table_mut(&self, frame: FrameNumber) -> &'m mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// The directory entry at `index`.
    #[must_use]
    pub fn directory_entry(&self, index: DirectoryIndex) -> PdEntry {
        // SAFETY: Short-lived access; the reference does not escape.
        unsafe { self.directory_mut() }.get(index)
    }

    /// Frame of the page table covering `va`, if one is installed.
    #[must_use]
    pub fn table_frame(&self, va: VirtualAddress) -> Option<FrameNumber> {
        self.directory_entry(DirectoryIndex::from(va)).table()
    }

    /// The page table entry for `va`, or `None` if no table covers it.
    #[must_use]
    pub fn table_entry(&self, va: VirtualAddress) -> Option<PtEntry> {
        let table = self.table_frame(va)?;
        // SAFETY: Present directory entries always point at page tables.
        Some(unsafe { self.table_mut(table) }.get(TableIndex::from(va)))
    }

    /// Number of present entries in the table covering `va`.
    #[must_use]
    pub fn present_in_table(&self, va: VirtualAddress) -> usize {
        self.table_frame(va)
            .map_or(0, |table| unsafe { self.table_mut(table) }.present_count())
    }

    /// Link the page table in `table` into the directory slot covering `va`.
    ///
    /// All 1024 entries of the new table are set to `template` (not present).
    /// The directory entry becomes present and writable.
    ///
    /// # Errors
    /// [`VmemError::TablePresent`] if the slot already points at a table.
    pub fn install_table(
        &self,
        va: VirtualAddress,
        table: FrameNumber,
        template: PageEntryBits,
    ) -> Result<(), VmemError> {
        let index = DirectoryIndex::from(va);
        if self.directory_entry(index).is_present() {
            return Err(VmemError::TablePresent(va));
        }

        // SAFETY: The frame was handed to us for this table.
        unsafe { self.table_mut(table) }.fill(PtEntry::absent(template));
        unsafe { self.directory_mut() }.set(
            index,
            PdEntry::make_table(table, PageEntryBits::supervisor_rw()),
        );

        log::trace!("installed table {table:?} at directory index {}", index.as_usize());
        Ok(())
    }

    /// Map the page containing `va` to `frame`.
    ///
    /// # Errors
    /// - [`VmemError::MissingTable`] if no table covers `va`.
    /// - [`VmemError::AlreadyMapped`] if the page is already present.
    pub fn map_page(
        &self,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageEntryBits,
    ) -> Result<(), VmemError> {
        let table = self.table_frame(va).ok_or(VmemError::MissingTable(va))?;
        // SAFETY: Present directory entries always point at page tables.
        let pt = unsafe { self.table_mut(table) };
        let index = TableIndex::from(va);
        if pt.get(index).is_present() {
            return Err(VmemError::AlreadyMapped(va));
        }
        pt.set(index, PtEntry::make_page(frame, flags));
        Ok(())
    }

    /// Clear the entry for the page containing `va`.
    ///
    /// Returns the frame that was mapped, or `None` if the page was not
    /// present. The user bit survives, so a user slot goes back to the
    /// not-present template it had before the page was faulted in.
    pub fn unmap_page(&self, va: VirtualAddress) -> Option<FrameNumber> {
        let table = self.table_frame(va)?;
        // SAFETY: Present directory entries always point at page tables.
        let pt = unsafe { self.table_mut(table) };
        let index = TableIndex::from(va);
        let entry = pt.get(index);
        let frame = entry.frame()?;
        let template = PageEntryBits::new().with_user_access(entry.flags().user_access());
        pt.set(index, PtEntry::absent(template));
        Some(frame)
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (_, ti) = split_indices(va);
        let table = self.table_frame(va)?;
        // SAFETY: Present directory entries always point at page tables.
        let frame = unsafe { self.table_mut(table) }.get(ti).frame()?;
        Some(frame.base() + va.offset())
    }
}
