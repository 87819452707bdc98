//! # Page Directory (PD)
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a directory entry (PDE). 4 MiB pages are not used, so a
//!   present PDE always points to a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.

use crate::PageEntryBits;
use crate::page_table::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into the page directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single page directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE as usize],
}

impl DirectoryIndex {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 22) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PdEntry {
    /// Not present, all other bits clear.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// Frame of the page table this entry points to, if present.
    #[inline]
    #[must_use]
    pub const fn table(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    /// Entry pointing at the page table in `table`.
    ///
    /// Forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_table(table: FrameNumber, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_frame(table);
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE as usize],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must reload CR3 when changing an entry of the active directory.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Mark every entry not present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PdEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_entry_points_at_frame() {
        let e = PdEntry::make_table(FrameNumber::new(513), PageEntryBits::supervisor_rw());
        assert_eq!(e.raw(), 0x0020_1003);
        assert_eq!(e.table(), Some(FrameNumber::new(513)));
    }

    #[test]
    fn absent_entry_has_no_table() {
        assert_eq!(PdEntry::from_raw(0x0020_1002).table(), None);
        assert_eq!(PdEntry::zero().raw(), 0);
    }
}
