//! # Page Table (PT)
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a page table entry (PTE); a present PTE maps one 4 KiB page.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! After modifying active mappings, the caller must perform any required TLB
//! maintenance.

use crate::PageEntryBits;
use crate::page_table::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into a page table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A single page table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PtEntry(PageEntryBits);

/// A page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES_PER_TABLE as usize],
}

impl TableIndex {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self(((va.as_u32() >> 12) & 0x3FF) as u16)
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

impl PtEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// A not-present entry carrying `flags` (present bit forced clear).
    #[inline]
    #[must_use]
    pub const fn absent(mut flags: PageEntryBits) -> Self {
        flags.set_present(false);
        Self(flags)
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

    /// The mapped frame, if present.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    /// Entry mapping the 4 KiB page in `frame`.
    ///
    /// Forces `present=1` and `PAT=0`.
    #[inline]
    #[must_use]
    pub const fn make_page(frame: FrameNumber, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_frame(frame);
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

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES_PER_TABLE as usize],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Overwrite every entry with `e`.
    #[inline]
    pub fn fill(&mut self, e: PtEntry) {
        self.entries.fill(e);
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PtEntry> {
        self.entries.iter()
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_page_entry() {
        let e = PtEntry::make_page(FrameNumber::new(0x1000), PageEntryBits::user_rw());
        assert_eq!(e.raw(), 0x0100_0007);
        assert_eq!(e.frame(), Some(FrameNumber::new(0x1000)));
        assert!(e.flags().user_access());
    }

    #[test]
    fn absent_template_keeps_user_bit() {
        let e = PtEntry::absent(PageEntryBits::absent_user());
        assert_eq!(e.raw(), 4);
        assert_eq!(e.frame(), None);
    }

    #[test]
    fn fill_then_count() {
        let mut t = PageTable::zeroed();
        t.fill(PtEntry::absent(PageEntryBits::absent_user()));
        assert_eq!(t.present_count(), 0);
        t.set(
            TableIndex::new(7),
            PtEntry::make_page(FrameNumber::new(1), PageEntryBits::user_rw()),
        );
        assert_eq!(t.present_count(), 1);
        assert_eq!(t.get(TableIndex::new(6)).raw(), 4);
    }
}
