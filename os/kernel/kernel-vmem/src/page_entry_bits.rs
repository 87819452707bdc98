use bitfield_struct::bitfield;
use kernel_memory_addresses::{FRAME_SHIFT, FrameNumber, PhysicalAddress};

/// A single 32-bit x86 paging entry (non-PAE) in its raw bitfield form.
///
/// Page directory entries (PDEs) and page table entries (PTEs) share this
/// layout; the only difference is the meaning of bit 7 (`PS` in a PDE, `PAT`
/// in a PTE). Neither the directory nor the tables built here use 4 MiB pages,
/// so the bit is always clear.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P` (present)   | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page (PDE) / PAT index (PTE) |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS avail        | Reserved for OS use |
/// | 12–31  | `frame`         | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::FrameNumber;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::user_rw().with_frame(FrameNumber::new(0x400));
/// assert_eq!(e.into_bits(), 0x0040_0007);
/// ```
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear means any access through this entry raises a page fault with the
    /// error code's present bit clear.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow user-mode access; clear restricts to supervisor only.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS) in a PDE, PAT in a PTE (bit 7).
    pub large_page: bool,

    /// Global (G, bit 8). Ignored in PDEs.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_bits_31_12: u32,
}

impl PageEntryBits {
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameNumber {
        FrameNumber::new(self.frame_bits_31_12())
    }

    #[inline]
    pub const fn set_frame(&mut self, frame: FrameNumber) {
        self.set_frame_bits_31_12(frame.as_u32());
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(mut self, frame: FrameNumber) -> Self {
        self.set_frame(frame);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_bits_31_12() << FRAME_SHIFT)
    }

    /// Present, writable, supervisor only (`0b011`).
    #[inline]
    #[must_use]
    pub const fn supervisor_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable, user accessible (`0b111`).
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Not present, user accessible (`0b100`).
    ///
    /// Template for the entries of a freshly installed table.
    #[inline]
    #[must_use]
    pub const fn absent_user() -> Self {
        Self::new().with_user_access(true)
    }
}
