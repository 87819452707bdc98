#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Architectural model of CR0 in 32-bit protected mode.
///
/// Only the bits the memory manager cares about are named; the rest are
/// carried through unchanged so a read-modify-write never clobbers them.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct Cr0 {
    /// Bit 0 — Protection Enable (PE).
    ///
    /// Must be set before paging can be enabled.
    pub pe_protection_enable: bool,

    /// Bits 1–15 — MP, EM, TS, ET, NE and reserved bits.
    #[bits(15)]
    pub fpu_and_reserved: u16,

    /// Bit 16 — Write Protect (WP).
    ///
    /// When set, supervisor code must respect read-only user pages.
    pub wp_write_protect: bool,

    /// Bits 17–28 — AM and reserved bits.
    #[bits(12)]
    pub other: u16,

    /// Bit 29 — Not-Write-Through (NW).
    pub nw_not_write_through: bool,

    /// Bit 30 — Cache Disable (CD).
    pub cd_cache_disable: bool,

    /// Bit 31 — Paging (PG).
    ///
    /// - 0: Paging disabled, linear addresses are physical.
    /// - 1: Paging enabled, translation through the directory in CR3.
    pub pg_paging: bool,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let mut cr0: u32;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_bit_is_bit_31() {
        let cr0 = Cr0::new().with_pg_paging(true);
        assert_eq!(cr0.into_bits(), 0x8000_0000);
    }

    #[test]
    fn unnamed_bits_survive_a_read_modify_write() {
        let mut cr0 = Cr0::from_bits(0x0000_0011);
        cr0.set_pg_paging(true);
        assert_eq!(cr0.into_bits(), 0x8000_0011);
        assert!(cr0.pe_protection_enable());
    }
}
