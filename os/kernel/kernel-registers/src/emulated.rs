use crate::{ControlRegisters, Cr0, Cr2, Cr3};
use kernel_memory_addresses::VirtualAddress;

/// Control registers held in memory.
///
/// Lets paging code run hosted. Counts CR3 writes so callers can observe
/// when a TLB flush would have happened.
#[derive(Debug, Default, Clone)]
pub struct EmulatedControlRegisters {
    cr0: Cr0,
    cr2: Cr2,
    cr3: Cr3,
    cr3_writes: usize,
}

impl EmulatedControlRegisters {
    /// Registers as they look after entering protected mode: PE set, paging off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cr0: Cr0::new().with_pe_protection_enable(true),
            ..Self::default()
        }
    }

    /// Latch `address` into CR2, as the CPU does when raising `#PF`.
    pub fn raise_fault_at(&mut self, address: VirtualAddress) {
        self.cr2 = Cr2::new(address);
    }

    /// How many times CR3 has been written.
    #[must_use]
    pub const fn cr3_writes(&self) -> usize {
        self.cr3_writes
    }
}

impl ControlRegisters for EmulatedControlRegisters {
    fn cr0(&self) -> Cr0 {
        self.cr0
    }

    fn set_cr0(&mut self, cr0: Cr0) {
        log::trace!("cr0 <- {:#010x}", cr0.into_bits());
        self.cr0 = cr0;
    }

    fn cr2(&self) -> Cr2 {
        self.cr2
    }

    fn cr3(&self) -> Cr3 {
        self.cr3
    }

    fn set_cr3(&mut self, cr3: Cr3) {
        log::trace!("cr3 <- {}", cr3.directory_phys());
        self.cr3 = cr3;
        self.cr3_writes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::FrameNumber;

    #[test]
    fn starts_with_paging_disabled() {
        let regs = EmulatedControlRegisters::new();
        assert!(!regs.paging_enabled());
        assert!(regs.cr0().pe_protection_enable());
    }

    #[test]
    fn cr3_writes_are_counted() {
        let mut regs = EmulatedControlRegisters::new();
        regs.set_cr3(Cr3::from_directory_frame(FrameNumber::new(600)));
        regs.set_cr3(regs.cr3());
        assert_eq!(regs.cr3_writes(), 2);
        assert_eq!(regs.cr3().directory_frame(), FrameNumber::new(600));
    }

    #[test]
    fn fault_address_reads_back() {
        let mut regs = EmulatedControlRegisters::new();
        regs.raise_fault_at(VirtualAddress::new(0x0140_0000));
        assert_eq!(regs.fault_address(), VirtualAddress::new(0x0140_0000));
    }
}
