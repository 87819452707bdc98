use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::ControlRegisters;

/// Page-fault error code layout (32-bit x86).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read access.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    /// Error code for an access to a page that is not mapped.
    #[must_use]
    pub const fn not_present(write: bool, user: bool) -> Self {
        Self::new().with_write(write).with_user(user)
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped yet)"
        } else if self.instruction_fetch() {
            "Instruction fetch on protected page"
        } else if self.write() {
            if self.user() {
                "User-mode write to protected page"
            } else {
                "Kernel write to protected page"
            }
        } else if self.user() {
            "User-mode read of supervisor page"
        } else {
            "Read access to protected page"
        }
    }
}

/// A page fault as delivered to the paging layer: the address latched in CR2
/// and the error code pushed by the CPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageFault {
    pub address: VirtualAddress,
    pub error: PageFaultError,
}

impl PageFault {
    #[must_use]
    pub const fn new(address: VirtualAddress, error: PageFaultError) -> Self {
        Self { address, error }
    }

    /// Build the fault record from CR2 and the error code the trap stub saw.
    #[must_use]
    pub fn from_registers<R: ControlRegisters + ?Sized>(
        registers: &R,
        error: PageFaultError,
    ) -> Self {
        Self::new(registers.fault_address(), error)
    }

    /// Whether the page was present and the access was disallowed.
    #[must_use]
    pub const fn is_protection_violation(&self) -> bool {
        self.error.present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_registers::EmulatedControlRegisters;

    #[test]
    fn error_code_bits() {
        let e = PageFaultError::from_bits(0b111);
        assert!(e.present());
        assert!(e.write());
        assert!(e.user());
        assert_eq!(e.explain(), "User-mode write to protected page");
        assert_eq!(PageFaultError::not_present(true, false).into_bits(), 0b010);
    }

    #[test]
    fn fault_reads_cr2() {
        let mut regs = EmulatedControlRegisters::new();
        regs.raise_fault_at(VirtualAddress::new(0x0140_0010));
        let fault = PageFault::from_registers(&regs, PageFaultError::not_present(false, true));
        assert_eq!(fault.address, VirtualAddress::new(0x0140_0010));
        assert!(!fault.is_protection_violation());
        assert_eq!(fault.error.explain(), "Non-present page (page not mapped yet)");
    }
}
