#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::LoadRegisterUnsafe;
use kernel_memory_addresses::VirtualAddress;

/// CR2 — Page-Fault Linear Address.
///
/// Loaded by the CPU with the faulting virtual address whenever a page fault
/// (`#PF`, vector 14) is raised. Read-only from the kernel's point of view.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Cr2(VirtualAddress);

impl Cr2 {
    #[inline]
    #[must_use]
    pub const fn new(address: VirtualAddress) -> Self {
        Self(address)
    }

    /// The virtual address whose access faulted.
    #[inline]
    #[must_use]
    pub const fn fault_address(self) -> VirtualAddress {
        self.0
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr2 {
    unsafe fn load_unsafe() -> Self {
        let mut cr2: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self(VirtualAddress::new(cr2))
    }
}
