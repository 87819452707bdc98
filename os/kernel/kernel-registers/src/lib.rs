//! # Typed x86 Control Registers
//!
//! Bitfield models of the three control registers the memory manager touches:
//!
//! * [`Cr0`]: the paging-enable bit.
//! * [`Cr2`]: the faulting address latched on a page fault.
//! * [`Cr3`]: the physical base of the active page directory.
//!
//! Code that needs the registers goes through [`ControlRegisters`], so it can
//! run on bare metal ([`HardwareRegisters`], behind the `asm` feature on
//! 32-bit x86) or hosted against [`EmulatedControlRegisters`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cr0;
mod cr2;
mod cr3;
mod emulated;

pub use cr0::Cr0;
pub use cr2::Cr2;
pub use cr3::Cr3;
pub use emulated::EmulatedControlRegisters;

use kernel_memory_addresses::VirtualAddress;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, writing CR3 switches the address space under the running code.
    unsafe fn store_unsafe(self);
}

/// Access to the paging control registers of the current CPU.
pub trait ControlRegisters {
    fn cr0(&self) -> Cr0;

    fn set_cr0(&mut self, cr0: Cr0);

    fn cr2(&self) -> Cr2;

    fn cr3(&self) -> Cr3;

    /// Write CR3. Also flushes all non-global TLB entries.
    fn set_cr3(&mut self, cr3: Cr3);

    /// Whether CR0.PG is set.
    #[inline]
    fn paging_enabled(&self) -> bool {
        self.cr0().pg_paging()
    }

    /// The address latched in CR2 by the last page fault.
    #[inline]
    fn fault_address(&self) -> VirtualAddress {
        self.cr2().fault_address()
    }
}

/// The real control registers, accessed with `mov crN`.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[derive(Debug)]
pub struct HardwareRegisters {
    _private: (),
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl HardwareRegisters {
    /// # Safety
    /// Must only be constructed in ring 0. Whoever holds the value decides
    /// what CR0 and CR3 contain, so at most one should exist and any
    /// directory it installs must identity-map the running code.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl ControlRegisters for HardwareRegisters {
    fn cr0(&self) -> Cr0 {
        unsafe { Cr0::load_unsafe() }
    }

    fn set_cr0(&mut self, cr0: Cr0) {
        unsafe { cr0.store_unsafe() }
    }

    fn cr2(&self) -> Cr2 {
        unsafe { Cr2::load_unsafe() }
    }

    fn cr3(&self) -> Cr3 {
        unsafe { Cr3::load_unsafe() }
    }

    fn set_cr3(&mut self, cr3: Cr3) {
        unsafe { cr3.store_unsafe() }
    }
}
