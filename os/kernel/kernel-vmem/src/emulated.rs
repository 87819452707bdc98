//! # Emulated Physical Memory
//!
//! A heap-backed stand-in for RAM so that frame pools and page tables can be
//! built and walked without a CPU in ring 0. Physical address `pa` is simply
//! byte `pa` of the buffer.

use crate::PhysMapper;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Frame([u8; FRAME_SIZE as usize]);

/// Zero-initialized RAM starting at physical address 0.
pub struct EmulatedPhysMemory {
    frames: Box<[UnsafeCell<Frame>]>,
}

impl EmulatedPhysMemory {
    /// RAM spanning frames `0..n_frames`.
    #[must_use]
    pub fn with_frames(n_frames: u32) -> Self {
        let frames: Vec<UnsafeCell<Frame>> = (0..n_frames)
            .map(|_| UnsafeCell::new(Frame([0; FRAME_SIZE as usize])))
            .collect();
        Self {
            frames: frames.into_boxed_slice(),
        }
    }

    /// Number of frames backed by this memory.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Whether `frame` lies inside the emulated memory.
    #[must_use]
    pub fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() < self.frame_count()
    }

    fn size_bytes(&self) -> usize {
        self.frames.len() * FRAME_SIZE as usize
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.frames.as_ptr()).cast::<u8>()
    }
}

impl core::fmt::Debug for EmulatedPhysMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmulatedPhysMemory")
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl PhysMapper for EmulatedPhysMemory {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let offset = pa.as_u32() as usize;
        assert!(
            offset + size_of::<T>() <= self.size_bytes(),
            "{pa} is outside the emulated memory"
        );
        debug_assert_eq!(offset % align_of::<T>(), 0, "{pa} is misaligned");

        // SAFETY: The range is in bounds and the buffer is frame-aligned; the caller
        // promises `T` matches the bytes there and that no other reference aliases it.
        unsafe { &mut *self.base_ptr().add(offset).cast::<T>() }
    }

    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let offset = pa.as_u32() as usize;
        assert!(
            offset + len <= self.size_bytes(),
            "{pa}+{len:#x} is outside the emulated memory"
        );

        // SAFETY: As above; `u8` has no alignment or validity requirements.
        unsafe { core::slice::from_raw_parts_mut(self.base_ptr().add(offset), len) }
    }
}
