use crate::{FRAME_SHIFT, PhysicalAddress};
use core::fmt;
use core::ops::{Add, Sub};

/// Number of a 4 KiB physical frame.
///
/// Frame `n` covers physical bytes `[n * 4096, (n + 1) * 4096)`. Frame pools
/// hand out and take back frame numbers; page-table entries store them in
/// their upper 20 bits.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = FrameNumber::new(512);
/// assert_eq!(f.base(), PhysicalAddress::new(0x0020_0000));
/// assert_eq!((f + 3).as_u32(), 515);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Physical address of the first byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << FRAME_SHIFT)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u32> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Distance in frames between two frame numbers.
impl Sub for FrameNumber {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
