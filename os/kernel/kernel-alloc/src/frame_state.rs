//! # Frame State Bitmap
//!
//! Two bits per frame, four frames per byte, most significant pair first:
//!
//! ```text
//!  bit:   7 6   5 4   3 2   1 0
//!        ┌───┬─────┬─────┬─────┐
//!  byte: │ f0│  f1 │  f2 │  f3 │
//!        └───┴─────┴─────┴─────┘
//! ```
//!
//! | Bits | State |
//! |------|-------|
//! | `00` | [`FrameState::Free`] |
//! | `01` | [`FrameState::HeadOfSequence`] |
//! | `11` | [`FrameState::Allocated`] |
//! | `10` | never written; reads as [`FrameState::Allocated`] |

/// Allocation state of a single frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrameState {
    /// Available for allocation.
    Free,
    /// First frame of an allocated run; the only frame a run can be released by.
    HeadOfSequence,
    /// Any other frame of an allocated run.
    Allocated,
}

impl FrameState {
    #[inline]
    const fn into_bits(self) -> u8 {
        match self {
            Self::Free => 0b00,
            Self::HeadOfSequence => 0b01,
            Self::Allocated => 0b11,
        }
    }

    #[inline]
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b01 => Self::HeadOfSequence,
            _ => Self::Allocated,
        }
    }
}

/// Frames tracked by one byte of bitmap.
pub const FRAMES_PER_BYTE: u32 = 4;

/// Packed frame-state storage over a borrowed byte buffer.
pub(crate) struct StateBitmap<'m> {
    bytes: &'m mut [u8],
}

impl<'m> StateBitmap<'m> {
    /// Bytes needed to track `n_frames` frames.
    #[inline]
    pub const fn bytes_for(n_frames: u32) -> usize {
        n_frames.div_ceil(FRAMES_PER_BYTE) as usize
    }

    /// Wrap `bytes` and mark every frame free.
    pub fn new_free(bytes: &'m mut [u8]) -> Self {
        bytes.fill(0);
        Self { bytes }
    }

    #[inline]
    const fn locate(index: u32) -> (usize, u32) {
        let byte = (index / FRAMES_PER_BYTE) as usize;
        let shift = 6 - 2 * (index % FRAMES_PER_BYTE);
        (byte, shift)
    }

    #[inline]
    pub fn get(&self, index: u32) -> FrameState {
        let (byte, shift) = Self::locate(index);
        FrameState::from_bits(self.bytes[byte] >> shift)
    }

    #[inline]
    pub fn set(&mut self, index: u32, state: FrameState) {
        let (byte, shift) = Self::locate(index);
        let cleared = self.bytes[byte] & !(0b11 << shift);
        self.bytes[byte] = cleared | (state.into_bits() << shift);
    }

    /// Mark `len` frames starting at `first` as one allocated run.
    pub fn mark_run(&mut self, first: u32, len: u32) {
        debug_assert!(len > 0);
        self.set(first, FrameState::HeadOfSequence);
        for i in first + 1..first + len {
            self.set(i, FrameState::Allocated);
        }
    }

    #[cfg(test)]
    pub fn raw(&self) -> &[u8] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_significant_pair_is_first_frame() {
        let mut storage = [0xFFu8; 2];
        let mut map = StateBitmap::new_free(&mut storage);
        map.set(0, FrameState::HeadOfSequence);
        assert_eq!(map.raw(), &[0x40, 0x00]);
        map.set(0, FrameState::Allocated);
        assert_eq!(map.raw(), &[0xC0, 0x00]);
        map.set(7, FrameState::Allocated);
        assert_eq!(map.raw(), &[0xC0, 0x03]);
    }

    #[test]
    fn set_then_get_for_every_position() {
        let mut storage = [0u8; 2];
        let mut map = StateBitmap::new_free(&mut storage);
        let states = [
            FrameState::Free,
            FrameState::HeadOfSequence,
            FrameState::Allocated,
        ];
        for index in 0..8 {
            for state in states {
                map.set(index, state);
                assert_eq!(map.get(index), state);
                for other in (0..8).filter(|&o| o != index) {
                    assert_eq!(map.get(other), FrameState::Free);
                }
            }
            map.set(index, FrameState::Free);
        }
    }

    #[test]
    fn reserved_pattern_reads_as_allocated() {
        let mut storage = [0b1000_0000u8];
        let map = StateBitmap { bytes: &mut storage };
        assert_eq!(map.get(0), FrameState::Allocated);
        assert_eq!(map.get(1), FrameState::Free);
    }

    #[test]
    fn run_marking() {
        let mut storage = [0u8; 2];
        let mut map = StateBitmap::new_free(&mut storage);
        map.mark_run(1, 3);
        assert_eq!(map.raw(), &[0b00_01_11_11, 0]);
        assert_eq!(StateBitmap::bytes_for(8), 2);
        assert_eq!(StateBitmap::bytes_for(9), 3);
    }
}
