//! # Contiguous Frame Pool
//!
//! Manages a fixed range of physical frames and hands them out as contiguous
//! runs. The state of every frame lives in a [two-bit map](crate::frame_state)
//! stored either in the pool's own first frame(s) or in frames supplied by the
//! caller (typically taken from another pool).
//!
//! ```text
//!  base_frame                                         base_frame + n_frames
//!  │                                                                      │
//!  ▼                                                                      ▼
//!  ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────┬─────────────┐
//!  │ info │ free │ HEAD │ ALLOC│ ALLOC│ free │ HEAD │ free │    ...      │
//!  └──────┴──────┴──────┴──────┴──────┴──────┴──────┴──────┴─────────────┘
//!    own     run of 3 frames ─┘                 run of 1
//!   bitmap
//! ```

use crate::frame_pools::PoolId;
use crate::frame_state::{FRAMES_PER_BYTE, FrameState, StateBitmap};
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber};
use kernel_vmem::PhysMapper;

/// Frames one info frame can describe.
pub const FRAMES_PER_INFO_FRAME: u32 = FRAME_SIZE * FRAMES_PER_BYTE;

/// Number of frames needed to hold the state of `n_frames` frames.
///
/// ```rust
/// # use kernel_alloc::needed_info_frames;
/// assert_eq!(needed_info_frames(1024), 1);
/// assert_eq!(needed_info_frames(16_384), 1);
/// assert_eq!(needed_info_frames(16_385), 2);
/// ```
#[inline]
#[must_use]
pub const fn needed_info_frames(n_frames: u32) -> u32 {
    n_frames.div_ceil(FRAMES_PER_INFO_FRAME)
}

/// A pool of physically contiguous frames with a two-bit state map.
pub struct ContFramePool<'m> {
    base: FrameNumber,
    n_frames: u32,
    n_free: u32,
    info: FrameNumber,
    n_info_frames: u32,
    bitmap: StateBitmap<'m>,
}

impl<'m> ContFramePool<'m> {
    /// Set up a pool over frames `base .. base + n_frames`.
    ///
    /// With `info_frame == None` the state map is kept in the pool's first
    /// [`needed_info_frames`] frames, which are then allocated as a run of
    /// their own. Otherwise the map is kept in `n_info_frames` frames starting
    /// at `info_frame` and all `n_frames` frames start out free.
    ///
    /// # Errors
    /// - [`FramePoolError::InvalidFrameCount`] if `n_frames` is zero or not a
    ///   multiple of 8.
    /// - [`FramePoolError::InsufficientInfoFrames`] if `n_info_frames` cannot
    ///   hold the map.
    ///
    /// # Safety
    /// The frames holding the map must be mapped through `mapper`, reserved for
    /// this pool, and not referenced by anything else for `'m`.
    pub unsafe fn new<M: PhysMapper>(
        mapper: &M,
        base: FrameNumber,
        n_frames: u32,
        info_frame: Option<FrameNumber>,
        n_info_frames: u32,
    ) -> Result<Self, FramePoolError> {
        if n_frames == 0 || !n_frames.is_multiple_of(8) {
            log::error!("frame pool at {base:?}: invalid frame count {n_frames}");
            return Err(FramePoolError::InvalidFrameCount(n_frames));
        }

        let needed = needed_info_frames(n_frames);
        let (info, n_info_frames) = match info_frame {
            None => (base, needed),
            Some(info) if n_info_frames >= needed => (info, n_info_frames),
            Some(_) => {
                log::error!(
                    "frame pool at {base:?}: {n_info_frames} info frame(s) given, {needed} needed"
                );
                return Err(FramePoolError::InsufficientInfoFrames {
                    needed,
                    given: n_info_frames,
                });
            }
        };

        let bytes = unsafe { mapper.phys_bytes_mut(info.base(), StateBitmap::bytes_for(n_frames)) };
        let mut pool = Self {
            base,
            n_frames,
            n_free: n_frames,
            info,
            n_info_frames,
            bitmap: StateBitmap::new_free(bytes),
        };

        if info_frame.is_none() {
            pool.bitmap.mark_run(0, needed);
            pool.n_free -= needed;
        }

        log::info!(
            "frame pool initialized: frames {}..{}, {} free, state map at {:?}",
            base,
            pool.end(),
            pool.n_free,
            info
        );
        Ok(pool)
    }

    /// First frame managed by this pool.
    #[inline]
    #[must_use]
    pub const fn base_frame(&self) -> FrameNumber {
        self.base
    }

    /// Number of frames managed by this pool, including its own info frames.
    #[inline]
    #[must_use]
    pub const fn n_frames(&self) -> u32 {
        self.n_frames
    }

    /// One past the last frame managed by this pool.
    #[inline]
    #[must_use]
    pub fn end(&self) -> FrameNumber {
        self.base + self.n_frames
    }

    #[inline]
    #[must_use]
    pub const fn n_free_frames(&self) -> u32 {
        self.n_free
    }

    /// First frame holding the state map, and how many frames it spans.
    #[inline]
    #[must_use]
    pub const fn info_frames(&self) -> (FrameNumber, u32) {
        (self.info, self.n_info_frames)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, frame: FrameNumber) -> bool {
        frame >= self.base && frame < self.end()
    }

    /// Whether `self` and `other` share at least one frame.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// State of `frame`, or `None` if it belongs to another pool.
    #[must_use]
    pub fn state(&self, frame: FrameNumber) -> Option<FrameState> {
        self.contains(frame).then(|| self.bitmap.get(frame - self.base))
    }

    /// Allocate `n` contiguous frames and return the first one.
    ///
    /// The pool is scanned from its base; the first run of `n` free frames wins.
    ///
    /// # Errors
    /// - [`FramePoolError::EmptyRequest`] if `n` is zero.
    /// - [`FramePoolError::NoFreeSequence`] if no run of `n` free frames exists.
    pub fn get_frames(&mut self, n: u32) -> Result<FrameNumber, FramePoolError> {
        if n == 0 {
            return Err(FramePoolError::EmptyRequest);
        }

        if n <= self.n_free {
            let mut run_start = 0;
            let mut run_len = 0;
            for index in 0..self.n_frames {
                if self.bitmap.get(index) != FrameState::Free {
                    run_len = 0;
                    continue;
                }
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len == n {
                    self.bitmap.mark_run(run_start, n);
                    self.n_free -= n;
                    let head = self.base + run_start;
                    log::debug!("allocated {n} frame(s) at {head}, {} free", self.n_free);
                    return Ok(head);
                }
            }
        }

        log::warn!(
            "no run of {n} free frame(s) in pool {}..{} ({} free)",
            self.base,
            self.end(),
            self.n_free
        );
        Err(FramePoolError::NoFreeSequence {
            requested: n,
            free: self.n_free,
        })
    }

    /// Reserve `n` frames starting at `first` so they are never handed out.
    ///
    /// The range becomes an allocated run, so it could later be given back with
    /// [`release`](Self::release).
    ///
    /// # Errors
    /// - [`FramePoolError::EmptyRequest`] if `n` is zero.
    /// - [`FramePoolError::OutOfRange`] if the range leaves the pool.
    /// - [`FramePoolError::RangeNotFree`] if any frame in it is in use; the pool
    ///   is left unchanged.
    pub fn mark_inaccessible(&mut self, first: FrameNumber, n: u32) -> Result<(), FramePoolError> {
        if n == 0 {
            return Err(FramePoolError::EmptyRequest);
        }

        let in_range = first >= self.base
            && first
                .as_u32()
                .checked_add(n)
                .is_some_and(|end| end <= self.end().as_u32());
        if !in_range {
            log::warn!(
                "cannot reserve {n} frame(s) at {first}: pool spans {}..{}",
                self.base,
                self.end()
            );
            return Err(FramePoolError::OutOfRange(first));
        }

        let start = first - self.base;
        if let Some(busy) = (start..start + n).find(|&i| self.bitmap.get(i) != FrameState::Free) {
            let busy = self.base + busy;
            log::warn!("cannot reserve {n} frame(s) at {first}: {busy} is in use");
            return Err(FramePoolError::RangeNotFree(busy));
        }

        self.bitmap.mark_run(start, n);
        self.n_free -= n;
        log::info!("reserved {n} frame(s) at {first}, {} free", self.n_free);
        Ok(())
    }

    /// Free the run headed by `first` and return its length.
    ///
    /// Frames are freed up to the next free frame, the next head of sequence,
    /// or the end of the pool.
    ///
    /// # Errors
    /// - [`FramePoolError::FrameNotFound`] if `first` is outside this pool.
    /// - [`FramePoolError::NotHeadOfSequence`] if `first` does not start a run;
    ///   the pool is left unchanged.
    pub fn release(&mut self, first: FrameNumber) -> Result<u32, FramePoolError> {
        let Some(state) = self.state(first) else {
            return Err(FramePoolError::FrameNotFound(first));
        };
        if state != FrameState::HeadOfSequence {
            log::warn!("cannot release {first}: frame is {state:?}");
            return Err(FramePoolError::NotHeadOfSequence(first));
        }

        let start = first - self.base;
        self.bitmap.set(start, FrameState::Free);
        let mut released = 1;
        for index in start + 1..self.n_frames {
            if self.bitmap.get(index) != FrameState::Allocated {
                break;
            }
            self.bitmap.set(index, FrameState::Free);
            released += 1;
        }

        self.n_free += released;
        log::debug!("released {released} frame(s) at {first}, {} free", self.n_free);
        Ok(released)
    }
}

impl core::fmt::Debug for ContFramePool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContFramePool")
            .field("base", &self.base)
            .field("n_frames", &self.n_frames)
            .field("n_free", &self.n_free)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FramePoolError {
    #[error("frame count {0} is not a non-zero multiple of 8")]
    InvalidFrameCount(u32),
    #[error("{given} info frame(s) cannot describe the pool, {needed} needed")]
    InsufficientInfoFrames { needed: u32, given: u32 },
    #[error("zero frames requested")]
    EmptyRequest,
    #[error("no run of {requested} free frame(s) ({free} free)")]
    NoFreeSequence { requested: u32, free: u32 },
    #[error("frame {0} does not start an allocated run")]
    NotHeadOfSequence(FrameNumber),
    #[error("range starting at frame {0} leaves the pool")]
    OutOfRange(FrameNumber),
    #[error("frame {0} is already in use")]
    RangeNotFree(FrameNumber),
    #[error("frame {0} not found in any pool")]
    FrameNotFound(FrameNumber),
    #[error("{0} is not registered")]
    UnknownPool(PoolId),
    #[error("pool overlaps {0}")]
    OverlappingPool(PoolId),
    #[error("too many frame pools")]
    RegistryFull,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::EmulatedPhysMemory;

    fn own_storage(ram: &EmulatedPhysMemory, base: u32, n: u32) -> ContFramePool<'_> {
        unsafe { ContFramePool::new(ram, FrameNumber::new(base), n, None, 0) }.unwrap()
    }

    #[test]
    fn own_storage_reserves_first_frame() {
        let ram = EmulatedPhysMemory::with_frames(1124);
        let pool = own_storage(&ram, 100, 1024);
        assert_eq!(pool.n_free_frames(), 1023);
        assert_eq!(pool.state(FrameNumber::new(100)), Some(FrameState::HeadOfSequence));
        assert_eq!(pool.state(FrameNumber::new(101)), Some(FrameState::Free));
        assert_eq!(pool.state(FrameNumber::new(99)), None);
        assert_eq!(pool.state(FrameNumber::new(1124)), None);
        assert_eq!(pool.info_frames(), (FrameNumber::new(100), 1));

        let raw = unsafe { ram.frame_bytes(FrameNumber::new(100)) };
        assert_eq!(raw[0], 0x40);
        assert!(raw[1..256].iter().all(|&b| b == 0));
    }

    #[test]
    fn external_storage_leaves_all_frames_free() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let pool =
            unsafe { ContFramePool::new(&ram, FrameNumber::new(32), 32, Some(FrameNumber::new(1)), 1) }
                .unwrap();
        assert_eq!(pool.n_free_frames(), 32);
        assert_eq!(pool.state(FrameNumber::new(32)), Some(FrameState::Free));
    }

    #[test]
    fn rejects_bad_geometry() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let bad = |n| unsafe { ContFramePool::new(&ram, FrameNumber::new(8), n, None, 0) };
        assert_eq!(bad(0).unwrap_err(), FramePoolError::InvalidFrameCount(0));
        assert_eq!(bad(12).unwrap_err(), FramePoolError::InvalidFrameCount(12));

        let ram = EmulatedPhysMemory::with_frames(8);
        let err = unsafe {
            ContFramePool::new(&ram, FrameNumber::new(0), 16_392, Some(FrameNumber::new(1)), 1)
        }
        .unwrap_err();
        assert_eq!(
            err,
            FramePoolError::InsufficientInfoFrames {
                needed: 2,
                given: 1
            }
        );
    }

    #[test]
    fn allocation_and_release_are_inverse() {
        let ram = EmulatedPhysMemory::with_frames(1124);
        let mut pool = own_storage(&ram, 100, 1024);

        let head = pool.get_frames(10).unwrap();
        assert_eq!(head, FrameNumber::new(101));
        assert_eq!(pool.n_free_frames(), 1013);
        assert_eq!(pool.state(head), Some(FrameState::HeadOfSequence));
        for f in 102..111 {
            assert_eq!(pool.state(FrameNumber::new(f)), Some(FrameState::Allocated));
        }
        assert_eq!(pool.state(FrameNumber::new(111)), Some(FrameState::Free));

        assert_eq!(pool.release(head), Ok(10));
        assert_eq!(pool.n_free_frames(), 1023);
        assert_eq!(pool.state(FrameNumber::new(105)), Some(FrameState::Free));
    }

    #[test]
    fn adjacent_runs_release_independently() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let mut pool = own_storage(&ram, 0, 64);
        let a = pool.get_frames(3).unwrap();
        let b = pool.get_frames(2).unwrap();
        assert_eq!(b, a + 3);

        assert_eq!(pool.release(a), Ok(3));
        assert_eq!(pool.state(b), Some(FrameState::HeadOfSequence));
        assert_eq!(pool.state(b + 1), Some(FrameState::Allocated));

        // The freed hole is reused first.
        assert_eq!(pool.get_frames(3), Ok(a));
    }

    #[test]
    fn release_rejects_non_heads_without_side_effects() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let mut pool = own_storage(&ram, 0, 64);
        let head = pool.get_frames(4).unwrap();
        let free_before = pool.n_free_frames();

        assert_eq!(pool.release(head + 1), Err(FramePoolError::NotHeadOfSequence(head + 1)));
        assert_eq!(pool.release(head + 10), Err(FramePoolError::NotHeadOfSequence(head + 10)));
        assert_eq!(pool.release(FrameNumber::new(64)), Err(FramePoolError::FrameNotFound(FrameNumber::new(64))));
        assert_eq!(pool.n_free_frames(), free_before);
        assert_eq!(pool.state(head + 1), Some(FrameState::Allocated));
    }

    #[test]
    fn exhaustion_boundary() {
        let ram = EmulatedPhysMemory::with_frames(16);
        let mut pool = own_storage(&ram, 0, 16);
        assert_eq!(pool.n_free_frames(), 15);

        assert_eq!(
            pool.get_frames(16),
            Err(FramePoolError::NoFreeSequence {
                requested: 16,
                free: 15
            })
        );
        let all = pool.get_frames(15).unwrap();
        assert_eq!(all, FrameNumber::new(1));
        assert_eq!(pool.n_free_frames(), 0);
        assert!(pool.get_frames(1).is_err());
        assert_eq!(pool.get_frames(0), Err(FramePoolError::EmptyRequest));
    }

    #[test]
    fn fragmented_pool_cannot_serve_large_run() {
        let ram = EmulatedPhysMemory::with_frames(16);
        let mut pool = own_storage(&ram, 0, 16);
        let runs: [FrameNumber; 5] = core::array::from_fn(|_| pool.get_frames(3).unwrap());
        pool.release(runs[1]).unwrap();
        pool.release(runs[3]).unwrap();

        assert_eq!(pool.n_free_frames(), 6);
        assert!(matches!(
            pool.get_frames(4),
            Err(FramePoolError::NoFreeSequence { requested: 4, free: 6 })
        ));
        assert_eq!(pool.get_frames(3), Ok(runs[1]));
    }

    #[test]
    fn mark_inaccessible_checks_range_and_state() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let mut pool = own_storage(&ram, 0, 64);

        pool.mark_inaccessible(FrameNumber::new(8), 8).unwrap();
        assert_eq!(pool.n_free_frames(), 63 - 8);
        assert_eq!(pool.state(FrameNumber::new(8)), Some(FrameState::HeadOfSequence));
        assert_eq!(pool.state(FrameNumber::new(15)), Some(FrameState::Allocated));
        assert_eq!(pool.state(FrameNumber::new(16)), Some(FrameState::Free));

        assert_eq!(
            pool.mark_inaccessible(FrameNumber::new(60), 8),
            Err(FramePoolError::OutOfRange(FrameNumber::new(60)))
        );
        assert_eq!(
            pool.mark_inaccessible(FrameNumber::new(4), 8),
            Err(FramePoolError::RangeNotFree(FrameNumber::new(8)))
        );
        assert_eq!(pool.state(FrameNumber::new(4)), Some(FrameState::Free));

        // Reserved frames are skipped by allocation.
        let run = pool.get_frames(10).unwrap();
        assert_eq!(run, FrameNumber::new(16));
    }
}
