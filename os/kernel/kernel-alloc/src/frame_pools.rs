//! # Frame Pool Registry
//!
//! Frames are released by number alone, without naming the pool they came
//! from. The registry keeps every live [`ContFramePool`] in insertion order
//! and finds the owner by range containment.

use crate::frame_pool::{ContFramePool, FramePoolError};
use kernel_memory_addresses::FrameNumber;

/// Upper bound on simultaneously registered pools.
pub const MAX_FRAME_POOLS: usize = 8;

/// Handle to a pool inside a [`FramePools`] registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PoolId(u8);

impl PoolId {
    #[inline]
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl core::fmt::Display for PoolId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pool #{}", self.0)
    }
}

/// Append-only list of the live frame pools.
pub struct FramePools<'m> {
    pools: [Option<ContFramePool<'m>>; MAX_FRAME_POOLS],
    len: usize,
}

impl Default for FramePools<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m> FramePools<'m> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
            len: 0,
        }
    }

    /// Append `pool` and return its handle.
    ///
    /// # Errors
    /// - [`FramePoolError::RegistryFull`] if [`MAX_FRAME_POOLS`] are registered.
    /// - [`FramePoolError::OverlappingPool`] if `pool` shares frames with a
    ///   registered pool.
    #[allow(clippy::cast_possible_truncation)]
    pub fn register(&mut self, pool: ContFramePool<'m>) -> Result<PoolId, FramePoolError> {
        if let Some((id, _)) = self.iter().find(|(_, p)| p.overlaps(&pool)) {
            log::error!("frame pool at {} overlaps {id}", pool.base_frame());
            return Err(FramePoolError::OverlappingPool(id));
        }
        let Some(slot) = self.pools.get_mut(self.len) else {
            log::error!("cannot register more than {MAX_FRAME_POOLS} frame pools");
            return Err(FramePoolError::RegistryFull);
        };

        let id = PoolId(self.len as u8);
        log::debug!("registered frame pool at {} as {id}", pool.base_frame());
        *slot = Some(pool);
        self.len += 1;
        Ok(id)
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn pool(&self, id: PoolId) -> Option<&ContFramePool<'m>> {
        self.pools.get(id.as_usize())?.as_ref()
    }

    #[must_use]
    pub fn pool_mut(&mut self, id: PoolId) -> Option<&mut ContFramePool<'m>> {
        self.pools.get_mut(id.as_usize())?.as_mut()
    }

    /// Registered pools in insertion order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (PoolId, &ContFramePool<'m>)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| Some((PoolId(i as u8), p.as_ref()?)))
    }

    /// The first registered pool whose range contains `frame`.
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<PoolId> {
        self.iter()
            .find(|(_, pool)| pool.contains(frame))
            .map(|(id, _)| id)
    }

    /// Allocate `n` contiguous frames from pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`], or anything
    /// [`ContFramePool::get_frames`] reports.
    pub fn get_frames(&mut self, id: PoolId, n: u32) -> Result<FrameNumber, FramePoolError> {
        self.pool_mut(id)
            .ok_or(FramePoolError::UnknownPool(id))?
            .get_frames(n)
    }

    /// Reserve `n` frames starting at `first` in pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`], or anything
    /// [`ContFramePool::mark_inaccessible`] reports.
    pub fn mark_inaccessible(
        &mut self,
        id: PoolId,
        first: FrameNumber,
        n: u32,
    ) -> Result<(), FramePoolError> {
        self.pool_mut(id)
            .ok_or(FramePoolError::UnknownPool(id))?
            .mark_inaccessible(first, n)
    }

    /// Release the run headed by `first`, whichever pool owns it.
    ///
    /// Returns the number of frames released.
    ///
    /// # Errors
    /// - [`FramePoolError::FrameNotFound`] if no registered pool contains `first`.
    /// - [`FramePoolError::NotHeadOfSequence`] if `first` does not start a run.
    pub fn release_frames(&mut self, first: FrameNumber) -> Result<u32, FramePoolError> {
        let Some(pool) = self.pools.iter_mut().flatten().find(|p| p.contains(first)) else {
            log::warn!("cannot release {first}: frame not found in any pool");
            return Err(FramePoolError::FrameNotFound(first));
        };
        pool.release(first)
    }

    /// Total free frames across all pools.
    #[must_use]
    pub fn n_free_frames(&self) -> u32 {
        self.iter().map(|(_, pool)| pool.n_free_frames()).sum()
    }
}

impl core::fmt::Debug for FramePools<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, pool)| pool)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameState;
    use kernel_vmem::EmulatedPhysMemory;

    fn pool(ram: &EmulatedPhysMemory, base: u32, n: u32) -> ContFramePool<'_> {
        unsafe { ContFramePool::new(ram, FrameNumber::new(base), n, None, 0) }.unwrap()
    }

    #[test]
    fn release_finds_owner_by_range() {
        let ram = EmulatedPhysMemory::with_frames(128);
        let mut pools = FramePools::new();
        let low = pools.register(pool(&ram, 0, 64)).unwrap();
        let high = pools.register(pool(&ram, 64, 64)).unwrap();
        assert_ne!(low, high);

        let a = pools.get_frames(low, 2).unwrap();
        let b = pools.get_frames(high, 5).unwrap();
        assert_eq!(pools.owner_of(a), Some(low));
        assert_eq!(pools.owner_of(b), Some(high));

        assert_eq!(pools.release_frames(b), Ok(5));
        assert_eq!(pools.pool(high).unwrap().n_free_frames(), 63);
        assert_eq!(pools.pool(low).unwrap().state(a), Some(FrameState::HeadOfSequence));
        assert_eq!(pools.n_free_frames(), 61 + 63);
    }

    #[test]
    fn unknown_frame_is_reported() {
        let ram = EmulatedPhysMemory::with_frames(64);
        let mut pools = FramePools::new();
        pools.register(pool(&ram, 0, 64)).unwrap();
        assert_eq!(
            pools.release_frames(FrameNumber::new(500)),
            Err(FramePoolError::FrameNotFound(FrameNumber::new(500)))
        );
        assert_eq!(pools.owner_of(FrameNumber::new(64)), None);
    }

    #[test]
    fn overlapping_pools_are_rejected() {
        let ram = EmulatedPhysMemory::with_frames(128);
        let mut pools = FramePools::new();
        let first = pools.register(pool(&ram, 0, 64)).unwrap();
        let err = pools.register(pool(&ram, 56, 64)).unwrap_err();
        assert_eq!(err, FramePoolError::OverlappingPool(first));
        assert_eq!(pools.len(), 1);
    }

    #[test]
    fn registry_is_bounded() {
        let ram = EmulatedPhysMemory::with_frames(8 * (MAX_FRAME_POOLS as u32 + 1));
        let mut pools = FramePools::new();
        for i in 0..MAX_FRAME_POOLS as u32 {
            pools.register(pool(&ram, i * 8, 8)).unwrap();
        }
        let extra = pool(&ram, MAX_FRAME_POOLS as u32 * 8, 8);
        assert_eq!(pools.register(extra).unwrap_err(), FramePoolError::RegistryFull);
    }
}
