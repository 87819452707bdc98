use kernel_alloc::{ContFramePool, FramePoolError, FramePools, FrameState, needed_info_frames};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::EmulatedPhysMemory;

fn frame(n: u32) -> FrameNumber {
    FrameNumber::new(n)
}

#[test]
fn allocate_and_release_restores_free_count() {
    let ram = EmulatedPhysMemory::with_frames(100 + 1024);
    let mut pool = unsafe { ContFramePool::new(&ram, frame(100), 1024, None, 0) }.unwrap();

    // the bitmap occupies the first frame
    assert_eq!(pool.n_free_frames(), 1023);
    assert_eq!(pool.state(frame(100)), Some(FrameState::HeadOfSequence));

    let first = pool.get_frames(10).unwrap();
    assert_eq!(first, frame(101));
    assert_eq!(pool.n_free_frames(), 1013);
    assert_eq!(pool.state(frame(101)), Some(FrameState::HeadOfSequence));
    for n in 102..111 {
        assert_eq!(pool.state(frame(n)), Some(FrameState::Allocated));
    }
    assert_eq!(pool.state(frame(111)), Some(FrameState::Free));

    assert_eq!(pool.release(first), Ok(10));
    assert_eq!(pool.n_free_frames(), 1023);
}

#[test]
fn runs_never_overlap() {
    let ram = EmulatedPhysMemory::with_frames(64);
    let mut pool = unsafe { ContFramePool::new(&ram, frame(0), 64, None, 0) }.unwrap();

    let runs = [3, 1, 7, 2, 5].map(|n| (pool.get_frames(n).unwrap(), n));
    for (i, &(a, len_a)) in runs.iter().enumerate() {
        for &(b, len_b) in &runs[i + 1..] {
            let disjoint = a + len_a <= b || b + len_b <= a;
            assert!(disjoint, "{a:?}+{len_a} overlaps {b:?}+{len_b}");
        }
    }
}

#[test]
fn released_gap_is_reused_first_fit() {
    let ram = EmulatedPhysMemory::with_frames(64);
    let mut pool = unsafe { ContFramePool::new(&ram, frame(0), 64, None, 0) }.unwrap();

    let a = pool.get_frames(4).unwrap();
    let b = pool.get_frames(4).unwrap();
    pool.get_frames(4).unwrap();
    pool.release(b).unwrap();

    assert_eq!(pool.get_frames(5).unwrap(), frame(13));
    assert_eq!(pool.get_frames(4).unwrap(), b);
    assert_eq!(a, frame(1));
}

#[test]
fn exhaustion_boundary() {
    let ram = EmulatedPhysMemory::with_frames(16);
    let mut pool = unsafe { ContFramePool::new(&ram, frame(0), 16, None, 0) }.unwrap();

    assert_eq!(
        pool.get_frames(16),
        Err(FramePoolError::NoFreeSequence { requested: 16, free: 15 })
    );
    let all = pool.get_frames(15).unwrap();
    assert_eq!(pool.n_free_frames(), 0);
    assert!(pool.get_frames(1).is_err());

    pool.release(all).unwrap();
    assert_eq!(pool.get_frames(15), Ok(all));
}

#[test]
fn only_heads_can_be_released() {
    let ram = EmulatedPhysMemory::with_frames(16);
    let mut pool = unsafe { ContFramePool::new(&ram, frame(0), 16, None, 0) }.unwrap();
    let head = pool.get_frames(3).unwrap();

    assert_eq!(
        pool.release(head + 1),
        Err(FramePoolError::NotHeadOfSequence(head + 1))
    );
    assert_eq!(
        pool.release(frame(10)),
        Err(FramePoolError::NotHeadOfSequence(frame(10)))
    );
    assert_eq!(pool.n_free_frames(), 12);
    assert_eq!(pool.release(head), Ok(3));
}

#[test]
fn pool_with_external_bitmap() {
    let ram = EmulatedPhysMemory::with_frames(4096 + 64);
    let mut pools = FramePools::new();

    let kernel = unsafe { ContFramePool::new(&ram, frame(0), 64, None, 0) }.unwrap();
    let kernel = pools.register(kernel).unwrap();

    let n_info = needed_info_frames(4096);
    let info = pools.get_frames(kernel, n_info).unwrap();
    let process =
        unsafe { ContFramePool::new(&ram, frame(64), 4096, Some(info), n_info) }.unwrap();
    let process = pools.register(process).unwrap();

    let process_pool = pools.pool(process).unwrap();
    assert_eq!(process_pool.n_free_frames(), 4096);
    assert_eq!(process_pool.info_frames(), (info, n_info));

    pools.mark_inaccessible(process, frame(1000), 100).unwrap();
    assert_eq!(pools.pool(process).unwrap().n_free_frames(), 3996);
    assert_eq!(
        pools.mark_inaccessible(process, frame(1050), 4),
        Err(FramePoolError::RangeNotFree(frame(1050)))
    );

    let page = pools.get_frames(process, 1).unwrap();
    assert_eq!(pools.owner_of(page), Some(process));
    assert_eq!(pools.release_frames(page), Ok(1));
    assert_eq!(pools.release_frames(info), Ok(n_info));
}

#[test]
fn insufficient_external_bitmap_is_rejected() {
    let ram = EmulatedPhysMemory::with_frames(8);
    let err = unsafe { ContFramePool::new(&ram, frame(0), 16_392, Some(frame(1)), 1) }.unwrap_err();
    assert_eq!(err, FramePoolError::InsufficientInfoFrames { needed: 2, given: 1 });
}
