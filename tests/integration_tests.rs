//! Integration tests for gpupool.

use std::sync::Arc;

use gpupool::{
    kib, mib, AllocError, Allocation, Allocator, AllocatorConfig, BlockState, CollectingSink, DeviceError,
    DeviceLimits, HostDevice, MemoryPropertyFlags,
};

const ANY_TYPE: u32 = u32::MAX;
const LOCAL: MemoryPropertyFlags = MemoryPropertyFlags::DEVICE_LOCAL;
const UPLOAD: MemoryPropertyFlags = MemoryPropertyFlags::HOST_VISIBLE;

fn small_pages(min_pages: usize) -> Allocator<HostDevice> {
    Allocator::new(
        HostDevice::new(),
        AllocatorConfig::minimal()
            .with_page_size(kib(64))
            .with_frames_in_flight(3)
            .with_min_pages(min_pages),
    )
}

fn overlaps(a: &Allocation, b: &Allocation) -> bool {
    a.memory() == b.memory() && a.offset() < b.offset() + b.size() && b.offset() < a.offset() + a.size()
}

/// Check the block list of every page: offset 0 start, contiguous, exact
/// cover, no two adjacent free blocks.
fn assert_tiled(alloc: &Allocator<HostDevice>) {
    alloc.validate().unwrap();

    for page in alloc.pages() {
        let blocks = alloc.blocks(page.id).unwrap();
        assert_eq!(blocks.len(), page.block_count);
        assert_eq!(blocks[0].offset, 0);

        let mut end = 0;
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].offset + pair[0].size, pair[1].offset);
            assert!(
                !(pair[0].state == BlockState::Free && pair[1].state == BlockState::Free),
                "adjacent free blocks in {}",
                page.id
            );
        }
        for block in &blocks {
            end = block.offset + block.size;
        }
        assert_eq!(end, page.size);
    }
}

#[test]
fn test_offsets_are_aligned() {
    let mut alloc = small_pages(1);

    for (i, alignment) in [1u64, 4, 16, 256, 4096, 16384].into_iter().enumerate() {
        let size = 100 + 37 * i as u64;
        let allocation = alloc.allocate(size, alignment, ANY_TYPE, LOCAL).unwrap();
        assert_eq!(allocation.offset() % alignment, 0, "alignment {}", alignment);
        assert_eq!(allocation.size(), size);
    }
    assert_tiled(&alloc);
}

#[test]
fn test_blocks_tile_pages_under_churn() {
    let mut alloc = small_pages(1);
    let mut live: Vec<Allocation> = Vec::new();
    let mut seed = 0x2545_f491_u64;

    for round in 0..400 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let roll = (seed >> 33) as u64;

        if roll % 3 != 0 || live.is_empty() {
            let size = 64 + roll % kib(8);
            let alignment = 1 << (roll % 9);
            let memory = if roll % 5 == 0 { UPLOAD } else { LOCAL };
            live.push(alloc.allocate(size, alignment, ANY_TYPE, memory).unwrap());
        } else {
            let mut victim = live.swap_remove((roll as usize) % live.len());
            alloc.deallocate(&mut victim).unwrap();
        }

        if round % 7 == 0 {
            alloc.tick();
        }

        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(!overlaps(a, b));
            }
        }
        assert_tiled(&alloc);
    }

    for mut allocation in live {
        alloc.deallocate(&mut allocation).unwrap();
    }
    alloc.collect_all();
    assert_eq!(alloc.total_allocated(), 0);
    assert_tiled(&alloc);
}

#[test]
fn test_freed_range_is_reused_only_after_frames_in_flight_ticks() {
    let mut alloc = small_pages(1);

    let mut a = alloc.allocate(4096, 256, ANY_TYPE, LOCAL).unwrap();
    let freed = a.clone();
    alloc.deallocate(&mut a).unwrap();

    // The retired range still counts as allocated.
    assert_eq!(alloc.total_allocated(), 4096);
    assert_eq!(alloc.pending_frees(), 1);

    let mut held = Vec::new();
    for _ in 0..2 {
        let b = alloc.allocate(4096, 256, ANY_TYPE, LOCAL).unwrap();
        assert!(!overlaps(&freed, &b));
        held.push(b);
        alloc.tick();
    }
    let c = alloc.allocate(4096, 256, ANY_TYPE, LOCAL).unwrap();
    assert!(!overlaps(&freed, &c));
    assert_eq!(alloc.pending_frees(), 1);

    // Third tick: the slot that received the free comes around again.
    alloc.tick();
    assert_eq!(alloc.pending_frees(), 0);
    assert_eq!(alloc.total_allocated(), 3 * 4096);

    let d = alloc.allocate(4096, 256, ANY_TYPE, LOCAL).unwrap();
    assert_eq!(d.memory(), freed.memory());
    assert_eq!(d.offset(), freed.offset());
    assert_tiled(&alloc);
}

#[test]
fn test_frees_coalesce_into_one_block() {
    let mut alloc = small_pages(1);

    let mut handles: Vec<_> = (0..4)
        .map(|i| alloc.allocate(1000 + i * 500, 64, ANY_TYPE, LOCAL).unwrap())
        .collect();
    let page = handles[0].page_id();

    for index in [2, 0, 3, 1] {
        alloc.deallocate(&mut handles[index]).unwrap();
    }
    alloc.collect_all();

    let blocks = alloc.blocks(page).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].state, BlockState::Free);
    assert_eq!(blocks[0].offset, 0);
    assert_eq!(blocks[0].size, kib(64));
}

#[test]
fn test_oversized_request_gets_dedicated_page() {
    let mut alloc = Allocator::new(HostDevice::new(), AllocatorConfig::default());

    let big = alloc.allocate(mib(200), 4096, ANY_TYPE, LOCAL).unwrap();
    assert_eq!(big.offset(), 0);
    assert_eq!(alloc.device().reservation_size(big.memory()), Some(mib(200)));

    let small = alloc.allocate(kib(4), 256, ANY_TYPE, LOCAL).unwrap();
    assert_ne!(small.memory(), big.memory());
    assert_eq!(alloc.device().reservation_size(small.memory()), Some(mib(128)));

    let pages = alloc.pages();
    assert_eq!(pages.len(), 2);
    assert!(pages[0].dedicated);
    assert_eq!(pages[0].size, mib(200));
    assert!(!pages[1].dedicated);
    assert_eq!(alloc.total_reserved(), mib(328));
    assert_eq!(alloc.stats().dedicated_page_count, 1);
}

#[test]
fn test_eviction_releases_exactly_one_page() {
    let mut alloc = small_pages(1);

    let mut pages: Vec<_> = (0..3)
        .map(|_| alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap())
        .collect();
    assert_eq!(alloc.total_reserved(), 3 * kib(64));
    assert_eq!(alloc.device().live_reservations(), 3);

    let before = alloc.total_reserved();
    alloc.deallocate(&mut pages[1]).unwrap();
    for _ in 0..3 {
        alloc.tick();
    }
    assert_eq!(before - alloc.total_reserved(), kib(64));
    assert_eq!(alloc.device().live_reservations(), 2);
    assert_eq!(alloc.device().reserved_bytes(), alloc.total_reserved());
    assert_eq!(alloc.stats().evicted_pages, 1);
    alloc.validate().unwrap();
}

#[test]
fn test_eviction_stops_at_low_water_mark() {
    let mut alloc = small_pages(2);

    let mut handles: Vec<_> = (0..4)
        .map(|_| alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap())
        .collect();
    for handle in &mut handles {
        alloc.deallocate(handle).unwrap();
    }
    for _ in 0..3 {
        alloc.tick();
    }

    assert_eq!(alloc.page_count(), 2);
    assert_eq!(alloc.total_reserved(), 2 * kib(64));
    assert_eq!(alloc.total_allocated(), 0);

    // Pages kept below the mark serve new requests without reserving.
    let calls = alloc.device().allocate_calls();
    alloc.allocate(kib(32), 1, ANY_TYPE, LOCAL).unwrap();
    assert_eq!(alloc.device().allocate_calls(), calls);
}

#[test]
fn test_page_cap_reports_pool_exhausted() {
    let mut alloc = Allocator::new(
        HostDevice::new(),
        AllocatorConfig::minimal().with_page_size(kib(64)).with_max_pages(2),
    );

    alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap();
    alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap();

    assert_eq!(
        alloc.allocate(16, 1, ANY_TYPE, LOCAL),
        Err(AllocError::PoolExhausted { live_pages: 2, limit: 2 })
    );
    assert_eq!(alloc.device().live_reservations(), 2);
    assert_eq!(alloc.stats().failed_allocations, 1);
}

#[test]
fn test_dedicated_pages_count_against_the_cap() {
    let device = HostDevice::new().with_limits(DeviceLimits {
        max_memory_allocation_count: 3,
        buffer_image_granularity: 1024,
    });
    let mut alloc = Allocator::new(device, AllocatorConfig::default());

    for _ in 0..3 {
        alloc.allocate(mib(200), 4096, ANY_TYPE, LOCAL).unwrap();
    }
    assert_eq!(alloc.stats().dedicated_page_count, 3);

    assert_eq!(
        alloc.allocate(mib(200), 4096, ANY_TYPE, LOCAL),
        Err(AllocError::PoolExhausted { live_pages: 3, limit: 3 })
    );
    assert_eq!(alloc.device().live_reservations(), 3);
    assert_eq!(alloc.total_reserved(), 3 * mib(200));
}

#[test]
fn test_device_allocation_count_caps_pages() {
    let device = HostDevice::new().with_limits(DeviceLimits {
        max_memory_allocation_count: 1,
        buffer_image_granularity: 1,
    });
    let mut alloc = Allocator::new(device, AllocatorConfig::minimal().with_page_size(kib(64)));
    assert_eq!(alloc.max_pages(), 1);

    let mut a = alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap();
    assert!(matches!(
        alloc.allocate(16, 1, ANY_TYPE, LOCAL),
        Err(AllocError::PoolExhausted { limit: 1, .. })
    ));

    // Once the page is reclaimed and evicted the cap frees up again.
    alloc.deallocate(&mut a).unwrap();
    alloc.collect_all();
    assert_eq!(alloc.page_count(), 0);
    alloc.allocate(16, 1, ANY_TYPE, LOCAL).unwrap();
}

#[test]
fn test_double_and_foreign_frees_are_rejected() {
    let mut alloc = small_pages(1);
    let mut other = small_pages(1);

    let mut a = alloc.allocate(256, 1, ANY_TYPE, LOCAL).unwrap();
    let mut copy = a.clone();
    alloc.deallocate(&mut a).unwrap();

    assert_eq!(alloc.deallocate(&mut a), Err(AllocError::InvalidFree));
    assert_eq!(alloc.deallocate(&mut copy), Err(AllocError::InvalidFree));
    assert_eq!(alloc.deallocate(&mut Allocation::null()), Err(AllocError::InvalidFree));

    let mut foreign = other.allocate(256, 1, ANY_TYPE, LOCAL).unwrap();
    assert_eq!(alloc.deallocate(&mut foreign), Err(AllocError::InvalidFree));
    assert!(foreign.is_valid());
    other.deallocate(&mut foreign).unwrap();

    assert_eq!(alloc.pending_frees(), 1);
    assert_eq!(alloc.stats().deallocation_count, 1);
    alloc.validate().unwrap();
}

#[test]
fn test_host_visible_allocations_are_mapped() {
    let mut alloc = small_pages(1);

    let mut a = alloc.allocate(128, 16, ANY_TYPE, UPLOAD).unwrap();
    let mut b = alloc.allocate(128, 16, ANY_TYPE, UPLOAD).unwrap();
    assert!(a.is_mapped() && b.is_mapped());
    assert!(alloc.device().is_mapped(a.memory()));

    unsafe {
        a.mapped_slice_mut().unwrap().fill(0xAA);
        b.mapped_slice_mut().unwrap().fill(0xBB);
        assert!(a.mapped_slice().unwrap().iter().all(|&byte| byte == 0xAA));
        assert!(b.mapped_slice().unwrap().iter().all(|&byte| byte == 0xBB));
    }

    let local = alloc.allocate(128, 16, ANY_TYPE, LOCAL).unwrap();
    assert!(!local.is_mapped());
    assert!(alloc.pages().iter().any(|page| page.mapped));
}

#[test]
fn test_out_of_device_memory() {
    let device = HostDevice::new().with_budget(kib(64));
    let mut alloc = Allocator::new(device, AllocatorConfig::minimal().with_page_size(kib(64)));

    alloc.allocate(kib(64), 1, ANY_TYPE, LOCAL).unwrap();
    let err = alloc.allocate(kib(1), 1, ANY_TYPE, LOCAL).unwrap_err();
    assert_eq!(
        err,
        AllocError::OutOfDeviceMemory {
            size: kib(64),
            source: DeviceError::OutOfDeviceMemory,
        }
    );

    alloc.device_mut().set_budget(None);
    alloc.allocate(kib(1), 1, ANY_TYPE, LOCAL).unwrap();
}

#[test]
fn test_unsatisfiable_memory_type() {
    let mut alloc = small_pages(1);

    // Only type 0 (device local) is allowed, but host-visible memory is requested.
    let err = alloc.allocate(64, 1, 0b0001, UPLOAD).unwrap_err();
    assert!(matches!(err, AllocError::NoCompatibleMemoryType { type_bits: 0b0001, .. }));

    // Type bits pick the first matching index.
    let a = alloc
        .allocate(64, 1, 0b1000, MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE)
        .unwrap();
    assert_eq!(a.memory_type_index(), 3);
}

#[test]
fn test_stats_track_lifecycle() {
    let mut alloc = small_pages(1);

    let mut a = alloc.allocate(kib(4), 1, ANY_TYPE, LOCAL).unwrap();
    let _b = alloc.allocate(kib(8), 1, ANY_TYPE, LOCAL).unwrap();
    alloc.deallocate(&mut a).unwrap();

    let stats = alloc.stats();
    assert_eq!(stats.allocation_count, 2);
    assert_eq!(stats.deallocation_count, 1);
    assert_eq!(stats.live_allocations, 1);
    assert_eq!(stats.pending_frees, 1);
    assert_eq!(stats.total_allocated, kib(12));
    assert_eq!(stats.peak_allocated, kib(12));
    assert_eq!(stats.total_reserved, kib(64));

    alloc.collect_all();
    let stats = alloc.stats();
    assert_eq!(stats.reclaimed_count, 1);
    assert_eq!(stats.total_allocated, kib(8));
    assert_eq!(stats.peak_allocated, kib(12));
    assert!(stats.to_string().contains("Pages:       1 (0 dedicated)"));
}

#[test]
fn test_diagnostics_reach_sink() {
    let sink = Arc::new(CollectingSink::new());
    let previous = gpupool::diagnostics::set_sink(Some(sink.clone()));

    {
        let mut alloc = small_pages(1);
        let mut a = alloc.allocate(64, 1, ANY_TYPE, LOCAL).unwrap();
        alloc.deallocate(&mut a).unwrap();
        let _ = alloc.deallocate(&mut a);

        let _ = alloc.allocate(64, 1, 0, LOCAL);

        // Dropped with a live allocation.
        let _leaked = alloc.allocate(64, 1, ANY_TYPE, LOCAL).unwrap();
    }

    gpupool::diagnostics::set_sink(previous);

    assert!(sink.has_code("GP002"));
    assert!(sink.has_code("GP103"));
    assert!(sink.has_code("GP001"));
    assert!(sink
        .contexts_for("GP001")
        .iter()
        .any(|context| context.contains("1 allocations still live")));
}
