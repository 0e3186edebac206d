use std::collections::HashSet;

use seggraph::storage::block_manager::{LARGE_BLOCK_THRESHOLD, NULL_HOLDER_BYTES};
use seggraph::storage::{BlockManager, LocalFreeLists};
use seggraph::types::BlockAddr;
use seggraph::Result;

#[test]
fn freed_block_is_reissued() -> Result<()> {
    let bm = BlockManager::with_capacity(1024)?;
    let mut local = LocalFreeLists::new();
    let a1 = bm.alloc(&mut local, 6)?;
    let a2 = bm.alloc(&mut local, 6)?;
    assert!(!a1.is_null() && !a2.is_null());
    assert_ne!(a1, a2);
    assert!(a1.raw() >= NULL_HOLDER_BYTES as u64);

    bm.free(&mut local, a1, 6);
    assert_eq!(bm.alloc(&mut local, 6)?, a1);
    Ok(())
}

#[test]
fn exhaustion_is_sticky_until_reset() -> Result<()> {
    let bm = BlockManager::with_capacity(1024)?;
    let mut local = LocalFreeLists::new();
    let mut live = Vec::new();
    loop {
        let addr = bm.alloc(&mut local, 6)?;
        if addr.is_null() {
            break;
        }
        live.push(addr);
    }
    assert_eq!(live.len(), 1024 / 64);
    assert!(bm.is_exhausted());

    let victim = live.pop().unwrap();
    bm.free(&mut local, victim, 6);
    assert_eq!(bm.alloc(&mut local, 6)?, BlockAddr::NULL);
    assert_eq!(bm.alloc(&mut local, 3)?, BlockAddr::NULL);

    bm.reset_exhaustion();
    assert!(!bm.is_exhausted());
    assert_eq!(bm.alloc(&mut local, 6)?, victim);
    Ok(())
}

#[test]
fn small_orders_round_up_to_the_minimum() -> Result<()> {
    let bm = BlockManager::with_capacity(1024)?;
    let mut local = LocalFreeLists::new();
    let a = bm.alloc(&mut local, 0)?;
    let b = bm.alloc(&mut local, 1)?;
    assert_eq!(b.raw() - a.raw(), 8);
    Ok(())
}

#[test]
fn concurrent_workers_never_share_a_block() -> Result<()> {
    const THREADS: usize = 8;
    const ROUNDS: usize = 300;
    let bm = BlockManager::with_capacity(4 << 20)?;

    let per_thread: Vec<Vec<BlockAddr>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let bm = &bm;
                scope.spawn(move || {
                    let mut local = LocalFreeLists::new();
                    let mut live = Vec::new();
                    for round in 0..ROUNDS {
                        let order = 6 + (round % 3) as u8;
                        let addr = bm.alloc(&mut local, order).unwrap();
                        assert!(!addr.is_null());
                        live.push((addr, order));
                        if (round + t) % 3 == 0 {
                            let (addr, order) = live.swap_remove(round % live.len());
                            bm.free(&mut local, addr, order);
                        }
                    }
                    bm.absorb_local(&mut local);
                    live.into_iter().map(|(addr, _)| addr).collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for addr in per_thread.into_iter().flatten() {
        assert!(seen.insert(addr), "block {} issued twice", addr.raw());
    }
    Ok(())
}

#[test]
fn large_blocks_are_shared_across_workers() -> Result<()> {
    let bm = BlockManager::with_capacity(8 << 20)?;
    let mut first = LocalFreeLists::new();
    let mut second = LocalFreeLists::new();
    let big = bm.alloc(&mut first, LARGE_BLOCK_THRESHOLD)?;
    assert!(!big.is_null());
    bm.free(&mut first, big, LARGE_BLOCK_THRESHOLD);
    assert!(first.is_empty());
    assert_eq!(bm.alloc(&mut second, LARGE_BLOCK_THRESHOLD)?, big);
    Ok(())
}

#[test]
fn free_stats_track_global_lists() -> Result<()> {
    let bm = BlockManager::with_capacity(1 << 16)?;
    let mut local = LocalFreeLists::new();
    let blocks: Vec<_> = (0..4)
        .map(|_| bm.alloc(&mut local, 7))
        .collect::<Result<_>>()?;
    for addr in &blocks {
        bm.free(&mut local, *addr, 7);
    }
    assert_eq!(local.len(7), 4);
    assert_eq!(bm.free_block_stats().free_bytes, 4 * 128);

    bm.absorb_local(&mut local);
    assert!(local.is_empty());
    let stats = bm.free_block_stats();
    assert_eq!(stats.global_by_order, vec![(7, 4)]);
    assert_eq!(stats.free_bytes, 4 * 128);

    let mut other = LocalFreeLists::new();
    let reused = bm.alloc(&mut other, 7)?;
    assert!(blocks.contains(&reused));
    Ok(())
}

#[test]
fn churn_across_orders_fails_soft_at_the_mapping_end() -> Result<()> {
    let bm = BlockManager::with_capacity(4096)?;
    let mut local = LocalFreeLists::new();
    for order in [6u8, 7] {
        let blocks: Vec<_> = (0..4096 >> order)
            .map(|_| bm.alloc(&mut local, order))
            .collect::<Result<_>>()?;
        assert!(blocks.iter().all(|addr| !addr.is_null()));
        for addr in blocks {
            bm.free(&mut local, addr, order);
        }
    }
    assert_eq!(bm.used_bytes(), 0);

    // Nothing of order 8 is free, so every block comes off the bump tail.
    let mut issued = Vec::new();
    loop {
        let addr = bm.alloc(&mut local, 8)?;
        if addr.is_null() {
            break;
        }
        issued.push(addr);
        assert!(issued.len() <= 16);
    }
    assert_eq!(issued.len(), 15);
    assert!(bm.is_exhausted());
    assert_eq!(bm.used_bytes(), 15 * 256);
    assert!(bm.used_bytes() <= 4096);

    bm.reset_exhaustion();
    let reused = bm.alloc(&mut local, 6)?;
    assert!(!reused.is_null());
    assert!(reused.raw() < (NULL_HOLDER_BYTES + 4096) as u64);
    Ok(())
}
