//! Power-of-two block allocator over an [`Arena`].
//!
//! Blocks are identified by `(offset, order)`. Small orders are recycled
//! through per-worker [`LocalFreeLists`] owned by the caller; large orders,
//! and small blocks that escalate out of a worker, live in a global tier
//! behind a lock. Everything else comes from a bump pointer at the arena
//! tail, which grows the backing reservation in fixed increments.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Result, SegGraphError};
use crate::primitives::arena::{Arena, BlockRef, HeapBacking};
use crate::storage::metrics::{default_metrics, EngineMetrics};
use crate::storage::options::ArenaOptions;
use crate::types::{BlockAddr, Order};

/// Orders below this are served from per-worker free lists.
pub const LARGE_BLOCK_THRESHOLD: Order = 20;
/// Smallest order handed out; keeps every block 8-byte aligned.
pub const MIN_ORDER: Order = 3;
/// Largest order accepted by [`BlockManager::alloc`].
pub const MAX_ORDER: Order = 48;
/// Bytes reserved at offset zero so no live block has the null address.
pub const NULL_HOLDER_BYTES: usize = 64;

/// Per-worker free lists for small orders.
///
/// Owned by the caller and passed into every allocator call, so a worker
/// only ever reuses its own frees until blocks escalate to the global tier.
#[derive(Debug)]
pub struct LocalFreeLists {
    lists: Vec<Vec<BlockAddr>>,
}

impl Default for LocalFreeLists {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFreeLists {
    /// Creates empty lists for every small order.
    pub fn new() -> Self {
        Self {
            lists: vec![Vec::new(); LARGE_BLOCK_THRESHOLD as usize],
        }
    }

    /// Number of free blocks cached for `order`.
    pub fn len(&self, order: Order) -> usize {
        self.lists.get(order as usize).map_or(0, Vec::len)
    }

    /// Total cached blocks across all orders.
    pub fn total_blocks(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    /// Returns `true` when no block is cached.
    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(Vec::is_empty)
    }

    fn pop(&mut self, order: Order) -> Option<BlockAddr> {
        self.lists[order as usize].pop()
    }
}

/// Free-list occupancy of the global tier.
#[derive(Clone, Debug, Default)]
pub struct FreeBlockStats {
    /// `(order, count)` for every non-empty global list.
    pub global_by_order: Vec<(Order, usize)>,
    /// Bytes sitting in any free list, local or global.
    pub free_bytes: usize,
}

/// Allocator for power-of-two blocks.
pub struct BlockManager {
    arena: Arena,
    name: String,
    capacity: usize,
    growth_increment: usize,
    local_spill_threshold: usize,
    used_size: AtomicUsize,
    reserved: AtomicUsize,
    free_bytes: AtomicUsize,
    global_small: AtomicUsize,
    exhausted: AtomicBool,
    global: Mutex<Vec<Vec<BlockAddr>>>,
    metrics: Arc<dyn EngineMetrics>,
}

impl BlockManager {
    /// Creates a manager over `arena`, reserving the first growth increment.
    pub fn new(arena: Arena, opts: &ArenaOptions, metrics: Arc<dyn EngineMetrics>) -> Result<Self> {
        let mapped = arena.mapped_len();
        if mapped < NULL_HOLDER_BYTES {
            return Err(SegGraphError::InvalidArgument(format!(
                "arena mapping of {mapped} bytes cannot hold the null block"
            )));
        }
        if opts.growth_increment == 0 {
            return Err(SegGraphError::InvalidArgument(
                "growth increment must be positive".into(),
            ));
        }
        let initial = opts.growth_increment.min(mapped).max(NULL_HOLDER_BYTES);
        arena.extend_to(initial)?;
        debug!(
            name = %opts.name,
            capacity = opts.capacity,
            mapped,
            reserved = initial,
            "block_manager.open"
        );
        Ok(Self {
            arena,
            name: opts.name.clone(),
            capacity: opts.capacity,
            growth_increment: opts.growth_increment,
            local_spill_threshold: opts.local_spill_threshold.max(1),
            used_size: AtomicUsize::new(NULL_HOLDER_BYTES),
            reserved: AtomicUsize::new(initial),
            free_bytes: AtomicUsize::new(0),
            global_small: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
            global: Mutex::new(vec![Vec::new(); MAX_ORDER as usize + 1]),
            metrics,
        })
    }

    /// Heap-backed manager with default options and the given capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let opts = ArenaOptions::new(capacity);
        let arena = Arena::new(Box::new(HeapBacking::new(opts.mapped_len())?));
        Self::new(arena, &opts, default_metrics())
    }

    fn normalize(order: Order) -> Result<Order> {
        if order > MAX_ORDER {
            return Err(SegGraphError::InvalidArgument(format!(
                "block order {order} exceeds maximum {MAX_ORDER}"
            )));
        }
        Ok(order.max(MIN_ORDER))
    }

    /// Returns a free block of `2^order` bytes.
    ///
    /// Returns [`BlockAddr::NULL`] when capacity is exhausted; the manager
    /// then stays exhausted until [`BlockManager::reset_exhaustion`]. Fails
    /// only when the backing store cannot be extended.
    pub fn alloc(&self, local: &mut LocalFreeLists, order: Order) -> Result<BlockAddr> {
        let order = Self::normalize(order)?;
        if self.exhausted.load(Ordering::Acquire) {
            return Ok(BlockAddr::NULL);
        }
        let size = 1usize << order;

        let reused = if order < LARGE_BLOCK_THRESHOLD {
            local.pop(order).or_else(|| self.pop_escalated(order))
        } else {
            self.global.lock()[order as usize].pop()
        };
        if let Some(addr) = reused {
            self.free_bytes.fetch_sub(size, Ordering::Relaxed);
            self.metrics.block_allocated(order);
            return Ok(addr);
        }

        let pointer = self.used_size.fetch_add(size, Ordering::AcqRel);
        let end = pointer + size;
        let accounted = end
            .saturating_sub(NULL_HOLDER_BYTES)
            .saturating_sub(self.free_bytes.load(Ordering::Relaxed));
        // Free bytes of other orders cannot serve a bump, so the tail can
        // run into the end of the mapping while accounted usage is in budget.
        if accounted > self.capacity || end > self.arena.mapped_len() {
            // Hand the tail back if nobody bumped past us.
            let _ = self.used_size.compare_exchange(
                end,
                pointer,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            self.mark_exhausted(order, accounted, end);
            return Ok(BlockAddr::NULL);
        }
        if end > self.reserved.load(Ordering::Acquire) {
            self.grow(end)?;
        }
        self.metrics.block_allocated(order);
        Ok(BlockAddr::from_raw(pointer as u64))
    }

    fn pop_escalated(&self, order: Order) -> Option<BlockAddr> {
        if self.global_small.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let addr = self.global.lock()[order as usize].pop()?;
        self.global_small.fetch_sub(1, Ordering::Relaxed);
        Some(addr)
    }

    fn mark_exhausted(&self, order: Order, accounted: usize, end: usize) {
        self.metrics.alloc_exhausted();
        if !self.exhausted.swap(true, Ordering::AcqRel) {
            error!(
                name = %self.name,
                capacity = self.capacity,
                used = accounted,
                tail = end,
                mapped = self.arena.mapped_len(),
                order,
                "block_manager.exhausted"
            );
        }
    }

    fn grow(&self, end: usize) -> Result<()> {
        let _lists = self.global.lock();
        let reserved = self.reserved.load(Ordering::Acquire);
        if end <= reserved {
            return Ok(());
        }
        let mapped = self.arena.mapped_len();
        let target = end.div_ceil(self.growth_increment) * self.growth_increment;
        let target = target.min(mapped);
        if let Err(err) = self.arena.extend_to(target) {
            error!(name = %self.name, needed = end, mapped, error = %err, "arena.grow.failed");
            return Err(SegGraphError::ArenaGrowth {
                needed: end,
                mapped,
            });
        }
        self.reserved.store(target, Ordering::Release);
        info!(name = %self.name, from = reserved, to = target, "arena.grow");
        Ok(())
    }

    /// Returns a block to the free lists.
    ///
    /// Small orders go to the caller's lists (spilling half to the global
    /// tier past the spill threshold); large orders go to the global tier.
    /// Freeing the null address is a no-op.
    pub fn free(&self, local: &mut LocalFreeLists, addr: BlockAddr, order: Order) {
        if addr.is_null() {
            return;
        }
        let Ok(order) = Self::normalize(order) else {
            debug_assert!(false, "freeing block with invalid order {order}");
            return;
        };
        self.free_bytes.fetch_add(1usize << order, Ordering::Relaxed);
        self.metrics.block_freed(order);
        if order >= LARGE_BLOCK_THRESHOLD {
            self.global.lock()[order as usize].push(addr);
            return;
        }
        let list = &mut local.lists[order as usize];
        list.push(addr);
        if list.len() > self.local_spill_threshold {
            let spill = list.len() / 2;
            let moved: Vec<BlockAddr> = list.drain(..spill).collect();
            self.escalate(order, moved);
        }
    }

    fn escalate(&self, order: Order, blocks: Vec<BlockAddr>) {
        if blocks.is_empty() {
            return;
        }
        let count = blocks.len();
        self.global.lock()[order as usize].extend(blocks);
        self.global_small.fetch_add(count, Ordering::Relaxed);
    }

    /// Moves every block cached in `local` to the global tier.
    pub fn absorb_local(&self, local: &mut LocalFreeLists) {
        for order in 0..LARGE_BLOCK_THRESHOLD {
            let blocks = std::mem::take(&mut local.lists[order as usize]);
            self.escalate(order, blocks);
        }
    }

    /// Translates an address into a block view; `None` for null.
    pub fn convert(&self, addr: BlockAddr) -> Option<BlockRef<'_>> {
        if addr.is_null() {
            None
        } else {
            Some(BlockRef::new(&self.arena, addr))
        }
    }

    /// Translates a block view back into its address.
    pub fn revert(&self, block: &BlockRef<'_>) -> BlockAddr {
        block.addr()
    }

    /// The arena this manager allocates from.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Bytes in live blocks: bump total minus free-list bytes.
    pub fn used_bytes(&self) -> usize {
        self.used_size
            .load(Ordering::Acquire)
            .saturating_sub(NULL_HOLDER_BYTES)
            .saturating_sub(self.free_bytes.load(Ordering::Relaxed))
    }

    /// Bytes of backing store made accessible so far.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether allocations currently fail soft.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Leaves the exhausted state; capacity is re-checked on the next bump.
    pub fn reset_exhaustion(&self) {
        if self.exhausted.swap(false, Ordering::AcqRel) {
            info!(name = %self.name, used = self.used_bytes(), "block_manager.reset");
        }
    }

    /// Occupancy of the global free lists.
    pub fn free_block_stats(&self) -> FreeBlockStats {
        let lists = self.global.lock();
        let global_by_order = lists
            .iter()
            .enumerate()
            .filter(|(_, list)| !list.is_empty())
            .map(|(order, list)| (order as Order, list.len()))
            .collect();
        FreeBlockStats {
            global_by_order,
            free_bytes: self.free_bytes.load(Ordering::Relaxed),
        }
    }
}
