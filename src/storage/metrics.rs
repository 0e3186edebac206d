use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks for observing allocator, commit and recycling activity.
///
/// Implementations must be cheap: `block_allocated` and `block_freed` run on
/// the append path.
pub trait EngineMetrics: Send + Sync {
    /// A block of `2^order` bytes was handed out.
    fn block_allocated(&self, order: u8);

    /// A block of `2^order` bytes went back to a free list.
    fn block_freed(&self, order: u8);

    /// An allocation failed because capacity is exhausted.
    fn alloc_exhausted(&self);

    /// A write committed `chains` epoch-index entries at some epoch.
    fn epoch_committed(&self, chains: usize);

    /// A write was rolled back.
    fn write_aborted(&self);

    /// A recycle pass freed `freed` blocks and kept `deferred` queued.
    fn recycle_pass(&self, freed: usize, deferred: usize);

    /// A snapshot iterator was created.
    fn adjacency_scan(&self, direction: &'static str);
}

/// A no-op implementation of [`EngineMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn block_allocated(&self, _order: u8) {}
    fn block_freed(&self, _order: u8) {}
    fn alloc_exhausted(&self) {}
    fn epoch_committed(&self, _chains: usize) {}
    fn write_aborted(&self) {}
    fn recycle_pass(&self, _freed: usize, _deferred: usize) {}
    fn adjacency_scan(&self, _direction: &'static str) {}
}

/// Atomic counters for every [`EngineMetrics`] hook.
#[derive(Default)]
pub struct CounterMetrics {
    /// Blocks handed out.
    pub blocks_allocated: AtomicU64,
    /// Blocks returned to free lists.
    pub blocks_freed: AtomicU64,
    /// Allocations refused for lack of capacity.
    pub alloc_exhausted: AtomicU64,
    /// Commits that published at least one chain.
    pub commits: AtomicU64,
    /// Epoch-index entries published.
    pub chains_committed: AtomicU64,
    /// Rolled back writes.
    pub aborts: AtomicU64,
    /// Recycle passes run.
    pub recycle_passes: AtomicU64,
    /// Blocks physically reclaimed by recycling.
    pub blocks_recycled: AtomicU64,
    /// Outgoing adjacency scans.
    pub adjacency_scans_out: AtomicU64,
    /// Incoming adjacency scans.
    pub adjacency_scans_in: AtomicU64,
}

impl EngineMetrics for CounterMetrics {
    fn block_allocated(&self, _order: u8) {
        self.blocks_allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn block_freed(&self, _order: u8) {
        self.blocks_freed.fetch_add(1, Ordering::Relaxed);
    }

    fn alloc_exhausted(&self) {
        self.alloc_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn epoch_committed(&self, chains: usize) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.chains_committed
            .fetch_add(chains as u64, Ordering::Relaxed);
    }

    fn write_aborted(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    fn recycle_pass(&self, freed: usize, _deferred: usize) {
        self.recycle_passes.fetch_add(1, Ordering::Relaxed);
        self.blocks_recycled
            .fetch_add(freed as u64, Ordering::Relaxed);
    }

    fn adjacency_scan(&self, direction: &'static str) {
        match direction {
            "out" => {
                self.adjacency_scans_out.fetch_add(1, Ordering::Relaxed);
            }
            "in" => {
                self.adjacency_scans_in.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn EngineMetrics> {
    Arc::new(NoopMetrics)
}
