use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::storage::block_manager::LocalFreeLists;
use crate::types::{BlockAddr, EpochId, Order};

/// A retired block waiting out its lag window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PendingFree {
    /// Block address.
    pub addr: BlockAddr,
    /// Block order.
    pub order: Order,
    /// Epoch at which the block was unlinked.
    pub freed_epoch: EpochId,
}

/// Seedable coin deciding when writer creation runs a recycle pass.
#[derive(Clone, Debug)]
pub struct RecycleTrigger {
    rng: ChaCha8Rng,
    freq: u32,
}

impl RecycleTrigger {
    /// Fires with probability `1 / freq`; `0` never fires, `1` always does.
    pub fn new(seed: u64, freq: u32) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            freq,
        }
    }

    /// Draws once.
    pub fn fire(&mut self) -> bool {
        match self.freq {
            0 => false,
            1 => true,
            freq => self.rng.gen_range(0..freq) == 0,
        }
    }
}

/// Per-thread engine context.
///
/// Holds the small-order free lists and the deferred-free queue of one
/// worker. Every write path takes a `&mut Worker`, so a worker is used by
/// one thread at a time. Hand it back with
/// [`super::SegGraph::retire_worker`] to release what it caches.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    pub(crate) local: LocalFreeLists,
    pub(crate) pending: Vec<PendingFree>,
    pub(crate) trigger: RecycleTrigger,
}

impl Worker {
    pub(crate) fn new(id: usize, seed: u64, freq: u32) -> Self {
        Self {
            id,
            local: LocalFreeLists::new(),
            pending: Vec::new(),
            trigger: RecycleTrigger::new(seed.wrapping_add(id as u64), freq),
        }
    }

    /// Worker id, unique within one engine.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Blocks queued for recycling.
    pub fn pending(&self) -> &[PendingFree] {
        &self.pending
    }

    /// Blocks cached in the local free lists.
    pub fn cached_blocks(&self) -> usize {
        self.local.total_blocks()
    }

    pub(crate) fn retire_block(&mut self, addr: BlockAddr, order: Order, freed_epoch: EpochId) {
        if !addr.is_null() {
            self.pending.push(PendingFree {
                addr,
                order,
                freed_epoch,
            });
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.pending.is_empty() || !self.local.is_empty() {
            warn!(
                worker = self.id,
                pending = self.pending.len(),
                cached = self.local.total_blocks(),
                "graph.worker.dropped_unretired"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_extremes() {
        let mut never = RecycleTrigger::new(1, 0);
        let mut always = RecycleTrigger::new(1, 1);
        assert!((0..100).all(|_| !never.fire()));
        assert!((0..100).all(|_| always.fire()));
    }

    #[test]
    fn trigger_is_reproducible_per_seed() {
        let mut a = RecycleTrigger::new(42, 4);
        let mut b = RecycleTrigger::new(42, 4);
        let xs: Vec<bool> = (0..64).map(|_| a.fire()).collect();
        let ys: Vec<bool> = (0..64).map(|_| b.fire()).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().any(|&x| x));
        assert!(xs.iter().any(|&x| !x));
    }

    #[test]
    fn null_blocks_are_not_queued() {
        let mut worker = Worker::new(0, 0, 0);
        worker.retire_block(BlockAddr::NULL, 6, 1);
        worker.retire_block(BlockAddr::from_raw(64), 6, 1);
        assert_eq!(worker.pending().len(), 1);
        worker.pending.clear();
    }
}
