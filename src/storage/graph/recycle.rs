//! Deferred reclamation of retired blocks.
//!
//! A block unlinked at epoch `F` may still be reached by readers that
//! started before the unlink. Those readers hold pins at epochs no newer
//! than `F`, so a block is safe to reuse once `F + lag` is behind both the
//! requested horizon and every live pin.

use tracing::debug;

use crate::types::EpochId;

use super::{PendingFree, SegGraph, Worker};

/// Outcome of one recycle pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecycleStats {
    /// Blocks returned to the worker's free lists from its own queue.
    pub freed: usize,
    /// Blocks reclaimed from retired workers' queues.
    pub orphans_freed: usize,
    /// Blocks still waiting in the worker's queue.
    pub deferred: usize,
    /// Effective horizon the pass compared against.
    pub horizon: EpochId,
}

impl SegGraph {
    /// Frees every block queued on `worker` whose lag window has passed.
    ///
    /// The horizon is the smallest of `epoch_id`, the global epoch and the
    /// oldest pinned reader epoch. Blocks from retired workers are drained
    /// with the same rule into this worker's lists.
    pub fn recycle_segments(&self, worker: &mut Worker, epoch_id: EpochId) -> RecycleStats {
        let mut horizon = epoch_id.min(self.current_epoch());
        if let Some(oldest) = self.oldest_pinned_epoch() {
            horizon = horizon.min(oldest);
        }
        let lag = self.recycle.lag_epochs;
        let eligible = |p: &PendingFree| p.freed_epoch.saturating_add(lag) < horizon;

        let (ready, keep): (Vec<_>, Vec<_>) =
            std::mem::take(&mut worker.pending).into_iter().partition(eligible);
        worker.pending = keep;

        let orphans: Vec<PendingFree> = {
            let mut queue = self.orphans.lock();
            if queue.is_empty() {
                Vec::new()
            } else {
                let (ready, keep): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut *queue).into_iter().partition(eligible);
                *queue = keep;
                ready
            }
        };

        let bm = self.block_manager();
        for p in ready.iter().chain(orphans.iter()) {
            bm.free(&mut worker.local, p.addr, p.order);
        }
        let stats = RecycleStats {
            freed: ready.len(),
            orphans_freed: orphans.len(),
            deferred: worker.pending.len(),
            horizon,
        };
        self.metrics()
            .recycle_pass(stats.freed + stats.orphans_freed, stats.deferred);
        debug!(
            worker = worker.id(),
            epoch = epoch_id,
            horizon,
            freed = stats.freed,
            orphans = stats.orphans_freed,
            deferred = stats.deferred,
            "graph.recycle"
        );
        stats
    }

    /// Blocks waiting in retired workers' queues.
    pub fn orphaned_blocks(&self) -> usize {
        self.orphans.lock().len()
    }
}
