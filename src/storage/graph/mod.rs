//! The segmented graph engine.
//!
//! [`SegGraph`] owns the block manager, the chain-root table and the
//! engine-wide counters. Callers interact with it through short-lived
//! handles: [`Transaction`]s for the usual read/write cycle, and explicit
//! [`GraphReader`]/[`GraphWriter`]s when an external coordinator decides
//! epochs.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SegGraphError};
use crate::primitives::concurrency::{EpochPins, PinGuard, PinSnapshot};
use crate::storage::block_manager::{BlockManager, FreeBlockStats};
use crate::storage::chain::{ChainKey, ChainRoot, ChainStats, EdgeBlock, EdgeIterator, EpochIndex};
use crate::storage::metrics::{default_metrics, EngineMetrics};
use crate::storage::options::{GraphOptions, RecycleCfg};
use crate::storage::schema::{EdgeLabelDef, GraphSchema, PartitionInfo};
use crate::types::{BlockAddr, Dir, EpochId, LabelId, TxnId, VertexId};

mod reader;
mod recycle;
mod transaction;
mod worker;
mod writer;

pub use reader::GraphReader;
pub use recycle::RecycleStats;
pub use transaction::Transaction;
pub use worker::{PendingFree, RecycleTrigger, Worker};
pub use writer::GraphWriter;

/// Allocator usage summary.
#[derive(Clone, Debug, Default)]
pub struct BlockUsage {
    /// Bytes in live blocks.
    pub used_bytes: usize,
    /// Bytes of backing store reserved so far.
    pub reserved_bytes: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Whether allocations currently fail soft.
    pub exhausted: bool,
    /// Global free-list occupancy.
    pub free: FreeBlockStats,
}

/// Epoch-versioned adjacency store.
pub struct SegGraph {
    bm: BlockManager,
    roots: Box<[ChainRoot]>,
    schema: GraphSchema,
    partition: PartitionInfo,
    max_vertices: usize,
    initial_block_capacity: usize,
    max_block_capacity: usize,
    initial_index_capacity: usize,
    recycle: RecycleCfg,
    epoch_id: AtomicU64,
    transaction_id: AtomicU64,
    vertex_id: AtomicU64,
    next_worker: AtomicUsize,
    commit_lock: Mutex<()>,
    pins: EpochPins,
    orphans: Mutex<Vec<PendingFree>>,
    metrics: Arc<dyn EngineMetrics>,
}

impl SegGraph {
    /// Opens an engine over a fresh arena.
    pub fn open(opts: GraphOptions) -> Result<Arc<Self>> {
        opts.validate()?;
        let labels = opts.schema.label_count();
        let root_count = opts
            .max_vertices
            .checked_mul(labels)
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| {
                SegGraphError::InvalidArgument(format!(
                    "{} vertices x {labels} labels overflows the root table",
                    opts.max_vertices
                ))
            })?;
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        let arena = opts.arena.open_arena()?;
        let kind = arena.kind();
        let bm = BlockManager::new(arena, &opts.arena, Arc::clone(&metrics))?;
        let roots: Box<[ChainRoot]> = (0..root_count).map(|_| ChainRoot::default()).collect();
        info!(
            max_vertices = opts.max_vertices,
            labels,
            capacity = opts.arena.capacity,
            backing = ?kind,
            partition = opts.partition.local_partition,
            partitions = opts.partition.partition_count,
            "graph.open"
        );
        Ok(Arc::new(Self {
            bm,
            roots,
            schema: opts.schema,
            partition: opts.partition,
            max_vertices: opts.max_vertices,
            initial_block_capacity: opts.initial_block_capacity,
            max_block_capacity: opts.max_block_capacity,
            initial_index_capacity: opts.initial_index_capacity,
            recycle: opts.recycle,
            epoch_id: AtomicU64::new(0),
            transaction_id: AtomicU64::new(0),
            vertex_id: AtomicU64::new(0),
            next_worker: AtomicUsize::new(0),
            commit_lock: Mutex::new(()),
            pins: EpochPins::new(),
            orphans: Mutex::new(Vec::new()),
            metrics,
        }))
    }

    /// Creates a context for one worker thread.
    pub fn register_worker(&self) -> Worker {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        Worker::new(id, self.recycle.seed, self.recycle.freq)
    }

    /// Hands a worker's cached blocks and recycle queue back to the engine.
    pub fn retire_worker(&self, mut worker: Worker) {
        let pending = std::mem::take(&mut worker.pending);
        let queued = pending.len();
        let cached = worker.local.total_blocks();
        self.orphans.lock().extend(pending);
        self.bm.absorb_local(&mut worker.local);
        debug!(worker = worker.id(), queued, cached, "graph.worker.retired");
    }

    /// Newest globally published epoch.
    pub fn current_epoch(&self) -> EpochId {
        self.epoch_id.load(Ordering::Acquire)
    }

    /// Makes `epoch` globally current unless a newer one already is.
    ///
    /// Returns the epoch that was current before the call.
    pub fn publish_epoch(&self, epoch: EpochId) -> EpochId {
        let prev = self.epoch_id.fetch_max(epoch, Ordering::AcqRel);
        if epoch > prev {
            debug!(from = prev, to = epoch, "graph.epoch.publish");
        }
        prev
    }

    /// Starts a read-write transaction at the current epoch.
    pub fn begin_transaction<'g, 'w>(&'g self, worker: &'w mut Worker) -> Transaction<'g, 'w> {
        self.begin_write(worker, false)
    }

    /// Starts a bulk-ingest transaction. Same contract as
    /// [`SegGraph::begin_transaction`], flagged for callers that care.
    pub fn begin_batch_loader<'g, 'w>(&'g self, worker: &'w mut Worker) -> Transaction<'g, 'w> {
        self.begin_write(worker, true)
    }

    fn begin_write<'g, 'w>(&'g self, worker: &'w mut Worker, batch: bool) -> Transaction<'g, 'w> {
        let id = self.transaction_id.fetch_add(1, Ordering::AcqRel) + 1;
        let read_epoch = self.current_epoch();
        let pin = self.pins.pin(read_epoch);
        let writer = self.create_graph_writer(worker, read_epoch + 1);
        Transaction::new(self, id, read_epoch, batch, Some(writer), pin)
    }

    /// Starts a read-only transaction at the current epoch.
    pub fn begin_read_only_transaction(&self) -> Transaction<'_, 'static> {
        let read_epoch = self.current_epoch();
        let pin = self.pins.pin(read_epoch);
        Transaction::new(self, crate::types::RO_TRANSACTION, read_epoch, false, None, pin)
    }

    /// Reader bound to an explicit epoch.
    pub fn create_graph_reader(&self, read_epoch: EpochId) -> GraphReader<'_> {
        let pin = self.pins.pin(read_epoch.min(self.current_epoch()));
        GraphReader::new(self, read_epoch, pin)
    }

    /// Writer that commits at an explicit epoch.
    ///
    /// May run a recycle pass first, as decided by the worker's trigger.
    pub fn create_graph_writer<'g, 'w>(
        &'g self,
        worker: &'w mut Worker,
        write_epoch: EpochId,
    ) -> GraphWriter<'g, 'w> {
        if worker.trigger.fire() {
            self.recycle_segments(worker, self.current_epoch());
        }
        GraphWriter::new(self, worker, write_epoch)
    }

    /// Id of the newest read-write transaction started so far.
    pub fn last_transaction_id(&self) -> TxnId {
        self.transaction_id.load(Ordering::Acquire)
    }

    /// Head block of a chain.
    pub fn chain_head(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<BlockAddr> {
        let (_, root) = self.root(ChainKey::new(vertex, label, dir))?;
        Ok(root.head())
    }

    pub(crate) fn root(&self, key: ChainKey) -> Result<(usize, &ChainRoot)> {
        if key.vertex >= self.max_vertices as u64 {
            return Err(SegGraphError::VertexOutOfRange(key.vertex));
        }
        self.label(key.label)?;
        let slot = key.slot(self.schema.label_count());
        Ok((slot, &self.roots[slot]))
    }

    pub(crate) fn root_at(&self, slot: usize) -> &ChainRoot {
        &self.roots[slot]
    }

    pub(crate) fn label(&self, label: LabelId) -> Result<&EdgeLabelDef> {
        self.schema
            .label(label)
            .ok_or_else(|| SegGraphError::InvalidArgument(format!("unknown edge label {label}")))
    }

    pub(crate) fn edges_at(&self, key: ChainKey, read_epoch: EpochId) -> Result<EdgeIterator<'_>> {
        let (_, root) = self.root(key)?;
        self.metrics.adjacency_scan(match key.dir {
            Dir::Out => "out",
            Dir::In => "in",
        });
        Ok(EdgeIterator::new(&self.bm, root, read_epoch))
    }

    pub(crate) fn allocate_vertex(&self) -> Result<VertexId> {
        let max = self.max_vertices as u64;
        self.vertex_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| (v < max).then_some(v + 1))
            .map_err(|_| SegGraphError::VertexOutOfRange(max))
    }

    pub(crate) fn note_vertex(&self, vertex: VertexId) {
        self.vertex_id.fetch_max(vertex + 1, Ordering::AcqRel);
    }

    /// Epoch stamped on blocks unlinked now by a writer at `write_epoch`.
    pub(crate) fn retire_epoch(&self, write_epoch: EpochId) -> EpochId {
        self.current_epoch().max(write_epoch)
    }

    pub(crate) fn block_manager(&self) -> &BlockManager {
        &self.bm
    }

    pub(crate) fn metrics(&self) -> &dyn EngineMetrics {
        self.metrics.as_ref()
    }

    pub(crate) fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }

    pub(crate) fn store_epoch(&self, epoch: EpochId) {
        self.epoch_id.store(epoch, Ordering::Release);
    }

    pub(crate) fn block_capacities(&self) -> (usize, usize, usize) {
        (
            self.initial_block_capacity,
            self.max_block_capacity,
            self.initial_index_capacity,
        )
    }

    /// Vertices handed out or referenced so far.
    pub fn vertex_count(&self) -> u64 {
        self.vertex_id.load(Ordering::Acquire)
    }

    /// Size of the vertex table.
    pub fn max_vertices(&self) -> usize {
        self.max_vertices
    }

    /// Label catalog.
    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    /// Partition served by this engine.
    pub fn partition(&self) -> PartitionInfo {
        self.partition
    }

    /// The arena allocator.
    pub fn allocator(&self) -> &BlockManager {
        &self.bm
    }

    /// Allocator usage summary.
    pub fn block_usage(&self) -> BlockUsage {
        BlockUsage {
            used_bytes: self.bm.used_bytes(),
            reserved_bytes: self.bm.reserved_bytes(),
            capacity: self.bm.capacity(),
            exhausted: self.bm.is_exhausted(),
            free: self.bm.free_block_stats(),
        }
    }

    /// Lets allocations proceed again after capacity was exhausted.
    pub fn reset_allocator_exhaustion(&self) {
        self.bm.reset_exhaustion();
    }

    /// Oldest epoch held by a live reader.
    pub fn oldest_pinned_epoch(&self) -> Option<EpochId> {
        self.pins.oldest()
    }

    /// Summary of live reader pins.
    pub fn pins(&self) -> PinSnapshot {
        self.pins.snapshot()
    }

    pub(crate) fn pin(&self, epoch: EpochId) -> PinGuard {
        self.pins.pin(epoch)
    }

    /// Walks one chain and checks its structure.
    ///
    /// Meant for quiescent chains; a concurrent writer on the same chain may
    /// cause spurious failures.
    pub fn verify_chain(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<ChainStats> {
        let (_, root) = self.root(ChainKey::new(vertex, label, dir))?;
        let mut stats = ChainStats::default();
        if let Some(index) = self.bm.convert(root.epoch_index()) {
            let index = EpochIndex::from_ref(index);
            index.check()?;
            stats.index_pairs = index.len();
            stats.committed = index.latest().map_or(0, |(_, offset)| offset);
        }
        let max_blocks = self.bm.used_bytes() / 64 + 1;
        let mut addr = root.head();
        let mut expected_cumulative: Option<u64> = None;
        while let Some(block) = self.bm.convert(addr) {
            let block = EdgeBlock::from_ref(block);
            if !block.magic_ok() {
                return Err(SegGraphError::Corruption(format!(
                    "chain ({vertex}, {label}, {dir:?}) links non-edge block {}",
                    addr.raw()
                )));
            }
            if block.num_entries() > block.capacity() {
                return Err(SegGraphError::Corruption(format!(
                    "block {} holds {} entries over capacity {}",
                    addr.raw(),
                    block.num_entries(),
                    block.capacity()
                )));
            }
            if let Some(expected) = expected_cumulative {
                if block.cumulative() != expected {
                    return Err(SegGraphError::Corruption(format!(
                        "block {} ends at entry {} but its successor starts at {expected}",
                        addr.raw(),
                        block.cumulative()
                    )));
                }
            }
            if stats.blocks == 0 && block.cumulative() < stats.committed {
                return Err(SegGraphError::Corruption(format!(
                    "chain holds {} entries but {} are committed",
                    block.cumulative(),
                    stats.committed
                )));
            }
            expected_cumulative = Some(block.prev_num_entries());
            stats.blocks += 1;
            stats.entries += block.num_entries();
            if stats.blocks > max_blocks {
                return Err(SegGraphError::Corruption(format!(
                    "chain ({vertex}, {label}, {dir:?}) does not terminate"
                )));
            }
            addr = block.prev_pointer();
        }
        if expected_cumulative.is_some_and(|rest| rest != 0) {
            return Err(SegGraphError::Corruption(format!(
                "oldest block of ({vertex}, {label}, {dir:?}) claims predecessors"
            )));
        }
        Ok(stats)
    }
}
