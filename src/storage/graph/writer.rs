use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, SegGraphError};
use crate::storage::chain::epoch_index::{index_order, PublishSlot};
use crate::storage::chain::{edge_block_order, ChainKey, EdgeBlock, EpochIndex};
use crate::types::{BlockAddr, Dir, EpochId, LabelId, Order, VertexId};

use super::{SegGraph, Worker};

/// What a writer changed on one chain, enough to undo it.
struct ChainUndo {
    slot: usize,
    old_head: BlockAddr,
    old_head_entries: u64,
    new_blocks: Vec<(BlockAddr, Order)>,
}

/// Index work planned for one chain before anything is published.
enum IndexPlan {
    InPlace {
        index: BlockAddr,
        offset: u64,
    },
    Fresh {
        slot: usize,
        addr: BlockAddr,
        order: Order,
        capacity: usize,
        offset: u64,
        old: Option<(BlockAddr, Order)>,
    },
}

/// Appends edges to chains and publishes them at one epoch.
///
/// Appends land in place and stay invisible to readers until
/// [`GraphWriter::commit`] records them in each touched chain's epoch
/// index. Dropping an uncommitted writer aborts it. Callers guarantee at
/// most one writer per chain at a time.
pub struct GraphWriter<'g, 'w> {
    graph: &'g SegGraph,
    worker: &'w mut Worker,
    write_epoch: EpochId,
    undo: Vec<ChainUndo>,
    touched: HashMap<usize, usize>,
    finished: bool,
}

impl<'g, 'w> GraphWriter<'g, 'w> {
    pub(crate) fn new(graph: &'g SegGraph, worker: &'w mut Worker, write_epoch: EpochId) -> Self {
        Self {
            graph,
            worker,
            write_epoch,
            undo: Vec::new(),
            touched: HashMap::new(),
            finished: false,
        }
    }

    /// Epoch this writer commits at.
    pub fn write_epoch(&self) -> EpochId {
        self.write_epoch
    }

    /// Number of chains with uncommitted appends.
    pub fn touched_chains(&self) -> usize {
        self.undo.len()
    }

    /// Whether any append happened.
    pub fn has_mutations(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Appends one entry to the chain of `(src, label, dir)`.
    pub fn put_edge(
        &mut self,
        src: VertexId,
        label: LabelId,
        dir: Dir,
        dst: VertexId,
        data: &[u8],
    ) -> Result<()> {
        let graph = self.graph;
        let key = ChainKey::new(src, label, dir);
        let prop_size = graph.label(label)?.prop_size;
        if data.len() != prop_size {
            return Err(SegGraphError::InvalidArgument(format!(
                "label {label} expects {prop_size} property bytes, got {}",
                data.len()
            )));
        }
        let (slot, root) = graph.root(key)?;
        self.note_touch(slot);
        let bm = graph.block_manager();

        let head = bm.convert(root.head()).map(EdgeBlock::from_ref);
        if let Some(block) = head {
            let n = block.num_entries();
            if n < block.capacity() {
                block.write_entry(n as usize, dst, data);
                block.publish_entries(n + 1);
                graph.note_vertex(src);
                return Ok(());
            }
        }

        let (initial, max, _) = graph.block_capacities();
        let (capacity, prev, prev_num_entries) = match head {
            Some(block) => (
                (block.capacity() as usize * 2).clamp(initial, max.max(initial)),
                block.addr(),
                block.cumulative(),
            ),
            None => (initial, BlockAddr::NULL, 0),
        };
        let order = edge_block_order(capacity, prop_size);
        let addr = bm.alloc(&mut self.worker.local, order)?;
        let Some(raw) = bm.convert(addr) else {
            return Err(SegGraphError::CapacityExhausted);
        };
        let block = EdgeBlock::init(raw, capacity, prop_size, order, prev, prev_num_entries);
        block.write_entry(0, dst, data);
        block.publish_entries(1);
        root.set_head(addr);
        if let Some(&idx) = self.touched.get(&slot) {
            self.undo[idx].new_blocks.push((addr, order));
        }
        graph.note_vertex(src);
        Ok(())
    }

    /// Adds `src -> dst`: an OUT entry on `src` and an IN entry on `dst`,
    /// plus the reverse pair when the label is undirected.
    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, label: LabelId, data: &[u8]) -> Result<()> {
        let undirected = self.graph.label(label)?.undirected;
        self.graph.root(ChainKey::new(src, label, Dir::Out))?;
        self.graph.root(ChainKey::new(dst, label, Dir::In))?;
        self.put_edge(src, label, Dir::Out, dst, data)?;
        self.put_edge(dst, label, Dir::In, src, data)?;
        if undirected && src != dst {
            self.put_edge(dst, label, Dir::Out, src, data)?;
            self.put_edge(src, label, Dir::In, dst, data)?;
        }
        Ok(())
    }

    /// Allocates a fresh vertex id.
    pub fn new_vertex(&mut self) -> Result<VertexId> {
        self.graph.allocate_vertex()
    }

    fn note_touch(&mut self, slot: usize) {
        if self.touched.contains_key(&slot) {
            return;
        }
        let root = self.graph.root_at(slot);
        let old_head = root.head();
        let old_head_entries = self
            .graph
            .block_manager()
            .convert(old_head)
            .map_or(0, |b| EdgeBlock::from_ref(b).num_entries());
        self.touched.insert(slot, self.undo.len());
        self.undo.push(ChainUndo {
            slot,
            old_head,
            old_head_entries,
            new_blocks: Vec::new(),
        });
    }

    /// Rewrites a multi-block chain into a single block.
    ///
    /// Logical entry offsets do not change, so the epoch index stays valid
    /// and every snapshot reads the same entries before and after. The old
    /// blocks are retired through deferred recycling. Returns `false` when
    /// there was nothing to merge.
    pub fn compact_chain(&mut self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<bool> {
        let graph = self.graph;
        let (slot, root) = graph.root(ChainKey::new(vertex, label, dir))?;
        if self.touched.contains_key(&slot) {
            return Err(SegGraphError::InvalidArgument(format!(
                "chain ({vertex}, {label}, {dir:?}) has uncommitted appends in this writer"
            )));
        }
        let bm = graph.block_manager();
        let committed = bm
            .convert(root.epoch_index())
            .and_then(|idx| EpochIndex::from_ref(idx).latest())
            .map_or(0, |(_, offset)| offset);
        let Some(head) = bm.convert(root.head()).map(EdgeBlock::from_ref) else {
            return Ok(false);
        };
        if committed == 0 || head.prev_pointer().is_null() {
            return Ok(false);
        }
        if head.cumulative() != committed {
            return Err(SegGraphError::InvalidArgument(format!(
                "chain ({vertex}, {label}, {dir:?}) has uncommitted entries"
            )));
        }

        let mut blocks = Vec::new();
        let mut addr = head.addr();
        while let Some(raw) = bm.convert(addr) {
            let block = EdgeBlock::from_ref(raw);
            addr = block.prev_pointer();
            blocks.push(block);
        }
        blocks.reverse();

        let (initial, _, _) = graph.block_capacities();
        let prop_size = head.prop_size();
        let capacity = (committed as usize).next_power_of_two().max(initial);
        let order = edge_block_order(capacity, prop_size);
        let new_addr = bm.alloc(&mut self.worker.local, order)?;
        let Some(raw) = bm.convert(new_addr) else {
            return Err(SegGraphError::CapacityExhausted);
        };
        let merged = EdgeBlock::init(raw, capacity, prop_size, order, BlockAddr::NULL, 0);
        let mut at = 0;
        for block in &blocks {
            let n = block.num_entries() as usize;
            merged.copy_entries_from(block, n, at);
            at += n;
        }
        merged.publish_entries(at as u64);
        root.set_head(new_addr);

        let freed_epoch = graph.retire_epoch(self.write_epoch);
        for block in &blocks {
            self.worker.retire_block(block.addr(), block.order(), freed_epoch);
        }
        debug!(
            vertex,
            label,
            dir = ?dir,
            blocks = blocks.len(),
            entries = at,
            "graph.chain.compact"
        );
        Ok(true)
    }

    /// Publishes every touched chain at this writer's epoch.
    ///
    /// Does not advance the global epoch; the coordinator does that with
    /// [`SegGraph::publish_epoch`]. On error nothing is published and the
    /// writer is rolled back.
    pub fn commit(mut self) -> Result<EpochId> {
        let epoch = self.write_epoch;
        let graph = self.graph;
        let _guard = graph.commit_lock().lock();
        self.publish_locked(epoch)?;
        Ok(epoch)
    }

    /// Publishes all touched chains at `epoch`. The commit lock must be held.
    pub(crate) fn publish_locked(&mut self, epoch: EpochId) -> Result<usize> {
        let graph = self.graph;
        let plans = self.reserve(epoch)?;
        let bm = graph.block_manager();
        let freed_epoch = graph.retire_epoch(epoch);
        let chains = plans.len();
        for plan in plans {
            match plan {
                IndexPlan::InPlace { index, offset } => {
                    if let Some(raw) = bm.convert(index) {
                        EpochIndex::from_ref(raw).publish(epoch, offset);
                    }
                }
                IndexPlan::Fresh {
                    slot,
                    addr,
                    order,
                    capacity,
                    offset,
                    old,
                } => {
                    let Some(raw) = bm.convert(addr) else {
                        continue;
                    };
                    let fresh = EpochIndex::init(raw, capacity, order);
                    if let Some(old_index) = old.and_then(|(a, _)| bm.convert(a)) {
                        EpochIndex::from_ref(old_index).copy_into(&fresh);
                    }
                    fresh.publish(epoch, offset);
                    graph.root_at(slot).set_epoch_index(addr);
                    if let Some((old_addr, old_order)) = old {
                        self.worker.retire_block(old_addr, old_order, freed_epoch);
                    }
                }
            }
        }
        self.undo.clear();
        self.touched.clear();
        self.finished = true;
        graph.metrics().epoch_committed(chains);
        debug!(epoch, chains, "graph.commit");
        Ok(chains)
    }

    fn reserve(&mut self, epoch: EpochId) -> Result<Vec<IndexPlan>> {
        let graph = self.graph;
        let bm = graph.block_manager();
        let (_, _, initial_index) = graph.block_capacities();
        let mut plans = Vec::with_capacity(self.undo.len());
        for undo in &self.undo {
            let root = graph.root_at(undo.slot);
            let offset = bm
                .convert(root.head())
                .map_or(0, |b| EdgeBlock::from_ref(b).cumulative());
            let existing = bm.convert(root.epoch_index()).map(EpochIndex::from_ref);
            let (capacity, old) = match existing {
                None => (initial_index, None),
                Some(index) => match index.slot_for(epoch) {
                    Ok(PublishSlot::Replace | PublishSlot::Append) => {
                        plans.push(IndexPlan::InPlace {
                            index: root.epoch_index(),
                            offset,
                        });
                        continue;
                    }
                    Ok(PublishSlot::Full) => (
                        index.capacity() * 2,
                        Some((root.epoch_index(), index.order())),
                    ),
                    Err(err) => {
                        Self::release_plans(graph, self.worker, &plans);
                        return Err(err);
                    }
                },
            };
            let order = index_order(capacity);
            let addr = match bm.alloc(&mut self.worker.local, order) {
                Ok(addr) if !addr.is_null() => addr,
                Ok(_) => {
                    Self::release_plans(graph, self.worker, &plans);
                    return Err(SegGraphError::CapacityExhausted);
                }
                Err(err) => {
                    Self::release_plans(graph, self.worker, &plans);
                    return Err(err);
                }
            };
            plans.push(IndexPlan::Fresh {
                slot: undo.slot,
                addr,
                order,
                capacity,
                offset,
                old,
            });
        }
        Ok(plans)
    }

    /// Frees index blocks reserved for a commit that will not happen. They
    /// were never published, so they go straight back to the free lists.
    fn release_plans(graph: &SegGraph, worker: &mut Worker, plans: &[IndexPlan]) {
        for plan in plans {
            if let IndexPlan::Fresh { addr, order, .. } = plan {
                graph.block_manager().free(&mut worker.local, *addr, *order);
            }
        }
    }

    /// Discards every uncommitted append.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.undo.is_empty() {
            return;
        }
        let graph = self.graph;
        let bm = graph.block_manager();
        let freed_epoch = graph.retire_epoch(self.write_epoch);
        let chains = self.undo.len();
        for undo in self.undo.drain(..).rev() {
            let root = graph.root_at(undo.slot);
            root.set_head(undo.old_head);
            if let Some(raw) = bm.convert(undo.old_head) {
                EdgeBlock::from_ref(raw).publish_entries(undo.old_head_entries);
            }
            for (addr, order) in undo.new_blocks {
                self.worker.retire_block(addr, order, freed_epoch);
            }
        }
        self.touched.clear();
        graph.metrics().write_aborted();
        debug!(epoch = self.write_epoch, chains, "graph.abort");
    }
}

impl Drop for GraphWriter<'_, '_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
