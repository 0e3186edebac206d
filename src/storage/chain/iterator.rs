use smallvec::SmallVec;

use crate::storage::block_manager::BlockManager;
use crate::storage::chain::{ChainRoot, EdgeBlock, EpochIndex};
use crate::storage::schema::PropertyDef;
use crate::types::{EpochId, VertexId, VERTEX_TOMBSTONE};

type BlockPath<'a> = SmallVec<[(EdgeBlock<'a>, usize); 8]>;

/// Entry offset visible at `read_epoch`; zero when nothing is.
fn visible_end(bm: &BlockManager, root: &ChainRoot, read_epoch: EpochId) -> u64 {
    bm.convert(root.epoch_index())
        .and_then(|index| EpochIndex::from_ref(index).resolve(read_epoch))
        .unwrap_or(0)
}

/// Blocks holding the first `end` entries of the chain, oldest first, each
/// with its visible entry count.
fn visible_path<'a>(bm: &'a BlockManager, root: &ChainRoot, end: u64) -> BlockPath<'a> {
    let mut path = BlockPath::new();
    let mut upper = end;
    let mut addr = root.head();
    while upper > 0 {
        let Some(block) = bm.convert(addr) else {
            break;
        };
        let block = EdgeBlock::from_ref(block);
        let prev = block.prev_num_entries();
        if prev < upper {
            path.push((block, (upper - prev) as usize));
            upper = prev;
        }
        addr = block.prev_pointer();
    }
    path.reverse();
    path
}

/// Cursor over the entries of one chain visible at a fixed epoch.
///
/// Entries come back in append order. Blocks and entries appended after the
/// snapshot, committed or not, are never touched.
pub struct EdgeIterator<'a> {
    bm: &'a BlockManager,
    root: &'a ChainRoot,
    read_epoch: EpochId,
    end: u64,
    blocks: BlockPath<'a>,
    block_idx: usize,
    cursor: usize,
    visible: usize,
    allocated_edge_num: u64,
}

impl<'a> EdgeIterator<'a> {
    pub(crate) fn new(bm: &'a BlockManager, root: &'a ChainRoot, read_epoch: EpochId) -> Self {
        let end = visible_end(bm, root, read_epoch);
        let blocks = if end > 0 {
            visible_path(bm, root, end)
        } else {
            BlockPath::new()
        };
        let mut iter = Self {
            bm,
            root,
            read_epoch,
            end,
            blocks,
            block_idx: 0,
            cursor: 0,
            visible: 0,
            allocated_edge_num: 0,
        };
        if !iter.blocks.is_empty() {
            iter.enter_block(0);
        }
        iter
    }

    fn enter_block(&mut self, idx: usize) {
        let (block, visible) = self.blocks[idx];
        self.block_idx = idx;
        self.cursor = 0;
        self.visible = visible;
        self.allocated_edge_num = block.num_entries();
    }

    fn switch_block(&mut self) {
        let next = self.block_idx + 1;
        if next < self.blocks.len() {
            self.enter_block(next);
        } else {
            self.block_idx = self.blocks.len();
        }
    }

    fn current(&self) -> Option<&EdgeBlock<'a>> {
        self.blocks.get(self.block_idx).map(|(block, _)| block)
    }

    /// Snapshot epoch of this iterator.
    pub fn read_epoch(&self) -> EpochId {
        self.read_epoch
    }

    /// Whether the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.block_idx < self.blocks.len()
    }

    /// Advances one entry. Calling this on an invalid cursor is a no-op.
    pub fn next(&mut self) {
        if !self.valid() {
            return;
        }
        self.cursor += 1;
        if self.cursor >= self.visible {
            self.switch_block();
        }
    }

    /// Destination of the current entry, or [`VERTEX_TOMBSTONE`] when exhausted.
    pub fn dst_id(&self) -> VertexId {
        match self.current() {
            Some(block) => block.dst(self.cursor),
            None => VERTEX_TOMBSTONE,
        }
    }

    /// Whether nothing is visible at this snapshot.
    pub fn empty(&self) -> bool {
        self.end == 0
    }

    /// Visible entry count, resolved again from the chain root.
    ///
    /// Entry offsets count every entry before them in the chain, so the
    /// resolved offset is the count.
    pub fn size(&self) -> usize {
        visible_end(self.bm, self.root, self.read_epoch) as usize
    }

    /// 1-based property slot of the current entry.
    ///
    /// Counted against the entries allocated in the block when the cursor
    /// entered it, so slots stay stable while a writer keeps appending.
    pub fn edge_data_index(&self) -> usize {
        if !self.valid() {
            return 0;
        }
        let remaining = self.allocated_edge_num as usize - self.cursor - 1;
        self.allocated_edge_num as usize - remaining
    }

    /// Property record of the current entry; empty when exhausted.
    pub fn edge_data(&self) -> &'a [u8] {
        self.edge_data_from_index(self.edge_data_index())
    }

    /// Property record at a 1-based slot of the current block.
    pub fn edge_data_from_index(&self, index: usize) -> &'a [u8] {
        match self.current() {
            Some(block) if index > 0 => block.prop_bytes(index),
            _ => &[],
        }
    }

    /// Bytes of one property of the current entry.
    pub fn edge_property(&self, prop: &PropertyDef) -> &'a [u8] {
        self.edge_data().get(prop.range()).unwrap_or(&[])
    }

    /// Consumes the cursor into a standard iterator.
    pub fn edges(self) -> Edges<'a> {
        Edges { inner: self }
    }
}

/// One visible entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Edge<'a> {
    /// Destination vertex.
    pub dst: VertexId,
    /// Property record.
    pub data: &'a [u8],
}

/// [`Iterator`] adapter over an [`EdgeIterator`].
pub struct Edges<'a> {
    inner: EdgeIterator<'a>,
}

impl<'a> Iterator for Edges<'a> {
    type Item = Edge<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.inner.valid() {
            return None;
        }
        let edge = Edge {
            dst: self.inner.dst_id(),
            data: self.inner.edge_data(),
        };
        EdgeIterator::next(&mut self.inner);
        Some(edge)
    }
}
