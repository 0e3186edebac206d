//! Per-(vertex, label, direction) edge logs.
//!
//! A chain is a singly linked list of fixed-capacity [`EdgeBlock`]s, newest
//! first, plus an [`EpochIndex`] recording how many entries each commit made
//! visible. Both hang off a [`ChainRoot`].
//!
//! Edge block layout (all words little-endian `u64`):
//!
//! ```text
//! +0   num_entries        appended entries, committed or not
//! +8   capacity
//! +16  prev_pointer       older block or 0
//! +24  prev_num_entries   cumulative count of all older blocks
//! +32  prop_size
//! +40  order
//! +48  magic
//! +56  reserved
//! +64  dst[0..capacity]   append order
//! ...  props[capacity..1] packed backward from the block end
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, SegGraphError};
use crate::primitives::arena::{Arena, BlockRef};
use crate::types::{order_for, BlockAddr, Dir, LabelId, Order, VertexId};

pub mod epoch_index;
pub mod iterator;

pub use epoch_index::EpochIndex;
pub use iterator::{Edge, EdgeIterator, Edges};

/// Bytes of the edge block header.
pub const EDGE_HEADER_BYTES: usize = 64;
/// Magic word identifying an edge block.
pub const EDGE_BLOCK_MAGIC: u64 = 0x5345_4745_4447_4531;

const NUM_ENTRIES: usize = 0;
const CAPACITY: usize = 1;
const PREV_POINTER: usize = 2;
const PREV_NUM_ENTRIES: usize = 3;
const PROP_SIZE: usize = 4;
const ORDER: usize = 5;
const MAGIC: usize = 6;
const HEADER_WORDS: usize = EDGE_HEADER_BYTES / 8;

/// Order of a block holding `capacity` entries of `prop_size` bytes each.
pub fn edge_block_order(capacity: usize, prop_size: usize) -> Order {
    order_for(EDGE_HEADER_BYTES + capacity * (8 + prop_size))
}

/// Atomic head and epoch-index pointers of one chain.
#[derive(Debug, Default)]
pub struct ChainRoot {
    pub(crate) head: AtomicU64,
    pub(crate) epoch_index: AtomicU64,
}

impl ChainRoot {
    /// Newest block, or null for an empty chain.
    pub fn head(&self) -> BlockAddr {
        BlockAddr::from_raw(self.head.load(Ordering::Acquire))
    }

    /// Epoch index block, or null before the first commit.
    pub fn epoch_index(&self) -> BlockAddr {
        BlockAddr::from_raw(self.epoch_index.load(Ordering::Acquire))
    }

    pub(crate) fn set_head(&self, addr: BlockAddr) {
        self.head.store(addr.raw(), Ordering::Release);
    }

    pub(crate) fn set_epoch_index(&self, addr: BlockAddr) {
        self.epoch_index.store(addr.raw(), Ordering::Release);
    }
}

/// Identifies one chain.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChainKey {
    /// Owning vertex.
    pub vertex: VertexId,
    /// Edge label.
    pub label: LabelId,
    /// Direction.
    pub dir: Dir,
}

impl ChainKey {
    /// Creates a key.
    pub fn new(vertex: VertexId, label: LabelId, dir: Dir) -> Self {
        Self { vertex, label, dir }
    }

    /// Position in a root table with `labels` edge labels.
    pub(crate) fn slot(&self, labels: usize) -> usize {
        (self.vertex as usize * labels + self.label as usize) * 2 + self.dir.slot()
    }
}

/// View of one edge block.
#[derive(Clone, Copy)]
pub struct EdgeBlock<'a> {
    block: BlockRef<'a>,
}

impl<'a> EdgeBlock<'a> {
    /// Opens an existing block, checking its magic word.
    ///
    /// Works on any arena mapping of the same backing store, which lets a
    /// process that attached with [`crate::SharedBacking::open`] read chains
    /// by offset.
    pub fn open(arena: &'a Arena, addr: BlockAddr) -> Result<Self> {
        if addr.is_null() {
            return Err(SegGraphError::InvalidArgument("null edge block".into()));
        }
        let block = Self::from_ref(BlockRef::new(arena, addr));
        if !block.magic_ok() {
            return Err(SegGraphError::Corruption(format!(
                "block at {} is not an edge block",
                addr.raw()
            )));
        }
        Ok(block)
    }

    pub(crate) fn from_ref(block: BlockRef<'a>) -> Self {
        Self { block }
    }

    /// Formats a freshly allocated block. The caller publishes it.
    pub(crate) fn init(
        block: BlockRef<'a>,
        capacity: usize,
        prop_size: usize,
        order: Order,
        prev: BlockAddr,
        prev_num_entries: u64,
    ) -> Self {
        let words = [
            (NUM_ENTRIES, 0),
            (CAPACITY, capacity as u64),
            (PREV_POINTER, prev.raw()),
            (PREV_NUM_ENTRIES, prev_num_entries),
            (PROP_SIZE, prop_size as u64),
            (ORDER, u64::from(order)),
            (MAGIC, EDGE_BLOCK_MAGIC),
            (7, 0),
        ];
        for (idx, value) in words {
            block.word(idx).store(value, Ordering::Relaxed);
        }
        Self { block }
    }

    /// Address of this block.
    pub fn addr(&self) -> BlockAddr {
        self.block.addr()
    }

    /// Appended entries, including uncommitted ones.
    pub fn num_entries(&self) -> u64 {
        self.block.word(NUM_ENTRIES).load(Ordering::Acquire)
    }

    /// Entry capacity.
    pub fn capacity(&self) -> u64 {
        self.block.word(CAPACITY).load(Ordering::Relaxed)
    }

    /// Older block in the chain.
    pub fn prev_pointer(&self) -> BlockAddr {
        BlockAddr::from_raw(self.block.word(PREV_POINTER).load(Ordering::Relaxed))
    }

    /// Entries held by all older blocks.
    pub fn prev_num_entries(&self) -> u64 {
        self.block.word(PREV_NUM_ENTRIES).load(Ordering::Relaxed)
    }

    /// Entries in this block and all older ones.
    pub fn cumulative(&self) -> u64 {
        self.prev_num_entries() + self.num_entries()
    }

    /// Property bytes per entry.
    pub fn prop_size(&self) -> usize {
        self.block.word(PROP_SIZE).load(Ordering::Relaxed) as usize
    }

    /// Block order.
    pub fn order(&self) -> Order {
        self.block.word(ORDER).load(Ordering::Relaxed) as Order
    }

    pub(crate) fn magic_ok(&self) -> bool {
        self.block.word(MAGIC).load(Ordering::Relaxed) == EDGE_BLOCK_MAGIC
    }

    fn block_size(&self) -> usize {
        1usize << self.order()
    }

    /// Destination of entry `k` (0-based, append order).
    pub fn dst(&self, k: usize) -> VertexId {
        self.block.word(HEADER_WORDS + k).load(Ordering::Relaxed)
    }

    /// Property record at 1-based `index`.
    pub fn prop_bytes(&self, index: usize) -> &'a [u8] {
        let size = self.prop_size();
        self.block.bytes(self.block_size() - index * size, size)
    }

    /// Writes entry `k` without publishing it.
    pub(crate) fn write_entry(&self, k: usize, dst: VertexId, data: &[u8]) {
        self.block.word(HEADER_WORDS + k).store(dst, Ordering::Relaxed);
        if !data.is_empty() {
            self.block.write(self.block_size() - (k + 1) * data.len(), data);
        }
    }

    pub(crate) fn publish_entries(&self, count: u64) {
        self.block.word(NUM_ENTRIES).store(count, Ordering::Release);
    }

    /// Copies the first `count` entries of `src` into this block at `at`.
    pub(crate) fn copy_entries_from(&self, src: &EdgeBlock<'_>, count: usize, at: usize) {
        let size = self.prop_size();
        for k in 0..count {
            self.block
                .word(HEADER_WORDS + at + k)
                .store(src.dst(k), Ordering::Relaxed);
        }
        if size > 0 && count > 0 {
            let arena = self.block.arena();
            let from = src.addr().offset(src.block_size() - count * size);
            let to = self
                .addr()
                .offset(self.block_size() - (at + count) * size);
            arena.copy_bytes(from, to, count * size);
        }
    }
}

/// Result of [`crate::SegGraph::verify_chain`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChainStats {
    /// Blocks in the chain.
    pub blocks: usize,
    /// Appended entries across all blocks.
    pub entries: u64,
    /// Entries visible at the newest indexed epoch.
    pub committed: u64,
    /// Pairs in the epoch index.
    pub index_pairs: usize,
}
