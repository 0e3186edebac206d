//! Per-chain `(epoch, cumulative_offset)` log.
//!
//! Layout: four header words (`num_entries`, `capacity`, `order`, `magic`)
//! followed by pairs, oldest first. Pairs are written before `num_entries`
//! is bumped with a release store, so readers never see a torn pair.

use std::sync::atomic::Ordering;

use crate::error::{Result, SegGraphError};
use crate::primitives::arena::BlockRef;
use crate::types::{order_for, EpochId, Order};

/// Magic word identifying an epoch index block.
pub const EPOCH_INDEX_MAGIC: u64 = 0x5345_4745_5049_4458;

const NUM_ENTRIES: usize = 0;
const CAPACITY: usize = 1;
const ORDER: usize = 2;
const MAGIC: usize = 3;
const HEADER_WORDS: usize = 4;

/// Order of an index block with room for `capacity` pairs.
pub fn index_order(capacity: usize) -> Order {
    order_for((HEADER_WORDS + capacity * 2) * 8)
}

/// How a publish at some epoch lands in an index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PublishSlot {
    /// Overwrite the newest pair, which carries the same epoch.
    Replace,
    /// Append after the newest pair.
    Append,
    /// Append, but the block is full and must be grown first.
    Full,
}

/// View of one epoch index block.
#[derive(Clone, Copy)]
pub struct EpochIndex<'a> {
    block: BlockRef<'a>,
}

impl<'a> EpochIndex<'a> {
    pub(crate) fn from_ref(block: BlockRef<'a>) -> Self {
        Self { block }
    }

    pub(crate) fn init(block: BlockRef<'a>, capacity: usize, order: Order) -> Self {
        block.word(NUM_ENTRIES).store(0, Ordering::Relaxed);
        block.word(CAPACITY).store(capacity as u64, Ordering::Relaxed);
        block.word(ORDER).store(u64::from(order), Ordering::Relaxed);
        block.word(MAGIC).store(EPOCH_INDEX_MAGIC, Ordering::Relaxed);
        Self { block }
    }

    /// Published pairs.
    pub fn len(&self) -> usize {
        self.block.word(NUM_ENTRIES).load(Ordering::Acquire) as usize
    }

    /// Whether no pair was published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pair capacity.
    pub fn capacity(&self) -> usize {
        self.block.word(CAPACITY).load(Ordering::Relaxed) as usize
    }

    /// Block order.
    pub fn order(&self) -> Order {
        self.block.word(ORDER).load(Ordering::Relaxed) as Order
    }

    pub(crate) fn magic_ok(&self) -> bool {
        self.block.word(MAGIC).load(Ordering::Relaxed) == EPOCH_INDEX_MAGIC
    }

    /// Pair `i`, oldest first. `i` must be below [`EpochIndex::len`].
    pub fn entry(&self, i: usize) -> (EpochId, u64) {
        let base = HEADER_WORDS + i * 2;
        (
            self.block.word(base).load(Ordering::Relaxed),
            self.block.word(base + 1).load(Ordering::Acquire),
        )
    }

    /// Newest pair, if any.
    pub fn latest(&self) -> Option<(EpochId, u64)> {
        match self.len() {
            0 => None,
            n => Some(self.entry(n - 1)),
        }
    }

    /// All published pairs, oldest first.
    pub fn entries(&self) -> Vec<(EpochId, u64)> {
        (0..self.len()).map(|i| self.entry(i)).collect()
    }

    /// Visible entry count at `read_epoch`; `None` when nothing qualifies.
    pub fn resolve(&self, read_epoch: EpochId) -> Option<u64> {
        (0..self.len())
            .rev()
            .map(|i| self.entry(i))
            .find(|&(epoch, _)| epoch <= read_epoch)
            .map(|(_, offset)| offset)
    }

    pub(crate) fn slot_for(&self, epoch: EpochId) -> Result<PublishSlot> {
        match self.latest() {
            Some((newest, _)) if newest > epoch => Err(SegGraphError::EpochRegression {
                requested: epoch,
                published: newest,
            }),
            Some((newest, _)) if newest == epoch => Ok(PublishSlot::Replace),
            _ if self.len() < self.capacity() => Ok(PublishSlot::Append),
            _ => Ok(PublishSlot::Full),
        }
    }

    /// Records `offset` at `epoch`; space must have been checked with
    /// [`EpochIndex::slot_for`].
    pub(crate) fn publish(&self, epoch: EpochId, offset: u64) {
        let len = self.len();
        if let Some((newest, _)) = self.latest() {
            if newest == epoch {
                let base = HEADER_WORDS + (len - 1) * 2;
                self.block.word(base + 1).store(offset, Ordering::Release);
                return;
            }
        }
        debug_assert!(len < self.capacity(), "epoch index overflow");
        let base = HEADER_WORDS + len * 2;
        self.block.word(base).store(epoch, Ordering::Relaxed);
        self.block.word(base + 1).store(offset, Ordering::Relaxed);
        self.block
            .word(NUM_ENTRIES)
            .store(len as u64 + 1, Ordering::Release);
    }

    /// Copies every pair into an unpublished, larger index.
    pub(crate) fn copy_into(&self, target: &EpochIndex<'_>) {
        let len = self.len();
        debug_assert!(len <= target.capacity());
        for i in 0..len {
            let (epoch, offset) = self.entry(i);
            let base = HEADER_WORDS + i * 2;
            target.block.word(base).store(epoch, Ordering::Relaxed);
            target.block.word(base + 1).store(offset, Ordering::Relaxed);
        }
        target
            .block
            .word(NUM_ENTRIES)
            .store(len as u64, Ordering::Release);
    }

    /// Checks magic and the monotonicity of the pairs.
    pub(crate) fn check(&self) -> Result<()> {
        if !self.magic_ok() {
            return Err(SegGraphError::Corruption(format!(
                "block at {} is not an epoch index",
                self.block.addr().raw()
            )));
        }
        let pairs = self.entries();
        for w in pairs.windows(2) {
            let ((e0, o0), (e1, o1)) = (w[0], w[1]);
            if e1 <= e0 || o1 < o0 {
                return Err(SegGraphError::Corruption(format!(
                    "epoch index pairs ({e0}, {o0}) and ({e1}, {o1}) are out of order"
                )));
            }
        }
        Ok(())
    }
}
