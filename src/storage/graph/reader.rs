use crate::error::Result;
use crate::primitives::concurrency::PinGuard;
use crate::storage::chain::{ChainKey, EdgeIterator};
use crate::types::{Dir, EpochId, LabelId, VertexId};

use super::SegGraph;

/// Read handle bound to an explicit epoch.
///
/// Holds a pin for its lifetime, so blocks it can reach are not recycled
/// while it or any iterator borrowed from it is alive.
pub struct GraphReader<'g> {
    graph: &'g SegGraph,
    read_epoch: EpochId,
    _pin: PinGuard,
}

impl<'g> GraphReader<'g> {
    pub(crate) fn new(graph: &'g SegGraph, read_epoch: EpochId, pin: PinGuard) -> Self {
        Self {
            graph,
            read_epoch,
            _pin: pin,
        }
    }

    /// Snapshot epoch.
    pub fn read_epoch(&self) -> EpochId {
        self.read_epoch
    }

    /// Adjacency of `(vertex, label, dir)` at the snapshot.
    pub fn edges(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<EdgeIterator<'_>> {
        self.graph
            .edges_at(ChainKey::new(vertex, label, dir), self.read_epoch)
    }

    /// Visible entry count of one chain.
    pub fn degree(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<usize> {
        Ok(self.edges(vertex, label, dir)?.size())
    }

    /// Destinations visible on one chain, in append order.
    pub fn neighbors(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<Vec<VertexId>> {
        Ok(self
            .edges(vertex, label, dir)?
            .edges()
            .map(|edge| edge.dst)
            .collect())
    }
}
