use tracing::debug;

use crate::error::{Result, SegGraphError};
use crate::primitives::concurrency::PinGuard;
use crate::storage::chain::{ChainKey, EdgeIterator};
use crate::types::{Dir, EpochId, LabelId, TxnId, VertexId, RO_TRANSACTION};

use super::{GraphWriter, SegGraph};

/// A snapshot plus, for read-write transactions, a pending write set.
///
/// Reads always see the snapshot taken at creation; the transaction's own
/// appends only become visible to new snapshots after [`Transaction::commit`].
/// Dropping an uncommitted read-write transaction aborts it.
pub struct Transaction<'g, 'w> {
    graph: &'g SegGraph,
    id: TxnId,
    read_epoch: EpochId,
    is_batch_loader: bool,
    writer: Option<GraphWriter<'g, 'w>>,
    _pin: PinGuard,
}

impl<'g, 'w> Transaction<'g, 'w> {
    pub(crate) fn new(
        graph: &'g SegGraph,
        id: TxnId,
        read_epoch: EpochId,
        is_batch_loader: bool,
        writer: Option<GraphWriter<'g, 'w>>,
        pin: PinGuard,
    ) -> Self {
        Self {
            graph,
            id,
            read_epoch,
            is_batch_loader,
            writer,
            _pin: pin,
        }
    }

    /// Transaction id; [`RO_TRANSACTION`] for read-only transactions.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Snapshot epoch.
    pub fn read_epoch(&self) -> EpochId {
        self.read_epoch
    }

    /// Whether this transaction may write.
    pub fn is_read_write(&self) -> bool {
        self.writer.is_some()
    }

    /// Whether this transaction was opened as a batch loader.
    pub fn is_batch_loader(&self) -> bool {
        self.is_batch_loader
    }

    /// Adjacency of `(vertex, label, dir)` at the snapshot.
    pub fn edges(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<EdgeIterator<'_>> {
        self.graph
            .edges_at(ChainKey::new(vertex, label, dir), self.read_epoch)
    }

    /// Visible entry count of one chain at the snapshot.
    pub fn degree(&self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<usize> {
        Ok(self.edges(vertex, label, dir)?.size())
    }

    fn writer(&mut self) -> Result<&mut GraphWriter<'g, 'w>> {
        self.writer.as_mut().ok_or_else(|| {
            SegGraphError::InvalidArgument("read-only transaction cannot write".into())
        })
    }

    /// See [`GraphWriter::put_edge`].
    pub fn put_edge(
        &mut self,
        src: VertexId,
        label: LabelId,
        dir: Dir,
        dst: VertexId,
        data: &[u8],
    ) -> Result<()> {
        self.writer()?.put_edge(src, label, dir, dst, data)
    }

    /// See [`GraphWriter::add_edge`].
    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, label: LabelId, data: &[u8]) -> Result<()> {
        self.writer()?.add_edge(src, dst, label, data)
    }

    /// See [`GraphWriter::new_vertex`].
    pub fn new_vertex(&mut self) -> Result<VertexId> {
        self.writer()?.new_vertex()
    }

    /// See [`GraphWriter::compact_chain`].
    pub fn compact_chain(&mut self, vertex: VertexId, label: LabelId, dir: Dir) -> Result<bool> {
        self.writer()?.compact_chain(vertex, label, dir)
    }

    /// Publishes the write set at a fresh epoch and makes it current.
    ///
    /// Returns the new epoch, or the read epoch when nothing was written.
    pub fn commit(mut self) -> Result<EpochId> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(self.read_epoch);
        };
        if !writer.has_mutations() {
            writer.abort();
            return Ok(self.read_epoch);
        }
        let graph = self.graph;
        let _guard = graph.commit_lock().lock();
        let epoch = graph.current_epoch() + 1;
        let chains = writer.publish_locked(epoch)?;
        graph.store_epoch(epoch);
        debug!(
            txn = self.id,
            read_epoch = self.read_epoch,
            epoch,
            chains,
            batch = self.is_batch_loader,
            "graph.txn.commit"
        );
        Ok(epoch)
    }

    /// Discards the write set.
    pub fn abort(mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if self.id != RO_TRANSACTION {
            debug!(txn = self.id, "graph.txn.abort");
        }
    }
}
