//! Identifier types and engine-wide sentinels.

/// Vertex identifier local to one engine instance.
pub type VertexId = u64;

/// Logical timestamp marking a committed batch of mutations.
pub type EpochId = u64;

/// Identifier handed to read-write transactions.
pub type TxnId = u64;

/// log2 of a block size in bytes.
pub type Order = u8;

/// Index of an edge label in the graph schema.
pub type LabelId = u16;

/// Returned by iterators whose cursor is exhausted.
pub const VERTEX_TOMBSTONE: VertexId = u64::MAX;

/// Transaction id shared by every read-only transaction.
pub const RO_TRANSACTION: TxnId = u64::MAX - 1;

/// Offset of a block inside the arena; zero means "null".
///
/// Addresses are relative to the arena base so they stay valid when the
/// region is mapped at a different address or by another process.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockAddr(u64);

impl BlockAddr {
    /// Address that never refers to a live block.
    pub const NULL: BlockAddr = BlockAddr(0);

    /// Creates an address from its raw offset.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw byte offset.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` for the null sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn offset(self, bytes: usize) -> u64 {
        self.0 + bytes as u64
    }
}

/// Direction of an adjacency chain relative to its owning vertex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Dir {
    /// Edges leaving the vertex.
    Out,
    /// Edges arriving at the vertex.
    In,
}

impl Dir {
    pub(crate) fn slot(self) -> usize {
        match self {
            Dir::Out => 0,
            Dir::In => 1,
        }
    }
}

/// Smallest power-of-two order that holds `bytes`.
pub(crate) fn order_for(bytes: usize) -> Order {
    let bytes = bytes.max(1);
    (usize::BITS - (bytes - 1).leading_zeros()) as Order
}
