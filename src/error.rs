use std::io;

use thiserror::Error;

use crate::types::{EpochId, VertexId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SegGraphError>;

/// Errors surfaced by the storage engine.
///
/// Capacity exhaustion inside the block manager itself is reported with the
/// [`crate::types::BlockAddr::NULL`] sentinel; the variants here cover the
/// layers above it and the conditions that must abort an operation.
#[derive(Debug, Error)]
pub enum SegGraphError {
    /// I/O failure from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The arena reservation could not be extended to cover a new block.
    #[error("arena growth failed: need {needed} bytes, mapping holds {mapped}")]
    ArenaGrowth {
        /// Bytes the allocation required the reservation to cover.
        needed: usize,
        /// Bytes addressable by the current mapping.
        mapped: usize,
    },
    /// The block manager has no capacity left for this allocation.
    #[error("block capacity exhausted")]
    CapacityExhausted,
    /// A vertex id beyond the configured vertex table was used.
    #[error("vertex {0} is outside the vertex table")]
    VertexOutOfRange(VertexId),
    /// A commit tried to record an epoch older than one already published.
    #[error("epoch {requested} precedes published epoch {published}")]
    EpochRegression {
        /// Epoch the writer tried to publish.
        requested: EpochId,
        /// Newest epoch already recorded on the chain.
        published: EpochId,
    },
    /// A chain failed structural verification.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration could not be loaded or was inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}
