//! Segmented, epoch-versioned adjacency storage.
//!
//! Edges live in per-(vertex, label, direction) chains of fixed-capacity
//! blocks carved from a single arena. Each chain carries an epoch index so a
//! snapshot read touches only the blocks that hold its visible prefix.

/// Power-of-two block allocator over the arena.
pub mod block_manager;

/// Edge blocks, chain roots, epoch indexes and the snapshot iterator.
pub mod chain;

/// Label and property metadata.
pub mod schema;

mod graph;
mod metrics;
mod options;

pub use block_manager::{BlockManager, FreeBlockStats, LocalFreeLists};
pub use chain::{ChainKey, ChainRoot, ChainStats, Edge, EdgeBlock, EdgeIterator, Edges};

/// Engine handles.
pub use graph::{
    BlockUsage, GraphReader, GraphWriter, PendingFree, RecycleStats, RecycleTrigger, SegGraph,
    Transaction, Worker,
};

/// Metrics hooks.
pub use metrics::{default_metrics, CounterMetrics, EngineMetrics, NoopMetrics};

/// Engine configuration.
pub use options::{
    ArenaOptions, BackingChoice, ByteSize, GraphConfigFile, GraphOptions, RecycleCfg,
    RecycleFile, DEFAULT_GROWTH_INCREMENT, DEFAULT_LAG_EPOCHS, DEFAULT_RECYCLE_FREQ,
};

pub use schema::{DataType, EdgeLabelDef, GraphSchema, PartitionInfo, PropertyDef};
