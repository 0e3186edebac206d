use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, SegGraphError};
use crate::primitives::arena::{Arena, HeapBacking, SharedBacking};
use crate::storage::block_manager::NULL_HOLDER_BYTES;
use crate::storage::metrics::EngineMetrics;
use crate::storage::schema::{GraphSchema, PartitionInfo};

/// Default step by which the arena reservation grows.
pub const DEFAULT_GROWTH_INCREMENT: usize = 1 << 30;
/// Default number of epochs a freed block waits before reuse.
pub const DEFAULT_LAG_EPOCHS: u64 = 2;
/// Default recycle frequency: one pass per this many writer creations.
pub const DEFAULT_RECYCLE_FREQ: u32 = 1 << 16;

const PAGE: usize = 4096;

/// Where the arena's bytes live.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum BackingChoice {
    /// Anonymous process-local mapping.
    #[default]
    Heap,
    /// Create (or truncate) a shared object at this path that other
    /// processes can map with [`SharedBacking::open`].
    Shared(PathBuf),
}

/// Sizing of the arena and its allocator.
#[derive(Clone, Debug)]
pub struct ArenaOptions {
    /// Name used in log events.
    pub name: String,
    /// Backing store.
    pub backing: BackingChoice,
    /// Maximum bytes in live blocks.
    pub capacity: usize,
    /// Explicit mapping size; derived from `capacity` when `None`.
    pub mapped_bytes: Option<usize>,
    /// Step by which the backing reservation grows.
    pub growth_increment: usize,
    /// Per-worker list length above which half spills to the global tier.
    pub local_spill_threshold: usize,
}

impl ArenaOptions {
    /// Heap-backed arena options with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            name: "edges".into(),
            backing: BackingChoice::Heap,
            capacity,
            mapped_bytes: None,
            growth_increment: DEFAULT_GROWTH_INCREMENT,
            local_spill_threshold: 4096,
        }
    }

    /// Sets the name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Selects the backing store.
    pub fn backing(mut self, backing: BackingChoice) -> Self {
        self.backing = backing;
        self
    }

    /// Overrides the mapping size.
    pub fn mapped_bytes(mut self, bytes: usize) -> Self {
        self.mapped_bytes = Some(bytes);
        self
    }

    /// Sets the reservation growth step.
    pub fn growth_increment(mut self, bytes: usize) -> Self {
        self.growth_increment = bytes;
        self
    }

    /// Sets the local free-list spill threshold.
    pub fn local_spill_threshold(mut self, blocks: usize) -> Self {
        self.local_spill_threshold = blocks;
        self
    }

    /// Bytes mapped for this arena.
    ///
    /// Defaults to twice the capacity plus the null holder, rounded up to a
    /// page, which leaves headroom for fragmentation across orders.
    pub fn mapped_len(&self) -> usize {
        self.mapped_bytes.unwrap_or_else(|| {
            let raw = self
                .capacity
                .saturating_mul(2)
                .saturating_add(NULL_HOLDER_BYTES);
            raw.div_ceil(PAGE).saturating_mul(PAGE)
        })
    }

    /// Maps the configured backing store.
    pub fn open_arena(&self) -> Result<Arena> {
        let len = self.mapped_len();
        let arena = match &self.backing {
            BackingChoice::Heap => Arena::new(Box::new(HeapBacking::new(len)?)),
            BackingChoice::Shared(path) => Arena::new(Box::new(SharedBacking::create(path, len)?)),
        };
        Ok(arena)
    }
}

/// Deferred recycling configuration.
#[derive(Clone, Debug)]
pub struct RecycleCfg {
    /// Epochs a freed block waits past its free epoch.
    pub lag_epochs: u64,
    /// One recycle pass per this many writer creations; 0 disables.
    pub freq: u32,
    /// Seed for the per-worker recycle trigger.
    pub seed: u64,
}

impl Default for RecycleCfg {
    fn default() -> Self {
        Self {
            lag_epochs: DEFAULT_LAG_EPOCHS,
            freq: DEFAULT_RECYCLE_FREQ,
            seed: 0x5e6_9a4f,
        }
    }
}

/// Configuration supplied when opening a [`super::SegGraph`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Arena and allocator sizing.
    pub arena: ArenaOptions,
    /// Vertex and edge label metadata.
    pub schema: GraphSchema,
    /// Which partition this engine serves.
    pub partition: PartitionInfo,
    /// Size of the chain-root table in vertices.
    pub max_vertices: usize,
    /// Entries in the first block of every chain.
    pub initial_block_capacity: usize,
    /// Upper bound for block capacity as chains grow.
    pub max_block_capacity: usize,
    /// Pairs in a freshly allocated epoch index.
    pub initial_index_capacity: usize,
    /// Deferred recycling behavior.
    pub recycle: RecycleCfg,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn EngineMetrics>>,
}

impl GraphOptions {
    /// Creates options for `max_vertices` vertices over a heap arena.
    pub fn new(schema: GraphSchema, max_vertices: usize, capacity: usize) -> Self {
        Self {
            arena: ArenaOptions::new(capacity),
            schema,
            partition: PartitionInfo::default(),
            max_vertices,
            initial_block_capacity: 4,
            max_block_capacity: 1 << 12,
            initial_index_capacity: 4,
            recycle: RecycleCfg::default(),
            metrics: None,
        }
    }

    /// Replaces the arena options.
    pub fn arena(mut self, arena: ArenaOptions) -> Self {
        self.arena = arena;
        self
    }

    /// Selects the arena backing store.
    pub fn backing(mut self, backing: BackingChoice) -> Self {
        self.arena.backing = backing;
        self
    }

    /// Sets the partition descriptor.
    pub fn partition(mut self, partition: PartitionInfo) -> Self {
        self.partition = partition;
        self
    }

    /// Sets the capacity of a chain's first block.
    pub fn initial_block_capacity(mut self, entries: usize) -> Self {
        self.initial_block_capacity = entries;
        self
    }

    /// Caps block capacity; blocks double up to this bound.
    pub fn max_block_capacity(mut self, entries: usize) -> Self {
        self.max_block_capacity = entries;
        self
    }

    /// Sets the capacity of a new epoch index.
    pub fn initial_index_capacity(mut self, pairs: usize) -> Self {
        self.initial_index_capacity = pairs;
        self
    }

    /// Sets the recycling configuration.
    pub fn recycle(mut self, cfg: RecycleCfg) -> Self {
        self.recycle = cfg;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_vertices == 0 {
            return Err(SegGraphError::InvalidArgument(
                "max_vertices must be positive".into(),
            ));
        }
        if self.schema.edge_labels.is_empty() {
            return Err(SegGraphError::InvalidArgument(
                "schema must define at least one edge label".into(),
            ));
        }
        if self.initial_block_capacity == 0 || self.initial_index_capacity == 0 {
            return Err(SegGraphError::InvalidArgument(
                "block and index capacities must be positive".into(),
            ));
        }
        if self.max_block_capacity < self.initial_block_capacity {
            return Err(SegGraphError::InvalidArgument(format!(
                "max_block_capacity {} below initial capacity {}",
                self.max_block_capacity, self.initial_block_capacity
            )));
        }
        if self.partition.partition_count == 0
            || self.partition.local_partition >= self.partition.partition_count
        {
            return Err(SegGraphError::InvalidArgument(format!(
                "partition {} out of {}",
                self.partition.local_partition, self.partition.partition_count
            )));
        }
        self.schema.validate()
    }
}

/// On-disk TOML form of [`GraphOptions`], used by the CLI.
///
/// ```toml
/// max_vertices = 100000
/// capacity = "256MiB"
///
/// [[edge_labels]]
/// name = "knows"
/// props = [{ name = "weight", dtype = "f64" }]
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfigFile {
    /// Size of the chain-root table.
    pub max_vertices: usize,
    /// Arena capacity, either bytes or a string like `"64MiB"`.
    pub capacity: ByteSize,
    /// Shared-memory path; heap when absent.
    #[serde(default)]
    pub shared_path: Option<PathBuf>,
    /// Growth step for the reservation.
    #[serde(default)]
    pub growth_increment: Option<ByteSize>,
    /// First block capacity in entries.
    #[serde(default)]
    pub initial_block_capacity: Option<usize>,
    /// Maximum block capacity in entries.
    #[serde(default)]
    pub max_block_capacity: Option<usize>,
    /// Partition count and local partition.
    #[serde(default)]
    pub partition: Option<PartitionInfo>,
    /// Recycling knobs.
    #[serde(default)]
    pub recycle: Option<RecycleFile>,
    /// Vertex label names.
    #[serde(default)]
    pub vertex_labels: Vec<String>,
    /// Edge label definitions.
    pub edge_labels: Vec<crate::storage::schema::EdgeLabelFile>,
}

/// Recycling section of [`GraphConfigFile`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecycleFile {
    /// Lag in epochs.
    pub lag_epochs: Option<u64>,
    /// Trigger frequency.
    pub freq: Option<u32>,
    /// Trigger seed.
    pub seed: Option<u64>,
}

/// Byte count accepting plain integers or `KiB`/`MiB`/`GiB` suffixed strings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteSize(pub usize);

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(usize),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(ByteSize(n)),
            Raw::Text(s) => parse_byte_size(&s).map(ByteSize).map_err(serde::de::Error::custom),
        }
    }
}

fn parse_byte_size(raw: &str) -> std::result::Result<usize, String> {
    let s = raw.trim();
    let (digits, mult) = [("GiB", 1usize << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)]
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|d| (d.trim(), *mult)))
        .unwrap_or((s, 1));
    let n: usize = digits
        .parse()
        .map_err(|_| format!("invalid byte size {raw:?}"))?;
    n.checked_mul(mult)
        .ok_or_else(|| format!("byte size {raw:?} overflows"))
}

impl GraphConfigFile {
    /// Reads and parses a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| SegGraphError::Config(err.to_string()))
    }

    /// Converts into engine options.
    pub fn into_options(self) -> Result<GraphOptions> {
        let schema = GraphSchema::from_file(self.vertex_labels, self.edge_labels)?;
        let mut opts = GraphOptions::new(schema, self.max_vertices, self.capacity.0);
        if let Some(path) = self.shared_path {
            opts.arena.backing = BackingChoice::Shared(path);
        }
        if let Some(step) = self.growth_increment {
            opts.arena.growth_increment = step.0;
        }
        if let Some(cap) = self.initial_block_capacity {
            opts.initial_block_capacity = cap;
        }
        if let Some(cap) = self.max_block_capacity {
            opts.max_block_capacity = cap;
        }
        if let Some(partition) = self.partition {
            opts.partition = partition;
        }
        if let Some(recycle) = self.recycle {
            let defaults = RecycleCfg::default();
            opts.recycle = RecycleCfg {
                lag_epochs: recycle.lag_epochs.unwrap_or(defaults.lag_epochs),
                freq: recycle.freq.unwrap_or(defaults.freq),
                seed: recycle.seed.unwrap_or(defaults.seed),
            };
        }
        opts.validate()?;
        Ok(opts)
    }
}
