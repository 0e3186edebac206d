//! Segmented, epoch-versioned graph storage.
//!
//! A [`SegGraph`] keeps one append-mostly chain of fixed-capacity edge blocks
//! per `(vertex, label, direction)`. Blocks come from a power-of-two
//! allocator over a single arena that may live on the heap or in a shared
//! file mapping (see [`SharedBacking`]). Writers publish batches at
//! monotonically increasing epochs; readers see the exact prefix of every
//! chain that was committed at their snapshot epoch.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod error;
pub mod primitives;
pub mod storage;
pub mod types;

pub use error::{Result, SegGraphError};
pub use primitives::arena::{Arena, ArenaBacking, BackingKind, HeapBacking, SharedBacking};
pub use storage::{
    BackingChoice, GraphOptions, GraphReader, GraphSchema, GraphWriter, SegGraph, Transaction,
    Worker,
};
