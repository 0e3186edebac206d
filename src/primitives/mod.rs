//! Low-level primitives for building the storage engine.
//!
//! Includes the offset-addressed arena backing and the reader pin table
//! used to bound recycling.

/// Offset-addressed arena over heap or shared-memory mappings.
pub mod arena;

/// Concurrency primitives shared by readers and the recycler.
pub mod concurrency;
