//! Command-line helpers: CSV edge loading, adjacency dumps and logging setup.
#![forbid(unsafe_code)]

/// CSV import and adjacency export.
pub mod import;

/// Tracing subscriber installation.
pub mod logging;
