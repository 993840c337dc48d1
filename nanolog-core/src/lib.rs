//! NanoLog Core - Append-Only Log Database Engine
//!
//! A lightweight log store optimized for:
//! - High ingest throughput (columnar in-memory buffer, batched fsync)
//! - Durable writes (write-ahead log replayed on startup)
//! - Cheap retention (immutable zstd-compressed segments, pruned by filename)
//!
//! # Architecture
//!
//! Rows flow through the following stages:
//!
//! - **WAL**: length-prefixed JSON records, the durability barrier
//! - **MemTable**: mutable columnar buffer, swapped out when full
//! - **Segment**: immutable `.nano` file sealed from a frozen MemTable
//! - **Query engine**: hybrid scan over MemTable + segments with
//!   filename-level time pruning

pub mod engine;
pub mod memtable;
pub mod query;
pub mod segment;
pub mod wal;

mod error;
mod types;

pub use error::{NanoError, Result};
pub use types::*;

/// NanoLog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Maximum MemTable size before an async seal is triggered (64 MiB)
    pub const MEMTABLE_SIZE_LIMIT: i64 = 64 * 1024 * 1024;

    /// zstd compression level for segment blocks
    pub const SEGMENT_COMPRESSION_LEVEL: i32 = 3;

    /// WAL file name inside the data directory
    pub const WAL_FILE_NAME: &str = "wal.log";

    /// Persistent stats file name inside the data directory
    pub const STATS_FILE_NAME: &str = ".nanolog.stats";

    /// Interval of the ingestion-rate estimator
    pub const RATE_TICK_SECS: u64 = 1;
}
