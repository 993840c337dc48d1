//! Segment files - immutable on-disk columnar storage
//!
//! A segment is sealed from exactly one frozen MemTable and never modified
//! afterwards; only the retention cleaner deletes it. The filename
//! `log_{minTs}_{maxTs}.nano` doubles as the pruning index: scans parse the
//! bounds from the name and skip files outside the query window without
//! opening them.
//!
//! # File layout (little-endian)
//!
//! ```text
//! magic(8) = "NANOLOG2"
//! block[timestamps] : u32 compressed_size | zstd(raw i64 x N)
//! block[levels]     : u32 compressed_size | zstd(raw u8 x N)
//! block[services]   : u32 compressed_size | zstd([u32 len | bytes] x N)
//! block[hosts]      : u32 compressed_size | zstd([u32 len | bytes] x N)
//! block[messages]   : u32 compressed_size | zstd([u32 len | bytes] x N)
//! block[trace_ids]  : u32 compressed_size | zstd([u32 len | bytes] x N)
//! footer(20)        : u32 row_count | i64 min_ts | i64 max_ts
//! ```
//!
//! Legacy `NANOLOG1` files carry only timestamps, levels, services, and
//! messages; the reader decodes them with empty host/trace_id columns.

mod reader;
mod writer;

pub use reader::{SegmentIter, SegmentReader};
pub use writer::SegmentWriter;

use crate::memtable::MemTable;
use crate::{Filter, LogRow, Result, Timestamp};
use std::path::Path;

/// Current format magic
pub const MAGIC_V2: &[u8; 8] = b"NANOLOG2";
/// Legacy four-column format magic
pub const MAGIC_V1: &[u8; 8] = b"NANOLOG1";
/// Footer: u32 row_count + i64 min_ts + i64 max_ts
pub const FOOTER_LEN: u64 = 20;
/// Segment file extension
pub const SEGMENT_EXT: &str = "nano";

/// Reads rows from a segment file, applying the filter's scalar criteria.
/// Injected into the engine so tests can supply in-memory fakes.
pub trait SegmentRead: Send + Sync + 'static {
    fn read(&self, path: &Path, filter: &Filter) -> Result<Vec<LogRow>>;
}

/// Writes a frozen MemTable to a segment file.
pub trait SegmentWrite: Send + Sync + 'static {
    fn write(&self, path: &Path, memtable: &MemTable) -> Result<()>;
}

/// Build a segment filename from its timestamp bounds.
pub fn segment_file_name(min_ts: Timestamp, max_ts: Timestamp) -> String {
    format!("log_{min_ts}_{max_ts}.{SEGMENT_EXT}")
}

/// Parse `(min_ts, max_ts)` out of a `log_{min}_{max}.nano` filename.
/// Returns None for anything that does not match the grammar.
pub fn parse_segment_name(name: &str) -> Option<(Timestamp, Timestamp)> {
    let stem = name.strip_prefix("log_")?.strip_suffix(".nano")?;
    let (min_str, max_str) = stem.split_once('_')?;
    let min_ts = min_str.parse().ok()?;
    let max_ts = max_str.parse().ok()?;
    Some((min_ts, max_ts))
}
