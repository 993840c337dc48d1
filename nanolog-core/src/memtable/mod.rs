//! In-memory columnar write buffer
//!
//! The MemTable holds recent rows in column vectors so the segment writer can
//! seal them without a row-to-column transpose. Appends take the write lock
//! briefly; searches scan newest-to-oldest under the read lock. Once the
//! engine swaps a full MemTable out, no writer holds a reference and the
//! frozen table is sealed by a background task.

use crate::query::Expr;
use crate::{Filter, LogRow, MemTableStats, Timestamp};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const INITIAL_ROW_CAPACITY: usize = 4096;

/// Column vectors of one MemTable. All six columns always have equal length;
/// the i-th element of each forms one logical row.
pub struct Columns {
    pub timestamps: Vec<Timestamp>,
    pub levels: Vec<u8>,
    pub services: Vec<String>,
    pub hosts: Vec<String>,
    pub messages: Vec<String>,
    pub trace_ids: Vec<String>,
}

impl Columns {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            levels: Vec::with_capacity(capacity),
            services: Vec::with_capacity(capacity),
            hosts: Vec::with_capacity(capacity),
            messages: Vec::with_capacity(capacity),
            trace_ids: Vec::with_capacity(capacity),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Materialize the i-th row.
    pub fn row(&self, i: usize) -> LogRow {
        LogRow {
            timestamp: self.timestamps[i],
            level: self.levels[i],
            service: self.services[i].clone(),
            host: self.hosts[i].clone(),
            message: self.messages[i].clone(),
            trace_id: self.trace_ids[i].clone(),
        }
    }
}

/// Mutable columnar buffer between WAL appends and segment seals.
pub struct MemTable {
    cols: RwLock<Columns>,
    /// Estimated memory usage in bytes
    size_bytes: AtomicI64,
    /// Rows appended since the last estimator tick
    write_counter: AtomicI64,
    /// Current ingestion rate, stored as f64 bits for lock-free reads
    current_rate: AtomicU64,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            cols: RwLock::new(Columns::with_capacity(INITIAL_ROW_CAPACITY)),
            size_bytes: AtomicI64::new(0),
            write_counter: AtomicI64::new(0),
            current_rate: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Append one row. The row is visible to `search` as soon as this
    /// returns.
    pub fn append(
        &self,
        ts: Timestamp,
        level: u8,
        service: &str,
        host: &str,
        message: &str,
        trace_id: &str,
    ) {
        {
            let mut cols = self.cols.write();
            cols.timestamps.push(ts);
            cols.levels.push(level);
            cols.services.push(service.to_string());
            cols.hosts.push(host.to_string());
            cols.messages.push(message.to_string());
            cols.trace_ids.push(trace_id.to_string());
        }

        // message + service + host + trace_id + 8 (timestamp) + 1 (level)
        let added = (message.len() + service.len() + host.len() + trace_id.len() + 8 + 1) as i64;
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
        self.write_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.cols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory usage in bytes.
    pub fn size_bytes(&self) -> i64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// True (min, max) timestamps over all rows, or None when empty. Rows may
    /// arrive slightly out of order, so this scans rather than trusting
    /// first/last.
    pub fn timestamp_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        let cols = self.cols.read();
        let min = *cols.timestamps.iter().min()?;
        let max = *cols.timestamps.iter().max()?;
        Some((min, max))
    }

    /// Read access to the raw columns, for the segment writer and stats.
    pub fn columns(&self) -> RwLockReadGuard<'_, Columns> {
        self.cols.read()
    }

    /// Scan newest-to-oldest, applying time pruning first, then the QL AST if
    /// present, else the scalar filters. `limit` of 0 means unbounded.
    pub fn search(&self, filter: &Filter, limit: usize, ast: Option<&Expr>) -> Vec<LogRow> {
        let cols = self.cols.read();
        let mut result = Vec::new();

        for i in (0..cols.len()).rev() {
            if limit > 0 && result.len() >= limit {
                break;
            }

            let ts = cols.timestamps[i];
            if filter.min_time > 0 && ts < filter.min_time {
                continue;
            }
            if filter.max_time > 0 && ts > filter.max_time {
                continue;
            }

            let row = cols.row(i);
            let matched = match ast {
                Some(expr) => crate::query::matches(Some(expr), &row),
                None => filter.matches_scalar(&row),
            };
            if matched {
                result.push(row);
            }
        }

        result
    }

    /// One-pass snapshot of row count, size, and per-level/per-service
    /// counts.
    pub fn stats_snapshot(&self) -> MemTableStats {
        let cols = self.cols.read();
        let mut stats = MemTableStats {
            row_count: cols.len(),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            ..Default::default()
        };

        for i in 0..cols.len() {
            *stats.level_counts.entry(cols.levels[i]).or_insert(0) += 1;
            *stats
                .service_counts
                .entry(cols.services[i].clone())
                .or_insert(0) += 1;
        }

        stats
    }

    /// Clear all columns and counters for reuse.
    pub fn reset(&self) {
        let mut cols = self.cols.write();
        cols.timestamps.clear();
        cols.levels.clear();
        cols.services.clear();
        cols.hosts.clear();
        cols.messages.clear();
        cols.trace_ids.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Start the ingestion-rate estimator: every `interval` the write counter
    /// is swapped with zero and converted to rows/sec. The thread holds only
    /// a weak reference and exits when the MemTable is dropped (i.e. after it
    /// has been swapped out and sealed).
    pub fn spawn_rate_ticker(memtable: &Arc<MemTable>, interval: Duration) {
        let weak = Arc::downgrade(memtable);
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            let Some(mt) = weak.upgrade() else {
                break;
            };
            let count = mt.write_counter.swap(0, Ordering::Relaxed);
            let rate = count as f64 / interval.as_secs_f64();
            mt.current_rate.store(rate.to_bits(), Ordering::Relaxed);
        });
    }

    /// Current ingestion rate in logs/sec, lock-free.
    pub fn ingestion_rate(&self) -> f64 {
        f64::from_bits(self.current_rate.load(Ordering::Relaxed))
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;

    fn fill(mt: &MemTable) {
        mt.append(100, 1, "order", "h1", "created order", "");
        mt.append(200, 3, "order", "h1", "payment failed", "t-1");
        mt.append(300, 1, "payment", "h2", "charge ok", "");
    }

    #[test]
    fn test_append_visible_to_search() {
        let mt = MemTable::new();
        fill(&mt);

        assert_eq!(mt.len(), 3);
        let rows = mt.search(&Filter::default(), 0, None);
        assert_eq!(rows.len(), 3);
        // Newest first
        assert_eq!(rows[0].timestamp, 300);
        assert_eq!(rows[2].timestamp, 100);
    }

    #[test]
    fn test_search_limit_and_time_pruning() {
        let mt = MemTable::new();
        fill(&mt);

        let rows = mt.search(&Filter::default(), 2, None);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 300);

        let filter = Filter {
            min_time: 150,
            max_time: 250,
            ..Default::default()
        };
        let rows = mt.search(&filter, 0, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 200);
    }

    #[test]
    fn test_search_with_ast() {
        let mt = MemTable::new();
        fill(&mt);

        let ast = query::parse("service:order AND level:ERROR").unwrap();
        let rows = mt.search(&Filter::default(), 0, ast.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 200);
    }

    #[test]
    fn test_size_estimate_and_reset() {
        let mt = MemTable::new();
        mt.append(1, 1, "svc", "host", "hello", "");
        // 5 + 3 + 4 + 0 + 8 + 1
        assert_eq!(mt.size_bytes(), 21);

        mt.reset();
        assert_eq!(mt.size_bytes(), 0);
        assert_eq!(mt.len(), 0);
    }

    #[test]
    fn test_timestamp_bounds_out_of_order() {
        let mt = MemTable::new();
        assert!(mt.timestamp_bounds().is_none());

        mt.append(500, 1, "a", "h", "m", "");
        mt.append(100, 1, "a", "h", "m", "");
        mt.append(300, 1, "a", "h", "m", "");
        assert_eq!(mt.timestamp_bounds(), Some((100, 500)));
    }

    #[test]
    fn test_stats_snapshot() {
        let mt = MemTable::new();
        fill(&mt);

        let stats = mt.stats_snapshot();
        assert_eq!(stats.row_count, 3);
        assert_eq!(stats.level_counts[&1], 2);
        assert_eq!(stats.level_counts[&3], 1);
        assert_eq!(stats.service_counts["order"], 2);
        assert_eq!(stats.service_counts["payment"], 1);
    }

    #[test]
    fn test_concurrent_appends() {
        let mt = Arc::new(MemTable::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let mt = Arc::clone(&mt);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    mt.append(t * 1000 + i, 1, "svc", "h", "m", "");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mt.len(), 400);
    }
}
