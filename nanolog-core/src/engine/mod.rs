//! Query engine - ingest, seal, scan, and lifecycle
//!
//! The engine owns the current MemTable pointer, the WAL, and the persistent
//! stats. Segment encoding is injected through the [`SegmentRead`] /
//! [`SegmentWrite`] seams so the engine never touches the on-disk format and
//! tests can substitute in-memory fakes.
//!
//! Write path: WAL append, MemTable append, and once the table crosses the
//! size threshold it is swapped for a fresh one under the engine write lock
//! and sealed by a background thread. The WAL is truncated only after the
//! segment is fully written and its stats merged, so a row is never absent
//! from both at once.

mod stats;

pub use stats::{PersistentStats, SegmentStats};

use crate::memtable::MemTable;
use crate::query;
use crate::segment::{parse_segment_name, segment_file_name, SegmentRead, SegmentWrite, SEGMENT_EXT};
use crate::wal::Wal;
use crate::{
    config, level_name, Filter, HistogramPoint, LogContext, LogRow, MemTableStats, NanoError,
    Result, SystemStats, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

impl From<MemTableStats> for SegmentStats {
    fn from(mem: MemTableStats) -> Self {
        SegmentStats {
            row_count: mem.row_count as i64,
            bytes: mem.size_bytes,
            level_counts: mem.level_counts,
            service_counts: mem.service_counts,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding segments, the WAL, and the stats file
    pub data_dir: PathBuf,
    /// Segments whose max timestamp is older than now - retention are deleted
    pub retention: Duration,
    /// MemTable size that triggers an async seal
    pub max_table_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            retention: Duration::from_secs(168 * 3600),
            max_table_size: config::MEMTABLE_SIZE_LIMIT,
        }
    }
}

/// The storage and query core of a NanoLog node.
pub struct QueryEngine {
    data_dir: PathBuf,
    retention: Duration,
    max_table_size: i64,

    /// Current MemTable. Replaced only under the write lock during the
    /// size-threshold swap; the old Arc is handed to the sealing task.
    memtable: RwLock<Arc<MemTable>>,
    wal: Wal,

    reader: Arc<dyn SegmentRead>,
    writer: Arc<dyn SegmentWrite>,

    /// Cumulative stats over existing segments, plus per-segment entries so
    /// retention can subtract what it deletes.
    stats: RwLock<PersistentStats>,
    stats_cache: Mutex<HashMap<String, SegmentStats>>,

    /// Back-reference handed to background seal threads.
    self_ref: Weak<QueryEngine>,
}

impl QueryEngine {
    /// Open the engine: create the data directory, open and replay the WAL,
    /// load persistent stats, and warm the per-segment stats cache. A WAL
    /// that cannot be opened is a fatal startup error.
    pub fn open(
        cfg: EngineConfig,
        reader: Arc<dyn SegmentRead>,
        writer: Arc<dyn SegmentWrite>,
    ) -> Result<Arc<QueryEngine>> {
        std::fs::create_dir_all(&cfg.data_dir)?;

        let wal = Wal::open(cfg.data_dir.join(config::WAL_FILE_NAME))?;
        let memtable = Arc::new(MemTable::new());
        MemTable::spawn_rate_ticker(&memtable, Duration::from_secs(config::RATE_TICK_SECS));

        let recovered = wal.replay()?;
        if !recovered.is_empty() {
            info!(rows = recovered.len(), "crash recovery: replaying WAL");
            for row in &recovered {
                memtable.append(
                    row.timestamp,
                    row.level,
                    &row.service,
                    &row.host,
                    &row.message,
                    &row.trace_id,
                );
            }
        }

        let loaded = PersistentStats::load(&cfg.data_dir);
        let engine = Arc::new_cyclic(|self_ref| QueryEngine {
            data_dir: cfg.data_dir,
            retention: cfg.retention,
            max_table_size: cfg.max_table_size,
            memtable: RwLock::new(memtable),
            wal,
            reader,
            writer,
            stats: RwLock::new(loaded.clone().unwrap_or_default()),
            stats_cache: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        });

        engine.warm_stats_cache(loaded.is_none());
        Ok(engine)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Ingest one row: WAL first, then the MemTable. Crossing the size
    /// threshold swaps the table and seals the frozen one in the background.
    /// A WAL write failure is logged and the row still reaches memory.
    pub fn ingest(
        &self,
        ts: Timestamp,
        level: u8,
        service: &str,
        host: &str,
        message: &str,
        trace_id: &str,
    ) {
        let row = LogRow {
            timestamp: ts,
            level,
            service: service.to_string(),
            host: host.to_string(),
            message: message.to_string(),
            trace_id: trace_id.to_string(),
        };
        if let Err(e) = self.wal.append(&row) {
            error!(error = %e, "WAL append failed");
        }

        let size = {
            let guard = self.memtable.read();
            guard.append(ts, level, service, host, message, trace_id);
            guard.size_bytes()
        };

        if size >= self.max_table_size {
            self.swap_and_seal_async();
        }
    }

    /// Fsync the WAL. Called by the boundary once per inbound batch.
    pub fn sync_wal(&self) {
        if let Err(e) = self.wal.sync() {
            error!(error = %e, "WAL sync failed");
        }
    }

    /// Synchronously seal the current MemTable (shutdown path).
    pub fn flush(&self) -> Result<()> {
        let old = {
            let mut guard = self.memtable.write();
            if guard.is_empty() {
                return Ok(());
            }
            let fresh = Arc::new(MemTable::new());
            MemTable::spawn_rate_ticker(&fresh, Duration::from_secs(config::RATE_TICK_SECS));
            std::mem::replace(&mut *guard, fresh)
        };
        self.seal(&old)
    }

    fn swap_and_seal_async(&self) {
        let old = {
            let mut guard = self.memtable.write();
            // Re-check under the lock: another ingest may have swapped first.
            if guard.size_bytes() < self.max_table_size {
                return;
            }
            info!(
                size_bytes = guard.size_bytes(),
                threshold = self.max_table_size,
                "MemTable reached threshold, swapping for async seal"
            );
            let fresh = Arc::new(MemTable::new());
            MemTable::spawn_rate_ticker(&fresh, Duration::from_secs(config::RATE_TICK_SECS));
            std::mem::replace(&mut *guard, fresh)
        };

        // Upgrading cannot fail here: &self proves the engine is alive.
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        std::thread::spawn(move || {
            if let Err(e) = engine.seal(&old) {
                // Rows stay in the WAL and replay at next startup.
                error!(error = %e, "background seal failed");
            }
        });
    }

    /// Seal a frozen MemTable: write the segment, merge its stats, persist
    /// them, then truncate the WAL. A write failure leaves the WAL intact;
    /// stats-persist and WAL-reset failures are logged and survived.
    fn seal(&self, memtable: &MemTable) -> Result<()> {
        if memtable.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.data_dir)?;

        let Some((min_ts, max_ts)) = memtable.timestamp_bounds() else {
            return Ok(());
        };
        let name = segment_file_name(min_ts, max_ts);
        let path = self.data_dir.join(&name);

        let seg_stats: SegmentStats = memtable.stats_snapshot().into();
        self.writer.write(&path, memtable)?;

        self.stats_cache.lock().insert(name.clone(), seg_stats.clone());
        {
            let mut stats = self.stats.write();
            stats.add(&seg_stats);
            if let Err(e) = stats.save(&self.data_dir) {
                warn!(error = %e, "failed to persist stats, totals lag until next seal");
            }
        }

        if let Err(e) = self.wal.reset() {
            warn!(error = %e, "WAL reset failed, replay will produce duplicates");
        }

        info!(segment = %name, rows = seg_stats.row_count, "sealed memtable");
        Ok(())
    }

    /// Scan memory then segments, newest first, up to `limit` rows
    /// (0 = unbounded). Unreadable segments are skipped.
    pub fn execute_scan(&self, filter: &Filter, limit: usize) -> Result<Vec<LogRow>> {
        let ast = query::parse(&filter.query)?;

        let memtable = self.memtable.read().clone();
        let mut result = memtable.search(filter, limit, ast.as_ref());
        if limit > 0 && result.len() >= limit {
            return Ok(result);
        }

        let mut files = self.segment_files()?;
        // Newest first
        files.sort_by(|a, b| (b.1, b.2).cmp(&(a.1, a.2)));

        for (path, min_ts, max_ts) in files {
            if limit > 0 && result.len() >= limit {
                break;
            }
            if !filter.overlaps(min_ts, max_ts) {
                continue;
            }

            let rows = match self.reader.read(&path, filter) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable segment");
                    continue;
                }
            };
            for row in rows {
                if limit > 0 && result.len() >= limit {
                    break;
                }
                if query::matches(ast.as_ref(), &row) {
                    result.push(row);
                }
            }
        }

        Ok(result)
    }

    /// Count rows into `(ts / interval) * interval` buckets over
    /// `[start, end]`, ascending. Empty buckets are omitted.
    pub fn compute_histogram(
        &self,
        start: Timestamp,
        end: Timestamp,
        interval: i64,
        filter: &Filter,
    ) -> Result<Vec<HistogramPoint>> {
        if interval <= 0 {
            return Err(NanoError::Query("histogram interval must be positive".into()));
        }
        let ast = query::parse(&filter.query)?;

        let mut window = filter.clone();
        window.min_time = start;
        window.max_time = end;

        let mut buckets: HashMap<Timestamp, i64> = HashMap::new();
        let mut bucketize = |rows: &[LogRow]| {
            for row in rows {
                if row.timestamp < start || row.timestamp > end {
                    continue;
                }
                let bucket = (row.timestamp / interval) * interval;
                *buckets.entry(bucket).or_insert(0) += 1;
            }
        };

        let memtable = self.memtable.read().clone();
        bucketize(&memtable.search(&window, 0, ast.as_ref()));

        for (path, min_ts, max_ts) in self.segment_files()? {
            if !window.overlaps(min_ts, max_ts) {
                continue;
            }
            let rows = match self.reader.read(&path, &window) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable segment");
                    continue;
                }
            };
            let matching: Vec<LogRow> = rows
                .into_iter()
                .filter(|row| query::matches(ast.as_ref(), row))
                .collect();
            bucketize(&matching);
        }

        let mut points: Vec<HistogramPoint> = buckets
            .into_iter()
            .map(|(time, count)| HistogramPoint { time, count })
            .collect();
        points.sort_by_key(|p| p.time);
        Ok(points)
    }

    /// Rows surrounding `(ts, service)`: up to `limit` before and after the
    /// anchor, drawn from the union of MemTable and all segments. The anchor
    /// is the exact timestamp match, or the closest row in time.
    pub fn get_context(&self, ts: Timestamp, service: &str, limit: usize) -> Result<LogContext> {
        let filter = Filter {
            service: Some(service.to_string()),
            ..Default::default()
        };

        let memtable = self.memtable.read().clone();
        let mut rows = memtable.search(&filter, 0, None);
        for (path, _, _) in self.segment_files()? {
            match self.reader.read(&path, &filter) {
                Ok(segment_rows) => rows.extend(segment_rows),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable segment");
                }
            }
        }

        if rows.is_empty() {
            return Ok(LogContext::default());
        }
        rows.sort_by_key(|r| r.timestamp);

        let anchor_idx = rows
            .iter()
            .position(|r| r.timestamp == ts)
            .unwrap_or_else(|| {
                rows.iter()
                    .enumerate()
                    .min_by_key(|(_, r)| r.timestamp.abs_diff(ts))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            });

        let pre_start = anchor_idx.saturating_sub(limit);
        let post_end = (anchor_idx + 1 + limit).min(rows.len());

        Ok(LogContext {
            pre: rows[pre_start..anchor_idx].to_vec(),
            anchor: Some(rows[anchor_idx].clone()),
            post: rows[anchor_idx + 1..post_end].to_vec(),
        })
    }

    /// Merge persistent totals with the live MemTable snapshot and measure
    /// on-disk usage.
    pub fn get_stats(&self) -> SystemStats {
        let memtable = self.memtable.read().clone();
        let mem = memtable.stats_snapshot();
        let disk = self.stats.read().clone();

        let mut stats = SystemStats {
            ingestion_rate: memtable.ingestion_rate(),
            total_logs: disk.total_logs + mem.row_count as i64,
            ..Default::default()
        };

        for (level, count) in &disk.level_counts {
            *stats.level_dist.entry(level_name(*level).to_string()).or_insert(0) += count;
        }
        for (level, count) in &mem.level_counts {
            *stats.level_dist.entry(level_name(*level).to_string()).or_insert(0) += count;
        }
        for (service, count) in &disk.service_counts {
            *stats.top_services.entry(service.clone()).or_insert(0) += count;
        }
        for (service, count) in &mem.service_counts {
            *stats.top_services.entry(service.clone()).or_insert(0) += count;
        }

        stats.disk_usage = disk_usage(&self.data_dir);
        stats
    }

    /// One retention pass: delete every segment whose max timestamp is older
    /// than `now - retention`, and subtract its cached stats. Returns the
    /// number of files deleted. The periodic loop lives in the host.
    pub fn purge_expired(&self) -> usize {
        let retention_nanos = self.retention.as_nanos() as i64;
        if retention_nanos <= 0 {
            return 0;
        }
        let Some(now) = chrono::Utc::now().timestamp_nanos_opt() else {
            return 0;
        };
        let threshold = now - retention_nanos;

        let files = match self.segment_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cleaner failed to list segments");
                return 0;
            }
        };

        let mut deleted = 0;
        for (path, _, max_ts) in files {
            if max_ts >= threshold {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "cleaner failed to delete segment");
                continue;
            }
            deleted += 1;

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Some(seg) = self.stats_cache.lock().remove(&name) {
                let mut stats = self.stats.write();
                stats.subtract(&seg);
                if let Err(e) = stats.save(&self.data_dir) {
                    warn!(error = %e, "failed to persist stats after retention delete");
                }
            }
            info!(file = %name, "expired segment deleted");
        }
        deleted
    }

    /// Segment files in the data directory with their filename time bounds.
    /// Files that do not match the `log_{min}_{max}.nano` grammar are not
    /// segments and are ignored.
    fn segment_files(&self) -> Result<Vec<(PathBuf, Timestamp, Timestamp)>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(SEGMENT_EXT) {
                continue;
            }
            if let Some((min_ts, max_ts)) = parse_segment_name(name) {
                files.push((entry.path(), min_ts, max_ts));
            }
        }

        Ok(files)
    }

    /// Decode every segment once to build the per-segment stats cache.
    /// Corrupt files are logged and skipped, never deleted. When the
    /// persistent stats file was missing, totals are rebuilt from the sums.
    fn warm_stats_cache(&self, rebuild_totals: bool) {
        let files = match self.segment_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to list segments for stats warm-up");
                return;
            }
        };

        let mut corrupted = 0;
        for (path, _, _) in &files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.reader.read(path, &Filter::default()) {
                Ok(rows) => {
                    self.stats_cache
                        .lock()
                        .insert(name, SegmentStats::from_rows(&rows));
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping corrupted segment");
                    corrupted += 1;
                }
            }
        }

        if rebuild_totals {
            let cache = self.stats_cache.lock();
            let mut rebuilt = PersistentStats::default();
            for seg in cache.values() {
                rebuilt.add(seg);
            }
            let mut stats = self.stats.write();
            *stats = rebuilt;
            if stats.total_logs > 0 {
                if let Err(e) = stats.save(&self.data_dir) {
                    warn!(error = %e, "failed to persist rebuilt stats");
                }
            }
        }

        info!(
            segments = files.len() - corrupted,
            corrupted, "stats cache warmed"
        );
    }
}

fn disk_usage(dir: &Path) -> i64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len() as i64)
        .sum()
}
