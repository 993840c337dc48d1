//! Persistent aggregate statistics
//!
//! A small JSON file (`.nanolog.stats`) holds cumulative counters over all
//! sealed segments so the stats endpoint answers in O(1) instead of scanning
//! every file. It is rewritten atomically (temp file + rename) after each
//! successful seal, and adjusted when retention deletes a segment.

use crate::{config, LogRow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Counters for one sealed segment, kept in memory so a deleted segment's
/// contribution can be subtracted from the persistent totals.
#[derive(Debug, Clone, Default)]
pub struct SegmentStats {
    pub row_count: i64,
    pub bytes: i64,
    pub level_counts: HashMap<u8, i64>,
    pub service_counts: HashMap<String, i64>,
}

impl SegmentStats {
    /// Aggregate counters over decoded rows (stats-cache warm-up path).
    pub fn from_rows(rows: &[LogRow]) -> Self {
        let mut stats = Self {
            row_count: rows.len() as i64,
            ..Default::default()
        };
        for row in rows {
            stats.bytes += estimate_row_bytes(row);
            *stats.level_counts.entry(row.level).or_insert(0) += 1;
            *stats.service_counts.entry(row.service.clone()).or_insert(0) += 1;
        }
        stats
    }
}

fn estimate_row_bytes(row: &LogRow) -> i64 {
    (row.message.len() + row.service.len() + row.host.len() + row.trace_id.len() + 8 + 1) as i64
}

/// Cumulative counters over all currently-existing segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentStats {
    pub total_logs: i64,
    pub total_bytes: i64,
    #[serde(default)]
    pub level_counts: HashMap<u8, i64>,
    #[serde(default)]
    pub service_counts: HashMap<String, i64>,
}

impl PersistentStats {
    /// Merge a sealed segment's counters in.
    pub fn add(&mut self, seg: &SegmentStats) {
        self.total_logs += seg.row_count;
        self.total_bytes += seg.bytes;
        for (level, count) in &seg.level_counts {
            *self.level_counts.entry(*level).or_insert(0) += count;
        }
        for (service, count) in &seg.service_counts {
            *self.service_counts.entry(service.clone()).or_insert(0) += count;
        }
    }

    /// Remove a deleted segment's counters, dropping entries that reach zero.
    pub fn subtract(&mut self, seg: &SegmentStats) {
        self.total_logs = (self.total_logs - seg.row_count).max(0);
        self.total_bytes = (self.total_bytes - seg.bytes).max(0);
        for (level, count) in &seg.level_counts {
            if let Some(existing) = self.level_counts.get_mut(level) {
                *existing -= count;
                if *existing <= 0 {
                    self.level_counts.remove(level);
                }
            }
        }
        for (service, count) in &seg.service_counts {
            if let Some(existing) = self.service_counts.get_mut(service) {
                *existing -= count;
                if *existing <= 0 {
                    self.service_counts.remove(service);
                }
            }
        }
    }

    /// Load from the data directory. Returns None when the file is missing or
    /// unreadable; the caller falls back to the warm-up rebuild.
    pub fn load(data_dir: &Path) -> Option<PersistentStats> {
        let data = std::fs::read(data_dir.join(config::STATS_FILE_NAME)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Atomically rewrite the stats file (write temp, then rename).
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| crate::NanoError::Internal(e.to_string()))?;

        let path = data_dir.join(config::STATS_FILE_NAME);
        let tmp_path = path.with_extension("stats.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
