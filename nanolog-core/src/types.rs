//! Core types for NanoLog

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp in nanoseconds since Unix epoch
pub type Timestamp = i64;

/// Log severity levels, dictionary-encoded as a single byte on disk and on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
    Unknown = 255,
}

impl Level {
    /// Parse a level name, case-insensitive. Accepts the common aliases
    /// emitted by other ecosystems (TRACE, WARNING, SEVERE).
    pub fn from_name(name: &str) -> Level {
        match name.to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Level::Debug,
            "INFO" => Level::Info,
            "WARN" | "WARNING" => Level::Warn,
            "ERROR" => Level::Error,
            "FATAL" | "SEVERE" => Level::Fatal,
            _ => Level::Unknown,
        }
    }

    /// Decode a wire/storage byte.
    pub fn from_code(code: u8) -> Level {
        match code {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            3 => Level::Error,
            4 => Level::Fatal,
            _ => Level::Unknown,
        }
    }

    /// The wire/storage byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Canonical level name.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Unknown => "UNKNOWN",
        }
    }
}

/// Canonical name for an encoded level byte.
pub fn level_name(code: u8) -> &'static str {
    Level::from_code(code).as_str()
}

/// A single log record. This is both the query result row and the JSON wire
/// shape (`level` travels as its numeric code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    /// Nanoseconds since epoch
    pub timestamp: Timestamp,
    /// Encoded level (0-4, 255 for unknown)
    pub level: u8,
    pub service: String,
    #[serde(default)]
    pub host: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
}

/// Criteria for log retrieval. `min_time`/`max_time` of 0 mean unbounded.
/// `query` holds the raw QL expression; the engine parses it, segment readers
/// only apply the scalar fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub level: Option<u8>,
    pub service: Option<String>,
    pub host: Option<String>,
    pub query: String,
}

impl Filter {
    /// Check whether a row passes the scalar (non-QL) criteria.
    pub fn matches_scalar(&self, row: &LogRow) -> bool {
        if self.min_time > 0 && row.timestamp < self.min_time {
            return false;
        }
        if self.max_time > 0 && row.timestamp > self.max_time {
            return false;
        }
        if let Some(level) = self.level {
            if row.level != level {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if &row.service != service {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if &row.host != host {
                return false;
            }
        }
        true
    }

    /// Check whether a time interval `[min_ts, max_ts]` can contain matches.
    pub fn overlaps(&self, min_ts: Timestamp, max_ts: Timestamp) -> bool {
        if self.min_time > 0 && max_ts < self.min_time {
            return false;
        }
        if self.max_time > 0 && min_ts > self.max_time {
            return false;
        }
        true
    }
}

/// One histogram bucket: `time` is the bucket start, aligned down to the
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramPoint {
    pub time: Timestamp,
    pub count: i64,
}

/// High-level system metrics returned by the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Logs per second over the last estimator tick
    pub ingestion_rate: f64,
    /// Rows across segments and the live MemTable
    pub total_logs: i64,
    /// Bytes under the data directory
    pub disk_usage: i64,
    /// Level name -> count
    pub level_dist: HashMap<String, i64>,
    /// Service name -> count
    pub top_services: HashMap<String, i64>,
}

/// Snapshot of the live MemTable counters.
#[derive(Debug, Clone, Default)]
pub struct MemTableStats {
    pub row_count: usize,
    pub size_bytes: i64,
    pub level_counts: HashMap<u8, i64>,
    pub service_counts: HashMap<String, i64>,
}

/// Rows surrounding an anchor row, for the context view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    pub pre: Vec<LogRow>,
    pub anchor: Option<LogRow>,
    pub post: Vec<LogRow>,
}
