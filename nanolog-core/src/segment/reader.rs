//! Segment reader

use super::{SegmentRead, FOOTER_LEN, MAGIC_V1, MAGIC_V2};
use crate::{Filter, LogRow, NanoError, Result, Timestamp};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Opens `.nano` files and yields their rows. Decoding is version-aware:
/// `NANOLOG2` files carry six columns, legacy `NANOLOG1` files four.
pub struct SegmentReader;

impl SegmentReader {
    pub fn new() -> Self {
        Self
    }

    /// Open a segment. Validates the magic and footer first; if the footer
    /// time range does not intersect the filter window the iterator is empty
    /// without decoding any column.
    pub fn open(path: &Path, filter: &Filter) -> Result<SegmentIter> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < 8 + FOOTER_LEN {
            return Err(NanoError::Corruption(format!(
                "{}: file too small ({file_len} bytes)",
                path.display()
            )));
        }

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        let column_count = match &magic {
            m if m == MAGIC_V2 => 6,
            m if m == MAGIC_V1 => 4,
            _ => {
                return Err(NanoError::Corruption(format!(
                    "{}: invalid magic",
                    path.display()
                )))
            }
        };

        let (row_count, min_ts, max_ts) = read_footer(&mut file, file_len)?;

        // File-level pruning: nothing to decode if the window misses.
        if row_count == 0 || !filter.overlaps(min_ts, max_ts) {
            return Ok(SegmentIter::empty(filter.clone()));
        }

        file.seek(SeekFrom::Start(8))?;
        let timestamps = decode_i64s(&read_block(&mut file)?);
        let levels = read_block(&mut file)?;
        let services = decode_strings(&read_block(&mut file)?)?;
        let (hosts, trace_ids, messages);
        if column_count == 6 {
            hosts = decode_strings(&read_block(&mut file)?)?;
            messages = decode_strings(&read_block(&mut file)?)?;
            trace_ids = decode_strings(&read_block(&mut file)?)?;
        } else {
            messages = decode_strings(&read_block(&mut file)?)?;
            hosts = vec![String::new(); row_count];
            trace_ids = vec![String::new(); row_count];
        }

        if timestamps.len() != row_count
            || levels.len() != row_count
            || services.len() != row_count
            || messages.len() != row_count
        {
            return Err(NanoError::Corruption(format!(
                "{}: column length mismatch",
                path.display()
            )));
        }

        Ok(SegmentIter {
            filter: filter.clone(),
            timestamps,
            levels,
            services,
            hosts,
            messages,
            trace_ids,
            cursor: 0,
        })
    }

    /// Open and collect all matching rows.
    pub fn read_rows(&self, path: &Path, filter: &Filter) -> Result<Vec<LogRow>> {
        Ok(Self::open(path, filter)?.collect())
    }
}

impl Default for SegmentReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentRead for SegmentReader {
    fn read(&self, path: &Path, filter: &Filter) -> Result<Vec<LogRow>> {
        self.read_rows(path, filter)
    }
}

/// Row iterator over one decoded segment. Yields rows in physical (append)
/// order, applying the filter's scalar criteria.
#[derive(Debug)]
pub struct SegmentIter {
    filter: Filter,
    timestamps: Vec<Timestamp>,
    levels: Vec<u8>,
    services: Vec<String>,
    hosts: Vec<String>,
    messages: Vec<String>,
    trace_ids: Vec<String>,
    cursor: usize,
}

impl SegmentIter {
    fn empty(filter: Filter) -> Self {
        Self {
            filter,
            timestamps: Vec::new(),
            levels: Vec::new(),
            services: Vec::new(),
            hosts: Vec::new(),
            messages: Vec::new(),
            trace_ids: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

impl Iterator for SegmentIter {
    type Item = LogRow;

    fn next(&mut self) -> Option<LogRow> {
        while self.cursor < self.timestamps.len() {
            let i = self.cursor;
            self.cursor += 1;

            let row = LogRow {
                timestamp: self.timestamps[i],
                level: self.levels[i],
                service: self.services[i].clone(),
                host: self.hosts[i].clone(),
                message: self.messages[i].clone(),
                trace_id: self.trace_ids[i].clone(),
            };
            if self.filter.matches_scalar(&row) {
                return Some(row);
            }
        }
        None
    }
}

fn read_footer(file: &mut File, file_len: u64) -> Result<(usize, Timestamp, Timestamp)> {
    file.seek(SeekFrom::Start(file_len - FOOTER_LEN))?;
    let mut footer = [0u8; FOOTER_LEN as usize];
    file.read_exact(&mut footer)?;

    let row_count = u32::from_le_bytes(footer[0..4].try_into().unwrap()) as usize;
    let min_ts = i64::from_le_bytes(footer[4..12].try_into().unwrap());
    let max_ts = i64::from_le_bytes(footer[12..20].try_into().unwrap());
    Ok((row_count, min_ts, max_ts))
}

fn read_block(file: &mut File) -> Result<Vec<u8>> {
    let mut size_buf = [0u8; 4];
    file.read_exact(&mut size_buf)?;
    let size = u32::from_le_bytes(size_buf) as usize;

    let mut compressed = vec![0u8; size];
    file.read_exact(&mut compressed)?;

    zstd::decode_all(&compressed[..]).map_err(|e| NanoError::Compression(e.to_string()))
}

fn decode_i64s(data: &[u8]) -> Vec<i64> {
    data.chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

fn decode_strings(data: &[u8]) -> Result<Vec<String>> {
    let mut result = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + 4 > data.len() {
            return Err(NanoError::Corruption("truncated string block".into()));
        }
        let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > data.len() {
            return Err(NanoError::Corruption("string overruns block".into()));
        }
        let s = std::str::from_utf8(&data[pos..pos + len])
            .map_err(|e| NanoError::Corruption(format!("invalid UTF-8 in column: {e}")))?;
        result.push(s.to_string());
        pos += len;
    }

    Ok(result)
}
