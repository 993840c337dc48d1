//! Segment writer

use super::{SegmentWrite, MAGIC_V2};
use crate::memtable::MemTable;
use crate::{config, NanoError, Result, Timestamp};
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes MemTables out as `.nano` segment files, one zstd block per column.
pub struct SegmentWriter {
    compression_level: i32,
}

impl SegmentWriter {
    pub fn new() -> Self {
        Self {
            compression_level: config::SEGMENT_COMPRESSION_LEVEL,
        }
    }

    /// Write the whole MemTable to `path`. An empty table produces a
    /// header+footer-only file.
    pub fn write_segment(&self, path: &Path, memtable: &MemTable) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(MAGIC_V2)?;

        let cols = memtable.columns();
        let row_count = cols.len() as u32;

        if row_count == 0 {
            write_footer(&mut file, 0, 0, 0)?;
            file.flush()?;
            return Ok(());
        }

        let min_ts = *cols.timestamps.iter().min().unwrap_or(&0);
        let max_ts = *cols.timestamps.iter().max().unwrap_or(&0);

        self.write_block(&mut file, &encode_i64s(&cols.timestamps))?;
        self.write_block(&mut file, &cols.levels)?;
        self.write_block(&mut file, &encode_strings(&cols.services))?;
        self.write_block(&mut file, &encode_strings(&cols.hosts))?;
        self.write_block(&mut file, &encode_strings(&cols.messages))?;
        self.write_block(&mut file, &encode_strings(&cols.trace_ids))?;

        write_footer(&mut file, row_count, min_ts, max_ts)?;
        file.flush()?;
        Ok(())
    }

    fn write_block(&self, file: &mut BufWriter<File>, raw: &[u8]) -> Result<()> {
        let compressed = zstd::encode_all(raw, self.compression_level)
            .map_err(|e| NanoError::Compression(e.to_string()))?;
        file.write_all(&(compressed.len() as u32).to_le_bytes())?;
        file.write_all(&compressed)?;
        Ok(())
    }
}

impl Default for SegmentWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentWrite for SegmentWriter {
    fn write(&self, path: &Path, memtable: &MemTable) -> Result<()> {
        self.write_segment(path, memtable)
    }
}

fn encode_i64s(values: &[i64]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * 8);
    for &v in values {
        buf.put_i64_le(v);
    }
    buf.to_vec()
}

fn encode_strings(values: &[String]) -> Vec<u8> {
    let total: usize = values.iter().map(|s| s.len() + 4).sum();
    let mut buf = BytesMut::with_capacity(total);
    for s in values {
        buf.put_u32_le(s.len() as u32);
        buf.put_slice(s.as_bytes());
    }
    buf.to_vec()
}

fn write_footer(
    file: &mut BufWriter<File>,
    row_count: u32,
    min_ts: Timestamp,
    max_ts: Timestamp,
) -> Result<()> {
    file.write_all(&row_count.to_le_bytes())?;
    file.write_all(&min_ts.to_le_bytes())?;
    file.write_all(&max_ts.to_le_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentReader, FOOTER_LEN};
    use crate::Filter;
    use tempfile::TempDir;

    #[test]
    fn test_empty_memtable_writes_header_and_footer_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log_0_0.nano");

        SegmentWriter::new()
            .write_segment(&path, &MemTable::new())
            .unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 8 + FOOTER_LEN);

        let rows: Vec<_> = SegmentReader::open(&path, &Filter::default())
            .unwrap()
            .collect();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log_100_300.nano");

        let mt = MemTable::new();
        mt.append(100, 1, "order", "web-1", "created", "t-1");
        mt.append(200, 3, "order", "web-2", "failed", "");
        mt.append(300, 1, "payment", "web-1", "charged", "t-2");

        SegmentWriter::new().write_segment(&path, &mt).unwrap();

        let rows: Vec<_> = SegmentReader::open(&path, &Filter::default())
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 3);
        // Physical (append) order
        assert_eq!(rows[0].timestamp, 100);
        assert_eq!(rows[1].level, 3);
        assert_eq!(rows[1].host, "web-2");
        assert_eq!(rows[2].trace_id, "t-2");
    }
}
