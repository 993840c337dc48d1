//! Write-Ahead Log (WAL) implementation
//!
//! Every ingested row is appended here before it reaches the MemTable, so a
//! crash between ingest and seal loses nothing: the file is replayed into a
//! fresh MemTable on startup. Records are length-prefixed JSON
//! (`u32 LE length | payload`) so that replay survives schema additions and
//! a torn trailing record.
//!
//! The file is truncated only after the segment sealed from the corresponding
//! MemTable has been fully written and its stats merged.

use crate::{LogRow, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only durability log. All operations go through a single mutex;
/// appends are short and do not fsync (callers batch `sync`).
pub struct Wal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Append one row. Does not fsync.
    pub fn append(&self, row: &LogRow) -> Result<()> {
        let payload = serde_json::to_vec(row)
            .map_err(|e| crate::NanoError::InvalidFormat(e.to_string()))?;

        let mut file = self.file.lock();
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;
        Ok(())
    }

    /// Flush file buffers to disk. Called once per inbound batch, not per row.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Read back all records. A truncated trailing record (torn write during
    /// a crash) ends the replay cleanly; everything before it is returned.
    pub fn replay(&self) -> Result<Vec<LogRow>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let mut rows = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(path = %self.path.display(), "truncated WAL tail record, stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            match serde_json::from_slice::<LogRow>(&payload) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "unreadable WAL record, stopping replay");
                    break;
                }
            }
        }

        Ok(rows)
    }

    /// Truncate to zero length. Only called once the seal of the
    /// corresponding MemTable is observably complete.
    pub fn reset(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Flush and release the file.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(ts: i64, message: &str) -> LogRow {
        LogRow {
            timestamp: ts,
            level: 1,
            service: "svc".into(),
            host: "h1".into(),
            message: message.into(),
            trace_id: String::new(),
        }
    }

    #[test]
    fn test_append_replay() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();

        for i in 0..10 {
            wal.append(&row(i, &format!("msg-{i}"))).unwrap();
        }
        wal.sync().unwrap();

        let rows = wal.replay().unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[3].message, "msg-3");
    }

    #[test]
    fn test_replay_survives_truncated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let wal = Wal::open(&path).unwrap();
            wal.append(&row(1, "first")).unwrap();
            wal.append(&row(2, "second")).unwrap();
            wal.sync().unwrap();
        }

        // Simulate a torn write: chop bytes off the last record.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        let wal = Wal::open(&path).unwrap();
        let rows = wal.replay().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "first");
    }

    #[test]
    fn test_reset_clears_file() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();

        wal.append(&row(1, "hello")).unwrap();
        assert!(wal.size().unwrap() > 0);

        wal.reset().unwrap();
        assert_eq!(wal.size().unwrap(), 0);
        assert!(wal.replay().unwrap().is_empty());

        // Still usable after reset
        wal.append(&row(2, "again")).unwrap();
        assert_eq!(wal.replay().unwrap().len(), 1);
    }
}
