// Write-ahead log: record framing, appending and replay
//
// Record format (binary):
// [length: u32 LE] [type: u8] [payload bytes] [crc32: u32 LE]
//
// Types:
// - BATCH (1): a write batch and the sequence number of its first operation
// - CHECKPOINT (2): the full contents of one column family
//
// After a compaction the log is rewritten as one checkpoint per column family,
// so it never grows past the live data plus the writes since.

use crate::memtable::Version;
use crate::write_batch::BatchOp;
use crc32fast::Hasher;
use rockbind_core::{Error, Result, Status};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Log file name inside the database directory
pub const LOG_FILE: &str = "LOG.wal";

/// Sanity limit per record
const MAX_RECORD_LEN: usize = 1 << 30;

/// Log record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Batch = 1,
    Checkpoint = 2,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Batch),
            2 => Ok(RecordType::Checkpoint),
            _ => Err(Status::corruption(format!("Unknown log record type: {}", value)).into()),
        }
    }
}

/// Log record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    Batch {
        sequence: u64,
        ops: Vec<BatchOp>,
    },
    Checkpoint {
        column_family: u32,
        last_sequence: u64,
        versions: Vec<Version>,
    },
}

/// A log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub record_type: RecordType,
    pub payload: RecordPayload,
}

impl LogRecord {
    /// Create a BATCH record
    pub fn batch(sequence: u64, ops: Vec<BatchOp>) -> Self {
        Self {
            record_type: RecordType::Batch,
            payload: RecordPayload::Batch { sequence, ops },
        }
    }

    /// Create a CHECKPOINT record
    pub fn checkpoint(column_family: u32, last_sequence: u64, versions: Vec<Version>) -> Self {
        Self {
            record_type: RecordType::Checkpoint,
            payload: RecordPayload::Checkpoint {
                column_family,
                last_sequence,
                versions,
            },
        }
    }

    /// Encode record to bytes with framing and CRC
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_bytes = bincode::serialize(&self.payload)
            .map_err(|e| Error::Serialization(format!("Failed to serialize payload: {}", e)))?;

        let type_byte = self.record_type as u8;
        let content_len = 1 + payload_bytes.len();

        // CRC over type + payload
        let mut hasher = Hasher::new();
        hasher.update(&[type_byte]);
        hasher.update(&payload_bytes);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(4 + content_len + 4);
        frame.extend_from_slice(&(content_len as u32).to_le_bytes());
        frame.push(type_byte);
        frame.extend_from_slice(&payload_bytes);
        frame.extend_from_slice(&crc.to_le_bytes());

        Ok(frame)
    }

    /// Decode one record from the front of `data`, returning it and the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        // Minimum: 4 (length) + 1 (type) + 0 (payload) + 4 (crc)
        if data.len() < 9 {
            return Err(Status::incomplete("Incomplete record frame").into());
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length == 0 || length > MAX_RECORD_LEN {
            return Err(Status::corruption(format!("Bad record length: {}", length)).into());
        }
        let total_size = 4 + length + 4;
        if data.len() < total_size {
            return Err(Status::incomplete(format!(
                "Incomplete record: expected {} bytes, got {}",
                total_size,
                data.len()
            ))
            .into());
        }

        let type_byte = data[4];
        let payload_bytes = &data[5..4 + length];
        let crc_offset = 4 + length;
        let expected_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        let mut hasher = Hasher::new();
        hasher.update(&[type_byte]);
        hasher.update(payload_bytes);
        let actual_crc = hasher.finalize();

        if actual_crc != expected_crc {
            return Err(Status::corruption(format!(
                "CRC mismatch: expected {}, got {}",
                expected_crc, actual_crc
            ))
            .into());
        }

        let record_type = RecordType::try_from(type_byte)?;
        let payload: RecordPayload = bincode::deserialize(payload_bytes)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize payload: {}", e)))?;

        Ok((
            LogRecord {
                record_type,
                payload,
            },
            total_size,
        ))
    }
}

/// Appends records to the log file
pub struct LogWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl LogWriter {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
        })
    }

    pub fn append(&mut self, record: &LogRecord, sync: bool) -> Result<()> {
        let encoded = record.encode()?;
        self.file.write_all(&encoded)?;
        if sync {
            self.sync()
        } else {
            self.file.flush()?;
            Ok(())
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        // Best effort sync on drop
        let _ = self.sync();
    }
}

/// Replace the log with `records`, written to a temporary file and renamed
/// into place. Returns a writer appending to the new log.
pub fn rewrite(dir: &Path, records: &[LogRecord]) -> Result<LogWriter> {
    let tmp = dir.join(format!("{}.tmp", LOG_FILE));
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for record in records {
            out.write_all(&record.encode()?)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
    }
    fs::rename(&tmp, dir.join(LOG_FILE))?;
    LogWriter::open(dir)
}

/// Reads every intact record of the log in order.
///
/// A truncated record at the tail (crash during append) ends the replay; a
/// checksum mismatch anywhere is reported as corruption.
pub fn read_all(dir: &Path) -> Result<Vec<LogRecord>> {
    let path = dir.join(LOG_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut data = Vec::new();
    BufReader::new(File::open(&path)?).read_to_end(&mut data)?;

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match LogRecord::decode(&data[offset..]) {
            Ok((record, used)) => {
                records.push(record);
                offset += used;
            }
            Err(Error::Status(status)) if status.is_incomplete() => {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    "ignoring truncated record at end of log"
                );
                break;
            }
            Err(e) => {
                tracing::error!(path = %path.display(), offset, error = %e, "log corruption");
                return Err(e);
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemtableEntry;
    use tempfile::TempDir;

    fn put(key: &[u8]) -> BatchOp {
        BatchOp::Put {
            cf: 0,
            key: key.to_vec(),
            value: b"v".to_vec(),
        }
    }

    #[test]
    fn test_record_type_conversion() {
        assert_eq!(RecordType::try_from(1).unwrap(), RecordType::Batch);
        assert_eq!(RecordType::try_from(2).unwrap(), RecordType::Checkpoint);
        assert!(RecordType::try_from(99).is_err());
    }

    #[test]
    fn test_crc_validation() {
        let record = LogRecord::batch(1, vec![put(b"key")]);
        let mut encoded = record.encode().unwrap();
        encoded[10] ^= 0xFF;

        let err = LogRecord::decode(&encoded).unwrap_err();
        assert!(err.status().unwrap().is_corruption());
    }

    #[test]
    fn test_incomplete_record() {
        let encoded = LogRecord::batch(1, vec![put(b"key")]).encode().unwrap();
        let err = LogRecord::decode(&encoded[..5]).unwrap_err();
        assert!(err.status().unwrap().is_incomplete());
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = LogWriter::open(dir.path()).unwrap();
            writer.append(&LogRecord::batch(1, vec![put(b"a")]), false).unwrap();
            writer.append(&LogRecord::batch(2, vec![put(b"b")]), true).unwrap();
        }

        let records = read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], LogRecord::batch(2, vec![put(b"b")]));
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = LogWriter::open(dir.path()).unwrap();
            writer.append(&LogRecord::batch(1, vec![put(b"a")]), true).unwrap();
        }
        let partial = LogRecord::batch(2, vec![put(b"b")]).encode().unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        file.write_all(&partial[..partial.len() - 3]).unwrap();

        assert_eq!(read_all(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_rewrite_replaces_log() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = LogWriter::open(dir.path()).unwrap();
            writer.append(&LogRecord::batch(1, vec![put(b"a")]), true).unwrap();
        }

        let checkpoint = LogRecord::checkpoint(
            0,
            7,
            vec![Version::new(b"a".to_vec(), 1, MemtableEntry::Value(b"v".to_vec()))],
        );
        let mut writer = rewrite(dir.path(), &[checkpoint.clone()]).unwrap();
        writer.append(&LogRecord::batch(8, vec![put(b"c")]), true).unwrap();
        drop(writer);

        let records = read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], checkpoint);
    }
}
