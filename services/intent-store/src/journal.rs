//! Append-only intent journal with checksums
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len: u32]
//! [body: bincode-serialized JournalRecord]
//! [checksum: u32]  // CRC32C over body
//! ```
//!
//! Entries are flushed and fsynced on append. Readers verify the checksum of
//! every entry and stop at the first short or corrupt one, cutting the tail
//! rather than misreading it.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use types::ids::{IntentId, LedgerTxRef};
use types::intent::Intent;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ── Journal Record ──────────────────────────────────────────────────

/// One lifecycle step of one intent, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Intent created in PENDING, before any network call.
    Created { intent: Intent },
    /// One submission attempt started.
    Attempt { intent_id: IntentId, at: i64 },
    /// Ledger acknowledged receipt and assigned a reference.
    Submitted {
        intent_id: IntentId,
        tx_ref: LedgerTxRef,
        at: i64,
    },
    Confirmed { intent_id: IntentId, at: i64 },
    Failed { intent_id: IntentId, at: i64 },
    /// Confirmation polling exhausted; awaiting reconciliation.
    Unknown { intent_id: IntentId, at: i64 },
}

impl JournalRecord {
    /// Serialize to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let body =
            bincode::serialize(self).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let checksum = crc32c(&body);

        let mut buf = Vec::with_capacity(4 + body.len() + 4);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Deserialize one entry from `data`.
    ///
    /// Returns `(record, bytes_consumed)`, or None if the entry is short,
    /// corrupt, or fails its checksum — the tail-cut signal.
    pub fn from_bytes(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 4 {
            return None;
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let total = 4 + body_len + 4;
        if body_len > 16_000_000 || data.len() < total {
            return None;
        }

        let body = &data[4..4 + body_len];
        let stored = u32::from_le_bytes([
            data[4 + body_len],
            data[4 + body_len + 1],
            data[4 + body_len + 2],
            data[4 + body_len + 3],
        ]);
        if crc32c(body) != stored {
            return None;
        }

        let record = bincode::deserialize(body).ok()?;
        Some((record, total))
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Appends lifecycle records durably; every append is flushed and fsynced
/// before returning, so "journaled" means "on disk".
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JournalWriter {
    /// Open (or create) the journal at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Append one record durably.
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        let bytes = record.to_bytes()?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every intact record from the journal at `path`.
///
/// Stops at the first short or corrupt entry: a crash mid-append leaves a
/// truncated tail which is cut, never misread. Missing files read as empty.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>, JournalError> {
    let path = path.as_ref();
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        match JournalRecord::from_bytes(&data[offset..]) {
            Some((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            None => {
                warn!(
                    path = %path.display(),
                    offset,
                    trailing_bytes = data.len() - offset,
                    "cutting corrupt or truncated journal tail"
                );
                break;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{AccountId, LotId};
    use types::intent::IntentPayload;
    use types::numeric::Quantity;

    fn created_record() -> JournalRecord {
        JournalRecord::Created {
            intent: Intent::new(
                IntentPayload::Retire {
                    lot_id: LotId::new(),
                    account_id: AccountId::new(),
                    amount: Quantity::from_str("5.0").unwrap(),
                },
                100,
            ),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let record = created_record();
        let bytes = record.to_bytes().unwrap();
        let (decoded, consumed) = JournalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_checksum_rejects_flipped_bit() {
        let record = created_record();
        let mut bytes = record.to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(JournalRecord::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_write_then_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");

        let first = created_record();
        let second = JournalRecord::Failed {
            intent_id: IntentId::new(),
            at: 7,
        };

        let mut writer = JournalWriter::open(&path).unwrap();
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();
        drop(writer);

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![first, second]);
    }

    #[test]
    fn test_truncated_tail_is_cut() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");

        let first = created_record();
        let second = created_record();
        let mut writer = JournalWriter::open(&path).unwrap();
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();
        drop(writer);

        // Simulate a crash mid-append: chop bytes off the end
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 5]).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![first]);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(dir.path().join("absent.journal")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_append_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");

        let first = created_record();
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            writer.append(&first).unwrap();
        }
        let second = created_record();
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            writer.append(&second).unwrap();
        }

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
