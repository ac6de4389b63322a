//! Append-only write-ahead log manager.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{debug, warn};

use super::record::{Lsn, RecordKind, WalRecord};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;

/// Manages the `<db>.wal` file: appends records with monotonically
/// increasing LSNs and replays them sequentially.
pub struct WalManager {
    file: File,
    path: PathBuf,
    current_lsn: Lsn,
}

impl WalManager {
    /// Opens the log at `path`, creating it if absent. For an existing log
    /// the current LSN is restored from the last record that passes its
    /// checksum; a torn tail is left in place and keeps failing
    /// verification on later scans.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut manager = Self {
            file,
            path: path.to_path_buf(),
            current_lsn: Lsn(0),
        };

        let records = manager.read_log()?;
        if let Some(last) = records.last() {
            manager.current_lsn = last.lsn;
        }
        debug!(
            ?path,
            records = records.len(),
            last_lsn = manager.current_lsn.0,
            "opened WAL"
        );

        Ok(manager)
    }

    /// LSN of the most recently appended record; zero for an empty log.
    pub fn last_lsn(&self) -> Lsn {
        self.current_lsn
    }

    fn append(
        &mut self,
        kind: RecordKind,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<Lsn> {
        let record = WalRecord {
            kind,
            lsn: self.current_lsn.next(),
            txn_id,
            page_id,
            key: key.to_vec(),
            value: value.to_vec(),
        };

        let mut buf = BytesMut::with_capacity(record.encoded_len());
        record.encode(&mut buf);

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;

        self.current_lsn = record.lsn;
        Ok(record.lsn)
    }

    pub fn log_insert(
        &mut self,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<Lsn> {
        self.append(RecordKind::Insert, txn_id, page_id, key, value)
    }

    pub fn log_update(
        &mut self,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<Lsn> {
        self.append(RecordKind::Update, txn_id, page_id, key, value)
    }

    pub fn log_delete(&mut self, txn_id: u64, page_id: PageId, key: &[u8]) -> StorageResult<Lsn> {
        self.append(RecordKind::Delete, txn_id, page_id, key, &[])
    }

    pub fn log_begin(&mut self, txn_id: u64) -> StorageResult<Lsn> {
        self.append(RecordKind::Begin, txn_id, PageId(0), &[], &[])
    }

    pub fn log_commit(&mut self, txn_id: u64) -> StorageResult<Lsn> {
        self.append(RecordKind::Commit, txn_id, PageId(0), &[], &[])
    }

    pub fn log_abort(&mut self, txn_id: u64) -> StorageResult<Lsn> {
        self.append(RecordKind::Abort, txn_id, PageId(0), &[], &[])
    }

    pub fn log_checkpoint(&mut self) -> StorageResult<Lsn> {
        self.append(RecordKind::Checkpoint, 0, PageId(0), &[], &[])
    }

    /// Forces appended records out of the OS buffer onto disk.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Rewinds and decodes the whole log. Parsing stops at the first
    /// truncated or checksum-failing record; everything before it is
    /// returned, so a torn tail never hides earlier records.
    pub fn read_log(&mut self) -> StorageResult<Vec<WalRecord>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut slice: &[u8] = &bytes;
        while !slice.is_empty() {
            match WalRecord::decode(&mut slice) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        parsed = records.len(),
                        remaining = slice.len(),
                        %err,
                        "WAL scan stopped at corrupt or truncated record"
                    );
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Empties the log and resets the LSN counter. Only valid after a full
    /// checkpoint has made everything in the log redundant.
    pub fn truncate(&mut self) -> StorageResult<()> {
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_lsn = Lsn(0);
        debug!(path = ?self.path, "truncated WAL");
        Ok(())
    }
}
