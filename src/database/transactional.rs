//! Transactional store: B+Tree plus write-ahead logging and recovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::StoreOptions;
use crate::access::btree::BTree;
use crate::recovery;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::wal::record::Lsn;
use crate::storage::wal::WalManager;
use crate::transaction::{TransactionId, TransactionIdGenerator, TransactionState, AUTO_COMMIT};

/// Per-transaction bookkeeping. The inserted-key list is what `abort` can
/// roll back; overwrites and deletes are not undone because no before-image
/// is logged.
struct TransactionHandle {
    state: TransactionState,
    inserted_keys: Vec<Vec<u8>>,
}

/// Durable key-value store with single-writer transactions.
///
/// Every mutation is appended to the WAL and flushed before it touches the
/// tree; commit flushes the WAL again and then writes dirty pages back. On
/// open, a non-empty WAL is replayed (committed and auto-commit records
/// after the last checkpoint) to restore the last durable state.
pub struct TransactionalStore {
    pool: BufferPool,
    tree: BTree,
    wal: WalManager,
    txn_ids: TransactionIdGenerator,
    transactions: HashMap<TransactionId, TransactionHandle>,
}

fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

impl TransactionalStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> StorageResult<Self> {
        let page_manager = PageManager::open(path)?;
        let mut pool = BufferPool::new(page_manager, options.buffer_capacity);

        let mut tree = if pool.num_pages() > 0 {
            BTree::open(PageId(1))
        } else {
            BTree::create(&mut pool)?
        };

        let mut wal = WalManager::open(&wal_path_for(path))?;
        let records = wal.read_log()?;
        let txn_ids = if records.is_empty() {
            TransactionIdGenerator::new()
        } else {
            let summary = recovery::replay(&mut pool, &mut tree, &records)?;
            TransactionIdGenerator::starting_at(summary.max_txn_id + 1)
        };

        Ok(Self {
            pool,
            tree,
            wal,
            txn_ids,
            transactions: HashMap::new(),
        })
    }

    /// Starts an explicit transaction and returns its id.
    pub fn begin(&mut self) -> StorageResult<TransactionId> {
        let txn_id = self.txn_ids.next();
        self.wal.log_begin(txn_id.value())?;
        self.wal.flush()?;
        self.transactions.insert(
            txn_id,
            TransactionHandle {
                state: TransactionState::Active,
                inserted_keys: Vec::new(),
            },
        );
        debug!(%txn_id, "began transaction");
        Ok(txn_id)
    }

    fn require_active(&self, txn_id: TransactionId) -> StorageResult<()> {
        let handle = self
            .transactions
            .get(&txn_id)
            .ok_or(StorageError::TransactionNotFound(txn_id))?;
        if !handle.state.is_active() {
            return Err(StorageError::TransactionInactive(txn_id));
        }
        Ok(())
    }

    /// Makes the transaction's effects durable.
    pub fn commit(&mut self, txn_id: TransactionId) -> StorageResult<()> {
        self.require_active(txn_id)?;

        self.wal.log_commit(txn_id.value())?;
        self.wal.flush()?;
        self.pool.flush_dirty()?;

        let handle = self.transactions.get_mut(&txn_id).unwrap();
        handle.state = TransactionState::Committed;
        handle.inserted_keys.clear();
        debug!(%txn_id, "committed transaction");
        Ok(())
    }

    /// Rolls back the transaction's inserts and marks it aborted.
    pub fn abort(&mut self, txn_id: TransactionId) -> StorageResult<()> {
        self.require_active(txn_id)?;

        let inserted = std::mem::take(
            &mut self
                .transactions
                .get_mut(&txn_id)
                .unwrap()
                .inserted_keys,
        );
        for key in &inserted {
            self.tree.delete(&mut self.pool, key)?;
        }

        self.wal.log_abort(txn_id.value())?;
        self.wal.flush()?;
        self.pool.flush_dirty()?;

        self.transactions.get_mut(&txn_id).unwrap().state = TransactionState::Aborted;
        debug!(%txn_id, rolled_back = inserted.len(), "aborted transaction");
        Ok(())
    }

    /// Auto-commit insert.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.insert_txn(AUTO_COMMIT, key, value)
    }

    /// Auto-commit delete.
    pub fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.delete_txn(AUTO_COMMIT, key)
    }

    /// Inserts inside the given transaction; the auto-commit sentinel wraps
    /// the call in a fresh BEGIN/COMMIT pair.
    pub fn insert_txn(
        &mut self,
        txn_id: TransactionId,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<()> {
        if txn_id.is_auto() {
            let txn_id = self.begin()?;
            self.apply_insert(txn_id, key, value, false)?;
            return self.commit(txn_id);
        }

        self.require_active(txn_id)?;
        self.apply_insert(txn_id, key, value, true)
    }

    fn apply_insert(
        &mut self,
        txn_id: TransactionId,
        key: &[u8],
        value: &[u8],
        track: bool,
    ) -> StorageResult<()> {
        // An entry that cannot be stored must not enter the log either;
        // replay applies records verbatim.
        BTree::validate_entry(key, value)?;

        self.wal.log_insert(txn_id.value(), PageId(1), key, value)?;
        self.wal.flush()?;
        self.tree.insert(&mut self.pool, key, value)?;

        if track {
            if let Some(handle) = self.transactions.get_mut(&txn_id) {
                handle.inserted_keys.push(key.to_vec());
            }
        }
        Ok(())
    }

    /// Deletes inside the given transaction. A missing key fails with
    /// [`StorageError::KeyNotFound`]; the already-appended DELETE record is
    /// a harmless no-op at replay.
    pub fn delete_txn(&mut self, txn_id: TransactionId, key: &[u8]) -> StorageResult<()> {
        if txn_id.is_auto() {
            let txn_id = self.begin()?;
            return match self.apply_delete(txn_id, key) {
                Ok(()) => self.commit(txn_id),
                Err(err) => {
                    self.abort(txn_id)?;
                    Err(err)
                }
            };
        }

        self.require_active(txn_id)?;
        self.apply_delete(txn_id, key)
    }

    fn apply_delete(&mut self, txn_id: TransactionId, key: &[u8]) -> StorageResult<()> {
        self.wal.log_delete(txn_id.value(), PageId(1), key)?;
        self.wal.flush()?;
        if self.tree.delete(&mut self.pool, key)? {
            Ok(())
        } else {
            Err(StorageError::KeyNotFound)
        }
    }

    pub fn get(&mut self, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.tree
            .search(&mut self.pool, key)?
            .ok_or(StorageError::KeyNotFound)
    }

    pub fn range_scan(&mut self, lo: &[u8], hi: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.range_scan(&mut self.pool, lo, hi)
    }

    /// Writes everything out and discards the log: once all dirty pages are
    /// on disk the WAL carries no information recovery still needs.
    pub fn checkpoint(&mut self) -> StorageResult<()> {
        self.wal.log_checkpoint()?;
        self.pool.flush_dirty()?;
        self.wal.flush()?;
        self.wal.truncate()?;
        debug!("checkpoint complete");
        Ok(())
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.pool.flush_dirty()?;
        self.wal.flush()
    }

    pub fn hit_rate(&self) -> f64 {
        self.pool.hit_rate()
    }

    /// LSN of the most recent WAL record; zero right after a truncation.
    pub fn last_lsn(&self) -> Lsn {
        self.wal.last_lsn()
    }
}

impl Drop for TransactionalStore {
    fn drop(&mut self) {
        // Best effort, mirroring a final checkpoint without truncation.
        let _ = self.wal.log_checkpoint();
        let _ = self.wal.flush();
        let _ = self.pool.flush_dirty();
    }
}
