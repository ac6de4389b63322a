//! Crash recovery by WAL replay.
//!
//! Replay is a single forward pass: operations belonging to committed
//! transactions (or auto-commit operations) are re-applied to the tree,
//! everything else is skipped. Inserts overwrite and deletes of missing
//! keys are no-ops, so running replay twice over the same log converges to
//! the same tree.

use std::collections::HashSet;

use tracing::info;

use crate::access::btree::BTree;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::wal::record::{RecordKind, WalRecord};

/// What a replay pass did, for logging and for reseeding the transaction
/// id generator.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Records scanned across the whole log.
    pub records_scanned: usize,
    /// Records re-applied to the tree.
    pub records_replayed: usize,
    /// Index of the first record considered for replay (just past the
    /// last checkpoint).
    pub replay_start: usize,
    /// Highest transaction id seen anywhere in the log.
    pub max_txn_id: u64,
}

/// Replays `records` into `tree`, honoring commit status and the last
/// checkpoint boundary.
pub fn replay(
    pool: &mut BufferPool,
    tree: &mut BTree,
    records: &[WalRecord],
) -> StorageResult<RecoverySummary> {
    let mut committed: HashSet<u64> = HashSet::new();
    let mut aborted: HashSet<u64> = HashSet::new();
    let mut replay_start = 0;
    let mut max_txn_id = 0;

    for (index, record) in records.iter().enumerate() {
        max_txn_id = max_txn_id.max(record.txn_id);
        match record.kind {
            RecordKind::Commit => {
                committed.insert(record.txn_id);
            }
            RecordKind::Abort => {
                aborted.insert(record.txn_id);
            }
            RecordKind::Checkpoint => {
                // Everything before this point is already on disk.
                replay_start = index + 1;
            }
            _ => {}
        }
    }

    let mut records_replayed = 0;
    for record in &records[replay_start..] {
        let durable = record.txn_id == 0
            || (committed.contains(&record.txn_id) && !aborted.contains(&record.txn_id));
        if !durable {
            continue;
        }

        match record.kind {
            RecordKind::Insert | RecordKind::Update => {
                tree.insert(pool, &record.key, &record.value)?;
                records_replayed += 1;
            }
            RecordKind::Delete => {
                // Absent keys are fine: the delete may already be durable.
                tree.delete(pool, &record.key)?;
                records_replayed += 1;
            }
            RecordKind::Begin | RecordKind::Commit | RecordKind::Abort | RecordKind::Checkpoint => {}
        }
    }

    let summary = RecoverySummary {
        records_scanned: records.len(),
        records_replayed,
        replay_start,
        max_txn_id,
    };
    info!(
        scanned = summary.records_scanned,
        replayed = summary.records_replayed,
        replay_start = summary.replay_start,
        max_txn_id = summary.max_txn_id,
        "recovery replay finished"
    );
    Ok(summary)
}
