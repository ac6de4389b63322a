//! Transaction identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction. Id 0 is the auto-commit
/// sentinel: passing it to the `_txn` operations wraps the call in an
/// implicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

/// The auto-commit sentinel.
pub const AUTO_COMMIT: TransactionId = TransactionId(0);

impl TransactionId {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_auto(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Monotonic transaction id source. The counter is atomic so ids stay
/// unique even under coarse external synchronization.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// Starts issuing ids from 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Starts issuing ids from `first`; used after recovery to continue
    /// past every id seen in the log.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
