//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Errors that can occur anywhere in the storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Lookup or delete of a key that is not present. Recoverable.
    #[error("key not found")]
    KeyNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk bytes failed validation (checksum mismatch, malformed node,
    /// unknown record type).
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A record or serialized node does not fit in a single page.
    #[error("page overflow: requires {required} bytes but only {available} available")]
    PageOverflow { required: usize, available: usize },

    /// Read of page id 0 or a page beyond the allocated range.
    #[error("invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// The transaction has already committed or aborted.
    #[error("transaction {0} is not active")]
    TransactionInactive(TransactionId),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
