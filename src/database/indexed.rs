//! B+Tree-indexed store without transactions.

use std::path::Path;

use super::StoreOptions;
use crate::access::btree::BTree;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;

/// Point lookups, ordered range scans, inserts, updates and deletes over a
/// B+Tree rooted at page 1.
pub struct IndexedStore {
    pool: BufferPool,
    tree: BTree,
}

impl IndexedStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> StorageResult<Self> {
        let page_manager = PageManager::open(path)?;
        let mut pool = BufferPool::new(page_manager, options.buffer_capacity);

        let tree = if pool.num_pages() > 0 {
            BTree::open(PageId(1))
        } else {
            // The first allocation of a fresh file, so the root is page 1.
            BTree::create(&mut pool)?
        };

        Ok(Self { pool, tree })
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tree.insert(&mut self.pool, key, value)
    }

    pub fn get(&mut self, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.tree
            .search(&mut self.pool, key)?
            .ok_or(StorageError::KeyNotFound)
    }

    pub fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        if self.tree.delete(&mut self.pool, key)? {
            Ok(())
        } else {
            Err(StorageError::KeyNotFound)
        }
    }

    pub fn range_scan(&mut self, lo: &[u8], hi: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.range_scan(&mut self.pool, lo, hi)
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.pool.flush_dirty()
    }

    pub fn hit_rate(&self) -> f64 {
        self.pool.hit_rate()
    }
}

impl Drop for IndexedStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = IndexedStore::open(&dir.path().join("test.db")).unwrap();

        store.insert(b"apple", b"1").unwrap();
        store.insert(b"banana", b"2").unwrap();
        store.insert(b"cherry", b"3").unwrap();

        assert_eq!(store.get(b"apple").unwrap(), b"1");
        assert_eq!(store.get(b"banana").unwrap(), b"2");
        assert_eq!(store.get(b"cherry").unwrap(), b"3");
        assert!(matches!(store.get(b"date"), Err(StorageError::KeyNotFound)));

        let scan = store.range_scan(b"a", b"c").unwrap();
        assert_eq!(
            scan,
            vec![
                (b"apple".to_vec(), b"1".to_vec()),
                (b"banana".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let mut store = IndexedStore::open(&dir.path().join("test.db")).unwrap();

        store.insert(b"k", b"v").unwrap();
        store.delete(b"k").unwrap();

        assert!(matches!(store.get(b"k"), Err(StorageError::KeyNotFound)));
        assert!(matches!(store.delete(b"k"), Err(StorageError::KeyNotFound)));
    }

    #[test]
    fn test_reopen_after_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut store = IndexedStore::open(&path).unwrap();
            for i in 0..100 {
                let key = format!("key:{i:04}");
                let value = format!("value_{i}");
                store.insert(key.as_bytes(), value.as_bytes()).unwrap();
            }
            store.flush().unwrap();
        }

        let mut store = IndexedStore::open(&path).unwrap();
        assert_eq!(store.get(b"key:0042").unwrap(), b"value_42");
        assert_eq!(store.get(b"key:0099").unwrap(), b"value_99");

        let scan = store.range_scan(b"key:0010", b"key:0019").unwrap();
        assert_eq!(scan.len(), 10);
    }

    #[test]
    fn test_reopen_after_drop_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut store = IndexedStore::open(&path).unwrap();
            store.insert(b"durable", b"yes").unwrap();
            // No explicit flush; Drop writes dirty pages back.
        }

        let mut store = IndexedStore::open(&path).unwrap();
        assert_eq!(store.get(b"durable").unwrap(), b"yes");
    }
}
