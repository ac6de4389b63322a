//! The simplest store: delimited records on a single metadata page.

use std::path::Path;

use super::StoreOptions;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PAGE_HEADER_SIZE, PAGE_SIZE};

/// Record separator between key and value.
const RS: u8 = 0x1E;
/// Unit separator terminating each record.
const US: u8 = 0x1F;

/// Key-value store that appends `key RS value US` records to page 1 and
/// answers lookups with a linear scan. The write offset is persisted in the
/// page header's `free_space_offset`, so the store picks up where it left
/// off on reopen.
pub struct LinearStore {
    pool: BufferPool,
    meta_page_id: PageId,
    write_offset: usize,
}

impl LinearStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> StorageResult<Self> {
        let page_manager = PageManager::open(path)?;
        let mut pool = BufferPool::new(page_manager, options.buffer_capacity);

        let (meta_page_id, write_offset) = if pool.num_pages() > 0 {
            let page = pool.fetch(PageId(1))?;
            (PageId(1), page.header().free_space_offset as usize)
        } else {
            (pool.allocate_page(), PAGE_HEADER_SIZE)
        };

        Ok(Self {
            pool,
            meta_page_id,
            write_offset,
        })
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut record = Vec::with_capacity(key.len() + value.len() + 2);
        record.extend_from_slice(key);
        record.push(RS);
        record.extend_from_slice(value);
        record.push(US);

        let end = self.write_offset + record.len();
        if end > PAGE_SIZE {
            return Err(StorageError::PageOverflow {
                required: end,
                available: PAGE_SIZE,
            });
        }

        let page = self.pool.fetch_mut(self.meta_page_id)?;
        let mut header = page.header();
        header.free_space_offset = end as u32;
        header.num_slots += 1;
        page.set_header(header);
        page.write_at(self.write_offset, &record)?;
        self.pool.mark_dirty(self.meta_page_id);

        self.write_offset = end;
        Ok(())
    }

    pub fn get(&mut self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let page = self.pool.fetch(self.meta_page_id)?;
        let data = page.read_at(PAGE_HEADER_SIZE, self.write_offset - PAGE_HEADER_SIZE)?;

        for record in data.split(|&b| b == US) {
            let Some(sep) = record.iter().position(|&b| b == RS) else {
                continue;
            };
            if &record[..sep] == key {
                return Ok(record[sep + 1..].to_vec());
            }
        }
        Err(StorageError::KeyNotFound)
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.pool.flush_dirty()
    }

    pub fn hit_rate(&self) -> f64 {
        self.pool.hit_rate()
    }
}

impl Drop for LinearStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let mut store = LinearStore::open(&dir.path().join("test.db")).unwrap();

        store.insert(b"name", b"alice").unwrap();
        store.insert(b"city", b"zurich").unwrap();

        assert_eq!(store.get(b"name").unwrap(), b"alice");
        assert_eq!(store.get(b"city").unwrap(), b"zurich");
        assert!(matches!(
            store.get(b"missing"),
            Err(StorageError::KeyNotFound)
        ));
    }

    #[test]
    fn test_offset_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut store = LinearStore::open(&path).unwrap();
            store.insert(b"k1", b"v1").unwrap();
            store.flush().unwrap();
        }

        let mut store = LinearStore::open(&path).unwrap();
        assert_eq!(store.get(b"k1").unwrap(), b"v1");

        // New inserts append after the restored offset.
        store.insert(b"k2", b"v2").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), b"v1");
        assert_eq!(store.get(b"k2").unwrap(), b"v2");
    }

    #[test]
    fn test_page_overflow_is_reported() {
        let dir = tempdir().unwrap();
        let mut store = LinearStore::open(&dir.path().join("test.db")).unwrap();

        // Each record is 2002 bytes; two fit below the 4096-byte page, the
        // third does not.
        let big = vec![b'x'; 1000];
        for _ in 0..2 {
            store.insert(&big, &big).unwrap();
        }
        assert!(matches!(
            store.insert(&big, &big),
            Err(StorageError::PageOverflow { .. })
        ));
    }

    #[test]
    fn test_hit_rate_grows_with_repeated_reads() {
        let dir = tempdir().unwrap();
        let mut store = LinearStore::open(&dir.path().join("test.db")).unwrap();

        store.insert(b"k", b"v").unwrap();
        for _ in 0..20 {
            store.get(b"k").unwrap();
        }
        assert!(store.hit_rate() > 0.9);
    }
}
