//! The buffer pool: a fixed-capacity in-memory cache of pages.

pub mod lru;
pub mod replacer;

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::storage::disk::PageManager;
use crate::storage::error::StorageResult;
use crate::storage::page::{Page, PageId};
use lru::LruReplacer;
use replacer::Replacer;

/// Default number of cached pages.
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;

/// Caches pages fetched through the [`PageManager`] it owns.
///
/// The pool is the single writer of data pages: pages reach disk only via
/// [`BufferPool::flush_dirty`] or eviction, both of which write dirty pages
/// back before dropping them. Borrowed page views returned by `fetch` /
/// `fetch_mut` last only until the next call on the pool, which is the
/// lifetime the `&mut self` receivers enforce.
pub struct BufferPool {
    page_manager: PageManager,
    cache: HashMap<PageId, Page>,
    replacer: Box<dyn Replacer>,
    dirty: HashSet<PageId>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl BufferPool {
    pub fn new(page_manager: PageManager, capacity: usize) -> Self {
        Self {
            page_manager,
            cache: HashMap::with_capacity(capacity),
            replacer: Box::new(LruReplacer::new(capacity)),
            dirty: HashSet::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Fetches a page for reading.
    pub fn fetch(&mut self, page_id: PageId) -> StorageResult<&Page> {
        self.ensure_cached(page_id)?;
        Ok(&self.cache[&page_id])
    }

    /// Fetches a page for mutation. Callers that change the page must also
    /// call [`BufferPool::mark_dirty`].
    pub fn fetch_mut(&mut self, page_id: PageId) -> StorageResult<&mut Page> {
        self.ensure_cached(page_id)?;
        Ok(self.cache.get_mut(&page_id).unwrap())
    }

    fn ensure_cached(&mut self, page_id: PageId) -> StorageResult<()> {
        if self.cache.contains_key(&page_id) {
            self.hits += 1;
            self.replacer.touch(page_id);
            return Ok(());
        }

        self.misses += 1;
        if self.cache.len() >= self.capacity {
            self.evict()?;
        }

        let page = self.page_manager.read_page(page_id)?;
        self.cache.insert(page_id, page);
        self.replacer.touch(page_id);
        Ok(())
    }

    /// Marks a cached page as modified so it is written back before it can
    /// leave the cache.
    pub fn mark_dirty(&mut self, page_id: PageId) {
        self.dirty.insert(page_id);
    }

    /// Writes every dirty page still present in the cache back to disk and
    /// clears the dirty set.
    pub fn flush_dirty(&mut self) -> StorageResult<()> {
        let mut dirty: Vec<PageId> = self.dirty.iter().copied().collect();
        dirty.sort();
        for page_id in dirty {
            if let Some(page) = self.cache.get(&page_id) {
                self.page_manager.write_page(page)?;
            }
        }
        self.dirty.clear();
        Ok(())
    }

    /// Evicts the least recently used page, writing it back first if dirty.
    fn evict(&mut self) -> StorageResult<()> {
        let Some(victim) = self.replacer.evict() else {
            return Ok(());
        };

        if self.dirty.remove(&victim) {
            if let Some(page) = self.cache.get(&victim) {
                self.page_manager.write_page(page)?;
            }
        }
        self.cache.remove(&victim);
        trace!(page_id = %victim, "evicted page");
        Ok(())
    }

    /// Allocates a fresh page id through the page manager.
    pub fn allocate_page(&mut self) -> PageId {
        self.page_manager.allocate_page()
    }

    /// Number of pages allocated in the underlying file.
    pub fn num_pages(&self) -> u32 {
        self.page_manager.num_pages()
    }

    /// Number of pages currently cached.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Fraction of fetches served from the cache; 0.0 before any fetch.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
