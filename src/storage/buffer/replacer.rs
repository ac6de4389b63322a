use std::fmt::Debug;

use crate::storage::page::PageId;

/// Eviction policy for the buffer pool.
pub trait Replacer: Debug {
    /// Record an access so the page becomes the most recently used.
    fn touch(&mut self, page_id: PageId);

    /// Select a page to evict. Returns None if nothing is tracked.
    fn evict(&mut self) -> Option<PageId>;

    /// Stop tracking a page without evicting it.
    fn remove(&mut self, page_id: PageId);

    /// Number of tracked pages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
