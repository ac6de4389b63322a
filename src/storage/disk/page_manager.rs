//! Disk I/O for fixed-size pages.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{page_type, Page, PageHeader, PageId, PAGE_HEADER_SIZE, PAGE_SIZE};

/// Owns the database file and the page id space.
///
/// Page ids are 1-based; page `id` lives at file offset
/// `(id - 1) * PAGE_SIZE`. Allocation is lazy: the file is not extended
/// until a page is written, and freshly allocated pages are held in an
/// identity cache so they can be read back before their first write.
pub struct PageManager {
    file: File,
    next_page_id: u32,
    /// Allocated pages that have not been written to disk yet.
    fresh: HashMap<PageId, Page>,
}

impl PageManager {
    /// Opens the database file at `path`, creating it if necessary.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as u32 + 1;
        debug!(?path, file_size, next_page_id, "opened database file");

        Ok(Self {
            file,
            next_page_id,
            fresh: HashMap::new(),
        })
    }

    /// Number of pages allocated so far.
    pub fn num_pages(&self) -> u32 {
        self.next_page_id - 1
    }

    /// Hands out the next page id. The page is materialized lazily; until
    /// its first write it exists only in the identity cache.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = PageId(self.next_page_id);
        self.next_page_id += 1;
        self.fresh.insert(page_id, Page::new(page_id, page_type::DATA));
        trace!(%page_id, "allocated page");
        page_id
    }

    /// Reads the page with the given id.
    ///
    /// Ids outside the allocated range are rejected. A page inside the
    /// range whose bytes were never written reads back as a zeroed page
    /// with a reset header.
    pub fn read_page(&mut self, page_id: PageId) -> StorageResult<Page> {
        if !page_id.is_valid() || page_id.0 >= self.next_page_id {
            return Err(StorageError::InvalidPageId(page_id));
        }

        if let Some(page) = self.fresh.get(&page_id) {
            return Ok(page.clone());
        }

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        let mut buf = [0u8; PAGE_SIZE];
        let mut read = 0;
        while read < PAGE_SIZE {
            match self.file.read(&mut buf[read..])? {
                0 => break,
                n => read += n,
            }
        }

        // A short read, or a zero-filled hole left by writing a later page
        // first, means the page was allocated but never flushed: hand back
        // an initialized page rather than an error.
        if read < PAGE_SIZE || buf.iter().all(|&b| b == 0) {
            return Ok(Page::new(page_id, page_type::DATA));
        }

        let page = Page::from_bytes(buf);
        Self::verify_checksum(&page)?;
        Ok(page)
    }

    /// Writes a full page at its offset and flushes the file.
    pub fn write_page(&mut self, page: &Page) -> StorageResult<()> {
        let page_id = page.id();
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut buf = *page.as_bytes();
        Self::stamp_checksum(&mut buf);

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;

        // The page is durable now; the identity-cache copy is stale.
        self.fresh.remove(&page_id);
        trace!(%page_id, "wrote page");
        Ok(())
    }

    fn payload_crc(buf: &[u8; PAGE_SIZE]) -> u32 {
        crc32fast::hash(&buf[PAGE_HEADER_SIZE..])
    }

    fn stamp_checksum(buf: &mut [u8; PAGE_SIZE]) {
        let crc = Self::payload_crc(buf);
        let mut header = PageHeader::from_bytes(&buf[..PAGE_HEADER_SIZE]);
        header.checksum = crc;
        buf[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    fn verify_checksum(page: &Page) -> StorageResult<()> {
        let header = page.header();
        let computed = Self::payload_crc(page.as_bytes());
        if header.checksum != computed {
            return Err(StorageError::Corruption(format!(
                "page {} checksum mismatch: stored {:#010x}, computed {:#010x}",
                header.page_id, header.checksum, computed
            )));
        }
        Ok(())
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        // Best effort: persist any allocated pages that were never flushed.
        let pending: Vec<Page> = self.fresh.values().cloned().collect();
        for page in pending {
            let _ = self.write_page(&page);
        }
        let _ = self.file.flush();
    }
}
