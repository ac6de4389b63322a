//! In-memory B+Tree nodes and their page serialization.
//!
//! A node occupies a single page. Layout after the 16-byte page header:
//!
//! ```text
//! kind: u8 | num_keys: u16 | next_leaf: u32 |
//! num_keys x (key_len: u16 | key) |
//! leaf:     num_keys x (val_len: u16 | value)
//! internal: (num_keys + 1) x child: u32
//! ```

use bytes::{Buf, BufMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{page_type, Page, PageId, INVALID_PAGE_ID, PAGE_HEADER_SIZE, PAGE_SIZE};

/// Maximum number of keys per node before a split is required.
pub const ORDER: usize = 16;

/// Upper bounds on entry sizes, enforced at insert and decode.
pub const MAX_KEY_LEN: usize = 255;
pub const MAX_VALUE_LEN: usize = 255;

const NODE_OFFSET: usize = PAGE_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Leaf = 1,
    Internal = 2,
}

/// Owned decoded form of a node. Mutations happen here and are re-encoded
/// into the page on save.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Right sibling for leaves; [`INVALID_PAGE_ID`] for internal nodes and
    /// the rightmost leaf.
    pub next_leaf: PageId,
    pub keys: Vec<Vec<u8>>,
    /// One value per key. Leaves only.
    pub values: Vec<Vec<u8>>,
    /// `num_keys + 1` children. Internal nodes only.
    pub children: Vec<PageId>,
}

impl Node {
    pub fn new_leaf() -> Self {
        Self {
            kind: NodeKind::Leaf,
            next_leaf: INVALID_PAGE_ID,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal() -> Self {
        Self {
            kind: NodeKind::Internal,
            next_leaf: INVALID_PAGE_ID,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.num_keys() >= ORDER - 1
    }

    fn encoded_len(&self) -> usize {
        let mut len = 1 + 2 + 4;
        for key in &self.keys {
            len += 2 + key.len();
        }
        if self.is_leaf() {
            for value in &self.values {
                len += 2 + value.len();
            }
        } else {
            len += 4 * self.children.len();
        }
        len
    }

    /// Decodes the node stored in `page`.
    pub fn decode(page: &Page) -> StorageResult<Self> {
        let mut buf: &[u8] = &page.as_bytes()[NODE_OFFSET..];

        let kind = match buf.get_u8() {
            1 => NodeKind::Leaf,
            2 => NodeKind::Internal,
            other => {
                return Err(StorageError::Corruption(format!(
                    "page {}: unknown node kind {other}",
                    page.id()
                )));
            }
        };
        let num_keys = buf.get_u16_le() as usize;
        if num_keys > ORDER - 1 {
            return Err(StorageError::Corruption(format!(
                "page {}: node claims {num_keys} keys",
                page.id()
            )));
        }
        let next_leaf = PageId(buf.get_u32_le());

        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            keys.push(Self::get_chunk(&mut buf, MAX_KEY_LEN, page.id())?);
        }

        let mut node = Self {
            kind,
            next_leaf,
            keys,
            values: Vec::new(),
            children: Vec::new(),
        };

        if node.is_leaf() {
            node.values.reserve(num_keys);
            for _ in 0..num_keys {
                node.values
                    .push(Self::get_chunk(&mut buf, MAX_VALUE_LEN, page.id())?);
            }
        } else {
            node.children.reserve(num_keys + 1);
            for _ in 0..num_keys + 1 {
                if buf.remaining() < 4 {
                    return Err(StorageError::Corruption(format!(
                        "page {}: truncated child pointer",
                        page.id()
                    )));
                }
                node.children.push(PageId(buf.get_u32_le()));
            }
        }

        Ok(node)
    }

    fn get_chunk(buf: &mut &[u8], max_len: usize, page_id: PageId) -> StorageResult<Vec<u8>> {
        if buf.remaining() < 2 {
            return Err(StorageError::Corruption(format!(
                "page {page_id}: truncated length prefix"
            )));
        }
        let len = buf.get_u16_le() as usize;
        if len > max_len || buf.remaining() < len {
            return Err(StorageError::Corruption(format!(
                "page {page_id}: entry length {len} out of bounds"
            )));
        }
        let chunk = buf[..len].to_vec();
        buf.advance(len);
        Ok(chunk)
    }

    /// Serializes the node into `page`, refreshing the header's slot count.
    pub fn encode_into(&self, page: &mut Page) -> StorageResult<()> {
        debug_assert!(if self.is_leaf() {
            self.values.len() == self.keys.len()
        } else {
            self.children.len() == self.keys.len() + 1
        });

        let required = NODE_OFFSET + self.encoded_len();
        if required > PAGE_SIZE {
            return Err(StorageError::PageOverflow {
                required,
                available: PAGE_SIZE,
            });
        }

        let mut header = page.header();
        header.page_type = page_type::INDEX;
        header.num_slots = self.num_keys() as u16;
        header.free_space_offset = required as u32;
        page.set_header(header);

        let mut buf = &mut page.as_bytes_mut()[NODE_OFFSET..];
        buf.put_u8(self.kind as u8);
        buf.put_u16_le(self.num_keys() as u16);
        buf.put_u32_le(self.next_leaf.0);
        for key in &self.keys {
            buf.put_u16_le(key.len() as u16);
            buf.put_slice(key);
        }
        if self.is_leaf() {
            for value in &self.values {
                buf.put_u16_le(value.len() as u16);
                buf.put_slice(value);
            }
        } else {
            for child in &self.children {
                buf.put_u32_le(child.0);
            }
        }

        Ok(())
    }
}
