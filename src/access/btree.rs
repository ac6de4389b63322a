//! Disk-resident B+Tree index.
//!
//! Nodes live one-per-page and are reached through the buffer pool; values
//! are stored only in leaves, which are linked left-to-right for range
//! scans. Inserts split full nodes preemptively on the way down, so a child
//! reached by `insert_non_full` always has room. Deletes remove the key
//! from its leaf and nothing else: the tree never rebalances, merges, or
//! shrinks, and stale separators remain valid for routing.

pub mod node;

use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use node::{Node, NodeKind, MAX_KEY_LEN, MAX_VALUE_LEN, ORDER};

/// A B+Tree rooted at a fixed page.
///
/// The root page id never changes once the tree is created: when the root
/// fills up, its contents are relocated to a fresh page and the root page
/// becomes an internal node above it. That keeps the "root is the first
/// allocated page" file convention true across restarts.
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// Creates a new tree whose root is a freshly allocated empty leaf.
    pub fn create(pool: &mut BufferPool) -> StorageResult<Self> {
        let root = Self::allocate_node(pool, &Node::new_leaf())?;
        Ok(Self { root })
    }

    /// Opens a tree rooted at `root`. No validation is performed.
    pub fn open(root: PageId) -> Self {
        Self { root }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    fn allocate_node(pool: &mut BufferPool, node: &Node) -> StorageResult<PageId> {
        let page_id = pool.allocate_page();
        Self::save_node(pool, page_id, node)?;
        Ok(page_id)
    }

    fn load_node(pool: &mut BufferPool, page_id: PageId) -> StorageResult<Node> {
        let page = pool.fetch(page_id)?;
        Node::decode(page)
    }

    fn save_node(pool: &mut BufferPool, page_id: PageId, node: &Node) -> StorageResult<()> {
        let page = pool.fetch_mut(page_id)?;
        node.encode_into(page)?;
        pool.mark_dirty(page_id);
        Ok(())
    }

    /// Smallest index whose key is >= `key`; `num_keys` if none.
    fn search_in_node(node: &Node, key: &[u8]) -> usize {
        node.keys.partition_point(|k| k.as_slice() < key)
    }

    /// Index of the child to descend into. A key equal to a separator
    /// routes right, where the promoted copy lives after a split.
    fn child_index(node: &Node, key: &[u8]) -> usize {
        node.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Descends to the leaf that contains `key` or would receive it.
    fn find_leaf(&self, pool: &mut BufferPool, key: &[u8]) -> StorageResult<PageId> {
        let mut current = self.root;
        loop {
            let node = Self::load_node(pool, current)?;
            if node.is_leaf() {
                return Ok(current);
            }
            current = node.children[Self::child_index(&node, key)];
        }
    }

    /// Point lookup. Returns the stored value, or `None` if absent.
    pub fn search(&self, pool: &mut BufferPool, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let leaf_id = self.find_leaf(pool, key)?;
        let leaf = Self::load_node(pool, leaf_id)?;

        for (i, k) in leaf.keys.iter().enumerate() {
            if k.as_slice() == key {
                return Ok(Some(leaf.values[i].clone()));
            }
        }
        Ok(None)
    }

    /// Checks the length bounds an entry must satisfy before it can be
    /// stored (or logged for replay).
    pub fn validate_entry(key: &[u8], value: &[u8]) -> StorageResult<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(StorageError::PageOverflow {
                required: key.len(),
                available: MAX_KEY_LEN,
            });
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(StorageError::PageOverflow {
                required: value.len(),
                available: MAX_VALUE_LEN,
            });
        }
        Ok(())
    }

    /// Inserts `key` -> `value`, overwriting in place if the key exists.
    pub fn insert(&mut self, pool: &mut BufferPool, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Self::validate_entry(key, value)?;

        let root_node = Self::load_node(pool, self.root)?;
        if root_node.is_full() {
            // Relocate the full root to a fresh page and turn the root page
            // into an internal node with that page as its only child.
            let moved = Self::allocate_node(pool, &root_node)?;
            let mut new_root = Node::new_internal();
            new_root.children.push(moved);
            Self::save_node(pool, self.root, &new_root)?;
            Self::split_child(pool, self.root, 0, moved)?;
        }

        self.insert_non_full(pool, self.root, key, value)
    }

    fn insert_non_full(
        &mut self,
        pool: &mut BufferPool,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<()> {
        let mut node = Self::load_node(pool, page_id)?;

        if node.is_leaf() {
            let pos = Self::search_in_node(&node, key);
            if pos < node.num_keys() && node.keys[pos] == key {
                node.values[pos] = value.to_vec();
            } else {
                node.keys.insert(pos, key.to_vec());
                node.values.insert(pos, value.to_vec());
            }
            return Self::save_node(pool, page_id, &node);
        }

        let mut pos = Self::child_index(&node, key);
        let child_id = node.children[pos];
        let child = Self::load_node(pool, child_id)?;

        if child.is_full() {
            Self::split_child(pool, page_id, pos, child_id)?;
            node = Self::load_node(pool, page_id)?;
            if key >= node.keys[pos].as_slice() {
                pos += 1;
            }
        }
        let next = node.children[pos];
        self.insert_non_full(pool, next, key, value)
    }

    /// Splits the full `child` at `parent.children[idx]`, promoting a
    /// separator into the parent.
    fn split_child(
        pool: &mut BufferPool,
        parent_id: PageId,
        idx: usize,
        child_id: PageId,
    ) -> StorageResult<()> {
        let mut parent = Self::load_node(pool, parent_id)?;
        let mut child = Self::load_node(pool, child_id)?;

        let mid = ORDER / 2;
        let mut sibling = match child.kind {
            NodeKind::Leaf => Node::new_leaf(),
            NodeKind::Internal => Node::new_internal(),
        };
        let sibling_id = pool.allocate_page();

        sibling.keys = child.keys.split_off(mid);

        let promoted = if child.is_leaf() {
            sibling.values = child.values.split_off(mid);
            sibling.next_leaf = child.next_leaf;
            child.next_leaf = sibling_id;
            // The separator is the first key of the new right leaf and
            // stays there.
            sibling.keys[0].clone()
        } else {
            sibling.children = child.children.split_off(mid);
            // The middle key moves up; it belongs to neither half now.
            child.keys.pop().unwrap()
        };

        parent.keys.insert(idx, promoted);
        parent.children.insert(idx + 1, sibling_id);

        Self::save_node(pool, child_id, &child)?;
        Self::save_node(pool, sibling_id, &sibling)?;
        Self::save_node(pool, parent_id, &parent)
    }

    /// Removes `key` from its leaf. Returns whether the key was present.
    pub fn delete(&self, pool: &mut BufferPool, key: &[u8]) -> StorageResult<bool> {
        let leaf_id = self.find_leaf(pool, key)?;
        let mut leaf = Self::load_node(pool, leaf_id)?;

        let Some(pos) = leaf.keys.iter().position(|k| k.as_slice() == key) else {
            return Ok(false);
        };
        leaf.keys.remove(pos);
        leaf.values.remove(pos);
        Self::save_node(pool, leaf_id, &leaf)?;
        Ok(true)
    }

    /// Returns all `(key, value)` pairs with `lo <= key <= hi` in ascending
    /// key order, walking the leaf chain.
    pub fn range_scan(
        &self,
        pool: &mut BufferPool,
        lo: &[u8],
        hi: &[u8],
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut leaf_id = self.find_leaf(pool, lo)?;

        loop {
            let leaf = Self::load_node(pool, leaf_id)?;
            for (i, key) in leaf.keys.iter().enumerate() {
                if key.as_slice() > hi {
                    return Ok(results);
                }
                if key.as_slice() >= lo {
                    results.push((key.clone(), leaf.values[i].clone()));
                }
            }
            if !leaf.next_leaf.is_valid() {
                return Ok(results);
            }
            leaf_id = leaf.next_leaf;
        }
    }
}
