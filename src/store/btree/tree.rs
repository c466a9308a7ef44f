// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! B+-tree recursion and root management.
//!
//! The tree itself owns nothing but the root pointer. Pages are fetched,
//! allocated, and freed through the [`PageStore`] trait; the mmap-backed
//! pager implements it for production, and the tests drive the identical
//! code against a plain in-memory page map.
//!
//! ## Copy-on-Write Flow
//!
//! ```text
//! insert/delete
//!      │
//!      ▼
//! page_get(old child) ──► build new image ──► node_split3
//!      │                                          │
//!      ▼                                          ▼
//! page_del(old child)                    page_new(each piece)
//!                                                 │
//!                                                 ▼
//!                              parent entry rewritten with new pointers
//! ```
//!
//! Each level of the recursion frees the pre-image page and allocates the
//! replacement(s); the caller of the tree publishes the new root.

use super::node::Node;
use super::ops::{
    leaf_delete, leaf_insert, leaf_update, node_append_kv, node_lookup_le, node_merge,
    node_replace_2_kid, node_replace_kid_n, node_split3,
};
use super::types::{NodeType, PageId, HEADER_SIZE, MAX_KEY_SIZE, MAX_VAL_SIZE, PAGE_SIZE};

/// Page access seam between the tree and its storage.
///
/// Three operations are all the tree ever needs: dereference a pointer,
/// allocate a page for a node image, and free a page. Implementations must
/// treat a freed pointer as invalid until it is handed out again by
/// `page_new`.
pub trait PageStore {
    /// Dereference a page pointer into an owned node image.
    fn page_get(&self, ptr: PageId) -> Node;

    /// Allocate a page for `node` and return its pointer.
    fn page_new(&mut self, node: Node) -> PageId;

    /// Free the page behind `ptr`.
    fn page_del(&mut self, ptr: PageId);
}

/// Merge candidate for an undersized child, chosen by [`should_merge`].
enum MergeSibling {
    /// Merge with the left sibling (its node image is carried along).
    Left(Node),
    /// Merge with the right sibling.
    Right(Node),
    /// No merge: the child stays on its own.
    None,
}

/// B+-tree over a [`PageStore`].
///
/// A root pointer of 0 means the tree is empty. The first insert creates a
/// leaf whose entry 0 is a zero-length sentinel key; the sentinel compares
/// less than or equal to every real key, which makes [`node_lookup_le`]
/// total and gives every internal node a leftmost child covering the whole
/// key space below its first real separator.
#[derive(Debug)]
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// Create a tree handle over an existing root (0 for an empty tree).
    pub fn new(root: PageId) -> Self {
        Self { root }
    }

    /// Current root pointer.
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Insert or update a key.
    ///
    /// ## Input
    /// - `key`: 1..=MAX_KEY_SIZE bytes
    /// - `val`: 0..=MAX_VAL_SIZE bytes
    ///
    /// ## Side Effects
    /// - Frees the old root path and allocates the replacement pages
    /// - If the root splits, adds a level with a new internal root
    ///
    /// ## Panics
    /// On an empty or oversized key, or an oversized value. Length limits
    /// are part of the API contract, not runtime conditions.
    pub fn insert<S: PageStore>(&mut self, store: &mut S, key: &[u8], val: &[u8]) {
        assert!(!key.is_empty(), "key must not be empty");
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds MAX_KEY_SIZE");
        assert!(val.len() <= MAX_VAL_SIZE, "value exceeds MAX_VAL_SIZE");

        if self.root == 0 {
            // First insert: the sentinel at index 0 covers the whole key
            // space, the user entry lands at index 1.
            let mut root = Node::new();
            root.set_header(NodeType::Leaf, 2);
            node_append_kv(&mut root, 0, 0, &[], &[]);
            node_append_kv(&mut root, 1, 0, key, val);
            self.root = store.page_new(root);
            return;
        }

        let node = store.page_get(self.root);
        store.page_del(self.root);
        let node = tree_insert(store, &node, key, val);
        let mut split = node_split3(node);
        if split.len() > 1 {
            // the root was split, add a new level
            let mut root = Node::new();
            root.set_header(NodeType::Internal, split.len() as u16);
            for (i, piece) in split.into_iter().enumerate() {
                let separator = piece.get_key(0).to_vec();
                let ptr = store.page_new(piece);
                node_append_kv(&mut root, i as u16, ptr, &separator, &[]);
            }
            self.root = store.page_new(root);
        } else {
            self.root = store.page_new(split.remove(0));
        }
    }

    /// Delete a key.
    ///
    /// ## Output
    /// - `true` iff the key was present
    ///
    /// ## Side Effects
    /// - On success, frees the old root path; if the new root is an
    ///   internal node with a single child, the tree loses a level and the
    ///   child becomes the root
    ///
    /// ## Panics
    /// On an empty or oversized key.
    pub fn delete<S: PageStore>(&mut self, store: &mut S, key: &[u8]) -> bool {
        assert!(!key.is_empty(), "key must not be empty");
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds MAX_KEY_SIZE");

        if self.root == 0 {
            return false;
        }
        let root_node = store.page_get(self.root);
        let updated = match tree_delete(store, &root_node, key) {
            Some(node) => node,
            None => return false,
        };
        store.page_del(self.root);
        if updated.node_type() == NodeType::Internal && updated.nkeys() == 1 {
            // remove a level
            self.root = updated.get_ptr(0);
        } else {
            self.root = store.page_new(updated);
        }
        true
    }

    /// Look up a key.
    ///
    /// ## Output
    /// - `Some(value)` with the value bytes copied out of the page image;
    ///   the result never aliases the page store's memory
    /// - `None` if the key is absent
    ///
    /// ## Panics
    /// On an empty or oversized key.
    pub fn get<S: PageStore>(&self, store: &S, key: &[u8]) -> Option<Vec<u8>> {
        assert!(!key.is_empty(), "key must not be empty");
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds MAX_KEY_SIZE");

        if self.root == 0 {
            return None;
        }
        let mut node = store.page_get(self.root);
        loop {
            let idx = node_lookup_le(&node, key);
            match node.node_type() {
                NodeType::Leaf => {
                    if node.get_key(idx) == key {
                        return Some(node.get_val(idx).to_vec());
                    }
                    return None;
                }
                NodeType::Internal => {
                    node = store.page_get(node.get_ptr(idx));
                }
            }
        }
    }
}

/// Insert `(key, val)` into the subtree rooted at `node`.
///
/// The result is a scratch image that may exceed one page; the caller
/// splits and allocates it. The input node's page has already been freed
/// by the caller (or is freed here for children).
fn tree_insert<S: PageStore>(store: &mut S, node: &Node, key: &[u8], val: &[u8]) -> Node {
    let mut new = Node::oversize();
    let idx = node_lookup_le(node, key);
    match node.node_type() {
        NodeType::Leaf => {
            if node.get_key(idx) == key {
                leaf_update(&mut new, node, idx, key, val);
            } else {
                // node.get_key(idx) <= key, so the new entry goes after it
                leaf_insert(&mut new, node, idx + 1, key, val);
            }
        }
        NodeType::Internal => {
            node_insert(store, &mut new, node, idx, key, val);
        }
    }
    new
}

/// Insert into the child at `idx` of internal node `node`, splitting the
/// result and stitching the pieces back into `new`.
fn node_insert<S: PageStore>(
    store: &mut S,
    new: &mut Node,
    node: &Node,
    idx: u16,
    key: &[u8],
    val: &[u8],
) {
    let kptr = node.get_ptr(idx);
    let knode = store.page_get(kptr);
    store.page_del(kptr);
    let knode = tree_insert(store, &knode, key, val);
    let split = node_split3(knode);
    node_replace_kid_n(store, new, node, idx, split);
}

/// Delete `key` from the subtree rooted at `node`.
///
/// ## Output
/// - `None` if the key is absent anywhere below (nothing was freed)
/// - `Some(new_image)` otherwise; the image always fits a page
fn tree_delete<S: PageStore>(store: &mut S, node: &Node, key: &[u8]) -> Option<Node> {
    let idx = node_lookup_le(node, key);
    match node.node_type() {
        NodeType::Leaf => {
            if node.get_key(idx) != key {
                return None;
            }
            let mut new = Node::new();
            leaf_delete(&mut new, node, idx);
            Some(new)
        }
        NodeType::Internal => node_delete(store, node, idx, key),
    }
}

/// Delete from the child at `idx`, merging the shrunken child with a
/// sibling when it has become small enough.
fn node_delete<S: PageStore>(store: &mut S, node: &Node, idx: u16, key: &[u8]) -> Option<Node> {
    let kptr = node.get_ptr(idx);
    let child = store.page_get(kptr);
    let updated = tree_delete(store, &child, key)?;
    store.page_del(kptr);

    let mut new = Node::new();
    match should_merge(store, node, idx, &updated) {
        MergeSibling::Left(sibling) => {
            let mut merged = Node::new();
            node_merge(&mut merged, &sibling, &updated);
            store.page_del(node.get_ptr(idx - 1));
            let separator = merged.get_key(0).to_vec();
            let ptr = store.page_new(merged);
            node_replace_2_kid(&mut new, node, idx - 1, ptr, &separator);
        }
        MergeSibling::Right(sibling) => {
            let mut merged = Node::new();
            node_merge(&mut merged, &updated, &sibling);
            store.page_del(node.get_ptr(idx + 1));
            let separator = merged.get_key(0).to_vec();
            let ptr = store.page_new(merged);
            node_replace_2_kid(&mut new, node, idx, ptr, &separator);
        }
        MergeSibling::None => {
            assert!(updated.nkeys() > 0, "updated child lost all its keys");
            node_replace_kid_n(store, &mut new, node, idx, vec![updated]);
        }
    }
    Some(new)
}

/// Decide whether the shrunken child at `idx` should merge with a sibling.
///
/// A merge is considered once the child occupies a quarter page or less,
/// and taken iff the combined image (minus one shared header) still fits a
/// page. The left sibling is tried first.
fn should_merge<S: PageStore>(store: &S, node: &Node, idx: u16, updated: &Node) -> MergeSibling {
    if updated.nbytes() > PAGE_SIZE / 4 {
        return MergeSibling::None;
    }
    if idx > 0 {
        let sibling = store.page_get(node.get_ptr(idx - 1));
        let merged = sibling.nbytes() + updated.nbytes() - HEADER_SIZE;
        if merged <= PAGE_SIZE {
            return MergeSibling::Left(sibling);
        }
    }
    if idx + 1 < node.nkeys() {
        let sibling = store.page_get(node.get_ptr(idx + 1));
        let merged = sibling.nbytes() + updated.nbytes() - HEADER_SIZE;
        if merged <= PAGE_SIZE {
            return MergeSibling::Right(sibling);
        }
    }
    MergeSibling::None
}
