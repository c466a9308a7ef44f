// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the tree recursion, run against an in-memory page store.
//!
//! The double enforces the same contract as the real pager: allocated
//! images must fit a page, and dereferencing or freeing an unknown pointer
//! is fatal. Because frees remove entries, any page the copy-on-write
//! discipline leaks (or frees twice) shows up immediately.

use super::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory page store: a map from pointer to page image.
    struct MemPageStore {
        pages: HashMap<PageId, Vec<u8>>,
        next: PageId,
    }

    impl MemPageStore {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                next: 1, // pointer 0 stays reserved, as on disk
            }
        }
    }

    impl PageStore for MemPageStore {
        fn page_get(&self, ptr: PageId) -> Node {
            let data = self
                .pages
                .get(&ptr)
                .unwrap_or_else(|| panic!("unknown page pointer {}", ptr));
            Node::from_bytes(data.clone())
        }

        fn page_new(&mut self, node: Node) -> PageId {
            assert!(
                node.nbytes() <= PAGE_SIZE,
                "node size {} exceeds a page",
                node.nbytes()
            );
            let ptr = self.next;
            self.next += 1;
            self.pages.insert(ptr, node.into_bytes());
            ptr
        }

        fn page_del(&mut self, ptr: PageId) {
            self.pages
                .remove(&ptr)
                .unwrap_or_else(|| panic!("freeing unknown page pointer {}", ptr));
        }
    }

    /// Walk a subtree; check size and order invariants, collect leaf keys,
    /// and count visited nodes.
    fn check_subtree(
        store: &MemPageStore,
        ptr: PageId,
        keys: &mut Vec<Vec<u8>>,
        nodes: &mut usize,
    ) {
        let node = store.page_get(ptr);
        *nodes += 1;
        assert!(node.nbytes() <= PAGE_SIZE);
        for i in 1..node.nkeys() {
            assert!(
                node.get_key(i - 1) < node.get_key(i),
                "keys out of order at entry {}",
                i
            );
        }
        match node.node_type() {
            NodeType::Internal => {
                for i in 0..node.nkeys() {
                    check_subtree(store, node.get_ptr(i), keys, nodes);
                }
            }
            NodeType::Leaf => {
                for i in 0..node.nkeys() {
                    keys.push(node.get_key(i).to_vec());
                }
            }
        }
    }

    /// Full-tree invariant check; returns the leaf keys in walk order
    /// (sentinel included).
    fn check_tree(store: &MemPageStore, tree: &BTree) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        let mut nodes = 0;
        if tree.root() != 0 {
            check_subtree(store, tree.root(), &mut keys, &mut nodes);
        }
        // copy-on-write must neither leak nor double-free pages
        assert_eq!(nodes, store.pages.len(), "leaked or lost pages");
        // the walk is in-order, so the key sequence is globally sorted and
        // free of duplicates
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "duplicate or unsorted leaf keys");
        }
        keys
    }

    /// Tree height, following the leftmost spine.
    fn height(store: &MemPageStore, tree: &BTree) -> usize {
        let mut h = 1;
        let mut node = store.page_get(tree.root());
        while node.node_type() == NodeType::Internal {
            h += 1;
            node = store.page_get(node.get_ptr(0));
        }
        h
    }

    #[test]
    fn test_first_insert_creates_sentinel() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"key1", b"value1");

        let root = store.page_get(tree.root());
        assert_eq!(root.node_type(), NodeType::Leaf);
        assert_eq!(root.nkeys(), 2);
        assert_eq!(root.get_key(0), b"");
        assert_eq!(root.get_key(1), b"key1");
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"key1", b"value1");
        tree.insert(&mut store, b"key2", b"value2");
        tree.insert(&mut store, b"key3", b"value3");

        assert_eq!(tree.get(&store, b"key2"), Some(b"value2".to_vec()));
        assert_eq!(tree.get(&store, b"key1"), Some(b"value1".to_vec()));
        assert_eq!(tree.get(&store, b"key3"), Some(b"value3".to_vec()));
        assert_eq!(tree.get(&store, b"key4"), None);
        check_tree(&store, &tree);
    }

    #[test]
    fn test_update_replaces_value() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"key", b"old");
        tree.insert(&mut store, b"key", b"new");

        assert_eq!(tree.get(&store, b"key"), Some(b"new".to_vec()));
        // update, not duplicate: sentinel plus one entry
        let keys = check_tree(&store, &tree);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_delete_and_absence() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"key1", b"value1");
        tree.insert(&mut store, b"key2", b"value2");
        tree.insert(&mut store, b"key3", b"value3");

        assert!(tree.delete(&mut store, b"key2"));
        assert_eq!(tree.get(&store, b"key2"), None);
        assert_eq!(tree.get(&store, b"key1"), Some(b"value1".to_vec()));
        assert_eq!(tree.get(&store, b"key3"), Some(b"value3".to_vec()));

        assert!(!tree.delete(&mut store, b"key2"));
        assert!(!tree.delete(&mut store, b"never-there"));
        check_tree(&store, &tree);
    }

    #[test]
    fn test_empty_tree_reads() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        assert_eq!(tree.get(&store, b"key"), None);
        assert!(!tree.delete(&mut store, b"key"));
    }

    #[test]
    fn test_no_cross_key_interference() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"left", b"1");
        tree.insert(&mut store, b"right", b"2");

        tree.insert(&mut store, b"left", b"changed");
        assert_eq!(tree.get(&store, b"right"), Some(b"2".to_vec()));

        assert!(tree.delete(&mut store, b"left"));
        assert_eq!(tree.get(&store, b"right"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_boundary_sizes() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);

        let short_key = b"k";
        let long_key = vec![b'k'; MAX_KEY_SIZE];
        let empty_val = b"";
        let big_val = vec![b'v'; MAX_VAL_SIZE];

        tree.insert(&mut store, short_key, &big_val);
        tree.insert(&mut store, &long_key, empty_val);

        assert_eq!(tree.get(&store, short_key), Some(big_val.clone()));
        assert_eq!(tree.get(&store, &long_key), Some(Vec::new()));
        check_tree(&store, &tree);
    }

    #[test]
    #[should_panic(expected = "key must not be empty")]
    fn test_insert_empty_key_is_fatal() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        tree.insert(&mut store, b"", b"val");
    }

    #[test]
    #[should_panic(expected = "key exceeds MAX_KEY_SIZE")]
    fn test_insert_oversized_key_is_fatal() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        let key = vec![b'k'; MAX_KEY_SIZE + 1];
        tree.insert(&mut store, &key, b"val");
    }

    #[test]
    #[should_panic(expected = "value exceeds MAX_VAL_SIZE")]
    fn test_insert_oversized_value_is_fatal() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);
        let val = vec![b'v'; MAX_VAL_SIZE + 1];
        tree.insert(&mut store, b"key", &val);
    }

    #[test]
    fn test_split_forcing_volume() {
        // wide keys and values force one or two entries per leaf, so the
        // tree must split all the way up from the first few inserts
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);

        let count = 10_000;
        let padding = "x".repeat(190);
        let value = vec![b'v'; 2000];
        for i in 0..count {
            let key = format!("key-{:06}-{}", i, padding);
            tree.insert(&mut store, key.as_bytes(), &value);
        }

        let keys = check_tree(&store, &tree);
        assert_eq!(keys.len(), count + 1); // sentinel included
        assert!(height(&store, &tree) >= 3);

        for i in (0..count).step_by(997) {
            let key = format!("key-{:06}-{}", i, padding);
            assert_eq!(tree.get(&store, key.as_bytes()), Some(value.clone()));
        }
    }

    #[test]
    fn test_mass_delete_shrinks_tree() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);

        let count = 600;
        let value = vec![b'v'; 800];
        for i in 0..count {
            let key = format!("key-{:05}", i);
            tree.insert(&mut store, key.as_bytes(), &value);
        }
        let tall = height(&store, &tree);
        assert!(tall >= 2);

        for i in 0..count - 1 {
            let key = format!("key-{:05}", i);
            assert!(tree.delete(&mut store, key.as_bytes()));
        }

        // merges and the root collapse bring the height back down
        assert!(height(&store, &tree) < tall);
        let last = format!("key-{:05}", count - 1);
        assert_eq!(tree.get(&store, last.as_bytes()), Some(value));
        check_tree(&store, &tree);
    }

    #[test]
    fn test_delete_everything_leaves_sentinel_only() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);

        for i in 0..200 {
            let key = format!("key-{:04}", i);
            tree.insert(&mut store, key.as_bytes(), b"value");
        }
        for i in 0..200 {
            let key = format!("key-{:04}", i);
            assert!(tree.delete(&mut store, key.as_bytes()));
        }

        let keys = check_tree(&store, &tree);
        assert_eq!(keys, vec![Vec::new()]); // only the sentinel remains
        assert_eq!(store.pages.len(), 1);
        assert_eq!(tree.get(&store, b"key-0000"), None);
    }

    #[test]
    fn test_random_order_inserts_stay_sorted() {
        let mut store = MemPageStore::new();
        let mut tree = BTree::new(0);

        // deterministic shuffle: jump through the range with a co-prime
        // stride so insertion order is far from sorted
        let count = 1024u64;
        let stride = 389;
        for i in 0..count {
            let n = (i * stride) % count;
            let key = format!("key-{:05}", n);
            let val = format!("val-{}", n);
            tree.insert(&mut store, key.as_bytes(), val.as_bytes());
        }

        let keys = check_tree(&store, &tree);
        assert_eq!(keys.len() as u64, count + 1);
        for n in [0u64, 1, 511, 1023] {
            let key = format!("key-{:05}", n);
            let val = format!("val-{}", n);
            assert_eq!(tree.get(&store, key.as_bytes()), Some(val.into_bytes()));
        }
    }
}
