// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Copy-on-write B+-tree engine over fixed-size pages.
//!
//! The engine is split the way the data flows:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ tree.rs   BTree recursion, root management       │
//! │           (drives everything below through the   │
//! │           PageStore seam)                        │
//! ├──────────────────────────────────────────────────┤
//! │ ops.rs    stateless node algorithms: lookup,     │
//! │           insert, delete, merge, 2/3-way split   │
//! ├──────────────────────────────────────────────────┤
//! │ node.rs   page codec: header, pointers, offsets, │
//! │           key-value region                       │
//! ├──────────────────────────────────────────────────┤
//! │ types.rs  page geometry and limits               │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this module performs I/O. Pages are fetched, allocated, and
//! freed through the [`PageStore`] trait, so the whole engine can be
//! exercised against an in-memory page map as well as the real mmap-backed
//! pager.

mod node;
mod ops;
mod tree;
mod types;



#[cfg(test)]
#[path = "ops_test.rs"]
mod ops_test;

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

// Re-export public API
pub use node::Node;
pub(crate) use node::{read_u64, write_u64};
pub use ops::{
    leaf_delete, leaf_insert, leaf_update, node_append_kv, node_append_range, node_lookup_le,
    node_merge, node_replace_2_kid, node_replace_kid_n, node_split2, node_split3,
};
pub use tree::{BTree, PageStore};
pub use types::{
    NodeType, PageId, HEADER_SIZE, MAX_KEY_SIZE, MAX_VAL_SIZE, PAGE_SIZE, STORE_SIG,
};
