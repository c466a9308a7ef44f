// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Stateless node algorithms.
//!
//! Every function here builds a new page image from old ones; inputs are
//! never mutated. That discipline is what makes the commit protocol work:
//! the pages of the previous tree stay byte-identical until the master page
//! flips, so a crash mid-operation cannot damage the old tree.
//!
//! Intermediate images may occupy up to two pages (see [`Node::oversize`]);
//! [`node_split3`] cuts them down before anything reaches a page store.

use super::node::{write_u16, Node};
use super::tree::PageStore;
use super::types::{NodeType, PageId, HEADER_SIZE, PAGE_SIZE};
use std::cmp::Ordering;

/// Find the largest index whose key is less than or equal to `key`.
///
/// The sentinel entry at index 0 (zero-length key, inserted with the first
/// root) compares less than or equal to every real key, so the result is
/// always a valid index.
///
/// ## Output
/// - Index of the containing child (internal nodes) or the candidate entry
///   (leaves); an exact match returns that entry's index
pub fn node_lookup_le(node: &Node, key: &[u8]) -> u16 {
    let nkeys = node.nkeys();
    let mut found = 0;
    // The first key is the sentinel, skip it.
    for i in 1..nkeys {
        let cmp = node.get_key(i).cmp(key);
        if cmp != Ordering::Greater {
            found = i;
        }
        if cmp != Ordering::Less {
            break;
        }
    }
    found
}

/// Build a leaf with a new entry `(key, val)` inserted at `idx`.
///
/// Entries `0..idx` and `idx..N` of `old` are copied around the insertion;
/// the new leaf holds one more key than `old`.
pub fn leaf_insert(new: &mut Node, old: &Node, idx: u16, key: &[u8], val: &[u8]) {
    new.set_header(NodeType::Leaf, old.nkeys() + 1);
    node_append_range(new, old, 0, 0, idx);
    node_append_kv(new, idx, 0, key, val);
    node_append_range(new, old, idx + 1, idx, old.nkeys() - idx);
}

/// Build a leaf with the entry at `idx` replaced by `(key, val)`.
pub fn leaf_update(new: &mut Node, old: &Node, idx: u16, key: &[u8], val: &[u8]) {
    new.set_header(NodeType::Leaf, old.nkeys());
    node_append_range(new, old, 0, 0, idx);
    node_append_kv(new, idx, old.get_ptr(idx), key, val);
    node_append_range(new, old, idx + 1, idx + 1, old.nkeys() - (idx + 1));
}

/// Build a leaf with the entry at `idx` removed.
pub fn leaf_delete(new: &mut Node, old: &Node, idx: u16) {
    new.set_header(NodeType::Leaf, old.nkeys() - 1);
    node_append_range(new, old, 0, 0, idx);
    node_append_range(new, old, idx, idx + 1, old.nkeys() - (idx + 1));
}

/// Block-copy `n` entries from `old[src_old..]` to `new[dst_new..]`.
///
/// Pointers are copied as-is. Stored offsets are end offsets relative to
/// the KV region start, so each copied offset is rebased onto the
/// destination's current KV end rather than copied verbatim. The KV bytes
/// themselves move in one contiguous copy.
///
/// ## Panics
/// If either range exceeds its node's key count.
pub fn node_append_range(new: &mut Node, old: &Node, dst_new: u16, src_old: u16, n: u16) {
    assert!(src_old + n <= old.nkeys(), "source range out of bounds");
    assert!(dst_new + n <= new.nkeys(), "destination range out of bounds");
    if n == 0 {
        return;
    }

    // pointers
    for i in 0..n {
        new.set_ptr(dst_new + i, old.get_ptr(src_old + i));
    }

    // offsets, rebased onto the destination's current KV end
    let dst_begin = new.get_offset(dst_new);
    let src_begin = old.get_offset(src_old);
    for i in 1..=n {
        let offset = dst_begin + old.get_offset(src_old + i) - src_begin;
        new.set_offset(dst_new + i, offset);
    }

    // KV bytes
    let begin = old.kv_pos(src_old);
    let end = old.kv_pos(src_old + n);
    let dst = new.kv_pos(dst_new);
    new.as_bytes_mut()[dst..dst + (end - begin)].copy_from_slice(&old.as_bytes()[begin..end]);
}

/// Write one entry `(ptr, key, val)` at position `idx` and record the end
/// offset of the entry.
///
/// The destination header must already be set; `idx` must be the next
/// unwritten position (its start offset comes from entry `idx`'s recorded
/// predecessor).
pub fn node_append_kv(new: &mut Node, idx: u16, ptr: PageId, key: &[u8], val: &[u8]) {
    new.set_ptr(idx, ptr);

    let pos = new.kv_pos(idx);
    let buf = new.as_bytes_mut();
    write_u16(buf, pos, key.len() as u16);
    write_u16(buf, pos + 2, val.len() as u16);
    buf[pos + 4..pos + 4 + key.len()].copy_from_slice(key);
    buf[pos + 4 + key.len()..pos + 4 + key.len() + val.len()].copy_from_slice(val);

    let entry = 4 + key.len() as u16 + val.len() as u16;
    let offset = new.get_offset(idx) + entry;
    new.set_offset(idx + 1, offset);
}

/// Replace the single child at `idx` with `kids.len()` children.
///
/// Each kid is allocated through the page store; its entry carries the new
/// page pointer and the kid's first key as separator, with an empty value.
pub fn node_replace_kid_n<S: PageStore>(
    store: &mut S,
    new: &mut Node,
    old: &Node,
    idx: u16,
    kids: Vec<Node>,
) {
    let inc = kids.len() as u16;
    new.set_header(NodeType::Internal, old.nkeys() + inc - 1);
    node_append_range(new, old, 0, 0, idx);
    for (i, kid) in kids.into_iter().enumerate() {
        let separator = kid.get_key(0).to_vec();
        let ptr = store.page_new(kid);
        node_append_kv(new, idx + i as u16, ptr, &separator, &[]);
    }
    node_append_range(new, old, idx + inc, idx + 1, old.nkeys() - (idx + 1));
}

/// Replace the two adjacent children at `idx` and `idx + 1` with one child.
pub fn node_replace_2_kid(new: &mut Node, old: &Node, idx: u16, ptr: PageId, key: &[u8]) {
    new.set_header(NodeType::Internal, old.nkeys() - 1);
    node_append_range(new, old, 0, 0, idx);
    node_append_kv(new, idx, ptr, key, &[]);
    node_append_range(new, old, idx + 1, idx + 2, old.nkeys() - (idx + 2));
}

/// Concatenate two nodes of the same type into `new`.
pub fn node_merge(new: &mut Node, left: &Node, right: &Node) {
    new.set_header(left.node_type(), left.nkeys() + right.nkeys());
    node_append_range(new, left, 0, 0, left.nkeys());
    node_append_range(new, right, left.nkeys(), 0, right.nkeys());
}

/// Projected byte size of a node holding entries `[from..N)` of `old`.
fn tail_size(old: &Node, from: u16) -> usize {
    let entries = (old.nkeys() - from) as usize;
    let kv_bytes = (old.get_offset(old.nkeys()) - old.get_offset(from)) as usize;
    HEADER_SIZE + 10 * entries + kv_bytes
}

/// Split an oversized node into `left` (possibly still oversized) and
/// `right` (guaranteed to fit a page).
///
/// The split point is the smallest `nsplit >= 1` whose right half
/// `[nsplit..N)` fits a page, which keeps the right half as full as
/// possible. The given size limits guarantee such a point exists.
///
/// ## Panics
/// If `old` has fewer than two entries, or if no split point leaves a
/// fitting right half (both impossible for images built under the key and
/// value limits).
pub fn node_split2(left: &mut Node, right: &mut Node, old: &Node) {
    let nkeys = old.nkeys();
    assert!(nkeys >= 2, "cannot split a node with fewer than two entries");

    let mut nsplit = 1;
    while nsplit < nkeys && tail_size(old, nsplit) > PAGE_SIZE {
        nsplit += 1;
    }
    assert!(nsplit < nkeys, "no split point fits a page");

    left.set_header(old.node_type(), nsplit);
    node_append_range(left, old, 0, 0, nsplit);

    right.set_header(old.node_type(), nkeys - nsplit);
    node_append_range(right, old, 0, nsplit, nkeys - nsplit);

    assert!(
        right.nbytes() <= PAGE_SIZE,
        "right node exceeds a page after split"
    );
}

/// Cut a possibly-oversized node down to one, two, or three page-sized
/// nodes.
///
/// ## Output
/// - 1 node if `old` already fits (buffer truncated to one page)
/// - 2 nodes if one split suffices
/// - 3 nodes otherwise; all returned nodes fit a page
pub fn node_split3(mut old: Node) -> Vec<Node> {
    if old.nbytes() <= PAGE_SIZE {
        old.truncate_to_page();
        return vec![old];
    }

    let mut left = Node::oversize();
    let mut right = Node::new();
    node_split2(&mut left, &mut right, &old);
    if left.nbytes() <= PAGE_SIZE {
        left.truncate_to_page();
        return vec![left, right];
    }

    // the left half is still too large, split it once more
    let mut leftleft = Node::new();
    let mut middle = Node::new();
    node_split2(&mut leftleft, &mut middle, &left);
    assert!(
        leftleft.nbytes() <= PAGE_SIZE,
        "node larger than a page after 3-way split"
    );
    vec![leftleft, middle, right]
}
