// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Public key-value store: a B+-tree wired to the mmap-backed pager.
//!
//! One `Store` owns one file. Every mutation commits before returning, so
//! a `set` or `delete` that comes back `Ok` is durable; a crash at any
//! point leaves the store at the last committed tree.
//!
//! ## Thread Safety
//! - Not thread-safe; one process, one caller at a time
//! - Use external locking for anything else

use crate::error::BurrowResult;
use crate::store::btree::BTree;
use crate::store::pager::Pager;
use std::path::{Path, PathBuf};

/// Single-file copy-on-write key-value store.
///
/// ## Example Usage
/// ```rust
/// use burrow::Store;
///
/// let dir = tempfile::tempdir()?;
/// let mut store = Store::open(dir.path().join("data.burrow"))?;
///
/// store.set(b"user.name", b"vivian")?;
/// assert_eq!(store.get(b"user.name"), Some(b"vivian".to_vec()));
/// assert!(store.delete(b"user.name")?);
/// # Ok::<(), burrow::BurrowError>(())
/// ```
#[derive(Debug)]
pub struct Store {
    /// Path to the store file.
    path: PathBuf,

    /// Page manager over the file and its mappings.
    pager: Pager,

    /// Tree handle holding the current root pointer.
    tree: BTree,
}

impl Store {
    /// Open or create a store file.
    ///
    /// ## Input
    /// - `path`: store file path (created if missing)
    ///
    /// ## Output
    /// - `Ok(Store)`: file mapped and master page validated
    /// - `Err(BurrowError::IoError)`: open, stat, or mmap failed
    /// - `Err(BurrowError::FileSizeNotAligned)`: truncated or foreign file
    /// - `Err(BurrowError::BadSignature)`: not a Burrow store file
    /// - `Err(BurrowError::BadMasterPage)`: corrupted master page
    ///
    /// Resources acquired before a failure are released on the error path
    /// (RAII: the mapping and file handle drop with the partial pager).
    pub fn open<P: AsRef<Path>>(path: P) -> BurrowResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut pager = Pager::open(&path)?;
        let root = pager.master_load()?;

        tracing::debug!(path = %path.display(), root, "opened store");
        Ok(Self {
            path,
            pager,
            tree: BTree::new(root),
        })
    }

    /// Path of the underlying store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a key.
    ///
    /// ## Output
    /// - `Some(value)` with the bytes copied out of the page image; the
    ///   result never aliases the store's mappings
    /// - `None` if the key is absent
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.get(&self.pager, key)
    }

    /// Insert or update a key, durably.
    ///
    /// ## Input
    /// - `key`: 1..=1000 bytes
    /// - `val`: 0..=3000 bytes
    ///
    /// ## Output
    /// - `Ok(())`: the new tree is committed; a crash after return cannot
    ///   lose the write
    /// - `Err(BurrowError::IoError)`: a commit step failed; the in-memory
    ///   store is undefined and should be dropped and reopened (the file
    ///   keeps the last committed tree)
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> BurrowResult<()> {
        self.tree.insert(&mut self.pager, key, val);
        self.pager.flush(self.tree.root())
    }

    /// Delete a key, durably.
    ///
    /// ## Output
    /// - `Ok(true)`: the key existed and its removal is committed
    /// - `Ok(false)`: the key was absent
    /// - `Err(BurrowError::IoError)`: a commit step failed (see
    ///   [`set`](Store::set))
    pub fn delete(&mut self, key: &[u8]) -> BurrowResult<bool> {
        let deleted = self.tree.delete(&mut self.pager, key);
        self.pager.flush(self.tree.root())?;
        Ok(deleted)
    }

    /// Close the store, releasing the mappings and the file handle.
    ///
    /// Dropping the store does the same; this method only makes the
    /// teardown point visible in the caller's source.
    pub fn close(self) {}
}
