// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page manager over the store file and its memory mappings.
//!
//! The pager owns the file handle, the mapped address space, and the
//! allocation state, and implements the [`PageStore`] seam the tree runs
//! on. Pages are identified by their position in the file; the address
//! space is a list of mappings that concatenate in page order:
//!
//! ```text
//! file      [page 0 │ page 1 │ page 2 │ ... ]
//!             master   nodes and freed pages
//!
//! mappings  [chunk 0 (≥ 64 MiB)          ][chunk 1][chunk 2 ...]
//!             each new chunk doubles the mapped range; earlier
//!             chunks are never remapped, so node slices stay valid
//! ```
//!
//! ## Commit Protocol
//!
//! A commit makes one tree version durable:
//!
//! 1. Grow the file (space reserved, exponential policy) and the mapping
//!    to cover every staged page.
//! 2. Copy staged page images into the mapping.
//! 3. `fsync` — the new pages are durable, but not yet reachable.
//! 4. Advance the durable page count, clear staging, release the
//!    operation's freed pages for reuse.
//! 5. Write the 32-byte master image with a positional write, never
//!    through the mapping.
//! 6. `fsync` — the new root is reachable.
//!
//! A crash before step 6 completes leaves the previous master page intact
//! and with it the previous tree; the staged pages it wrote are simply
//! unreferenced. This is the single linearisation point of the store.
//!
//! ## Page Reuse
//!
//! Pages freed by a *committed* operation are handed out again by
//! `page_new`. Pointers freed by the running operation are parked until
//! its commit, so an uncommitted operation can never overwrite a page the
//! durable tree still reaches.

use crate::error::{BurrowError, BurrowResult};
use crate::store::btree::{read_u64, write_u64, Node, PageId, PageStore, PAGE_SIZE, STORE_SIG};
use fs2::FileExt as _;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt as _;
use std::path::Path;

/// Initial mapped range (64 MiB).
///
/// A mapping may extend past end-of-file; the file itself only grows when
/// pages are committed. The initial range must be page-aligned.
const INITIAL_MMAP_SIZE: usize = 64 << 20;

const _: () = assert!(INITIAL_MMAP_SIZE % PAGE_SIZE == 0);

/// Page manager: file growth, memory mappings, page allocation, and the
/// durable master page.
pub struct Pager {
    /// Store file handle.
    file: std::fs::File,

    /// Current file size in bytes (always a multiple of the page size).
    file_size: usize,

    /// Total mapped bytes across all chunks (may exceed the file size).
    mmap_total: usize,

    /// Mappings in address-space order; their concatenation indexes pages
    /// in page-number order.
    chunks: Vec<MmapMut>,

    /// Number of pages durably present in the file, including the master
    /// page at index 0.
    flushed: u64,

    /// Staged fresh pages; slot `i` holds the image for page
    /// `flushed + i`. `None` marks a page freed again before its commit.
    temp: Vec<Option<Vec<u8>>>,

    /// Staged images bound for reused on-disk pages (pointer < `flushed`).
    recycled: Vec<(PageId, Vec<u8>)>,

    /// On-disk pointers released by committed operations, available for
    /// reuse.
    freed: Vec<PageId>,

    /// Pointers freed by the running operation; promoted to `freed` when
    /// its commit completes.
    freed_pending: Vec<PageId>,
}

impl Pager {
    /// Open or create the store file and map its initial address space.
    ///
    /// ## Input
    /// - `path`: store file path (created read/write if missing)
    ///
    /// ## Output
    /// - `Ok(Pager)` with the file mapped; call
    ///   [`master_load`](Pager::master_load) next
    /// - `Err(BurrowError::IoError)`: open, stat, or mmap failed
    /// - `Err(BurrowError::FileSizeNotAligned)`: existing file is not a
    ///   whole number of pages
    ///
    /// ## Side Effects
    /// - Creates the file if it does not exist (size 0 until the first
    ///   commit writes the master page)
    pub fn open<P: AsRef<Path>>(path: P) -> BurrowResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| BurrowError::IoError {
                operation: "open".to_string(),
                reason: e.to_string(),
            })?;

        let meta = file.metadata().map_err(|e| BurrowError::IoError {
            operation: "stat".to_string(),
            reason: e.to_string(),
        })?;
        if meta.len() % PAGE_SIZE as u64 != 0 {
            return Err(BurrowError::FileSizeNotAligned { size: meta.len() });
        }
        let file_size = meta.len() as usize;

        // The mapping may be larger than the file; double until it covers
        // the current size.
        let mut map_len = INITIAL_MMAP_SIZE;
        while map_len < file_size {
            map_len *= 2;
        }
        let chunk = unsafe { MmapOptions::new().len(map_len).map_mut(&file) }.map_err(|e| {
            BurrowError::IoError {
                operation: "mmap".to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(
            path = %path.display(),
            file_size,
            mapped = map_len,
            "opened store file"
        );

        Ok(Self {
            file,
            file_size,
            mmap_total: map_len,
            chunks: vec![chunk],
            flushed: 0,
            temp: Vec::new(),
            recycled: Vec::new(),
            freed: Vec::new(),
            freed_pending: Vec::new(),
        })
    }

    /// Read and validate the master page.
    ///
    /// ## Output
    /// - `Ok(root)`: the durable root pointer (0 for an empty tree); the
    ///   durable page count is adopted as `flushed`
    /// - `Err(BurrowError::BadSignature)`: not a Burrow store file
    /// - `Err(BurrowError::BadMasterPage)`: used count or root pointer out
    ///   of range
    ///
    /// A zero-length file is a brand-new store: page 0 is reserved and the
    /// master page itself is first written by the first commit.
    pub fn master_load(&mut self) -> BurrowResult<PageId> {
        if self.file_size == 0 {
            self.flushed = 1;
            return Ok(0);
        }

        let master = &self.chunks[0][..32];
        let root = read_u64(master, 16);
        let used = read_u64(master, 24);

        if master[..16] != STORE_SIG[..] {
            return Err(BurrowError::BadSignature);
        }
        let file_pages = (self.file_size / PAGE_SIZE) as u64;
        if used < 1 || used > file_pages {
            return Err(BurrowError::BadMasterPage {
                reason: format!(
                    "used count {} out of range (file has {} pages)",
                    used, file_pages
                ),
            });
        }
        if root >= used {
            return Err(BurrowError::BadMasterPage {
                reason: format!("root pointer {} not below used count {}", root, used),
            });
        }

        self.flushed = used;
        Ok(root)
    }

    /// Number of pages durably present in the file (master page included).
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Current file size in bytes.
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    /// Commit every staged page and publish `root` in the master page.
    ///
    /// Durable on return. On error the staging state is left in place and
    /// the in-memory store must be considered undefined; the on-disk state
    /// remains at the last successful commit, so dropping and reopening
    /// recovers.
    pub fn flush(&mut self, root: PageId) -> BurrowResult<()> {
        self.write_pages()?;
        self.sync_pages(root)
    }

    /// Grow the file to hold at least `npages` pages.
    ///
    /// Growth is exponential (an eighth of the current size per step, at
    /// least one page) so a growing store does not extend the file on
    /// every commit. Space is reserved, not just promised, so later page
    /// writes through the mapping cannot hit an out-of-space fault.
    fn extend_file(&mut self, npages: usize) -> BurrowResult<()> {
        let mut file_pages = self.file_size / PAGE_SIZE;
        if file_pages >= npages {
            return Ok(());
        }
        while file_pages < npages {
            file_pages += std::cmp::max(1, file_pages / 8);
        }

        let file_size = file_pages * PAGE_SIZE;
        self.file
            .allocate(file_size as u64)
            .map_err(|e| BurrowError::IoError {
                operation: "allocate".to_string(),
                reason: e.to_string(),
            })?;
        self.file_size = file_size;

        tracing::debug!(file_size, "extended store file");
        Ok(())
    }

    /// Grow the mapped address space to hold at least `npages` pages.
    ///
    /// Appends one mapping whose length equals the current total, doubling
    /// the range. Existing chunks are never remapped, so node images read
    /// earlier stay valid.
    fn extend_mmap(&mut self, npages: usize) -> BurrowResult<()> {
        if self.mmap_total >= npages * PAGE_SIZE {
            return Ok(());
        }

        let added = self.mmap_total;
        let chunk = unsafe {
            MmapOptions::new()
                .offset(self.mmap_total as u64)
                .len(added)
                .map_mut(&self.file)
        }
        .map_err(|e| BurrowError::IoError {
            operation: "mmap".to_string(),
            reason: e.to_string(),
        })?;
        self.chunks.push(chunk);
        self.mmap_total += added;

        tracing::debug!(
            total = self.mmap_total,
            chunks = self.chunks.len(),
            "extended mapped address space"
        );
        Ok(())
    }

    /// Copy staged pages into the mapping (commit steps 1-2).
    fn write_pages(&mut self) -> BurrowResult<()> {
        let npages = self.flushed as usize + self.temp.len();
        self.extend_file(npages)?;
        self.extend_mmap(npages)?;

        for (i, slot) in self.temp.iter().enumerate() {
            if let Some(data) = slot {
                let ptr = self.flushed + i as u64;
                chunk_page_mut(&mut self.chunks, ptr)[..data.len()].copy_from_slice(data);
            }
        }
        for (ptr, data) in &self.recycled {
            chunk_page_mut(&mut self.chunks, *ptr)[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    /// Sync page data, then publish the new master page (commit steps 3-6).
    fn sync_pages(&mut self, root: PageId) -> BurrowResult<()> {
        // Page data must be durable before the master page references it.
        self.file.sync_all().map_err(|e| BurrowError::IoError {
            operation: "fsync".to_string(),
            reason: e.to_string(),
        })?;

        let fresh = self.temp.len() as u64;
        self.flushed += fresh;
        self.temp.clear();
        self.recycled.clear();
        self.freed.append(&mut self.freed_pending);

        self.master_store(root)?;
        self.file.sync_all().map_err(|e| BurrowError::IoError {
            operation: "fsync".to_string(),
            reason: e.to_string(),
        })?;

        tracing::trace!(root, flushed = self.flushed, pages = fresh, "committed");
        Ok(())
    }

    /// Write the master page image at file offset 0.
    fn master_store(&mut self, root: PageId) -> BurrowResult<()> {
        let mut data = [0u8; 32];
        data[..16].copy_from_slice(STORE_SIG);
        write_u64(&mut data, 16, root);
        write_u64(&mut data, 24, self.flushed);

        // Updating the master through the mapping would not be atomic;
        // a positional write keeps it off the page-data path.
        self.file
            .write_all_at(&data, 0)
            .map_err(|e| BurrowError::IoError {
                operation: "write master page".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Locate the mapped bytes of page `ptr`.
    fn page_slice(&self, ptr: PageId) -> &[u8] {
        let mut start = 0;
        for chunk in &self.chunks {
            let end = start + (chunk.len() / PAGE_SIZE) as u64;
            if ptr < end {
                let offset = ((ptr - start) as usize) * PAGE_SIZE;
                return &chunk[offset..offset + PAGE_SIZE];
            }
            start = end;
        }
        panic!("page pointer {} beyond the mapped address space", ptr);
    }
}

/// Locate the mapped bytes of page `ptr`, mutably.
///
/// A free function rather than a method so commit loops can hold the
/// staging lists and the chunks at the same time.
fn chunk_page_mut(chunks: &mut [MmapMut], ptr: PageId) -> &mut [u8] {
    let mut start = 0;
    for chunk in chunks.iter_mut() {
        let end = start + (chunk.len() / PAGE_SIZE) as u64;
        if ptr < end {
            let offset = ((ptr - start) as usize) * PAGE_SIZE;
            return &mut chunk[offset..offset + PAGE_SIZE];
        }
        start = end;
    }
    panic!("page pointer {} beyond the mapped address space", ptr);
}

impl PageStore for Pager {
    /// Copy the page behind `ptr` out of the mapping.
    ///
    /// Valid targets are durable pages and pages staged by the current
    /// commit window; anything else is a bug in the tree.
    fn page_get(&self, ptr: PageId) -> Node {
        assert!(
            ptr < self.flushed + self.temp.len() as u64,
            "page pointer {} out of range",
            ptr
        );
        Node::from_bytes(self.page_slice(ptr).to_vec())
    }

    /// Stage a page image, reusing a freed on-disk page when one exists.
    fn page_new(&mut self, node: Node) -> PageId {
        let data = node.into_bytes();
        assert!(data.len() <= PAGE_SIZE, "node image exceeds a page");

        if let Some(ptr) = self.freed.pop() {
            self.recycled.push((ptr, data));
            return ptr;
        }
        let ptr = self.flushed + self.temp.len() as u64;
        self.temp.push(Some(data));
        ptr
    }

    /// Free a page.
    ///
    /// A staged page is dropped from the commit; a durable page becomes
    /// reusable once the running operation commits. Freeing a pointer
    /// twice is fatal.
    fn page_del(&mut self, ptr: PageId) {
        if ptr >= self.flushed {
            let idx = (ptr - self.flushed) as usize;
            assert!(
                idx < self.temp.len(),
                "freed page pointer {} was never allocated",
                ptr
            );
            self.temp[idx] = None;
            return;
        }

        assert!(
            !self.freed.contains(&ptr) && !self.freed_pending.contains(&ptr),
            "page {} already freed",
            ptr
        );
        self.freed_pending.push(ptr);
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("file_size", &self.file_size)
            .field("mmap_total", &self.mmap_total)
            .field("chunks", &self.chunks.len())
            .field("flushed", &self.flushed)
            .field("staged", &self.temp.len())
            .field("freed", &self.freed.len())
            .finish()
    }
}
