// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Burrow: a single-file key-value store built on a copy-on-write B+-tree.
//!
//! Burrow maps variable-length byte keys to variable-length byte values and
//! persists them in one file of fixed-size pages. Every mutation produces new
//! page images instead of touching live ones; durability comes from flipping a
//! single master page after the page data has been synced, so a crash at any
//! point leaves either the old tree or the new tree readable — never a mix.
//!
//! ## Quick Start
//!
//! ```rust
//! use burrow::Store;
//!
//! let dir = tempfile::tempdir()?;
//! let mut store = Store::open(dir.path().join("data.burrow"))?;
//!
//! store.set(b"page.title", b"Welcome")?;
//! assert_eq!(store.get(b"page.title"), Some(b"Welcome".to_vec()));
//!
//! store.delete(b"page.title")?;
//! assert_eq!(store.get(b"page.title"), None);
//! # Ok::<(), burrow::BurrowError>(())
//! ```
//!
//! ## Architecture
//!
//! - **store::btree**: page codec, node algorithms, and the tree recursion
//! - **store::pager**: file growth, mmap chunks, and the commit protocol
//! - **store::kv**: the public `Store` type wiring tree and pager together
//!
//! The store is strictly single-threaded and single-process; callers
//! serialise access externally.

pub mod error;
pub mod store;


// Re-exports
pub use error::{BurrowError, BurrowResult};
pub use store::kv::Store;

/// Burrow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
