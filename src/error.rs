// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for Burrow operations.
//!
//! Only two kinds of failure travel through `Result`: I/O errors from the
//! operating system and format errors found while opening an existing store
//! file. Violated in-process invariants (out-of-range page indices, oversized
//! node images, double frees) are programming bugs and panic instead, so that
//! corruption is loud rather than persisted.

use std::fmt;

/// Standard Result type for all Burrow operations.
pub type BurrowResult<T> = Result<T, BurrowError>;

/// Error types for Burrow operations.
#[derive(Debug, Clone)]
pub enum BurrowError {
    /// I/O error during file operations.
    IoError { operation: String, reason: String },

    /// Store file carries the wrong signature in its master page.
    BadSignature,

    /// Master page fields are out of range (corrupted or foreign file).
    BadMasterPage { reason: String },

    /// Store file size is not a multiple of the page size.
    FileSizeNotAligned { size: u64 },
}

impl fmt::Display for BurrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::BadSignature => {
                write!(f, "Bad store file signature")
            }
            Self::BadMasterPage { reason } => {
                write!(f, "Bad master page: {}", reason)
            }
            Self::FileSizeNotAligned { size } => {
                write!(
                    f,
                    "Store file size {} is not a multiple of the page size",
                    size
                )
            }
        }
    }
}

impl std::error::Error for BurrowError {}

// Convenience conversion from std::io::Error
impl From<std::io::Error> for BurrowError {
    fn from(err: std::io::Error) -> Self {
        BurrowError::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
