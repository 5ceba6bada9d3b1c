// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! File I/O for the data and revisions-offset files.
//!
//! ## Data file layout
//!
//! ```text
//! byte 0..8    file key of the most recent uber page (i64, big-endian)
//! byte 8..12   reserved
//! byte 12..    page frames: [length: i32][body]
//! ```
//!
//! The body of every frame has been run through the byte pipe. A page's
//! *file key* is the absolute offset of its frame. The header beacon is
//! the single mutable location in the file; it is rewritten exactly once
//! per successful commit, after every page it references is durable.
//!
//! The revisions-offset file is a dense array of i64 revision-root file
//! keys, one per committed revision, enabling the memory-mapped reader to
//! skip the uber trie walk.

use crate::error::{StoreError, StoreResult};
use crate::page::Page;

pub mod file;
pub mod mmap;

#[cfg(test)]
mod mmap_test;

pub use file::{FileReader, FileWriter};
pub use mmap::MmapReader;

/// Data file name inside a resource directory.
pub const DATA_FILE: &str = "data.sirix";

/// Revisions-offset file name inside a resource directory.
pub const OFFSETS_FILE: &str = "revisions-offsets.sirix";

/// First frame offset; bytes before it are the beacon and reserved area.
pub const FIRST_FRAME_OFFSET: u64 = 12;

/// Upper bound accepted for one frame body; larger lengths are corruption.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Read access to persisted pages.
///
/// Each transaction owns an independent reader, so readers never contend
/// on file positions.
pub trait Reader: Send {
    /// Read and decode the page at `file_key`.
    fn read_page(&mut self, file_key: i64) -> StoreResult<Page>;

    /// File key of the most recent uber page (the header beacon).
    fn uber_page_file_key(&mut self) -> StoreResult<i64>;

    /// Fast-path lookup of a revision root's file key, if this reader keeps
    /// the dense revision index. `None` falls back to the trie walk.
    fn revision_root_offset(&mut self, revision: u32) -> StoreResult<Option<i64>>;
}

/// Validate a frame offset before seeking to it.
pub(crate) fn check_frame_offset(file_key: i64) -> StoreResult<u64> {
    if file_key < FIRST_FRAME_OFFSET as i64 {
        return Err(StoreError::Corruption {
            reason: format!("file key {} points into the file header", file_key),
        });
    }
    Ok(file_key as u64)
}

/// Validate a frame length read from disk.
pub(crate) fn check_frame_len(len: i32) -> StoreResult<usize> {
    if len <= 0 || len as usize > MAX_FRAME_LEN {
        return Err(StoreError::Corruption {
            reason: format!("invalid page frame length {}", len),
        });
    }
    Ok(len as usize)
}
