// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped reader.
//!
//! Maps the data file and the revisions-offset file and serves page reads
//! straight from the mapping. The data segment is re-installed when the
//! file has grown past the mapped region (a newer revision was committed
//! after this reader opened); the mapping is released on drop.
//!
//! The dense revision index makes `revision_root_offset` O(1), skipping
//! the uber-trie walk entirely.

use super::{check_frame_len, check_frame_offset, Reader, DATA_FILE, OFFSETS_FILE};
use crate::bytepipe::BytePipeline;
use crate::error::{StoreError, StoreResult};
use crate::page::{codec, Page};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

/// Reader over memory-mapped data and revision-offset files.
pub struct MmapReader {
    data_file: File,
    data: Option<Mmap>,
    offsets_file: File,
    offsets: Option<Mmap>,
    pipe: Arc<BytePipeline>,
}

impl MmapReader {
    /// Map both files of a resource directory.
    ///
    /// ## Error Conditions
    /// - IoError: Files missing, unreadable, or unmappable
    pub fn open(dir: &Path, pipe: Arc<BytePipeline>) -> StoreResult<Self> {
        let data_file = OpenOptions::new()
            .read(true)
            .open(dir.join(DATA_FILE))
            .map_err(|e| StoreError::io("open_data_file", e))?;
        let offsets_file = OpenOptions::new()
            .read(true)
            .open(dir.join(OFFSETS_FILE))
            .map_err(|e| StoreError::io("open_offsets_file", e))?;
        let mut reader = Self {
            data_file,
            data: None,
            offsets_file,
            offsets: None,
            pipe,
        };
        reader.set_data_segment()?;
        reader.remap_offsets()?;
        Ok(reader)
    }

    /// (Re-)install the data segment; called on open and whenever a read
    /// lands past the mapped region because the file has grown.
    pub fn set_data_segment(&mut self) -> StoreResult<()> {
        let len = self
            .data_file
            .metadata()
            .map_err(|e| StoreError::io("stat_data_file", e))?
            .len();
        self.data = if len == 0 {
            None
        } else {
            // Safety: the store never rewrites bytes inside the mapped
            // region; commits only append and update the 12-byte header.
            Some(unsafe {
                Mmap::map(&self.data_file).map_err(|e| StoreError::io("mmap_data_file", e))?
            })
        };
        Ok(())
    }

    fn remap_offsets(&mut self) -> StoreResult<()> {
        let len = self
            .offsets_file
            .metadata()
            .map_err(|e| StoreError::io("stat_offsets_file", e))?
            .len();
        self.offsets = if len == 0 {
            None
        } else {
            Some(unsafe {
                Mmap::map(&self.offsets_file)
                    .map_err(|e| StoreError::io("mmap_offsets_file", e))?
            })
        };
        Ok(())
    }

    fn frame(&mut self, file_key: i64) -> StoreResult<Vec<u8>> {
        let offset = check_frame_offset(file_key)? as usize;
        let mapped_len = self.data.as_ref().map_or(0, |m| m.len());
        if offset + 4 > mapped_len {
            self.set_data_segment()?;
        }
        let data = self.data.as_ref().ok_or_else(|| StoreError::Corruption {
            reason: "data file is empty".to_string(),
        })?;
        if offset + 4 > data.len() {
            return Err(StoreError::Corruption {
                reason: format!("file key {} beyond end of data file", file_key),
            });
        }
        let len = check_frame_len(i32::from_be_bytes(
            data[offset..offset + 4].try_into().expect("length checked"),
        ))?;
        let start = offset + 4;
        if start + len > data.len() {
            return Err(StoreError::Corruption {
                reason: format!("page frame at {} extends past end of file", file_key),
            });
        }
        Ok(data[start..start + len].to_vec())
    }
}

impl Reader for MmapReader {
    fn read_page(&mut self, file_key: i64) -> StoreResult<Page> {
        let body = self.frame(file_key)?;
        let raw = self.pipe.deserialize(body)?;
        codec::deserialize(&raw)
    }

    fn uber_page_file_key(&mut self) -> StoreResult<i64> {
        // The beacon may have been rewritten since mapping; remap so a
        // fresh transaction observes the newest committed revision.
        self.set_data_segment()?;
        let data = self.data.as_ref().ok_or_else(|| StoreError::Corruption {
            reason: "data file is empty".to_string(),
        })?;
        if data.len() < 8 {
            return Err(StoreError::Corruption {
                reason: "data file shorter than its header".to_string(),
            });
        }
        Ok(i64::from_be_bytes(data[..8].try_into().expect("length checked")))
    }

    fn revision_root_offset(&mut self, revision: u32) -> StoreResult<Option<i64>> {
        let needed = (revision as usize + 1) * 8;
        if self.offsets.as_ref().map_or(0, |m| m.len()) < needed {
            self.remap_offsets()?;
        }
        match &self.offsets {
            Some(map) if map.len() >= needed => {
                let start = revision as usize * 8;
                Ok(Some(i64::from_be_bytes(
                    map[start..start + 8].try_into().expect("length checked"),
                )))
            }
            _ => Ok(None),
        }
    }
}
