// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Buffered random-access reader and writer.
//!
//! The writer is append-only for frames and seeks back only for the
//! header beacon. fsync discipline: frames are synced before the beacon
//! that makes them reachable, so a torn commit leaves an unreferenced
//! tail, never a dangling reference.

use super::{check_frame_len, check_frame_offset, Reader, DATA_FILE, FIRST_FRAME_OFFSET, OFFSETS_FILE};
use crate::bytepipe::BytePipeline;
use crate::error::{StoreError, StoreResult};
use crate::page::{codec, Page, NULL_ID};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Buffered random-access reader over the data file.
pub struct FileReader {
    data: File,
    pipe: Arc<BytePipeline>,
}

impl FileReader {
    /// Open an independent read handle on a resource directory.
    ///
    /// ## Error Conditions
    /// - IoError: Data file missing or unreadable
    pub fn open(dir: &Path, pipe: Arc<BytePipeline>) -> StoreResult<Self> {
        let data = OpenOptions::new()
            .read(true)
            .open(dir.join(DATA_FILE))
            .map_err(|e| StoreError::io("open_data_file", e))?;
        Ok(Self { data, pipe })
    }

    fn read_frame(&mut self, file_key: i64) -> StoreResult<Vec<u8>> {
        let offset = check_frame_offset(file_key)?;
        self.data
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("seek_frame", e))?;
        let mut len_buf = [0u8; 4];
        self.data
            .read_exact(&mut len_buf)
            .map_err(|e| StoreError::io("read_frame_length", e))?;
        let len = check_frame_len(i32::from_be_bytes(len_buf))?;
        let mut body = vec![0u8; len];
        self.data
            .read_exact(&mut body)
            .map_err(|e| StoreError::io("read_frame_body", e))?;
        Ok(body)
    }
}

impl Reader for FileReader {
    fn read_page(&mut self, file_key: i64) -> StoreResult<Page> {
        let body = self.read_frame(file_key)?;
        let raw = self.pipe.deserialize(body)?;
        codec::deserialize(&raw)
    }

    fn uber_page_file_key(&mut self) -> StoreResult<i64> {
        self.data
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io("seek_beacon", e))?;
        let mut buf = [0u8; 8];
        self.data
            .read_exact(&mut buf)
            .map_err(|e| StoreError::io("read_beacon", e))?;
        Ok(i64::from_be_bytes(buf))
    }

    fn revision_root_offset(&mut self, _revision: u32) -> StoreResult<Option<i64>> {
        // The buffered reader resolves revision roots through the trie.
        Ok(None)
    }
}

/// Append-only writer over the data and revisions-offset files.
pub struct FileWriter {
    data: File,
    offsets: File,
    pipe: Arc<BytePipeline>,
    position: u64,
}

impl FileWriter {
    /// Open (or initialise) the write side of a resource directory.
    ///
    /// A brand-new data file gets its 12-byte header with a null beacon.
    ///
    /// ## Error Conditions
    /// - IoError: Files cannot be created or opened read-write
    pub fn open(dir: &Path, pipe: Arc<BytePipeline>) -> StoreResult<Self> {
        let mut data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(DATA_FILE))
            .map_err(|e| StoreError::io("open_data_file", e))?;
        let offsets = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(OFFSETS_FILE))
            .map_err(|e| StoreError::io("open_offsets_file", e))?;

        let len = data
            .metadata()
            .map_err(|e| StoreError::io("stat_data_file", e))?
            .len();
        let position = if len == 0 {
            let mut header = [0u8; FIRST_FRAME_OFFSET as usize];
            header[..8].copy_from_slice(&NULL_ID.to_be_bytes());
            data.write_all(&header)
                .map_err(|e| StoreError::io("write_header", e))?;
            FIRST_FRAME_OFFSET
        } else {
            len.max(FIRST_FRAME_OFFSET)
        };

        Ok(Self {
            data,
            offsets,
            pipe,
            position,
        })
    }

    /// Pipe, frame and append a page; returns its file key.
    pub fn append_page(&mut self, page: &Page) -> StoreResult<i64> {
        let raw = codec::serialize(page);
        let body = self.pipe.serialize(raw)?;
        let file_key = self.position as i64;
        self.data
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| StoreError::io("seek_append", e))?;
        self.data
            .write_all(&(body.len() as i32).to_be_bytes())
            .map_err(|e| StoreError::io("write_frame_length", e))?;
        self.data
            .write_all(&body)
            .map_err(|e| StoreError::io("write_frame_body", e))?;
        self.position += 4 + body.len() as u64;
        Ok(file_key)
    }

    /// Durably publish a new uber page: fsync the frames, rewrite the
    /// beacon, fsync again. This is the commit's linearisation point.
    pub fn publish_uber_page(&mut self, file_key: i64) -> StoreResult<()> {
        self.data
            .sync_all()
            .map_err(|e| StoreError::io("sync_frames", e))?;
        self.data
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io("seek_beacon", e))?;
        self.data
            .write_all(&file_key.to_be_bytes())
            .map_err(|e| StoreError::io("write_beacon", e))?;
        self.data
            .sync_all()
            .map_err(|e| StoreError::io("sync_beacon", e))?;
        Ok(())
    }

    /// Record a committed revision root in the dense offset index.
    pub fn append_revision_offset(&mut self, root_file_key: i64) -> StoreResult<()> {
        self.offsets
            .seek(SeekFrom::End(0))
            .map_err(|e| StoreError::io("seek_offsets", e))?;
        self.offsets
            .write_all(&root_file_key.to_be_bytes())
            .map_err(|e| StoreError::io("write_offset", e))?;
        self.offsets
            .sync_all()
            .map_err(|e| StoreError::io("sync_offsets", e))?;
        Ok(())
    }

    /// Current append position (end of the referenced region after commit).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of entries in the revisions-offset file.
    pub fn revision_count(&self) -> StoreResult<u64> {
        let len = self
            .offsets
            .metadata()
            .map_err(|e| StoreError::io("stat_offsets_file", e))?
            .len();
        Ok(len / 8)
    }

    /// Drop unreferenced bytes past `end` (crash cleanup on open).
    pub fn truncate_data(&mut self, end: u64) -> StoreResult<()> {
        self.data
            .set_len(end)
            .map_err(|e| StoreError::io("truncate_data", e))?;
        self.position = end;
        Ok(())
    }
}
