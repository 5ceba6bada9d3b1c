// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Durable, bounded transaction log.
//!
//! One log exists per uncommitted transaction, in
//! `log/<next-revision>/` under the resource directory. It holds five
//! stores: one record-page-container store per subtree plus a page store
//! for copy-on-write trie pages, the new revision root and the name page.
//!
//! Each store is an append-only file of CRC32-framed entries with an
//! in-memory key index and a bounded hot cache; re-putting a key appends a
//! superseding entry. The log therefore survives a crash and can be
//! reopened, while `get` stays cheap for the working set.
//!
//! ## Entry format
//!
//! ```text
//! [key: i64][len: u32][crc32: u32][bytes]
//! ```
//!
//! A `.pending` sentinel marks the transaction as unfinished; recovery
//! discards any log directory still carrying it.

use crate::error::{StoreError, StoreResult};
use crate::page::{codec, Page, PageContainer, Subtree};
use log::warn;
use lru::LruCache;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[cfg(test)]
mod log_test;

/// Directory under the resource root holding per-transaction logs.
pub const LOG_DIR: &str = "log";

/// Sentinel file marking an unfinished transaction.
pub const PENDING_SENTINEL: &str = ".pending";

/// Store file for trie, revision-root and name pages.
pub const PAGE_STORE: &str = "page";

/// Hot-side capacity per store, in values.
const HOT_CAPACITY: usize = 256;

/// A value that can live in a log store.
pub trait LogValue: Sized + Clone {
    fn to_log_bytes(&self) -> Vec<u8>;
    fn from_log_bytes(bytes: &[u8]) -> StoreResult<Self>;
}

impl LogValue for Page {
    fn to_log_bytes(&self) -> Vec<u8> {
        codec::serialize(self)
    }

    fn from_log_bytes(bytes: &[u8]) -> StoreResult<Self> {
        codec::deserialize(bytes)
    }
}

impl LogValue for PageContainer {
    fn to_log_bytes(&self) -> Vec<u8> {
        let complete = codec::serialize(&Page::KeyValue(self.complete().clone()));
        let modified = codec::serialize(&Page::KeyValue(self.modified().clone()));
        let mut out = Vec::with_capacity(4 + complete.len() + modified.len());
        out.extend_from_slice(&(complete.len() as u32).to_be_bytes());
        out.extend_from_slice(&complete);
        out.extend_from_slice(&modified);
        out
    }

    fn from_log_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < 4 {
            return Err(StoreError::Corruption {
                reason: "container entry shorter than its header".to_string(),
            });
        }
        let complete_len = u32::from_be_bytes(bytes[..4].try_into().expect("length checked")) as usize;
        if 4 + complete_len > bytes.len() {
            return Err(StoreError::Corruption {
                reason: "container entry truncated".to_string(),
            });
        }
        let complete = codec::deserialize(&bytes[4..4 + complete_len])?;
        let modified = codec::deserialize(&bytes[4 + complete_len..])?;
        match (complete, modified) {
            (Page::KeyValue(complete), Page::KeyValue(modified)) => {
                Ok(PageContainer::new(complete, modified))
            }
            _ => Err(StoreError::Corruption {
                reason: "container entry holds non-record pages".to_string(),
            }),
        }
    }
}

/// One durable store: append-only file + key index + bounded hot cache.
pub struct LogStore<T: LogValue> {
    file: File,
    write_pos: u64,
    index: HashMap<i64, (u64, u32)>,
    hot: LruCache<i64, T>,
}

impl<T: LogValue> LogStore<T> {
    /// Open or replay the store at `path`.
    ///
    /// Replay scans existing entries; a torn tail (crash mid-append) is
    /// truncated away. For a key written more than once the last entry
    /// wins.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| StoreError::io("open_log_store", e))?;
        let len = file
            .metadata()
            .map_err(|e| StoreError::io("stat_log_store", e))?
            .len();

        let mut index = HashMap::new();
        let mut pos = 0u64;
        while pos < len {
            match Self::read_entry_header(&mut file, pos, len) {
                Some((key, entry_len)) => {
                    index.insert(key, (pos, entry_len));
                    pos += 16 + entry_len as u64;
                }
                None => {
                    warn!(
                        "truncating torn transaction-log tail at {} in {:?}",
                        pos, path
                    );
                    file.set_len(pos)
                        .map_err(|e| StoreError::io("truncate_log_store", e))?;
                    break;
                }
            }
        }

        Ok(Self {
            file,
            write_pos: pos.min(len),
            index,
            hot: LruCache::new(NonZeroUsize::new(HOT_CAPACITY).expect("non-zero")),
        })
    }

    fn read_entry_header(file: &mut File, pos: u64, len: u64) -> Option<(i64, u32)> {
        if pos + 16 > len {
            return None;
        }
        let mut header = [0u8; 16];
        file.seek(SeekFrom::Start(pos)).ok()?;
        file.read_exact(&mut header).ok()?;
        let key = i64::from_be_bytes(header[..8].try_into().ok()?);
        let entry_len = u32::from_be_bytes(header[8..12].try_into().ok()?);
        let crc = u32::from_be_bytes(header[12..16].try_into().ok()?);
        if pos + 16 + entry_len as u64 > len {
            return None;
        }
        let mut bytes = vec![0u8; entry_len as usize];
        file.read_exact(&mut bytes).ok()?;
        if crc32fast::hash(&bytes) != crc {
            return None;
        }
        Some((key, entry_len))
    }

    /// Append `value` under `key`; observable by every later `get`.
    pub fn put(&mut self, key: i64, value: &T) -> StoreResult<()> {
        let bytes = value.to_log_bytes();
        let crc = crc32fast::hash(&bytes);
        self.file
            .seek(SeekFrom::Start(self.write_pos))
            .map_err(|e| StoreError::io("seek_log_append", e))?;
        self.file
            .write_all(&key.to_be_bytes())
            .map_err(|e| StoreError::io("write_log_key", e))?;
        self.file
            .write_all(&(bytes.len() as u32).to_be_bytes())
            .map_err(|e| StoreError::io("write_log_length", e))?;
        self.file
            .write_all(&crc.to_be_bytes())
            .map_err(|e| StoreError::io("write_log_crc", e))?;
        self.file
            .write_all(&bytes)
            .map_err(|e| StoreError::io("write_log_entry", e))?;
        self.index.insert(key, (self.write_pos, bytes.len() as u32));
        self.write_pos += 16 + bytes.len() as u64;
        self.hot.put(key, value.clone());
        Ok(())
    }

    /// Latest value stored under `key`.
    pub fn get(&mut self, key: i64) -> StoreResult<Option<T>> {
        if let Some(value) = self.hot.get(&key) {
            return Ok(Some(value.clone()));
        }
        let Some(&(pos, len)) = self.index.get(&key) else {
            return Ok(None);
        };
        let mut header = [0u8; 16];
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| StoreError::io("seek_log_entry", e))?;
        self.file
            .read_exact(&mut header)
            .map_err(|e| StoreError::io("read_log_header", e))?;
        let crc = u32::from_be_bytes(header[12..16].try_into().expect("length checked"));
        let mut bytes = vec![0u8; len as usize];
        self.file
            .read_exact(&mut bytes)
            .map_err(|e| StoreError::io("read_log_entry", e))?;
        if crc32fast::hash(&bytes) != crc {
            return Err(StoreError::Corruption {
                reason: format!("transaction-log entry {} fails its checksum", key),
            });
        }
        let value = T::from_log_bytes(&bytes)?;
        self.hot.put(key, value.clone());
        Ok(Some(value))
    }

    /// Remove `key` from the index (commit consumes entries this way; the
    /// superseded bytes die with the log directory).
    pub fn remove(&mut self, key: i64) -> StoreResult<Option<T>> {
        let value = self.get(key)?;
        self.index.remove(&key);
        self.hot.pop(&key);
        Ok(value)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: i64) -> bool {
        self.index.contains_key(&key)
    }

    /// All live keys, ascending (deterministic commit order).
    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.index.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no keys are live.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// The per-transaction log: five durable stores plus the sentinel.
pub struct TransactionLog {
    dir: PathBuf,
    pages: LogStore<Page>,
    containers: [LogStore<PageContainer>; 4],
    next_page_key: i64,
}

impl TransactionLog {
    /// Directory of the log for `revision` under `resource_dir`.
    pub fn dir_for(resource_dir: &Path, revision: u32) -> PathBuf {
        resource_dir.join(LOG_DIR).join(revision.to_string())
    }

    /// Create (or reopen after a crash) the log for an in-flight revision.
    pub fn open(resource_dir: &Path, revision: u32) -> StoreResult<Self> {
        let dir = Self::dir_for(resource_dir, revision);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create_log_dir", e))?;
        fs::write(dir.join(PENDING_SENTINEL), b"")
            .map_err(|e| StoreError::io("write_log_sentinel", e))?;

        let pages = LogStore::open(&dir.join(PAGE_STORE))?;
        let containers = [
            LogStore::open(&dir.join(Subtree::Node.store_name()))?,
            LogStore::open(&dir.join(Subtree::Path.store_name()))?,
            LogStore::open(&dir.join(Subtree::TextValue.store_name()))?,
            LogStore::open(&dir.join(Subtree::AttributeValue.store_name()))?,
        ];
        let next_page_key = pages.keys().last().map_or(0, |k| k + 1);

        Ok(Self {
            dir,
            pages,
            containers,
            next_page_key,
        })
    }

    /// Install a page under a fresh log key.
    pub fn put_new_page(&mut self, page: &Page) -> StoreResult<i64> {
        let key = self.next_page_key;
        self.next_page_key += 1;
        self.pages.put(key, page)?;
        Ok(key)
    }

    /// Replace the page under an existing log key.
    pub fn put_page(&mut self, key: i64, page: &Page) -> StoreResult<()> {
        self.pages.put(key, page)
    }

    /// Page under `key`.
    pub fn get_page(&mut self, key: i64) -> StoreResult<Option<Page>> {
        self.pages.get(key)
    }

    /// Consume the page under `key` (commit walk).
    pub fn remove_page(&mut self, key: i64) -> StoreResult<Option<Page>> {
        self.pages.remove(key)
    }

    /// Container store of a subtree.
    pub fn containers(&mut self, subtree: Subtree) -> &mut LogStore<PageContainer> {
        &mut self.containers[subtree.index()]
    }

    /// Drop the whole log directory after a successful commit.
    pub fn finish(self) -> StoreResult<()> {
        fs::remove_dir_all(&self.dir).map_err(|e| StoreError::io("remove_log_dir", e))
    }

    /// Discard an aborted transaction's log directory.
    pub fn discard(self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Remove stale transaction-log directories left behind by crashed or
/// aborted transactions. Returns the revisions that were cleaned up.
pub fn collect_stale_logs(resource_dir: &Path) -> StoreResult<Vec<u32>> {
    let log_root = resource_dir.join(LOG_DIR);
    let mut cleaned = Vec::new();
    let entries = match fs::read_dir(&log_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cleaned),
        Err(e) => return Err(StoreError::io("read_log_dir", e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io("read_log_dir", e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join(PENDING_SENTINEL).exists() {
            if let Some(revision) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            {
                cleaned.push(revision);
            }
            fs::remove_dir_all(&path).map_err(|e| StoreError::io("remove_stale_log", e))?;
        }
    }
    cleaned.sort_unstable();
    Ok(cleaned)
}
