// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Resource session: the owner of everything a store shares.
//!
//! A resource is one directory holding the data file, the revisions-offset
//! file, the settings document and in-flight transaction logs. The session
//! owns the shared page cache, the in-process commit mutex and the writer
//! flag; nothing in this crate is a process-wide singleton.
//!
//! Creating a resource bootstraps revision 0 (an empty revision root) so
//! that a read transaction works immediately. Opening an existing resource
//! recovers from crashes: unreferenced bytes past the committed uber page
//! are truncated, abandoned transaction logs are collected, and a lagging
//! revisions-offset index is backfilled from the trie.

use crate::bytepipe::{BytePipeline, XzByteHandler};
use crate::cache::PageCache;
use crate::error::{StoreError, StoreResult};
use crate::io::{FileReader, FileWriter, MmapReader, Reader, DATA_FILE};
use crate::page::{IndirectPage, Page, PageKind, PageReference, RevisionRootPage, UberPage};
use crate::settings::{ReaderKind, ResourceSettings, SETTINGS_FILE};
use crate::trx::{PageReadTrx, PageWriteTrx};
use crate::txlog::collect_stale_logs;
use fs2::FileExt;
use log::{info, warn};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Advisory lock file guarding the commit window.
pub const LOCK_FILE: &str = "write.lock";

/// Default wait for the cross-process commit lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Commit metadata of one committed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: u32,
    pub commit_timestamp: i64,
    pub commit_message: Option<String>,
}

/// RAII holder of the cross-process commit lock.
pub struct CommitLock {
    file: File,
}

impl CommitLock {
    /// Acquire the exclusive commit lock, waiting up to `timeout`.
    ///
    /// ## Error Conditions
    /// - IoError: Lock file cannot be created
    /// - LockTimeout: Another process held the lock for the whole window
    pub fn acquire(dir: &Path, timeout: Duration) -> StoreResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::io("create_lock_file", e))?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => {
                    return Err(StoreError::LockTimeout {
                        resource: dir.display().to_string(),
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }
}

impl Drop for CommitLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Session over one resource directory.
pub struct Resource {
    dir: PathBuf,
    settings: ResourceSettings,
    pipe: Arc<BytePipeline>,
    cache: Arc<PageCache>,
    commit_mutex: Arc<Mutex<()>>,
    writer_flag: Arc<AtomicBool>,
    lock_timeout: Duration,
}

impl Resource {
    /// Create a fresh resource at `dir` and bootstrap revision 0.
    ///
    /// ## Error Conditions
    /// - InvalidState: `dir` already holds a resource
    /// - InvalidArgument: Settings outside supported bounds
    /// - IoError: Directory or files cannot be created
    pub fn create(dir: impl Into<PathBuf>, settings: ResourceSettings) -> StoreResult<Self> {
        let dir = dir.into();
        settings.validate()?;
        if dir.join(SETTINGS_FILE).exists() {
            return Err(StoreError::InvalidState {
                reason: format!("resource already exists at {}", dir.display()),
            });
        }
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create_resource_dir", e))?;
        settings.save(&dir)?;

        let resource = Self::assemble(dir, settings);
        resource.bootstrap()?;
        info!(
            "created resource {} at {}",
            resource.settings.resource_id,
            resource.dir.display()
        );
        Ok(resource)
    }

    /// Open an existing resource, running crash recovery.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        let settings = ResourceSettings::load(&dir)?;
        let resource = Self::assemble(dir, settings);
        resource.recover()?;
        Ok(resource)
    }

    fn assemble(dir: PathBuf, settings: ResourceSettings) -> Self {
        let mut pipe = BytePipeline::identity();
        if settings.compression {
            pipe = pipe.push(Box::new(XzByteHandler::new()));
        }
        Self {
            dir,
            settings,
            pipe: Arc::new(pipe),
            cache: Arc::new(PageCache::default()),
            commit_mutex: Arc::new(Mutex::new(())),
            writer_flag: Arc::new(AtomicBool::new(false)),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the cross-process commit-lock timeout.
    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    /// Resource directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Resource settings.
    pub fn settings(&self) -> &ResourceSettings {
        &self.settings
    }

    /// Commit revision 0: an empty revision root hooked into a fresh uber
    /// trie, so the resource is readable before its first write.
    fn bootstrap(&self) -> StoreResult<()> {
        let mut writer = FileWriter::open(&self.dir, self.pipe.clone())?;
        let uber = UberPage::bootstrap();

        let mut root = RevisionRootPage::bootstrap();
        root.set_commit_info(chrono::Utc::now().timestamp_millis(), None);
        let root_offset = writer.append_page(&Page::RevisionRoot(root))?;

        // Build the uber-trie path for revision key 0 bottom-up.
        let geometry = uber.revision_trie();
        let mut child = PageReference::persisted(PageKind::RevisionRoot, root_offset);
        for level in (0..geometry.height()).rev() {
            let child_kind = if level + 1 < geometry.height() {
                PageKind::Indirect
            } else {
                PageKind::RevisionRoot
            };
            let mut page = IndirectPage::new(0, geometry.fanout(level), child_kind);
            *page.reference_mut(0) = child;
            let offset = writer.append_page(&Page::Indirect(page))?;
            child = PageReference::persisted(PageKind::Indirect, offset);
        }

        let mut uber = uber;
        *uber.revisions_ref_mut() = child;
        let uber_offset = writer.append_page(&Page::Uber(uber))?;
        writer.publish_uber_page(uber_offset)?;
        writer.append_revision_offset(root_offset)?;
        Ok(())
    }

    /// Crash recovery: collect abandoned logs, truncate the unreferenced
    /// data tail, backfill the revisions-offset index.
    fn recover(&self) -> StoreResult<()> {
        let cleaned = collect_stale_logs(&self.dir)?;
        if !cleaned.is_empty() {
            warn!("discarded abandoned transaction logs for revisions {:?}", cleaned);
        }

        let frame_end = self.committed_frame_end()?;
        let data_len = fs::metadata(self.dir.join(DATA_FILE))
            .map_err(|e| StoreError::io("stat_data_file", e))?
            .len();
        let mut writer = FileWriter::open(&self.dir, self.pipe.clone())?;
        if data_len > frame_end {
            warn!(
                "truncating {} unreferenced bytes past the committed uber page",
                data_len - frame_end
            );
            writer.truncate_data(frame_end)?;
        }

        // A crash between beacon publish and index append leaves the dense
        // index one entry short; resolve the missing roots via the trie.
        let read = self.begin_read(None)?;
        let expected = read.revision_number() as u64 + 1;
        let mut have = writer.revision_count()?;
        while have < expected {
            let revision = have as u32;
            let offset = read.revision_root_file_key(revision)?;
            writer.append_revision_offset(offset)?;
            warn!("backfilled revisions-offset entry for revision {}", revision);
            have += 1;
        }
        read.close();
        Ok(())
    }

    /// End of the committed uber page's frame; valid data stops there.
    fn committed_frame_end(&self) -> StoreResult<u64> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(self.dir.join(DATA_FILE))
            .map_err(|e| StoreError::io("open_data_file", e))?;
        let mut beacon = [0u8; 8];
        file.read_exact(&mut beacon)
            .map_err(|e| StoreError::io("read_beacon", e))?;
        let uber_offset = i64::from_be_bytes(beacon);
        let offset = crate::io::check_frame_offset(uber_offset).map_err(|_| {
            StoreError::Corruption {
                reason: "resource was never bootstrapped (null beacon)".to_string(),
            }
        })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("seek_uber_frame", e))?;
        let mut len = [0u8; 4];
        file.read_exact(&mut len)
            .map_err(|e| StoreError::io("read_uber_frame_length", e))?;
        let len = crate::io::check_frame_len(i32::from_be_bytes(len))?;
        Ok(offset + 4 + len as u64)
    }

    fn reader(&self) -> StoreResult<Box<dyn Reader>> {
        Ok(match self.settings.reader {
            ReaderKind::Buffered => Box::new(FileReader::open(&self.dir, self.pipe.clone())?),
            ReaderKind::Mmap => Box::new(MmapReader::open(&self.dir, self.pipe.clone())?),
        })
    }

    /// Open a read transaction at `revision` (`None` for the newest).
    pub fn begin_read(&self, revision: Option<u32>) -> StoreResult<PageReadTrx> {
        PageReadTrx::open(self.reader()?, self.cache.clone(), &self.settings, revision)
    }

    /// Open the single write transaction.
    ///
    /// ## Error Conditions
    /// - InvalidState: Another write transaction is active on this session
    pub fn begin_write(&self) -> StoreResult<PageWriteTrx> {
        if self
            .writer_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StoreError::InvalidState {
                reason: "another write transaction is active".to_string(),
            });
        }
        let result = (|| {
            let read = PageReadTrx::open(
                self.reader()?,
                self.cache.clone(),
                &self.settings,
                None,
            )?;
            let writer = FileWriter::open(&self.dir, self.pipe.clone())?;
            PageWriteTrx::begin(
                read,
                writer,
                self.settings.versioning,
                self.settings.revisions_to_restore,
                self.settings.records_per_page_exp,
                self.dir.clone(),
                self.commit_mutex.clone(),
                self.writer_flag.clone(),
                self.lock_timeout,
            )
        })();
        if result.is_err() {
            self.writer_flag.store(false, Ordering::Release);
        }
        result
    }

    /// Newest committed revision number.
    pub fn latest_revision(&self) -> StoreResult<u32> {
        let trx = self.begin_read(None)?;
        let revision = trx.revision_number();
        trx.close();
        Ok(revision)
    }

    /// Commit metadata of every committed revision, oldest first.
    pub fn history(&self) -> StoreResult<Vec<RevisionInfo>> {
        let trx = self.begin_read(None)?;
        let mut history = Vec::with_capacity(trx.revision_number() as usize + 1);
        for revision in 0..=trx.revision_number() {
            let root = trx.load_revision_root(revision)?;
            history.push(RevisionInfo {
                revision,
                commit_timestamp: root.commit_timestamp(),
                commit_message: root.commit_message().map(str::to_string),
            });
        }
        trx.close();
        Ok(history)
    }
}
