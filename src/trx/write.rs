// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Write transaction: copy-on-write staging and atomic commit.
//!
//! All mutation is staged in the transaction log. Trie pages on a dirty
//! path are cloned into the log's page store the first time they are
//! touched; record pages live as `(complete, modified)` containers in the
//! subtree stores. Commit walks the staged tree child-first, appends every
//! staged page to the data file, and finally rewrites the uber-page beacon
//! — the linearisation point. A crash anywhere before the beacon rewrite
//! leaves the previous revision intact.
//!
//! ## Container-slot protocol
//!
//! `prepare_entry_for_modification` installs one container as *current*
//! and hands out its record; `finish_entry_modification` writes the
//! container back to the subtree log and clears the slot. Preparing twice
//! without finishing, or finishing without preparing, is `InvalidState`.

use super::read::{check_record_key, visible_record, PageReadTrx};
use crate::error::{StoreError, StoreResult};
use crate::io::FileWriter;
use crate::page::{
    IndirectPage, KeyValuePage, NamePage, Page, PageContainer, PageKind, PageReference, Record,
    RevisionRootPage, Subtree, UberPage, NULL_ID,
};
use crate::resource::CommitLock;
use crate::revision::Versioning;
use crate::trie::TrieGeometry;
use crate::txlog::TransactionLog;
use log::info;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Log key the new revision root is installed under at transaction start.
const REV_ROOT_LOG_KEY: i64 = 0;

/// Where a mutable [`PageReference`] lives while it is being prepared.
#[derive(Debug, Clone, Copy)]
enum RefSlot {
    /// The uber page's revision-trie root.
    UberRevisions,
    /// A subtree root inside the staged revision root.
    RevRootSubtree(Subtree),
    /// The name-page reference inside the staged revision root.
    RevRootName,
    /// Slot `offset` of the staged indirect page under `log_key`.
    Indirect { log_key: i64, offset: usize },
}

struct CurrentSlot {
    subtree: Subtree,
    page_key: i64,
    container: PageContainer,
}

/// Exclusive staging context for the next revision.
pub struct PageWriteTrx {
    read: PageReadTrx,
    log: Option<TransactionLog>,
    writer: FileWriter,
    uber: UberPage,
    new_revision: u32,
    current: Option<CurrentSlot>,
    versioning: Versioning,
    revisions_to_restore: u32,
    records_per_page_exp: u32,
    resource_dir: PathBuf,
    commit_mutex: Arc<Mutex<()>>,
    writer_flag: Arc<AtomicBool>,
    lock_timeout: Duration,
    committed_root_offset: Option<i64>,
}

impl PageWriteTrx {
    /// Stage a transaction on top of the newest committed revision.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn begin(
        read: PageReadTrx,
        writer: FileWriter,
        versioning: Versioning,
        revisions_to_restore: u32,
        records_per_page_exp: u32,
        resource_dir: PathBuf,
        commit_mutex: Arc<Mutex<()>>,
        writer_flag: Arc<AtomicBool>,
        lock_timeout: Duration,
    ) -> StoreResult<Self> {
        let new_revision = read.revision_number() + 1;
        let mut log = TransactionLog::open(&resource_dir, new_revision)?;
        let root = read.revision_root().cow_clone(new_revision);
        let log_key = log.put_new_page(&Page::RevisionRoot(root))?;
        if log_key != REV_ROOT_LOG_KEY {
            return Err(StoreError::AssertionFailure {
                reason: format!("revision root landed at log key {}", log_key),
            });
        }
        let uber = read.uber_page().cow_clone();
        Ok(Self {
            read,
            log: Some(log),
            writer,
            uber,
            new_revision,
            current: None,
            versioning,
            revisions_to_restore,
            records_per_page_exp,
            resource_dir,
            commit_mutex,
            writer_flag,
            lock_timeout,
            committed_root_offset: None,
        })
    }

    /// Revision this transaction will commit.
    pub fn revision_number(&self) -> u32 {
        self.new_revision
    }

    /// Committed revision this transaction was started from.
    pub fn base_revision(&self) -> u32 {
        self.read.revision_number()
    }

    /// Largest allocated record key of a subtree in the staged revision.
    pub fn max_record_key(&mut self, subtree: Subtree) -> StoreResult<i64> {
        Ok(self.revision_root()?.max_record_key(subtree))
    }

    fn log_mut(&mut self) -> StoreResult<&mut TransactionLog> {
        self.log.as_mut().ok_or_else(|| StoreError::InvalidState {
            reason: "write transaction is closed".to_string(),
        })
    }

    fn revision_root(&mut self) -> StoreResult<RevisionRootPage> {
        let page = self
            .log_mut()?
            .get_page(REV_ROOT_LOG_KEY)?
            .ok_or_else(|| StoreError::AssertionFailure {
                reason: "staged revision root missing from log".to_string(),
            })?;
        Ok(page.as_revision_root()?.clone())
    }

    fn put_revision_root(&mut self, root: RevisionRootPage) -> StoreResult<()> {
        self.log_mut()?
            .put_page(REV_ROOT_LOG_KEY, &Page::RevisionRoot(root))
    }

    // ------------------------------------------------------------------
    // Reference slots

    fn get_ref(&mut self, slot: RefSlot) -> StoreResult<PageReference> {
        match slot {
            RefSlot::UberRevisions => Ok(self.uber.revisions_ref().clone()),
            RefSlot::RevRootSubtree(subtree) => {
                Ok(self.revision_root()?.subtree_ref(subtree).clone())
            }
            RefSlot::RevRootName => Ok(self.revision_root()?.name_ref().clone()),
            RefSlot::Indirect { log_key, offset } => {
                let page = self.log_mut()?.get_page(log_key)?.ok_or_else(|| {
                    StoreError::AssertionFailure {
                        reason: format!("dangling log key {}", log_key),
                    }
                })?;
                Ok(page.as_indirect()?.reference(offset).clone())
            }
        }
    }

    fn set_ref(&mut self, slot: RefSlot, reference: PageReference) -> StoreResult<()> {
        match slot {
            RefSlot::UberRevisions => {
                *self.uber.revisions_ref_mut() = reference;
                Ok(())
            }
            RefSlot::RevRootSubtree(subtree) => {
                let mut root = self.revision_root()?;
                *root.subtree_ref_mut(subtree) = reference;
                self.put_revision_root(root)
            }
            RefSlot::RevRootName => {
                let mut root = self.revision_root()?;
                *root.name_ref_mut() = reference;
                self.put_revision_root(root)
            }
            RefSlot::Indirect { log_key, offset } => {
                let page = self.log_mut()?.get_page(log_key)?.ok_or_else(|| {
                    StoreError::AssertionFailure {
                        reason: format!("dangling log key {}", log_key),
                    }
                })?;
                let mut indirect = page.as_indirect()?.clone();
                *indirect.reference_mut(offset) = reference;
                self.log_mut()?.put_page(log_key, &Page::Indirect(indirect))
            }
        }
    }

    /// Copy-on-write walk from a trie root down to the leaf slot for
    /// `key`. Every indirect page on the path ends up in the log; the
    /// returned slot addresses the leaf reference itself.
    fn prepare_path(
        &mut self,
        root_slot: RefSlot,
        key: u64,
        geometry: TrieGeometry,
        leaf_kind: PageKind,
    ) -> StoreResult<RefSlot> {
        let offsets = geometry.level_offsets(key)?;
        let mut slot = root_slot;
        for (level, offset) in offsets.into_iter().enumerate() {
            let mut reference = self.get_ref(slot)?;
            if !reference.is_logged() {
                let child_kind = if level + 1 < geometry.height() {
                    PageKind::Indirect
                } else {
                    leaf_kind
                };
                let page = if reference.is_persisted() {
                    self.read
                        .read_page(reference.file_key)?
                        .as_indirect()?
                        .cow_clone(self.new_revision)
                } else {
                    IndirectPage::new(self.new_revision, geometry.fanout(level), child_kind)
                };
                reference.log_key = self.log_mut()?.put_new_page(&Page::Indirect(page))?;
                self.set_ref(slot, reference.clone())?;
            }
            slot = RefSlot::Indirect {
                log_key: reference.log_key,
                offset,
            };
        }
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Containers

    /// Locate or materialise the container for one record page.
    fn prepare_container(
        &mut self,
        subtree: Subtree,
        page_key: i64,
    ) -> StoreResult<PageContainer> {
        if let Some(container) = self.log_mut()?.containers(subtree).get(page_key)? {
            return Ok(container);
        }

        let geometry = self.uber.subtree_trie(subtree);
        let leaf_slot = self.prepare_path(
            RefSlot::RevRootSubtree(subtree),
            page_key as u64,
            geometry,
            subtree.page_kind(),
        )?;
        let mut leaf_ref = self.get_ref(leaf_slot)?;

        let container = if leaf_ref.is_persisted() {
            let fragments = self.read.fragments(leaf_ref.file_key)?;
            self.versioning.combine_for_modification(
                &fragments,
                self.new_revision,
                self.revisions_to_restore,
            )?
        } else {
            PageContainer::new(
                KeyValuePage::new(page_key, self.new_revision, subtree),
                KeyValuePage::new(page_key, self.new_revision, subtree),
            )
        };

        leaf_ref.kind = subtree.page_kind();
        leaf_ref.key_value_page_key = page_key;
        self.set_ref(leaf_slot, leaf_ref)?;
        self.log_mut()?.containers(subtree).put(page_key, &container)?;
        Ok(container)
    }

    /// Apply `mutate` to the container for `page_key`, routing through the
    /// current slot when that container is checked out.
    fn with_container<F>(&mut self, subtree: Subtree, page_key: i64, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut PageContainer),
    {
        if let Some(slot) = self.current.as_mut() {
            if slot.subtree == subtree && slot.page_key == page_key {
                mutate(&mut slot.container);
                return Ok(());
            }
        }
        let mut container = self.prepare_container(subtree, page_key)?;
        mutate(&mut container);
        self.log_mut()?.containers(subtree).put(page_key, &container)
    }

    // ------------------------------------------------------------------
    // Record operations

    /// Check out a record for in-place modification.
    ///
    /// ## Error Conditions
    /// - InvalidArgument: Negative key, or no such record
    /// - InvalidState: Another container is already current
    pub fn prepare_entry_for_modification(
        &mut self,
        record_key: i64,
        subtree: Subtree,
    ) -> StoreResult<&mut Record> {
        self.log_mut()?;
        check_record_key(record_key)?;
        if self.current.is_some() {
            return Err(StoreError::InvalidState {
                reason: "another container is already current".to_string(),
            });
        }
        let page_key = record_key >> self.records_per_page_exp;
        let mut container = self.prepare_container(subtree, page_key)?;

        if !container.modified().contains(record_key) {
            match container.complete().get(record_key) {
                Some(record) if !record.is_tombstone() => {
                    let record = record.clone();
                    container.modified_mut().set(record);
                }
                _ => {
                    return Err(StoreError::InvalidArgument {
                        reason: format!("record {} does not exist", record_key),
                    })
                }
            }
        }

        let slot = self.current.insert(CurrentSlot {
            subtree,
            page_key,
            container,
        });
        slot.container
            .modified_mut()
            .get_mut(record_key)
            .ok_or_else(|| StoreError::AssertionFailure {
                reason: format!("record {} vanished from its container", record_key),
            })
    }

    /// Write the current container back and release the slot.
    ///
    /// ## Error Conditions
    /// - InvalidState: No container is current, or the keys do not match
    ///   the prepared entry
    pub fn finish_entry_modification(
        &mut self,
        record_key: i64,
        subtree: Subtree,
    ) -> StoreResult<()> {
        self.log_mut()?;
        let page_key = record_key >> self.records_per_page_exp;
        match self.current.take() {
            Some(slot) if slot.subtree == subtree && slot.page_key == page_key => {
                self.log_mut()?
                    .containers(slot.subtree)
                    .put(slot.page_key, &slot.container)
            }
            Some(slot) => {
                let reason = format!(
                    "current container holds page {} of {:?}, not record {}",
                    slot.page_key, slot.subtree, record_key
                );
                self.current = Some(slot);
                Err(StoreError::InvalidState { reason })
            }
            None => Err(StoreError::InvalidState {
                reason: "no container is current".to_string(),
            }),
        }
    }

    /// Create a record under a freshly allocated key.
    pub fn create_entry(&mut self, data: Vec<u8>, subtree: Subtree) -> StoreResult<i64> {
        self.log_mut()?;
        let mut root = self.revision_root()?;
        let record_key = root.allocate_record_key(subtree);
        self.put_revision_root(root)?;
        let record = Record::new(record_key, subtree.page_kind(), data);
        let page_key = record_key >> self.records_per_page_exp;
        self.with_container(subtree, page_key, |container| {
            container.modified_mut().set(record);
        })?;
        Ok(record_key)
    }

    /// Delete a record by overwriting it with a tombstone in both the
    /// read view and the overlay.
    pub fn remove_entry(&mut self, record_key: i64, subtree: Subtree) -> StoreResult<()> {
        self.log_mut()?;
        check_record_key(record_key)?;
        let page_key = record_key >> self.records_per_page_exp;
        self.with_container(subtree, page_key, |container| {
            container.complete_mut().set(Record::tombstone(record_key));
            container.modified_mut().set(Record::tombstone(record_key));
        })
    }

    /// Read through the staged state, falling back to the base revision.
    pub fn get_record(&mut self, record_key: i64, subtree: Subtree) -> StoreResult<Option<Record>> {
        self.log_mut()?;
        check_record_key(record_key)?;
        let page_key = record_key >> self.records_per_page_exp;

        if let Some(slot) = self.current.as_ref() {
            if slot.subtree == subtree && slot.page_key == page_key {
                return Ok(container_record(&slot.container, record_key));
            }
        }
        if let Some(container) = self.log_mut()?.containers(subtree).get(page_key)? {
            return Ok(container_record(&container, record_key));
        }
        self.read.get_record(record_key, subtree)
    }

    // ------------------------------------------------------------------
    // Names

    /// Intern `name` into the staged revision's name page.
    pub fn create_name_key(&mut self, name: &str, node_kind: u8) -> StoreResult<i32> {
        self.log_mut()?;
        let mut name_ref = self.get_ref(RefSlot::RevRootName)?;
        if !name_ref.is_logged() {
            let page = if name_ref.is_persisted() {
                self.read
                    .read_page(name_ref.file_key)?
                    .as_name()?
                    .cow_clone(self.new_revision)
            } else {
                NamePage::new(self.new_revision)
            };
            name_ref.log_key = self.log_mut()?.put_new_page(&Page::Name(page))?;
            self.set_ref(RefSlot::RevRootName, name_ref.clone())?;
        }
        let page = self
            .log_mut()?
            .get_page(name_ref.log_key)?
            .ok_or_else(|| StoreError::AssertionFailure {
                reason: "staged name page missing from log".to_string(),
            })?;
        let mut page = page.as_name()?.clone();
        let key = page.create_name_key(name, node_kind);
        self.log_mut()?
            .put_page(name_ref.log_key, &Page::Name(page))?;
        Ok(key)
    }

    /// Resolve a name key against staged or committed state.
    pub fn get_name(&mut self, key: i32, node_kind: u8) -> StoreResult<Option<String>> {
        self.log_mut()?;
        let name_ref = self.get_ref(RefSlot::RevRootName)?;
        if name_ref.is_logged() {
            let page = self
                .log_mut()?
                .get_page(name_ref.log_key)?
                .ok_or_else(|| StoreError::AssertionFailure {
                    reason: "staged name page missing from log".to_string(),
                })?;
            return Ok(page.as_name()?.get_name(key, node_kind).map(str::to_string));
        }
        self.read.get_name(key, node_kind)
    }

    // ------------------------------------------------------------------
    // Commit

    /// Commit the staged revision. See [`Self::commit_with_message`].
    pub fn commit(self) -> StoreResult<UberPage> {
        self.commit_with_message(None)
    }

    /// Commit the staged revision with an optional commit message.
    ///
    /// Under the resource-wide commit lock: stamp the revision root, hook
    /// it into the uber trie at its revision number, write every staged
    /// page child-first, publish the new uber page through the beacon, and
    /// record the revision root in the dense offset index.
    ///
    /// ## Error Conditions
    /// - InvalidState: An entry modification was left unfinished
    /// - LockTimeout: Another process holds the commit lock
    /// - IoError / Corruption: Write path failures (on-disk state stays at
    ///   the previous revision)
    pub fn commit_with_message(mut self, message: Option<String>) -> StoreResult<UberPage> {
        self.log_mut()?;
        if self.current.is_some() {
            return Err(StoreError::InvalidState {
                reason: "an entry modification is still current".to_string(),
            });
        }

        let commit_mutex = self.commit_mutex.clone();
        let _in_process = commit_mutex.lock();
        let _cross_process = CommitLock::acquire(&self.resource_dir, self.lock_timeout)?;

        let mut root = self.revision_root()?;
        root.set_commit_info(chrono::Utc::now().timestamp_millis(), message);
        self.put_revision_root(root)?;

        // Hook the staged revision root into the uber trie at its number.
        let leaf_slot = self.prepare_path(
            RefSlot::UberRevisions,
            self.new_revision as u64,
            self.uber.revision_trie(),
            PageKind::RevisionRoot,
        )?;
        let mut leaf_ref = self.get_ref(leaf_slot)?;
        leaf_ref.kind = PageKind::RevisionRoot;
        leaf_ref.log_key = REV_ROOT_LOG_KEY;
        self.set_ref(leaf_slot, leaf_ref)?;

        // Child-first walk: every staged page hits the disk before any
        // reference to it is serialised.
        let mut revisions_ref = self.uber.revisions_ref().clone();
        self.commit_reference(&mut revisions_ref)?;
        *self.uber.revisions_ref_mut() = revisions_ref;

        for subtree in Subtree::ALL {
            if !self.log_mut()?.containers(subtree).is_empty() {
                return Err(StoreError::AssertionFailure {
                    reason: format!("{:?} containers left after commit walk", subtree),
                });
            }
        }

        let uber_key = self.writer.append_page(&Page::Uber(self.uber.clone()))?;
        self.writer.publish_uber_page(uber_key)?;

        let root_offset =
            self.committed_root_offset
                .ok_or_else(|| StoreError::AssertionFailure {
                    reason: "commit walk wrote no revision root".to_string(),
                })?;
        self.writer.append_revision_offset(root_offset)?;

        if let Some(log) = self.log.take() {
            log.finish()?;
        }
        self.writer_flag.store(false, Ordering::Release);
        info!(
            "committed revision {} at uber page offset {}",
            self.new_revision, uber_key
        );
        Ok(self.uber.clone())
    }

    /// Write the staged subtree behind one reference, children first.
    fn commit_reference(&mut self, reference: &mut PageReference) -> StoreResult<()> {
        if reference.key_value_page_key != NULL_ID {
            let subtree = Subtree::from_page_kind(reference.kind)?;
            if let Some(container) = self
                .log_mut()?
                .containers(subtree)
                .remove(reference.key_value_page_key)?
            {
                let page = container.page_for_commit();
                reference.file_key = self.writer.append_page(&Page::KeyValue(page))?;
            }
            reference.log_key = NULL_ID;
            return Ok(());
        }
        if reference.log_key == NULL_ID {
            return Ok(());
        }

        let staged = self
            .log_mut()?
            .remove_page(reference.log_key)?
            .ok_or_else(|| StoreError::AssertionFailure {
                reason: format!("dangling log key {}", reference.log_key),
            })?;
        let staged = match staged {
            Page::Indirect(mut page) => {
                for child in page.references_mut() {
                    self.commit_reference(child)?;
                }
                Page::Indirect(page)
            }
            Page::RevisionRoot(mut page) => {
                for subtree in Subtree::ALL {
                    let mut child = page.subtree_ref(subtree).clone();
                    self.commit_reference(&mut child)?;
                    *page.subtree_ref_mut(subtree) = child;
                }
                let mut name_ref = page.name_ref().clone();
                self.commit_reference(&mut name_ref)?;
                *page.name_ref_mut() = name_ref;
                Page::RevisionRoot(page)
            }
            Page::Name(page) => Page::Name(page),
            other => {
                return Err(StoreError::AssertionFailure {
                    reason: format!("{} page staged in the trie log", other.kind()),
                })
            }
        };

        let is_root = matches!(staged, Page::RevisionRoot(_));
        let file_key = self.writer.append_page(&staged)?;
        if is_root {
            self.committed_root_offset = Some(file_key);
        }
        reference.file_key = file_key;
        reference.log_key = NULL_ID;
        Ok(())
    }

    /// Abandon the transaction; on-disk state stays at the base revision.
    pub fn close(mut self) {
        if let Some(log) = self.log.take() {
            log.discard();
        }
        self.writer_flag.store(false, Ordering::Release);
        self.read.close();
    }
}

impl Drop for PageWriteTrx {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            log.discard();
        }
        self.writer_flag.store(false, Ordering::Release);
    }
}

fn container_record(container: &PageContainer, record_key: i64) -> Option<Record> {
    if container.modified().contains(record_key) {
        return visible_record(container.modified(), record_key);
    }
    visible_record(container.complete(), record_key)
}
