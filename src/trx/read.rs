// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Read-only transaction over one committed revision.
//!
//! Resolution of a record key:
//!
//! 1. `page_key = record_key >> records_per_page_exp`
//! 2. walk the subtree's indirect trie to the leaf reference
//! 3. collect the leaf's history chain through its back-pointers
//! 4. merge with the resource's revisioning policy
//! 5. index the merged page; tombstones surface as `None`
//!
//! Every transaction owns an independent reader handle; decoded pages are
//! shared through the resource-wide offset-keyed cache.

use crate::cache::PageCache;
use crate::error::{StoreError, StoreResult};
use crate::io::Reader;
use crate::page::{
    KeyValuePage, Page, PageReference, Record, RevisionRootPage, Subtree, UberPage, NULL_ID,
};
use crate::revision::{PageFragment, Versioning};
use crate::settings::ResourceSettings;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One entry of a record page's on-disk history chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Where the version lives in the data file.
    pub file_key: i64,
    /// Revision that wrote the version.
    pub revision: u32,
    /// Whether the version is a full dump.
    pub full_dump: bool,
}

/// Read-only view of one revision.
pub struct PageReadTrx {
    revision: u32,
    uber: UberPage,
    revision_root: RevisionRootPage,
    reader: Mutex<Box<dyn Reader>>,
    cache: Arc<PageCache>,
    versioning: Versioning,
    revisions_to_restore: u32,
    records_per_page_exp: u32,
    closed: AtomicBool,
}

impl PageReadTrx {
    /// Open a snapshot of `revision` (`None` for the newest committed one).
    ///
    /// ## Error Conditions
    /// - InvalidState: Resource has no committed uber page
    /// - RevisionNotFound: `revision` exceeds the newest committed revision
    /// - Corruption: Broken trie or unreadable pages
    pub(crate) fn open(
        mut reader: Box<dyn Reader>,
        cache: Arc<PageCache>,
        settings: &ResourceSettings,
        revision: Option<u32>,
    ) -> StoreResult<Self> {
        let uber_key = reader.uber_page_file_key()?;
        if uber_key == NULL_ID {
            return Err(StoreError::InvalidState {
                reason: "resource has no committed revision".to_string(),
            });
        }
        let uber = match reader.read_page(uber_key)? {
            Page::Uber(uber) => uber,
            other => {
                return Err(StoreError::Corruption {
                    reason: format!("beacon points at a {} page", other.kind()),
                })
            }
        };
        let revision = revision.unwrap_or_else(|| uber.revision());
        if revision > uber.revision() {
            return Err(StoreError::RevisionNotFound { revision });
        }

        let trx = Self {
            revision,
            uber,
            revision_root: RevisionRootPage::bootstrap(),
            reader: Mutex::new(reader),
            cache,
            versioning: settings.versioning,
            revisions_to_restore: settings.revisions_to_restore,
            records_per_page_exp: settings.records_per_page_exp,
            closed: AtomicBool::new(false),
        };
        let root = trx.load_revision_root(revision)?;
        Ok(Self {
            revision_root: root,
            ..trx
        })
    }

    /// Snapshot revision of this transaction.
    pub fn revision_number(&self) -> u32 {
        self.revision
    }

    /// The uber page anchoring this snapshot.
    pub fn uber_page(&self) -> &UberPage {
        &self.uber
    }

    /// The revision root of this snapshot.
    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.revision_root
    }

    /// Largest allocated record key of a subtree; `-1` when none.
    pub fn max_record_key(&self, subtree: Subtree) -> i64 {
        self.revision_root.max_record_key(subtree)
    }

    /// Close the transaction; later operations fail with `InvalidState`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn assert_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::InvalidState {
                reason: "transaction is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Fetch the record stored under `record_key`, if any.
    ///
    /// Tombstoned and never-written records both come back as `None`.
    ///
    /// ## Error Conditions
    /// - InvalidArgument: Negative record key
    /// - InvalidState: Transaction closed
    pub fn get_record(&self, record_key: i64, subtree: Subtree) -> StoreResult<Option<Record>> {
        self.assert_open()?;
        check_record_key(record_key)?;
        let page_key = record_key >> self.records_per_page_exp;
        let Some(page) = self.record_page(page_key, subtree)? else {
            return Ok(None);
        };
        Ok(visible_record(&page, record_key))
    }

    /// Resolve an interned name key.
    pub fn get_name(&self, key: i32, node_kind: u8) -> StoreResult<Option<String>> {
        self.assert_open()?;
        let name_ref = self.revision_root.name_ref();
        if name_ref.file_key == NULL_ID {
            return Ok(None);
        }
        let page = self.read_page(name_ref.file_key)?;
        Ok(page
            .as_name()?
            .get_name(key, node_kind)
            .map(str::to_string))
    }

    /// The merged (visible) record page for `page_key`, if materialised.
    pub(crate) fn record_page(
        &self,
        page_key: i64,
        subtree: Subtree,
    ) -> StoreResult<Option<KeyValuePage>> {
        let Some(leaf) = self.resolve_subtree_leaf(subtree, page_key)? else {
            return Ok(None);
        };
        let fragments = self.fragments(leaf.file_key)?;
        Ok(Some(self.versioning.combine_for_read(&fragments)?))
    }

    /// History chain of the record page stored at `leaf_file_key`,
    /// newest first, bounded by the policy's read amplification.
    pub(crate) fn fragments(&self, leaf_file_key: i64) -> StoreResult<Vec<PageFragment>> {
        let cap = self.versioning.max_fragments(self.revisions_to_restore);
        let mut fragments = Vec::new();
        let mut next = leaf_file_key;
        while next != NULL_ID && fragments.len() < cap {
            let page = self.read_page(next)?;
            let kv = page.as_key_value()?.clone();
            let previous = kv.previous();
            fragments.push(PageFragment {
                file_key: next,
                page: kv,
            });
            next = previous;
        }
        Ok(fragments)
    }

    /// Inspect the persisted history chain of a record page.
    pub fn page_fragment_info(
        &self,
        page_key: i64,
        subtree: Subtree,
    ) -> StoreResult<Vec<FragmentInfo>> {
        self.assert_open()?;
        let Some(leaf) = self.resolve_subtree_leaf(subtree, page_key)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .fragments(leaf.file_key)?
            .iter()
            .map(|f| FragmentInfo {
                file_key: f.file_key,
                revision: f.page.revision(),
                full_dump: f.page.is_full_dump(),
            })
            .collect())
    }

    /// Leaf reference for `page_key` in a subtree, or `None` while the
    /// path is not materialised.
    pub(crate) fn resolve_subtree_leaf(
        &self,
        subtree: Subtree,
        page_key: i64,
    ) -> StoreResult<Option<PageReference>> {
        let geometry = self.uber.subtree_trie(subtree);
        self.resolve(self.revision_root.subtree_ref(subtree), page_key as u64, geometry)
    }

    /// Generic trie walk from a root reference down to a leaf reference.
    fn resolve(
        &self,
        root: &PageReference,
        key: u64,
        geometry: crate::trie::TrieGeometry,
    ) -> StoreResult<Option<PageReference>> {
        let offsets = geometry.level_offsets(key)?;
        let mut reference = root.clone();
        for offset in offsets {
            if reference.file_key == NULL_ID {
                return Ok(None);
            }
            let page = self.read_page(reference.file_key)?;
            reference = page.as_indirect()?.reference(offset).clone();
        }
        if reference.file_key == NULL_ID {
            return Ok(None);
        }
        Ok(Some(reference))
    }

    /// File key of the revision root for `revision`: dense-index fast path
    /// when the reader keeps one, trie walk from the uber page otherwise.
    pub(crate) fn revision_root_file_key(&self, revision: u32) -> StoreResult<i64> {
        if let Some(offset) = self.reader.lock().revision_root_offset(revision)? {
            return Ok(offset);
        }
        let leaf = self.resolve(
            self.uber.revisions_ref(),
            revision as u64,
            self.uber.revision_trie(),
        )?;
        Ok(leaf.ok_or(StoreError::RevisionNotFound { revision })?.file_key)
    }

    /// Load the revision root page for `revision`.
    pub(crate) fn load_revision_root(&self, revision: u32) -> StoreResult<RevisionRootPage> {
        let file_key = self.revision_root_file_key(revision)?;
        Ok(self.read_page(file_key)?.as_revision_root()?.clone())
    }

    /// Read a page through the shared cache.
    pub(crate) fn read_page(&self, file_key: i64) -> StoreResult<Arc<Page>> {
        if let Some(page) = self.cache.get(file_key) {
            return Ok(page);
        }
        let page = Arc::new(self.reader.lock().read_page(file_key)?);
        self.cache.put(file_key, page.clone());
        Ok(page)
    }
}

/// Map a page entry to the record a reader may see.
pub(crate) fn visible_record(page: &KeyValuePage, record_key: i64) -> Option<Record> {
    match page.get(record_key) {
        Some(record) if record.is_tombstone() => None,
        Some(record) => Some(record.clone()),
        None => None,
    }
}

/// Reject negative record keys up front.
pub(crate) fn check_record_key(record_key: i64) -> StoreResult<()> {
    if record_key < 0 {
        return Err(StoreError::InvalidArgument {
            reason: format!("negative record key {}", record_key),
        });
    }
    Ok(())
}
