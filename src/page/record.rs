// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Records and the record-page leaf.
//!
//! A record page maps record keys to opaque record bytes. Physically a
//! version is either a full dump (`previous == NULL_ID`) or a delta whose
//! back-pointer names its base: the last full dump under the differential
//! policy, the immediately preceding version under the incremental and
//! sliding-snapshot policies. Reconstruction walks the chain newest-first
//! and merges.

use super::{PageKind, Subtree, NULL_ID};
use std::collections::BTreeMap;

/// One record: an opaque payload owned by a 64-bit key.
///
/// Tombstones are ordinary records whose kind is
/// [`PageKind::DeletedRecord`]; a tombstone in a newer page version shadows
/// any older entry for the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    node_key: i64,
    kind: PageKind,
    data: Vec<u8>,
}

impl Record {
    /// Record with an explicit kind.
    pub fn new(node_key: i64, kind: PageKind, data: Vec<u8>) -> Self {
        Self {
            node_key,
            kind,
            data,
        }
    }

    /// Tombstone for a key.
    pub fn tombstone(node_key: i64) -> Self {
        Self {
            node_key,
            kind: PageKind::DeletedRecord,
            data: Vec::new(),
        }
    }

    /// Key of this record.
    pub fn node_key(&self) -> i64 {
        self.node_key
    }

    /// Kind discriminator.
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload bytes.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Whether this record is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        self.kind == PageKind::DeletedRecord
    }
}

/// Leaf page holding a bounded set of records for one page key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValuePage {
    page_key: i64,
    revision: u32,
    kind: PageKind,
    /// File key of the base version; [`NULL_ID`] marks a full dump.
    previous: i64,
    entries: BTreeMap<i64, Record>,
}

impl KeyValuePage {
    /// Empty page version.
    pub fn new(page_key: i64, revision: u32, subtree: Subtree) -> Self {
        Self {
            page_key,
            revision,
            kind: subtree.page_kind(),
            previous: NULL_ID,
            entries: BTreeMap::new(),
        }
    }

    /// Page rebuilt from persisted parts (codec use).
    pub(crate) fn from_parts(
        page_key: i64,
        revision: u32,
        kind: PageKind,
        previous: i64,
        entries: BTreeMap<i64, Record>,
    ) -> Self {
        Self {
            page_key,
            revision,
            kind,
            previous,
            entries,
        }
    }

    /// Logical page key.
    pub fn page_key(&self) -> i64 {
        self.page_key
    }

    /// Revision that created this version.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Subtree kind tag.
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Back-pointer to the base version.
    pub fn previous(&self) -> i64 {
        self.previous
    }

    /// Point this version at its base; [`NULL_ID`] makes it a full dump.
    pub fn set_previous(&mut self, file_key: i64) {
        self.previous = file_key;
    }

    /// Whether this version reconstructs without a base.
    pub fn is_full_dump(&self) -> bool {
        self.previous == NULL_ID
    }

    /// Record stored under `key`, tombstones included.
    pub fn get(&self, key: i64) -> Option<&Record> {
        self.entries.get(&key)
    }

    /// Mutable access to the record stored under `key`.
    pub fn get_mut(&mut self, key: i64) -> Option<&mut Record> {
        self.entries.get_mut(&key)
    }

    /// Insert or replace a record; keyed by the record's own node key.
    pub fn set(&mut self, record: Record) {
        self.entries.insert(record.node_key(), record);
    }

    /// Whether the page holds an entry (tombstones included) for `key`.
    pub fn contains(&self, key: i64) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the page holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&i64, &Record)> {
        self.entries.iter()
    }

    /// Bump to a new revision, keeping content.
    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }
}
