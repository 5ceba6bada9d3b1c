// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Revisioning policies for record pages.
//!
//! A record page's durable history is a chain of versions linked by
//! back-pointers, newest first, ending at a full dump. The policy decides
//! what each new version contains and therefore how many versions a read
//! must merge:
//!
//! | Policy          | Write emits                  | Read merges      |
//! |-----------------|------------------------------|------------------|
//! | Full            | full page                    | 1 page           |
//! | Differential    | diff since last full dump    | ≤ 2 pages        |
//! | Incremental     | diff since previous revision | ≤ N pages        |
//! | SlidingSnapshot | diff + slide-out carryover   | ≤ N pages        |
//!
//! where N is `revisions_to_restore`. Merging takes each entry from the
//! newest version containing it; tombstones are entries, so a deletion in
//! a newer version shadows older content. A fresh page and every `Full`
//! write is a full dump; `Incremental` emits one when the chain reaches N,
//! `Differential` when the revision distance to the last full dump reaches
//! N. `SlidingSnapshot` never dumps after the head: when the window is
//! full, entries whose newest occurrence would slide out of the window are
//! carried forward into the new version instead.

use crate::error::{StoreError, StoreResult};
use crate::page::{KeyValuePage, PageContainer};
use serde::{Deserialize, Serialize};


/// One historical version of a record page together with its location.
#[derive(Debug, Clone)]
pub struct PageFragment {
    /// File key the version was read from.
    pub file_key: i64,
    /// The version itself.
    pub page: KeyValuePage,
}

/// Pluggable revisioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Versioning {
    Full,
    Differential,
    Incremental,
    SlidingSnapshot,
}

impl Versioning {
    /// Upper bound on the fragments a read may need to merge.
    pub fn max_fragments(self, revisions_to_restore: u32) -> usize {
        match self {
            Self::Full => 1,
            Self::Differential => 2,
            Self::Incremental | Self::SlidingSnapshot => revisions_to_restore as usize,
        }
    }

    /// Merge a page history (newest first) into the visible page.
    ///
    /// ## Error Conditions
    /// - AssertionFailure: Empty fragment list (callers resolve the leaf
    ///   reference first; an empty history means a broken trie walk)
    pub fn combine_for_read(self, fragments: &[PageFragment]) -> StoreResult<KeyValuePage> {
        merge(fragments)
    }

    /// Build the staging container for a transaction touching this page.
    ///
    /// `complete` is the merged read view at `new_revision`; `modified`
    /// starts out holding whatever the policy needs to pre-seed (nothing,
    /// the cumulative diff, or the sliding carryover) and is flagged as a
    /// delta or full dump through its back-pointer.
    ///
    /// ## Error Conditions
    /// - AssertionFailure: Empty fragment list
    pub fn combine_for_modification(
        self,
        fragments: &[PageFragment],
        new_revision: u32,
        revisions_to_restore: u32,
    ) -> StoreResult<PageContainer> {
        let complete = merge(fragments)?.with_revision(new_revision);
        let newest = &fragments[0];
        let mut modified =
            KeyValuePage::new(newest.page.page_key(), new_revision, subtree_of(&newest.page)?);

        match self {
            Self::Full => {
                // Always a full dump; commit merges complete over modified.
            }
            Self::Incremental => {
                if fragments.len() < revisions_to_restore as usize {
                    modified.set_previous(newest.file_key);
                }
            }
            Self::Differential => {
                let full = fragments
                    .iter()
                    .find(|f| f.page.is_full_dump())
                    .unwrap_or(newest);
                let distance = new_revision.saturating_sub(full.page.revision());
                if distance < revisions_to_restore {
                    if !newest.page.is_full_dump() {
                        for (_, record) in newest.page.entries() {
                            modified.set(record.clone());
                        }
                    }
                    modified.set_previous(full.file_key);
                }
            }
            Self::SlidingSnapshot => {
                if fragments.len() >= revisions_to_restore as usize {
                    if let Some((oldest, newer)) = fragments.split_last() {
                        for (key, record) in oldest.page.entries() {
                            if !newer.iter().any(|f| f.page.contains(*key)) {
                                modified.set(record.clone());
                            }
                        }
                    }
                }
                modified.set_previous(newest.file_key);
            }
        }

        Ok(PageContainer::new(complete, modified))
    }
}

fn subtree_of(page: &KeyValuePage) -> StoreResult<crate::page::Subtree> {
    crate::page::Subtree::from_page_kind(page.kind())
}

fn merge(fragments: &[PageFragment]) -> StoreResult<KeyValuePage> {
    let Some((newest, older)) = fragments.split_first() else {
        return Err(StoreError::AssertionFailure {
            reason: "cannot combine an empty page history".to_string(),
        });
    };
    let mut out = newest.page.clone();
    for fragment in older {
        for (key, record) in fragment.page.entries() {
            if !out.contains(*key) {
                out.set(record.clone());
            }
        }
    }
    Ok(out)
}
