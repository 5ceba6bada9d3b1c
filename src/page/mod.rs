// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page model for the versioned store.
//!
//! Every durable byte belongs to exactly one page, and every page is
//! immutable once written. A "modification" allocates a new page at a new
//! file offset; parents re-point at children through [`PageReference`]
//! edges, so the set of live pages forms a DAG whose only back-edges are
//! the linear history chains inside record pages.
//!
//! ## Page kinds
//!
//! ```text
//! UberPage ─► Indirect* ─► RevisionRootPage ─► Indirect* ─► KeyValuePage
//!                                │
//!                                └─► NamePage
//! ```
//!
//! The kind set is closed: codec dispatch is a dense match over the tags,
//! and an unknown tag on disk is corruption, not extensibility.

use crate::error::{StoreError, StoreResult};
use std::fmt;

pub mod codec;
pub mod container;
pub mod indirect;
pub mod name;
pub mod record;
pub mod revision_root;
pub mod uber;


pub use container::PageContainer;
pub use indirect::IndirectPage;
pub use name::NamePage;
pub use record::{KeyValuePage, Record};
pub use revision_root::RevisionRootPage;
pub use uber::UberPage;

/// Sentinel for "not persisted / not present" file, log and page keys.
pub const NULL_ID: i64 = -1;

/// Closed set of page kinds with their wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Uber,
    Indirect,
    RevisionRoot,
    Name,
    PathSummary,
    Cas,
    Path,
    Node,
    TextValue,
    AttributeValue,
    DeletedRecord,
}

impl PageKind {
    /// Wire tag of this kind.
    pub fn tag(self) -> u8 {
        match self {
            Self::Uber => 1,
            Self::Indirect => 2,
            Self::RevisionRoot => 3,
            Self::Name => 4,
            Self::PathSummary => 5,
            Self::Cas => 6,
            Self::Path => 7,
            Self::Node => 8,
            Self::TextValue => 9,
            Self::AttributeValue => 10,
            Self::DeletedRecord => 11,
        }
    }

    /// Parse a wire tag.
    ///
    /// ## Error Conditions
    /// - Corruption: Tag outside the closed set
    pub fn from_tag(tag: u8) -> StoreResult<Self> {
        match tag {
            1 => Ok(Self::Uber),
            2 => Ok(Self::Indirect),
            3 => Ok(Self::RevisionRoot),
            4 => Ok(Self::Name),
            5 => Ok(Self::PathSummary),
            6 => Ok(Self::Cas),
            7 => Ok(Self::Path),
            8 => Ok(Self::Node),
            9 => Ok(Self::TextValue),
            10 => Ok(Self::AttributeValue),
            11 => Ok(Self::DeletedRecord),
            _ => Err(StoreError::Corruption {
                reason: format!("unknown page kind tag {}", tag),
            }),
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The four record-page subtrees hanging off a revision root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subtree {
    Node,
    Path,
    TextValue,
    AttributeValue,
}

impl Subtree {
    /// All subtrees, in revision-root slot order.
    pub const ALL: [Subtree; 4] = [
        Subtree::Node,
        Subtree::Path,
        Subtree::TextValue,
        Subtree::AttributeValue,
    ];

    /// Slot index within the revision root.
    pub fn index(self) -> usize {
        match self {
            Self::Node => 0,
            Self::Path => 1,
            Self::TextValue => 2,
            Self::AttributeValue => 3,
        }
    }

    /// Page kind tagging leaves of this subtree.
    pub fn page_kind(self) -> PageKind {
        match self {
            Self::Node => PageKind::Node,
            Self::Path => PageKind::Path,
            Self::TextValue => PageKind::TextValue,
            Self::AttributeValue => PageKind::AttributeValue,
        }
    }

    /// Transaction-log store name for this subtree.
    pub fn store_name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Path => "path",
            Self::TextValue => "textValue",
            Self::AttributeValue => "attributeValue",
        }
    }

    /// Map a leaf page kind back to its subtree.
    ///
    /// ## Error Conditions
    /// - AssertionFailure: Kind is not a record-subtree kind (dense dispatch
    ///   over the closed set; `PathSummary`/`Cas` are reserved tags with no
    ///   subtree in this engine)
    pub fn from_page_kind(kind: PageKind) -> StoreResult<Self> {
        match kind {
            PageKind::Node => Ok(Self::Node),
            PageKind::Path => Ok(Self::Path),
            PageKind::TextValue => Ok(Self::TextValue),
            PageKind::AttributeValue => Ok(Self::AttributeValue),
            PageKind::PathSummary
            | PageKind::Cas
            | PageKind::Uber
            | PageKind::Indirect
            | PageKind::RevisionRoot
            | PageKind::Name
            | PageKind::DeletedRecord => Err(StoreError::AssertionFailure {
                reason: format!("page kind {} is not a record subtree", kind),
            }),
        }
    }
}

/// Ownership edge from a parent page to a child page.
///
/// The file key is the absolute byte offset of the serialised child in the
/// data file, or [`NULL_ID`] while the child exists only in memory. The log
/// key and key-value page key are transaction-local routing data and are
/// never persisted; the wire form of a reference is `[file_key][kind_tag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReference {
    /// Absolute byte offset of the child in the data file.
    pub file_key: i64,

    /// Key of the child inside the transaction log's page store.
    pub log_key: i64,

    /// Kind of the referenced child.
    pub kind: PageKind,

    /// Page key of the child when it is a record-page leaf.
    pub key_value_page_key: i64,
}

impl PageReference {
    /// Unpersisted reference to a child of the given kind.
    pub fn new(kind: PageKind) -> Self {
        Self {
            file_key: NULL_ID,
            log_key: NULL_ID,
            kind,
            key_value_page_key: NULL_ID,
        }
    }

    /// Reference to an already persisted child.
    pub fn persisted(kind: PageKind, file_key: i64) -> Self {
        Self {
            file_key,
            log_key: NULL_ID,
            kind,
            key_value_page_key: NULL_ID,
        }
    }

    /// Whether the child has a durable location.
    pub fn is_persisted(&self) -> bool {
        self.file_key != NULL_ID
    }

    /// Whether the child lives in the transaction log.
    pub fn is_logged(&self) -> bool {
        self.log_key != NULL_ID
    }
}

/// One in-memory page of any kind; the unit the codec and the caches move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Uber(UberPage),
    Indirect(IndirectPage),
    RevisionRoot(RevisionRootPage),
    Name(NamePage),
    KeyValue(KeyValuePage),
}

impl Page {
    /// Kind tag the codec writes for this page.
    pub fn kind(&self) -> PageKind {
        match self {
            Self::Uber(_) => PageKind::Uber,
            Self::Indirect(_) => PageKind::Indirect,
            Self::RevisionRoot(_) => PageKind::RevisionRoot,
            Self::Name(_) => PageKind::Name,
            Self::KeyValue(p) => p.kind(),
        }
    }

    /// Borrow as a record page.
    ///
    /// ## Error Conditions
    /// - Corruption: Page has a different kind (a reference pointed at the
    ///   wrong offset)
    pub fn as_key_value(&self) -> StoreResult<&KeyValuePage> {
        match self {
            Self::KeyValue(p) => Ok(p),
            other => Err(StoreError::Corruption {
                reason: format!("expected record page, found {}", other.kind()),
            }),
        }
    }

    /// Borrow as an indirect page.
    pub fn as_indirect(&self) -> StoreResult<&IndirectPage> {
        match self {
            Self::Indirect(p) => Ok(p),
            other => Err(StoreError::Corruption {
                reason: format!("expected indirect page, found {}", other.kind()),
            }),
        }
    }

    /// Borrow as a revision root.
    pub fn as_revision_root(&self) -> StoreResult<&RevisionRootPage> {
        match self {
            Self::RevisionRoot(p) => Ok(p),
            other => Err(StoreError::Corruption {
                reason: format!("expected revision root, found {}", other.kind()),
            }),
        }
    }

    /// Borrow as a name page.
    pub fn as_name(&self) -> StoreResult<&NamePage> {
        match self {
            Self::Name(p) => Ok(p),
            other => Err(StoreError::Corruption {
                reason: format!("expected name page, found {}", other.kind()),
            }),
        }
    }
}
