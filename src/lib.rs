// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! ReedStore - versioned, append-only page store for tree-structured data.
//!
//! Every commit produces a new immutable revision reachable from a single
//! beacon at the head of the data file; older revisions stay intact and
//! navigable forever. Storage is paged and copy-on-write: records live in
//! leaf pages addressed through fixed-fanout indirect tries, and a
//! pluggable revisioning policy decides how much history each new page
//! version carries.
//!
//! ## Features
//!
//! - **Append-only revisions**: readers at old revisions never block or
//!   break; the uber-page beacon update is the only mutation in place
//! - **Pluggable revisioning**: full, differential, incremental and
//!   sliding-snapshot page layouts trade read against write amplification
//! - **Durable staging**: an uncommitted transaction's state lives in a
//!   CRC32-checked on-disk log and survives a process crash
//! - **Two read paths**: buffered random access, or memory-mapped files
//!   with an O(1) revision index
//! - **Byte pipe**: pluggable, invertible page-body transforms (XZ
//!   compression out of the box)
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ Resource (session: cache, locks, settings)            │
//! ├──────────────────────────┬────────────────────────────┤
//! │ PageReadTrx              │ PageWriteTrx               │
//! │   trie resolve           │   COW staging (txlog)      │
//! │   history merge          │   child-first commit       │
//! ├──────────────────────────┴────────────────────────────┤
//! │ pages + codec │ revisioning │ byte pipe │ page cache  │
//! ├───────────────────────────────────────────────────────┤
//! │ data.sirix / revisions-offsets.sirix / log/<rev>/     │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use reedstore::{Resource, ResourceSettings, Subtree};
//!
//! let resource = Resource::create("/tmp/books", ResourceSettings::default())?;
//!
//! let mut trx = resource.begin_write()?;
//! let key = trx.create_entry(b"chapter one".to_vec(), Subtree::Node)?;
//! trx.commit()?;
//!
//! let read = resource.begin_read(None)?;
//! let record = read.get_record(key, Subtree::Node)?;
//! assert_eq!(record.unwrap().data(), b"chapter one");
//! # Ok::<(), reedstore::StoreError>(())
//! ```

pub mod bytepipe;
pub mod cache;
pub mod error;
pub mod io;
pub mod page;
pub mod resource;
pub mod revision;
pub mod settings;
pub mod trie;
pub mod trx;
pub mod txlog;

// Re-export the public API surface.
pub use error::{StoreError, StoreResult};
pub use page::{PageKind, Record, Subtree};
pub use resource::{Resource, RevisionInfo};
pub use revision::Versioning;
pub use settings::{ReaderKind, ResourceSettings};
pub use trx::{FragmentInfo, PageReadTrx, PageWriteTrx};
