// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory cache of recently read pages.
//!
//! Keyed by file offset. Persisted pages are immutable, so an entry can
//! never go stale: commits append at fresh offsets and need no
//! invalidation sweep. The cache is shared by every transaction of a
//! resource session and is safe for concurrent readers.

use crate::page::Page;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default capacity in pages.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Thread-safe LRU cache of decoded pages keyed by file offset.
pub struct PageCache {
    store: Mutex<LruCache<i64, Arc<Page>>>,
}

impl PageCache {
    /// Cache bounded to `capacity` pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached page at `file_key`, refreshing its recency.
    pub fn get(&self, file_key: i64) -> Option<Arc<Page>> {
        self.store.lock().get(&file_key).cloned()
    }

    /// Insert a freshly decoded page.
    pub fn put(&self, file_key: i64, page: Arc<Page>) {
        self.store.lock().put(file_key, page);
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Drop every entry (tests and resource teardown).
    pub fn clear(&self) {
        self.store.lock().clear();
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
