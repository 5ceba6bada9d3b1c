// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the durable transaction log.

#[cfg(test)]
mod tests {
    use crate::page::{
        IndirectPage, KeyValuePage, Page, PageContainer, PageKind, Record, Subtree,
    };
    use crate::txlog::{collect_stale_logs, LogStore, TransactionLog, PENDING_SENTINEL};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn container(page_key: i64, revision: u32) -> PageContainer {
        let complete = KeyValuePage::new(page_key, revision, Subtree::Node);
        let mut modified = KeyValuePage::new(page_key, revision, Subtree::Node);
        modified.set(Record::new(
            page_key << 10,
            PageKind::Node,
            revision.to_be_bytes().to_vec(),
        ));
        PageContainer::new(complete, modified)
    }

    /// Test put is observable by a later get within the same store.
    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let mut store: LogStore<PageContainer> = LogStore::open(&dir.path().join("node")).unwrap();
        store.put(3, &container(3, 1)).unwrap();
        assert_eq!(store.get(3).unwrap(), Some(container(3, 1)));
        assert_eq!(store.get(4).unwrap(), None);
    }

    /// Test re-putting a key supersedes the earlier entry.
    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut store: LogStore<PageContainer> = LogStore::open(&dir.path().join("node")).unwrap();
        store.put(3, &container(3, 1)).unwrap();
        store.put(3, &container(3, 2)).unwrap();
        assert_eq!(store.get(3).unwrap(), Some(container(3, 2)));
        assert_eq!(store.len(), 1);
    }

    /// Test contents survive a reopen (process restart).
    #[test]
    fn test_replay_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        {
            let mut store: LogStore<PageContainer> = LogStore::open(&path).unwrap();
            store.put(1, &container(1, 1)).unwrap();
            store.put(2, &container(2, 1)).unwrap();
            store.put(1, &container(1, 2)).unwrap();
        }
        let mut store: LogStore<PageContainer> = LogStore::open(&path).unwrap();
        assert_eq!(store.keys(), vec![1, 2]);
        assert_eq!(store.get(1).unwrap(), Some(container(1, 2)));
        assert_eq!(store.get(2).unwrap(), Some(container(2, 1)));
    }

    /// Test a torn tail (crash mid-append) is truncated on replay.
    #[test]
    fn test_torn_tail_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        {
            let mut store: LogStore<PageContainer> = LogStore::open(&path).unwrap();
            store.put(1, &container(1, 1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9u8; 11]).unwrap();
        drop(file);

        let mut store: LogStore<PageContainer> = LogStore::open(&path).unwrap();
        assert_eq!(store.keys(), vec![1]);
        assert_eq!(store.get(1).unwrap(), Some(container(1, 1)));
    }

    /// Test the transaction log allocates monotonically fresh page keys.
    #[test]
    fn test_page_key_allocation() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(dir.path(), 1).unwrap();
        let page = Page::Indirect(IndirectPage::new(1, 4, PageKind::Indirect));
        let first = log.put_new_page(&page).unwrap();
        let second = log.put_new_page(&page).unwrap();
        assert_eq!((first, second), (0, 1));
        assert_eq!(log.get_page(0).unwrap(), Some(page));
    }

    /// Test the sentinel marks the log until it is finished.
    #[test]
    fn test_sentinel_lifecycle() {
        let dir = TempDir::new().unwrap();
        let log = TransactionLog::open(dir.path(), 1).unwrap();
        let log_dir = TransactionLog::dir_for(dir.path(), 1);
        assert!(log_dir.join(PENDING_SENTINEL).exists());
        log.finish().unwrap();
        assert!(!log_dir.exists());
    }

    /// Test stale pending logs are collected, finished ones left alone.
    #[test]
    fn test_collect_stale_logs() {
        let dir = TempDir::new().unwrap();
        let log = TransactionLog::open(dir.path(), 7).unwrap();
        drop(log); // crash: sentinel stays behind
        fs::create_dir_all(TransactionLog::dir_for(dir.path(), 3)).unwrap();

        let cleaned = collect_stale_logs(dir.path()).unwrap();
        assert_eq!(cleaned, vec![7]);
        assert!(!TransactionLog::dir_for(dir.path(), 7).exists());
        assert!(TransactionLog::dir_for(dir.path(), 3).exists());
    }

    /// Test container round trip through the log preserves both sides.
    #[test]
    fn test_container_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(dir.path(), 2).unwrap();
        let c = container(5, 2);
        log.containers(Subtree::Node).put(5, &c).unwrap();
        log.containers(Subtree::Path).put(5, &container(5, 3)).unwrap();
        assert_eq!(log.containers(Subtree::Node).get(5).unwrap(), Some(c));
        assert_ne!(
            log.containers(Subtree::Node).get(5).unwrap(),
            log.containers(Subtree::Path).get(5).unwrap()
        );
    }
}
