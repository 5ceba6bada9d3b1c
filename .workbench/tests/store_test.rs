// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end store behaviour over the public API.

use reedstore::{ReaderKind, Resource, ResourceSettings, Subtree};
use tempfile::TempDir;

fn settings() -> ResourceSettings {
    ResourceSettings {
        compression: false,
        ..ResourceSettings::default()
    }
}

/// A fresh resource bootstraps revision 0: everything empty, nothing found.
#[test]
fn test_bootstrap_revision_zero() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();
    assert_eq!(resource.latest_revision().unwrap(), 0);

    let trx = resource.begin_read(None).unwrap();
    for subtree in Subtree::ALL {
        assert_eq!(trx.max_record_key(subtree), -1);
    }
    assert_eq!(trx.get_record(0, Subtree::Node).unwrap(), None);
    assert!(trx.uber_page().is_bootstrap());
}

/// A single insert commits as revision 1 and reads back.
#[test]
fn test_single_insert() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();

    let mut trx = resource.begin_write().unwrap();
    let key = trx.create_entry(b"first record".to_vec(), Subtree::Node).unwrap();
    assert_eq!(key, 0);
    let uber = trx.commit().unwrap();
    assert_eq!(uber.revision(), 1);

    let read = resource.begin_read(None).unwrap();
    assert_eq!(read.revision_number(), 1);
    assert_eq!(read.max_record_key(Subtree::Node), 0);
    assert_eq!(
        read.get_record(0, Subtree::Node).unwrap().unwrap().data(),
        b"first record"
    );
}

/// Inserts across two revisions stay visible at their own snapshots.
#[test]
fn test_two_inserts_across_revisions() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"r0".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"r1".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let rev1 = resource.begin_read(Some(1)).unwrap();
    assert_eq!(rev1.get_record(0, Subtree::Node).unwrap().unwrap().data(), b"r0");
    assert_eq!(rev1.get_record(1, Subtree::Node).unwrap(), None);

    let rev2 = resource.begin_read(Some(2)).unwrap();
    assert_eq!(rev2.get_record(0, Subtree::Node).unwrap().unwrap().data(), b"r0");
    assert_eq!(rev2.get_record(1, Subtree::Node).unwrap().unwrap().data(), b"r1");
}

/// A deletion is visible from its revision onward, not before.
#[test]
fn test_delete_visibility() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"doomed".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.remove_entry(0, Subtree::Node).unwrap();
    trx.commit().unwrap();

    let rev1 = resource.begin_read(Some(1)).unwrap();
    assert_eq!(rev1.get_record(0, Subtree::Node).unwrap().unwrap().data(), b"doomed");
    let rev2 = resource.begin_read(Some(2)).unwrap();
    assert_eq!(rev2.get_record(0, Subtree::Node).unwrap(), None);
}

/// Records spanning several leaf pages resolve through the trie.
#[test]
fn test_many_records_cross_page_boundary() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();
    let per_page = resource.settings().records_per_page() as i64;

    let mut trx = resource.begin_write().unwrap();
    let total = per_page + 6;
    for i in 0..total {
        let key = trx
            .create_entry(format!("record {}", i).into_bytes(), Subtree::Node)
            .unwrap();
        assert_eq!(key, i);
    }
    trx.commit().unwrap();

    let read = resource.begin_read(None).unwrap();
    assert_eq!(read.max_record_key(Subtree::Node), total - 1);
    for key in [0, 1, per_page - 1, per_page, total - 1] {
        assert_eq!(
            read.get_record(key, Subtree::Node).unwrap().unwrap().data(),
            format!("record {}", key).as_bytes(),
            "key {}",
            key
        );
    }
    assert_eq!(read.get_record(total, Subtree::Node).unwrap(), None);
}

/// Subtrees are independent key spaces.
#[test]
fn test_subtrees_are_disjoint() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"node".to_vec(), Subtree::Node).unwrap();
    trx.create_entry(b"text".to_vec(), Subtree::TextValue).unwrap();
    trx.create_entry(b"attr".to_vec(), Subtree::AttributeValue).unwrap();
    trx.commit().unwrap();

    let read = resource.begin_read(None).unwrap();
    assert_eq!(read.get_record(0, Subtree::Node).unwrap().unwrap().data(), b"node");
    assert_eq!(
        read.get_record(0, Subtree::TextValue).unwrap().unwrap().data(),
        b"text"
    );
    assert_eq!(
        read.get_record(0, Subtree::AttributeValue).unwrap().unwrap().data(),
        b"attr"
    );
    assert_eq!(read.get_record(0, Subtree::Path).unwrap(), None);
}

/// The memory-mapped reader serves snapshots, old revisions included.
#[test]
fn test_mmap_reader() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(
        dir.path().join("r"),
        ResourceSettings {
            reader: ReaderKind::Mmap,
            compression: false,
            ..ResourceSettings::default()
        },
    )
    .unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"mapped".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();
    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"grown".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let newest = resource.begin_read(None).unwrap();
    assert_eq!(newest.get_record(1, Subtree::Node).unwrap().unwrap().data(), b"grown");
    let old = resource.begin_read(Some(1)).unwrap();
    assert_eq!(old.get_record(0, Subtree::Node).unwrap().unwrap().data(), b"mapped");
    assert_eq!(old.get_record(1, Subtree::Node).unwrap(), None);
}

/// Compression changes the wire form, not the contents.
#[test]
fn test_compressed_round_trip() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(
        dir.path().join("r"),
        ResourceSettings::default(), // compression on
    )
    .unwrap();

    let mut trx = resource.begin_write().unwrap();
    let payload = vec![42u8; 4096];
    trx.create_entry(payload.clone(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let read = resource.begin_read(None).unwrap();
    assert_eq!(read.get_record(0, Subtree::Node).unwrap().unwrap().data(), &payload[..]);
}

/// History lists every revision with its commit metadata.
#[test]
fn test_history() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings()).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"a".to_vec(), Subtree::Node).unwrap();
    trx.commit_with_message(Some("first data".to_string())).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"b".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let history = resource.history().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].revision, 0);
    assert_eq!(history[1].revision, 1);
    assert_eq!(history[1].commit_message.as_deref(), Some("first data"));
    assert_eq!(history[2].commit_message, None);
    assert!(history.iter().all(|info| info.commit_timestamp > 0));
}

/// A reopened resource serves everything committed before.
#[test]
fn test_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("r");
    {
        let resource = Resource::create(&path, settings()).unwrap();
        let mut trx = resource.begin_write().unwrap();
        trx.create_entry(b"persistent".to_vec(), Subtree::Node).unwrap();
        trx.commit().unwrap();
    }
    let resource = Resource::open(&path).unwrap();
    assert_eq!(resource.latest_revision().unwrap(), 1);
    let read = resource.begin_read(None).unwrap();
    assert_eq!(
        read.get_record(0, Subtree::Node).unwrap().unwrap().data(),
        b"persistent"
    );
}
