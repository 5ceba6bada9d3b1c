// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Revisioning policies exercised end-to-end: logical state must be
//! identical under every policy, while the page-version layout differs.

use reedstore::{Resource, ResourceSettings, Subtree, Versioning};
use tempfile::TempDir;

const N: u32 = 4;

fn settings(versioning: Versioning) -> ResourceSettings {
    ResourceSettings {
        versioning,
        revisions_to_restore: N,
        compression: false,
        ..ResourceSettings::default()
    }
}

/// Writes the same workload under `versioning` and checks every revision's
/// visible state: key 0 is rewritten each revision, key `r-1` created at
/// revision r.
fn run_policy_round_trip(versioning: Versioning) {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path().join("r"), settings(versioning)).unwrap();

    const REVISIONS: u32 = 7;
    for r in 1..=REVISIONS {
        let mut trx = resource.begin_write().unwrap();
        if r == 1 {
            let key = trx.create_entry(b"head r1".to_vec(), Subtree::Node).unwrap();
            assert_eq!(key, 0);
        } else {
            let record = trx.prepare_entry_for_modification(0, Subtree::Node).unwrap();
            record.data_mut().clear();
            record
                .data_mut()
                .extend_from_slice(format!("head r{}", r).as_bytes());
            trx.finish_entry_modification(0, Subtree::Node).unwrap();
            trx.create_entry(format!("born r{}", r).into_bytes(), Subtree::Node)
                .unwrap();
        }
        let uber = trx.commit().unwrap();
        assert_eq!(uber.revision(), r, "{:?}", versioning);
    }

    for r in 1..=REVISIONS {
        let read = resource.begin_read(Some(r)).unwrap();
        assert_eq!(
            read.get_record(0, Subtree::Node).unwrap().unwrap().data(),
            format!("head r{}", r).as_bytes(),
            "{:?} rev {}",
            versioning,
            r
        );
        for born in 2..=REVISIONS {
            let expected = if born <= r {
                Some(format!("born r{}", born).into_bytes())
            } else {
                None
            };
            let actual = read
                .get_record(born as i64 - 1, Subtree::Node)
                .unwrap()
                .map(|rec| rec.data().to_vec());
            assert_eq!(actual, expected, "{:?} rev {} key {}", versioning, r, born - 1);
        }
    }
}

#[test]
fn test_full_round_trip() {
    run_policy_round_trip(Versioning::Full);
}

#[test]
fn test_differential_round_trip() {
    run_policy_round_trip(Versioning::Differential);
}

#[test]
fn test_incremental_round_trip() {
    run_policy_round_trip(Versioning::Incremental);
}

#[test]
fn test_sliding_snapshot_round_trip() {
    run_policy_round_trip(Versioning::SlidingSnapshot);
}

/// Five single-key writes under Incremental with N = 4 lay the page down
/// as [full, delta, delta, delta, full].
#[test]
fn test_incremental_milestone_emission() {
    let dir = TempDir::new().unwrap();
    let resource =
        Resource::create(dir.path().join("r"), settings(Versioning::Incremental)).unwrap();

    for r in 1..=5u32 {
        let mut trx = resource.begin_write().unwrap();
        if r == 1 {
            trx.create_entry(b"v1".to_vec(), Subtree::Node).unwrap();
        } else {
            let record = trx.prepare_entry_for_modification(0, Subtree::Node).unwrap();
            record.data_mut().clear();
            record.data_mut().push(r as u8);
            trx.finish_entry_modification(0, Subtree::Node).unwrap();
        }
        trx.commit().unwrap();
    }

    let expected_full = [true, false, false, false, true];
    for r in 1..=5u32 {
        let read = resource.begin_read(Some(r)).unwrap();
        let info = read.page_fragment_info(0, Subtree::Node).unwrap();
        let newest = info.first().unwrap();
        assert_eq!(newest.revision, r);
        assert_eq!(
            newest.full_dump,
            expected_full[r as usize - 1],
            "revision {}",
            r
        );
        assert!(info.len() <= N as usize, "revision {} chain {}", r, info.len());
    }
}

/// Full emits only full dumps; Differential reads at most two fragments.
#[test]
fn test_read_amplification_bounds() {
    for (versioning, bound) in [(Versioning::Full, 1), (Versioning::Differential, 2)] {
        let dir = TempDir::new().unwrap();
        let resource = Resource::create(dir.path().join("r"), settings(versioning)).unwrap();
        for r in 1..=6u32 {
            let mut trx = resource.begin_write().unwrap();
            if r == 1 {
                trx.create_entry(b"x".to_vec(), Subtree::Node).unwrap();
            } else {
                let record = trx.prepare_entry_for_modification(0, Subtree::Node).unwrap();
                record.data_mut().push(r as u8);
                trx.finish_entry_modification(0, Subtree::Node).unwrap();
            }
            trx.commit().unwrap();
        }
        let read = resource.begin_read(None).unwrap();
        let info = read.page_fragment_info(0, Subtree::Node).unwrap();
        assert!(
            info.len() <= bound,
            "{:?} read {} fragments",
            versioning,
            info.len()
        );
        if versioning == Versioning::Full {
            assert!(info[0].full_dump);
        }
    }
}

/// Sliding snapshot keeps old untouched records alive across many window
/// slides via carry-forward.
#[test]
fn test_sliding_snapshot_carry_forward() {
    let dir = TempDir::new().unwrap();
    let resource =
        Resource::create(dir.path().join("r"), settings(Versioning::SlidingSnapshot)).unwrap();

    const REVISIONS: u32 = 10;
    for r in 1..=REVISIONS {
        let mut trx = resource.begin_write().unwrap();
        trx.create_entry(format!("born r{}", r).into_bytes(), Subtree::Node)
            .unwrap();
        trx.commit().unwrap();
    }

    let read = resource.begin_read(None).unwrap();
    let info = read.page_fragment_info(0, Subtree::Node).unwrap();
    assert!(info.len() <= N as usize);
    // The record born at revision 1 left the window long ago and is only
    // reachable because every slide carried it forward.
    for r in 1..=REVISIONS {
        assert_eq!(
            read.get_record(r as i64 - 1, Subtree::Node).unwrap().unwrap().data(),
            format!("born r{}", r).as_bytes(),
            "key {}",
            r - 1
        );
    }
}

/// Insert then delete: the tombstone shadows from its revision onward.
#[test]
fn test_tombstone_shadowing() {
    for versioning in [
        Versioning::Full,
        Versioning::Differential,
        Versioning::Incremental,
        Versioning::SlidingSnapshot,
    ] {
        let dir = TempDir::new().unwrap();
        let resource = Resource::create(dir.path().join("r"), settings(versioning)).unwrap();

        let mut trx = resource.begin_write().unwrap();
        trx.create_entry(b"alive".to_vec(), Subtree::Node).unwrap();
        trx.commit().unwrap();

        let mut trx = resource.begin_write().unwrap();
        trx.remove_entry(0, Subtree::Node).unwrap();
        trx.commit().unwrap();

        // Two quiet revisions keep the tombstone shadowing.
        for _ in 0..2 {
            let mut trx = resource.begin_write().unwrap();
            trx.create_entry(b"noise".to_vec(), Subtree::TextValue).unwrap();
            trx.commit().unwrap();
        }

        let rev1 = resource.begin_read(Some(1)).unwrap();
        assert_eq!(
            rev1.get_record(0, Subtree::Node).unwrap().unwrap().data(),
            b"alive",
            "{:?}",
            versioning
        );
        for r in 2..=4u32 {
            let read = resource.begin_read(Some(r)).unwrap();
            assert_eq!(
                read.get_record(0, Subtree::Node).unwrap(),
                None,
                "{:?} rev {}",
                versioning,
                r
            );
        }
    }
}

/// Committing revision r+1 never changes what a reader at r observes.
#[test]
fn test_immutability_of_past() {
    let dir = TempDir::new().unwrap();
    let resource =
        Resource::create(dir.path().join("r"), settings(Versioning::Incremental)).unwrap();

    let mut trx = resource.begin_write().unwrap();
    trx.create_entry(b"original".to_vec(), Subtree::Node).unwrap();
    trx.commit().unwrap();

    let before: Vec<_> = resource
        .history()
        .unwrap()
        .into_iter()
        .map(|info| (info.revision, info.commit_timestamp))
        .collect();
    let snapshot = resource.begin_read(Some(1)).unwrap();
    let record_before = snapshot.get_record(0, Subtree::Node).unwrap();

    let mut trx = resource.begin_write().unwrap();
    let record = trx.prepare_entry_for_modification(0, Subtree::Node).unwrap();
    record.data_mut().clear();
    record.data_mut().extend_from_slice(b"rewritten");
    trx.finish_entry_modification(0, Subtree::Node).unwrap();
    trx.commit().unwrap();

    // The open snapshot and a fresh one at revision 1 agree with the past.
    assert_eq!(snapshot.get_record(0, Subtree::Node).unwrap(), record_before);
    let fresh = resource.begin_read(Some(1)).unwrap();
    assert_eq!(fresh.get_record(0, Subtree::Node).unwrap(), record_before);
    assert_eq!(
        fresh.get_record(0, Subtree::Node).unwrap().unwrap().data(),
        b"original"
    );
    let after = resource.history().unwrap();
    for (revision, timestamp) in before {
        assert_eq!(after[revision as usize].commit_timestamp, timestamp);
    }
}
