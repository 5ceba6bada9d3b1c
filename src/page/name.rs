// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Name page: hash-interned string dictionaries.
//!
//! Higher layers intern element/attribute names once per resource and
//! reference them by integer key everywhere else. Keys are CRC32 hashes of
//! the name, linearly probed on collision so two distinct names never share
//! a key. One dictionary exists per node-kind discriminator.

use std::collections::BTreeMap;

/// Hash-interned string dictionaries, one per node kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamePage {
    revision: u32,
    dictionaries: BTreeMap<u8, BTreeMap<i32, String>>,
}

impl NamePage {
    /// Empty name page.
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            dictionaries: BTreeMap::new(),
        }
    }

    /// Page rebuilt from persisted parts (codec use).
    pub(crate) fn from_parts(
        revision: u32,
        dictionaries: BTreeMap<u8, BTreeMap<i32, String>>,
    ) -> Self {
        Self {
            revision,
            dictionaries,
        }
    }

    /// Copy-on-write clone at a new revision.
    pub fn cow_clone(&self, revision: u32) -> Self {
        Self {
            revision,
            dictionaries: self.dictionaries.clone(),
        }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Intern `name` for `node_kind`, returning its key.
    ///
    /// The key is the CRC32 of the name bytes reinterpreted as `i32`;
    /// colliding keys probe upward until a free slot or the already-interned
    /// name is found.
    pub fn create_name_key(&mut self, name: &str, node_kind: u8) -> i32 {
        let dict = self.dictionaries.entry(node_kind).or_default();
        let mut key = crc32fast::hash(name.as_bytes()) as i32;
        loop {
            match dict.get(&key) {
                Some(existing) if existing == name => return key,
                Some(_) => key = key.wrapping_add(1),
                None => {
                    dict.insert(key, name.to_string());
                    return key;
                }
            }
        }
    }

    /// Resolve a name key for `node_kind`.
    pub fn get_name(&self, key: i32, node_kind: u8) -> Option<&str> {
        self.dictionaries
            .get(&node_kind)
            .and_then(|dict| dict.get(&key))
            .map(String::as_str)
    }

    /// Number of interned names across all kinds.
    pub fn len(&self) -> usize {
        self.dictionaries.values().map(BTreeMap::len).sum()
    }

    /// Whether no names are interned.
    pub fn is_empty(&self) -> bool {
        self.dictionaries.values().all(BTreeMap::is_empty)
    }

    pub(crate) fn dictionaries(&self) -> &BTreeMap<u8, BTreeMap<i32, String>> {
        &self.dictionaries
    }
}
