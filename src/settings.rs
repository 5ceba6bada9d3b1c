// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Per-resource settings, persisted as TOML next to the data files.
//!
//! Settings are written once when the resource is created and reloaded on
//! every open. The revisioning policy and page geometry are immutable for
//! the lifetime of a resource: changing them would make existing page
//! histories unreadable.

use crate::error::{StoreError, StoreResult};
use crate::revision::Versioning;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// File name of the settings document inside a resource directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Which reader implementation a read transaction opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderKind {
    /// Buffered random-access file reads.
    Buffered,
    /// Memory-mapped data and revisions-offset files.
    Mmap,
}

/// Immutable per-resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    /// Unique resource identifier.
    pub resource_id: Uuid,

    /// Creation time, epoch milliseconds.
    pub created_at: i64,

    /// Revisioning policy for record pages.
    pub versioning: Versioning,

    /// Full-dump cadence; bounds read amplification for delta policies.
    pub revisions_to_restore: u32,

    /// Records per leaf page as a power-of-two exponent.
    pub records_per_page_exp: u32,

    /// Whether page bodies run through the XZ byte handler.
    pub compression: bool,

    /// Reader implementation for read transactions.
    pub reader: ReaderKind,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            resource_id: Uuid::new_v4(),
            created_at: chrono::Utc::now().timestamp_millis(),
            versioning: Versioning::SlidingSnapshot,
            revisions_to_restore: 4,
            records_per_page_exp: 10,
            compression: true,
            reader: ReaderKind::Buffered,
        }
    }
}

impl ResourceSettings {
    /// Number of records per leaf page.
    pub fn records_per_page(&self) -> u64 {
        1u64 << self.records_per_page_exp
    }

    /// Leaf page key for a record key.
    pub fn page_key(&self, record_key: i64) -> i64 {
        record_key >> self.records_per_page_exp
    }

    /// Slot of a record key within its leaf page.
    pub fn page_offset(&self, record_key: i64) -> usize {
        (record_key & (self.records_per_page() as i64 - 1)) as usize
    }

    /// Persist to `<dir>/settings.toml`.
    ///
    /// ## Error Conditions
    /// - IoError: Cannot write settings file
    pub fn save(&self, dir: &Path) -> StoreResult<()> {
        let text = toml::to_string_pretty(self).map_err(|e| StoreError::InvalidState {
            reason: format!("settings not serialisable: {}", e),
        })?;
        fs::write(dir.join(SETTINGS_FILE), text).map_err(|e| StoreError::io("write_settings", e))
    }

    /// Load from `<dir>/settings.toml` and validate the geometry.
    ///
    /// ## Error Conditions
    /// - IoError: Settings file missing or unreadable
    /// - Corruption: Settings file is not valid TOML
    /// - InvalidArgument: Geometry outside supported bounds
    pub fn load(dir: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(dir.join(SETTINGS_FILE))
            .map_err(|e| StoreError::io("read_settings", e))?;
        let settings: Self = toml::from_str(&text).map_err(|e| StoreError::Corruption {
            reason: format!("settings.toml: {}", e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject geometries the trie cannot address or that degenerate.
    pub fn validate(&self) -> StoreResult<()> {
        if !(5..=16).contains(&self.records_per_page_exp) {
            return Err(StoreError::InvalidArgument {
                reason: format!(
                    "records_per_page_exp {} outside 5..=16",
                    self.records_per_page_exp
                ),
            });
        }
        if self.revisions_to_restore < 2 {
            return Err(StoreError::InvalidArgument {
                reason: format!(
                    "revisions_to_restore {} must be at least 2",
                    self.revisions_to_restore
                ),
            });
        }
        Ok(())
    }
}
