// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Stock byte handlers.

use super::{xz_compress, xz_decompress, ByteHandler};
use crate::error::StoreResult;

/// XZ compression handler.
///
/// Page bodies are dominated by sparse reference tables and record keys, so
/// even the fast presets reclaim most of the slack.
pub struct XzByteHandler {
    level: u32,
}

impl XzByteHandler {
    /// Handler at the default preset (6).
    pub fn new() -> Self {
        Self { level: 6 }
    }

    /// Handler at an explicit XZ preset (0-9).
    pub fn with_level(level: u32) -> Self {
        Self { level }
    }
}

impl Default for XzByteHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteHandler for XzByteHandler {
    fn serialize(&self, data: Vec<u8>) -> StoreResult<Vec<u8>> {
        xz_compress(&data, self.level)
    }

    fn deserialize(&self, data: Vec<u8>) -> StoreResult<Vec<u8>> {
        xz_decompress(&data)
    }
}
