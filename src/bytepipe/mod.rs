// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Byte pipe: an ordered stack of invertible byte-stream transforms.
//!
//! Every page body passes through the pipe on its way to disk and through
//! the reversed pipe on its way back. Transforms compose forward on write
//! (`Tn ∘ ... ∘ T1`) and in reverse on read. Each transform must be total
//! and invertible on its own outputs.
//!
//! The stock transform is XZ compression. Encryption handlers slot into the
//! same trait without touching callers.

use crate::error::{StoreError, StoreResult};
use std::io::{Read, Write};

pub mod handler;


pub use handler::XzByteHandler;

/// One invertible byte-stream transform.
pub trait ByteHandler: Send + Sync {
    /// Transform bytes on the write path.
    fn serialize(&self, data: Vec<u8>) -> StoreResult<Vec<u8>>;

    /// Invert the transform on the read path.
    fn deserialize(&self, data: Vec<u8>) -> StoreResult<Vec<u8>>;
}

/// Ordered stack of byte handlers.
#[derive(Default)]
pub struct BytePipeline {
    handlers: Vec<Box<dyn ByteHandler>>,
}

impl BytePipeline {
    /// Empty pipe; bytes pass through unchanged.
    pub fn identity() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Pipe with the given handler stack, applied first-to-last on write.
    pub fn new(handlers: Vec<Box<dyn ByteHandler>>) -> Self {
        Self { handlers }
    }

    /// Append a handler to the write-side end of the pipe.
    pub fn push(mut self, handler: Box<dyn ByteHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Run the pipe forward (write path).
    pub fn serialize(&self, mut data: Vec<u8>) -> StoreResult<Vec<u8>> {
        for handler in &self.handlers {
            data = handler.serialize(data)?;
        }
        Ok(data)
    }

    /// Run the pipe backward (read path).
    pub fn deserialize(&self, mut data: Vec<u8>) -> StoreResult<Vec<u8>> {
        for handler in self.handlers.iter().rev() {
            data = handler.deserialize(data)?;
        }
        Ok(data)
    }
}

/// Compress with XZ at the given preset.
pub(crate) fn xz_compress(data: &[u8], level: u32) -> StoreResult<Vec<u8>> {
    use xz2::write::XzEncoder;

    let mut encoder = XzEncoder::new(Vec::new(), level);
    encoder
        .write_all(data)
        .map_err(|e| StoreError::CompressionFailed {
            reason: format!("XZ write error: {}", e),
        })?;

    encoder.finish().map_err(|e| StoreError::CompressionFailed {
        reason: format!("XZ finish error: {}", e),
    })
}

/// Decompress XZ data.
pub(crate) fn xz_decompress(data: &[u8]) -> StoreResult<Vec<u8>> {
    use xz2::read::XzDecoder;

    let mut decoder = XzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StoreError::DecompressionFailed {
            reason: format!("XZ read error: {}", e),
        })?;

    Ok(out)
}
