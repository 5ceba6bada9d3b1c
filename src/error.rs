// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for ReedStore operations.
//!
//! Provides structured error handling with detailed context for debugging.
//! Absent records are not errors: lookups return `Ok(None)`.

use std::fmt;

/// Standard Result type for all ReedStore operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for ReedStore operations.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Caller passed an invalid value (negative key, unknown subtree, ...).
    InvalidArgument { reason: String },

    /// Operation violates the transaction protocol or runs on a closed handle.
    InvalidState { reason: String },

    /// I/O error during file operations.
    IoError { operation: String, reason: String },

    /// Persisted data is malformed (bad frame length, unknown kind tag, CRC mismatch).
    Corruption { reason: String },

    /// Internal invariant broken; indicates a bug, not a caller mistake.
    AssertionFailure { reason: String },

    /// Requested revision has not been committed.
    RevisionNotFound { revision: u32 },

    /// Lock timeout waiting for exclusive commit access.
    LockTimeout { resource: String, timeout_secs: u64 },

    /// Byte pipe compression failed.
    CompressionFailed { reason: String },

    /// Byte pipe decompression failed.
    DecompressionFailed { reason: String },
}

impl StoreError {
    /// Wrap a `std::io::Error` with the operation that produced it.
    pub fn io(operation: impl Into<String>, err: std::io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { reason } => {
                write!(f, "Invalid argument: {}", reason)
            }
            Self::InvalidState { reason } => {
                write!(f, "Invalid state: {}", reason)
            }
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::Corruption { reason } => {
                write!(f, "Corrupted store: {}", reason)
            }
            Self::AssertionFailure { reason } => {
                write!(f, "Assertion failure: {}", reason)
            }
            Self::RevisionNotFound { revision } => {
                write!(f, "Revision not found: {}", revision)
            }
            Self::LockTimeout {
                resource,
                timeout_secs,
            } => {
                write!(
                    f,
                    "Timed out after {}s waiting for commit lock on '{}'",
                    timeout_secs, resource
                )
            }
            Self::CompressionFailed { reason } => {
                write!(f, "Compression failed: {}", reason)
            }
            Self::DecompressionFailed { reason } => {
                write!(f, "Decompression failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for StoreError {}
