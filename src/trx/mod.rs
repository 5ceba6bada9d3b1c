// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page transactions.
//!
//! A read transaction is a snapshot view of one committed revision. A
//! write transaction stages copy-on-write state for the next revision in
//! its transaction log and publishes it atomically through the uber-page
//! beacon on commit.

pub mod read;
pub mod write;


pub use read::{FragmentInfo, PageReadTrx};
pub use write::PageWriteTrx;
