// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the memory-mapped reader.

#[cfg(test)]
mod tests {
    use crate::bytepipe::BytePipeline;
    use crate::io::{FileWriter, MmapReader, Reader};
    use crate::page::{KeyValuePage, Page, PageKind, Record, Subtree};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn plain_pipe() -> Arc<BytePipeline> {
        Arc::new(BytePipeline::identity())
    }

    fn record_page(tag: u8) -> Page {
        let mut page = KeyValuePage::new(0, tag as u32, Subtree::Node);
        page.set(Record::new(1, PageKind::Node, vec![tag; 8]));
        Page::KeyValue(page)
    }

    /// Test mapped reads agree with what the writer appended.
    #[test]
    fn test_mapped_read() {
        let dir = TempDir::new().unwrap();
        let mut writer = FileWriter::open(dir.path(), plain_pipe()).unwrap();
        let key = writer.append_page(&record_page(3)).unwrap();
        writer.publish_uber_page(key).unwrap();
        writer.append_revision_offset(key).unwrap();

        let mut reader = MmapReader::open(dir.path(), plain_pipe()).unwrap();
        assert_eq!(reader.read_page(key).unwrap(), record_page(3));
        assert_eq!(reader.uber_page_file_key().unwrap(), key);
        assert_eq!(reader.revision_root_offset(0).unwrap(), Some(key));
        assert_eq!(reader.revision_root_offset(1).unwrap(), None);
    }

    /// Test the data segment re-installs after the file grows.
    #[test]
    fn test_segment_reinstall_after_growth() {
        let dir = TempDir::new().unwrap();
        let mut writer = FileWriter::open(dir.path(), plain_pipe()).unwrap();
        let first = writer.append_page(&record_page(1)).unwrap();
        writer.publish_uber_page(first).unwrap();

        let mut reader = MmapReader::open(dir.path(), plain_pipe()).unwrap();
        assert_eq!(reader.read_page(first).unwrap(), record_page(1));

        // Grow the file after the mapping exists.
        let second = writer.append_page(&record_page(2)).unwrap();
        writer.publish_uber_page(second).unwrap();
        writer.append_revision_offset(second).unwrap();

        assert_eq!(reader.read_page(second).unwrap(), record_page(2));
        assert_eq!(reader.uber_page_file_key().unwrap(), second);
        assert_eq!(reader.revision_root_offset(0).unwrap(), Some(second));
    }

    /// Test out-of-range file keys surface as corruption.
    #[test]
    fn test_out_of_range_key() {
        let dir = TempDir::new().unwrap();
        let mut writer = FileWriter::open(dir.path(), plain_pipe()).unwrap();
        let key = writer.append_page(&record_page(1)).unwrap();
        writer.publish_uber_page(key).unwrap();
        let mut reader = MmapReader::open(dir.path(), plain_pipe()).unwrap();
        assert!(reader.read_page(1 << 20).is_err());
    }
}
