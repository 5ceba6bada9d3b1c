// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page codec: deterministic big-endian (de)serialisation.
//!
//! A serialised page is `[kind_tag: u8][kind-specific body]`. All multi-byte
//! integers are big-endian, all maps iterate in key order, so identical
//! pages produce byte-identical output — required for content hashing and
//! for the immutability tests.
//!
//! ## Bodies
//!
//! ```text
//! record page    [page_key: i64][revision: i32][previous: i64]
//!                [entry_count: i32]
//!                ([key: i64][record_kind: u8][len: i32][bytes])*
//! indirect page  [revision: i32][ref_count: i32]
//!                ([file_key: i64][kind_tag: u8])*
//! revision root  [revision: i32][commit_ts: i64][msg?]
//!                [max_record_key: i64]{4}[subtree ref]{4}[name ref]
//! name page      [revision: i32][dict_count: i32]
//!                ([node_kind: u8][entry_count: i32]
//!                 ([key: i32][len: i32][utf8])*)*
//! uber page      [revision: i32][bootstrap: u8]
//!                ([height: u8][exp: u8]{height}){5}[revisions ref]
//! ```

use super::{
    IndirectPage, KeyValuePage, NamePage, Page, PageKind, PageReference, Record,
    RevisionRootPage, UberPage, NULL_ID,
};
use crate::error::{StoreError, StoreResult};
use crate::trie::TRIE_HEIGHT;
use std::collections::BTreeMap;

/// Serialise a page to its wire form.
pub fn serialize(page: &Page) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.push(page.kind().tag());
    match page {
        Page::Uber(p) => write_uber(&mut out, p),
        Page::Indirect(p) => write_indirect(&mut out, p),
        Page::RevisionRoot(p) => write_revision_root(&mut out, p),
        Page::Name(p) => write_name(&mut out, p),
        Page::KeyValue(p) => write_key_value(&mut out, p),
    }
    out
}

/// Deserialise a page from its wire form.
///
/// ## Error Conditions
/// - Corruption: Unknown kind tag, truncated body, malformed strings
pub fn deserialize(bytes: &[u8]) -> StoreResult<Page> {
    let mut cursor = Cursor::new(bytes);
    let kind = PageKind::from_tag(cursor.read_u8()?)?;
    let page = match kind {
        PageKind::Uber => Page::Uber(read_uber(&mut cursor)?),
        PageKind::Indirect => Page::Indirect(read_indirect(&mut cursor)?),
        PageKind::RevisionRoot => Page::RevisionRoot(read_revision_root(&mut cursor)?),
        PageKind::Name => Page::Name(read_name(&mut cursor)?),
        PageKind::Node | PageKind::Path | PageKind::TextValue | PageKind::AttributeValue => {
            Page::KeyValue(read_key_value(&mut cursor, kind)?)
        }
        PageKind::PathSummary | PageKind::Cas | PageKind::DeletedRecord => {
            return Err(StoreError::Corruption {
                reason: format!("kind {} cannot head a page body", kind),
            })
        }
    };
    cursor.expect_end()?;
    Ok(page)
}

fn write_reference(out: &mut Vec<u8>, reference: &PageReference) {
    out.extend_from_slice(&reference.file_key.to_be_bytes());
    out.push(reference.kind.tag());
}

fn read_reference(cursor: &mut Cursor<'_>) -> StoreResult<PageReference> {
    let file_key = cursor.read_i64()?;
    let kind = PageKind::from_tag(cursor.read_u8()?)?;
    Ok(PageReference {
        file_key,
        log_key: NULL_ID,
        kind,
        key_value_page_key: NULL_ID,
    })
}

fn write_key_value(out: &mut Vec<u8>, page: &KeyValuePage) {
    out.extend_from_slice(&page.page_key().to_be_bytes());
    out.extend_from_slice(&(page.revision() as i32).to_be_bytes());
    out.extend_from_slice(&page.previous().to_be_bytes());
    out.extend_from_slice(&(page.len() as i32).to_be_bytes());
    for (key, record) in page.entries() {
        out.extend_from_slice(&key.to_be_bytes());
        out.push(record.kind().tag());
        out.extend_from_slice(&(record.data().len() as i32).to_be_bytes());
        out.extend_from_slice(record.data());
    }
}

fn read_key_value(cursor: &mut Cursor<'_>, kind: PageKind) -> StoreResult<KeyValuePage> {
    let page_key = cursor.read_i64()?;
    let revision = cursor.read_i32()? as u32;
    let previous = cursor.read_i64()?;
    let count = cursor.read_count()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = cursor.read_i64()?;
        let record_kind = PageKind::from_tag(cursor.read_u8()?)?;
        let len = cursor.read_count()?;
        let data = cursor.read_bytes(len)?.to_vec();
        entries.insert(key, Record::new(key, record_kind, data));
    }
    Ok(KeyValuePage::from_parts(
        page_key, revision, kind, previous, entries,
    ))
}

fn write_indirect(out: &mut Vec<u8>, page: &IndirectPage) {
    out.extend_from_slice(&(page.revision() as i32).to_be_bytes());
    out.extend_from_slice(&(page.fanout() as i32).to_be_bytes());
    for reference in page.references() {
        write_reference(out, reference);
    }
}

fn read_indirect(cursor: &mut Cursor<'_>) -> StoreResult<IndirectPage> {
    let revision = cursor.read_i32()? as u32;
    let count = cursor.read_count()?;
    let mut references = Vec::with_capacity(count);
    for _ in 0..count {
        references.push(read_reference(cursor)?);
    }
    Ok(IndirectPage::from_parts(revision, references))
}

fn write_revision_root(out: &mut Vec<u8>, page: &RevisionRootPage) {
    out.extend_from_slice(&(page.revision() as i32).to_be_bytes());
    out.extend_from_slice(&page.commit_timestamp().to_be_bytes());
    match page.commit_message() {
        Some(msg) => {
            out.push(1);
            out.extend_from_slice(&(msg.len() as i32).to_be_bytes());
            out.extend_from_slice(msg.as_bytes());
        }
        None => out.push(0),
    }
    for subtree in super::Subtree::ALL {
        out.extend_from_slice(&page.max_record_key(subtree).to_be_bytes());
    }
    for subtree in super::Subtree::ALL {
        write_reference(out, page.subtree_ref(subtree));
    }
    write_reference(out, page.name_ref());
}

fn read_revision_root(cursor: &mut Cursor<'_>) -> StoreResult<RevisionRootPage> {
    let revision = cursor.read_i32()? as u32;
    let commit_timestamp = cursor.read_i64()?;
    let commit_message = match cursor.read_u8()? {
        0 => None,
        1 => {
            let len = cursor.read_count()?;
            Some(cursor.read_string(len)?)
        }
        flag => {
            return Err(StoreError::Corruption {
                reason: format!("bad commit-message flag {}", flag),
            })
        }
    };
    let mut max_record_keys = [NULL_ID; 4];
    for slot in &mut max_record_keys {
        *slot = cursor.read_i64()?;
    }
    let mut subtree_refs = Vec::with_capacity(4);
    for _ in 0..4 {
        subtree_refs.push(read_reference(cursor)?);
    }
    let subtree_refs: [PageReference; 4] =
        subtree_refs
            .try_into()
            .map_err(|_| StoreError::AssertionFailure {
                reason: "subtree reference arity".to_string(),
            })?;
    let name_ref = read_reference(cursor)?;
    Ok(RevisionRootPage::from_parts(
        revision,
        commit_timestamp,
        commit_message,
        max_record_keys,
        subtree_refs,
        name_ref,
    ))
}

fn write_name(out: &mut Vec<u8>, page: &NamePage) {
    out.extend_from_slice(&(page.revision() as i32).to_be_bytes());
    out.extend_from_slice(&(page.dictionaries().len() as i32).to_be_bytes());
    for (node_kind, dict) in page.dictionaries() {
        out.push(*node_kind);
        out.extend_from_slice(&(dict.len() as i32).to_be_bytes());
        for (key, name) in dict {
            out.extend_from_slice(&key.to_be_bytes());
            out.extend_from_slice(&(name.len() as i32).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
        }
    }
}

fn read_name(cursor: &mut Cursor<'_>) -> StoreResult<NamePage> {
    let revision = cursor.read_i32()? as u32;
    let dict_count = cursor.read_count()?;
    let mut dictionaries = BTreeMap::new();
    for _ in 0..dict_count {
        let node_kind = cursor.read_u8()?;
        let entry_count = cursor.read_count()?;
        let mut dict = BTreeMap::new();
        for _ in 0..entry_count {
            let key = cursor.read_i32()?;
            let len = cursor.read_count()?;
            dict.insert(key, cursor.read_string(len)?);
        }
        dictionaries.insert(node_kind, dict);
    }
    Ok(NamePage::from_parts(revision, dictionaries))
}

fn write_uber(out: &mut Vec<u8>, page: &UberPage) {
    out.extend_from_slice(&(page.revision() as i32).to_be_bytes());
    out.push(page.is_bootstrap() as u8);
    for exponents in page.page_count_exp() {
        out.push(TRIE_HEIGHT as u8);
        out.extend_from_slice(exponents);
    }
    write_reference(out, page.revisions_ref());
}

fn read_uber(cursor: &mut Cursor<'_>) -> StoreResult<UberPage> {
    let revision = cursor.read_i32()? as u32;
    let is_bootstrap = match cursor.read_u8()? {
        0 => false,
        1 => true,
        flag => {
            return Err(StoreError::Corruption {
                reason: format!("bad bootstrap flag {}", flag),
            })
        }
    };
    let mut page_count_exp = [[0u8; TRIE_HEIGHT]; 5];
    for table in &mut page_count_exp {
        let height = cursor.read_u8()? as usize;
        if height != TRIE_HEIGHT {
            return Err(StoreError::Corruption {
                reason: format!("unsupported trie height {}", height),
            });
        }
        let bytes = cursor.read_bytes(TRIE_HEIGHT)?;
        table.copy_from_slice(bytes);
    }
    let revisions_ref = read_reference(cursor)?;
    Ok(UberPage::from_parts(
        revision,
        is_bootstrap,
        page_count_exp,
        revisions_ref,
    ))
}

/// Bounds-checked big-endian cursor over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(overflow)?;
        if end > self.buf.len() {
            return Err(StoreError::Corruption {
                reason: format!(
                    "truncated page body: need {} bytes at {}, have {}",
                    len,
                    self.pos,
                    self.buf.len()
                ),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> StoreResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32(&mut self) -> StoreResult<i32> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().expect("length checked");
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_i64(&mut self) -> StoreResult<i64> {
        let bytes: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
        Ok(i64::from_be_bytes(bytes))
    }

    /// A non-negative i32 used as a length or element count.
    fn read_count(&mut self) -> StoreResult<usize> {
        let value = self.read_i32()?;
        usize::try_from(value).map_err(|_| StoreError::Corruption {
            reason: format!("negative count {}", value),
        })
    }

    fn read_string(&mut self, len: usize) -> StoreResult<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Corruption {
            reason: format!("invalid UTF-8 in page body: {}", e),
        })
    }

    fn expect_end(&self) -> StoreResult<()> {
        if self.pos != self.buf.len() {
            return Err(StoreError::Corruption {
                reason: format!(
                    "{} trailing bytes after page body",
                    self.buf.len() - self.pos
                ),
            });
        }
        Ok(())
    }
}

fn overflow() -> StoreError {
    StoreError::Corruption {
        reason: "page body length overflow".to_string(),
    }
}
