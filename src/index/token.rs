//! C4 + C5 — token-inverted index and its in-memory flush buffer.
//!
//! Postings for a token are a concatenation of per-occurrence entries:
//! a compact varint-encoded numeric primary key when every byte of the
//! primary key is an ASCII digit, or a `0x00 ++ varint(len) ++ bytes`
//! fallback otherwise (§3). New postings are appended to an in-memory
//! per-token buffer (guarded by the same method lock as everything
//! else, so no extra synchronization is needed here) and only reach
//! the backing [`BTreeStore`] on [`TokenIndex::flush`].

use std::collections::HashMap;

use crate::btree::BTreeStore;
use crate::error::Result;
use crate::util;

pub fn encode_posting(pk: &[u8]) -> Vec<u8> {
    if !pk.is_empty() && pk.iter().all(u8::is_ascii_digit) {
        if let Ok(s) = std::str::from_utf8(pk) {
            if let Ok(n) = s.parse::<u64>() {
                let mut buf = vec![1u8];
                util::write_varint(&mut buf, n);
                return buf;
            }
        }
    }
    let mut buf = vec![0u8];
    util::write_varint(&mut buf, pk.len() as u64);
    buf.extend_from_slice(pk);
    buf
}

/// Decode every posting out of a concatenated postings blob.
pub fn decode_postings(blob: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < blob.len() {
        match blob[pos] {
            1 => {
                pos += 1;
                match util::read_varint(&blob[pos..]) {
                    Some((n, used)) => {
                        out.push(n.to_string().into_bytes());
                        pos += used;
                    }
                    None => break,
                }
            }
            0 => {
                pos += 1;
                match util::read_varint(&blob[pos..]) {
                    Some((len, used)) => {
                        pos += used;
                        let len = len as usize;
                        if pos + len > blob.len() {
                            break;
                        }
                        out.push(blob[pos..pos + len].to_vec());
                        pos += len;
                    }
                    None => break,
                }
            }
            _ => break,
        }
    }
    out
}

#[derive(Default)]
pub struct FlushBuffer {
    tokens: HashMap<Vec<u8>, Vec<u8>>,
    bytes: usize,
}

impl FlushBuffer {
    pub fn append(&mut self, token: &[u8], posting: &[u8]) {
        let entry = self.tokens.entry(token.to_vec()).or_default();
        entry.extend_from_slice(posting);
        self.bytes += posting.len();
    }

    pub fn get(&self, token: &[u8]) -> Option<&[u8]> {
        self.tokens.get(token).map(|v| v.as_slice())
    }

    pub fn set(&mut self, token: &[u8], blob: Vec<u8>) {
        if blob.is_empty() {
            self.tokens.remove(token);
        } else {
            self.tokens.insert(token.to_vec(), blob);
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.bytes = 0;
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.tokens.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

pub struct TokenIndex {
    tree: BTreeStore,
    buffer: FlushBuffer,
    flush_threshold: usize,
}

impl TokenIndex {
    pub fn new(tree: BTreeStore, flush_threshold: usize) -> TokenIndex {
        TokenIndex { tree, buffer: FlushBuffer::default(), flush_threshold }
    }

    pub fn tree(&self) -> &BTreeStore {
        &self.tree
    }

    /// Write path (§4.3): tokenize `value`, append an encoded posting
    /// for `pk` under each extracted token, then flush if the buffer
    /// has grown past the configured threshold.
    pub fn put(&mut self, pk: &[u8], value: &[u8]) -> Result<()> {
        let posting = encode_posting(pk);
        for token in util::tokenize(value) {
            self.buffer.append(token, &posting);
        }
        if self.buffer.bytes() > self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Delete path (§4.3): the buffer absorbs deletions so in-place
    /// tree rewrites are deferred. Reads both the buffer's and the
    /// tree's entry for each affected token, filters out `pk`, and
    /// writes the merged, filtered result back into the buffer only
    /// (the tree entry for that token, if any, is dropped).
    pub fn out(&mut self, pk: &[u8], value: &[u8]) -> Result<()> {
        for token in util::tokenize(value) {
            let mut postings: Vec<Vec<u8>> = Vec::new();
            if let Some(buffered) = self.buffer.get(token) {
                postings.extend(decode_postings(buffered));
            }
            if let Some(blob) = self.tree.get_blob(token)? {
                postings.extend(decode_postings(&blob));
                self.tree.delete_key(token)?;
            }
            postings.retain(|p| p.as_slice() != pk);
            let mut merged = Vec::new();
            for p in &postings {
                merged.extend_from_slice(&encode_posting(p));
            }
            self.buffer.set(token, merged);
        }
        Ok(())
    }

    /// Read path (§4.3): union postings from the buffer and the tree.
    pub fn get(&self, token: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut postings = Vec::new();
        if let Some(buffered) = self.buffer.get(token) {
            postings.extend(decode_postings(buffered));
        }
        if let Some(blob) = self.tree.get_blob(token)? {
            postings.extend(decode_postings(&blob));
        }
        Ok(postings)
    }

    /// Append-concatenate every buffered token's bytes onto its
    /// backing tree entry, then clear the buffer.
    pub fn flush(&mut self) -> Result<()> {
        for (token, bytes) in self.buffer.tokens() {
            let mut blob = self.tree.get_blob(token)?.unwrap_or_default();
            blob.extend_from_slice(bytes);
            self.tree.put_blob(token, &blob)?;
        }
        self.buffer.clear();
        Ok(())
    }

    pub fn vanish(&mut self) -> Result<()> {
        self.buffer.clear();
        self.tree.vanish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_roundtrip_numeric_and_fallback() {
        let numeric = encode_posting(b"12345");
        let fallback = encode_posting(b"pk-abc");
        let mut blob = Vec::new();
        blob.extend_from_slice(&numeric);
        blob.extend_from_slice(&fallback);
        let decoded = decode_postings(&blob);
        assert_eq!(decoded, vec![b"12345".to_vec(), b"pk-abc".to_vec()]);
    }

    #[test]
    fn flush_buffer_tracks_size() {
        let mut buf = FlushBuffer::default();
        buf.append(b"red", &encode_posting(b"1"));
        assert!(buf.bytes() > 0);
        buf.clear();
        assert!(buf.is_empty());
    }
}
