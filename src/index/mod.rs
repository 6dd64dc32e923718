//! C4 — Index manager.
//!
//! Owns every secondary index declared on a table database: opens and
//! creates their backing [`BTreeStore`]s (or [`TokenIndex`]es) on
//! `open`, maintains them on every record write/delete, and answers
//! the lookup primitives the query planner (§4.5) drives.

pub mod token;

use std::collections::BTreeMap;
use std::path::Path;

use crate::btree::{BTreeStore, IndexKind};
use crate::codec::ColumnMap;
use crate::config::OpenFlags;
use crate::error::{Error, Result};
use crate::util;
use token::TokenIndex;

const DECIMAL_TAG_NUMERIC: u8 = 0x01;
const DECIMAL_TAG_TEXT: u8 = 0x02;

enum Backing {
    Ordered(BTreeStore),
    Token(TokenIndex),
}

struct IndexEntry {
    kind: IndexKind,
    backing: Backing,
}

/// `set_index` modifiers, mirroring §4.2's `KEEP`/`OPT`/`VOID`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetIndexMode {
    /// Create; fail if an index on this column already exists.
    Keep,
    /// Create if absent, replacing nothing.
    Create,
    /// Optimize the existing backing tree in place.
    Optimize,
    /// Drop the index and delete its backing file(s).
    Void,
}

pub struct IndexManager {
    base_path: std::path::PathBuf,
    mode: OpenFlags,
    token_flush_threshold: usize,
    indices: BTreeMap<Vec<u8>, IndexEntry>,
}

/// Composite-key encoding is "dumb, and dumb is good here" — this is
/// the one module with genuine column-name-shaped state, so it earns
/// the only non-obvious comments in the crate.
fn is_pk_index(column: &[u8]) -> bool {
    column.is_empty()
}

fn build_lexical_key(value: &[u8], pk: &[u8], column: &[u8]) -> Vec<u8> {
    if is_pk_index(column) {
        value.to_vec()
    } else {
        let mut key = value.to_vec();
        util::push_hash_suffix(&mut key, pk);
        key
    }
}

/// Decimal keys carry a leading tag byte so that, absent a custom MDB
/// comparator, plain byte-lexicographic order still sorts every
/// numerically-parseable entry before every non-numeric one, and
/// correctly within each group (§4.2's "sort-prefix byte" hint).
fn build_decimal_key(value: &[u8], pk: &[u8], column: &[u8]) -> Vec<u8> {
    let mut key = Vec::new();
    match util::parse_leading_number(value) {
        Some(n) => {
            key.push(DECIMAL_TAG_NUMERIC);
            key.extend_from_slice(&util::sortable_f64(n));
        }
        None => {
            key.push(DECIMAL_TAG_TEXT);
            key.extend_from_slice(value);
        }
    }
    if !is_pk_index(column) {
        util::push_hash_suffix(&mut key, pk);
    }
    key
}

fn decimal_seek_key(n: f64) -> Vec<u8> {
    let mut key = vec![DECIMAL_TAG_NUMERIC];
    key.extend_from_slice(&util::sortable_f64(n));
    key
}

impl IndexManager {
    pub fn new(base_path: &Path, mode: OpenFlags, token_flush_threshold: usize) -> IndexManager {
        IndexManager {
            base_path: base_path.to_path_buf(),
            mode,
            token_flush_threshold,
            indices: BTreeMap::new(),
        }
    }

    /// Directory-enumerate `P.idx.*.*` and open each discovered index,
    /// per §6.1.
    pub fn discover_and_open(&mut self) -> Result<()> {
        let dir = self.base_path.parent().unwrap_or_else(|| Path::new("."));
        let base_name = self
            .base_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!("{}.idx.", base_name);
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(&prefix) {
                continue;
            }
            let rest = &file_name[prefix.len()..];
            let (stem, suffix) = match rest.rsplit_once('.') {
                Some(pair) => pair,
                None => continue,
            };
            let kind = match IndexKind::from_suffix(suffix) {
                Some(k) => k,
                None => continue,
            };
            let column = util::urldecode(stem)?;
            self.open_index(&column, kind, false)?;
        }
        Ok(())
    }

    fn open_index(&mut self, column: &[u8], kind: IndexKind, create: bool) -> Result<()> {
        let path = BTreeStore::index_path(&self.base_path, column, kind);
        let backing = match kind {
            IndexKind::Token => {
                let tree = BTreeStore::open(&path, kind, self.mode, create)?;
                Backing::Token(TokenIndex::new(tree, self.token_flush_threshold))
            }
            IndexKind::Lexical | IndexKind::Decimal => {
                Backing::Ordered(BTreeStore::open(&path, kind, self.mode, create)?)
            }
        };
        self.indices.insert(column.to_vec(), IndexEntry { kind, backing });
        Ok(())
    }

    pub fn has_index(&self, column: &[u8]) -> bool {
        self.indices.contains_key(column)
    }

    pub fn kind_of(&self, column: &[u8]) -> Option<IndexKind> {
        self.indices.get(column).map(|e| e.kind)
    }

    pub fn columns(&self) -> Vec<Vec<u8>> {
        self.indices.keys().cloned().collect()
    }

    /// §4.2's `set_index`. Fails outside writer mode; the transaction
    /// check is enforced by the caller (`Tdb`), which knows whether a
    /// transaction is currently open.
    pub fn set_index(&mut self, column: &[u8], kind: IndexKind, mode: SetIndexMode) -> Result<()> {
        if !self.mode.contains(OpenFlags::WRITER) {
            return Err(Error::InvalidState("set_index requires writer mode".into()));
        }
        match mode {
            SetIndexMode::Void => {
                if let Some(entry) = self.indices.remove(column) {
                    match entry.backing {
                        Backing::Ordered(tree) => tree.remove_file()?,
                        Backing::Token(tok) => tok.tree().remove_file()?,
                    }
                }
                Ok(())
            }
            SetIndexMode::Optimize => {
                if !self.indices.contains_key(column) {
                    return Err(Error::NoRecord(format!("no index on column {:?}", column)));
                }
                // backing trees are LMDB environments; compaction of
                // the on-disk file is performed by `copy`+`rename` in
                // `Tdb::optimize`, which rebuilds every index from the
                // freshly-optimized hash store.
                Ok(())
            }
            SetIndexMode::Keep => {
                if self.indices.contains_key(column) {
                    return Err(Error::KeepViolation(format!(
                        "index on column {:?} already exists",
                        column
                    )));
                }
                self.open_index(column, kind, true)
            }
            SetIndexMode::Create => self.open_index(column, kind, true),
        }
    }

    /// Apply every (name, value) pair in `cols` to its matching index.
    pub fn put_indices(&mut self, pk: &[u8], cols: &ColumnMap) -> Result<()> {
        for (name, value) in cols.iter() {
            if let Some(entry) = self.indices.get_mut(name) {
                match &mut entry.backing {
                    Backing::Ordered(tree) => {
                        let key = match entry.kind {
                            IndexKind::Lexical => build_lexical_key(value, pk, name),
                            IndexKind::Decimal => build_decimal_key(value, pk, name),
                            IndexKind::Token => unreachable!(),
                        };
                        tree.put(&key, pk)?;
                    }
                    Backing::Token(tok) => tok.put(pk, value)?,
                }
            }
        }
        Ok(())
    }

    /// Remove every (name, value) pair in `cols` from its matching
    /// index. The composite key already embeds `hash16(pk)`, so the
    /// exact dup-sorted `(key, pk)` pair is always directly
    /// addressable — the original engine's "scan forward from the
    /// composite key until the prefix changes" fallback exists because
    /// its tree has no notion of dup-sorted delete-by-value; LMDB does,
    /// so a single `delete_exact` covers the same hash-collision case.
    pub fn out_indices(&mut self, pk: &[u8], cols: &ColumnMap) -> Result<()> {
        for (name, value) in cols.iter() {
            if let Some(entry) = self.indices.get_mut(name) {
                match &mut entry.backing {
                    Backing::Ordered(tree) => {
                        let key = match entry.kind {
                            IndexKind::Lexical => build_lexical_key(value, pk, name),
                            IndexKind::Decimal => build_decimal_key(value, pk, name),
                            IndexKind::Token => unreachable!(),
                        };
                        tree.delete_exact(&key, pk)?;
                    }
                    Backing::Token(tok) => tok.out(pk, value)?,
                }
            }
        }
        Ok(())
    }

    pub fn flush_all_tokens(&mut self) -> Result<()> {
        for entry in self.indices.values_mut() {
            if let Backing::Token(tok) = &mut entry.backing {
                tok.flush()?;
            }
        }
        Ok(())
    }

    pub fn clear_all_token_buffers(&mut self) {
        for entry in self.indices.values_mut() {
            if let Backing::Token(tok) = &mut entry.backing {
                tok.vanish().ok();
            }
        }
    }

    pub fn sync_all(&self) -> Result<()> {
        for entry in self.indices.values() {
            match &entry.backing {
                Backing::Ordered(tree) => tree.sync()?,
                Backing::Token(tok) => tok.tree().sync()?,
            }
        }
        Ok(())
    }

    pub fn vanish_all(&mut self) -> Result<()> {
        for entry in self.indices.values_mut() {
            match &mut entry.backing {
                Backing::Ordered(tree) => tree.vanish()?,
                Backing::Token(tok) => tok.vanish()?,
            }
        }
        Ok(())
    }

    pub fn copy_all(&mut self, dest_base: &Path) -> Result<()> {
        self.flush_all_tokens()?;
        for (column, entry) in self.indices.iter() {
            let kind = entry.kind;
            let dest = BTreeStore::index_path(dest_base, column, kind);
            match &entry.backing {
                Backing::Ordered(tree) => tree.copy_to(&dest)?,
                Backing::Token(tok) => tok.tree().copy_to(&dest)?,
            }
        }
        Ok(())
    }

    // --- lookup primitives driving the query planner (§4.5) ---

    pub fn lexical_eq(&self, column: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>> {
        let entry = self.require_ordered(column)?;
        if is_pk_index(column) {
            Ok(if entry.get_exact(value, value)? { vec![value.to_vec()] } else { vec![] })
        } else {
            let mut prefix = value.to_vec();
            prefix.push(0u8);
            Ok(entry.scan_prefix(&prefix)?.into_iter().map(|(_, pk)| pk).collect())
        }
    }

    pub fn lexical_prefix(&self, column: &[u8], prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let entry = self.require_ordered(column)?;
        Ok(entry.scan_prefix(prefix)?.into_iter().map(|(_, pk)| pk).collect())
    }

    pub fn lexical_all_ordered(&self, column: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entry = self.require_ordered(column)?;
        entry.scan_all()
    }

    /// Returns `(numeric-or-none, pk)` pairs across the whole decimal
    /// index, in ascending composite-key order: the numeric group
    /// (ascending by value) followed by the non-numeric fallback group
    /// (ascending by raw bytes).
    pub fn decimal_all(&self, column: &[u8]) -> Result<Vec<(Option<f64>, Vec<u8>)>> {
        let entry = self.require_ordered(column)?;
        let mut out = Vec::new();
        for (key, pk) in entry.scan_all()? {
            out.push((decode_decimal_key(&key), pk));
        }
        Ok(out)
    }

    pub fn decimal_from(&self, column: &[u8], n: f64) -> Result<Vec<(Option<f64>, Vec<u8>)>> {
        let entry = self.require_ordered(column)?;
        let seek = decimal_seek_key(n);
        let mut out = Vec::new();
        for (key, pk) in entry.scan_from(&seek)? {
            out.push((decode_decimal_key(&key), pk));
        }
        Ok(out)
    }

    pub fn token_postings(&self, column: &[u8], token: &[u8]) -> Result<Vec<Vec<u8>>> {
        let entry = self.require_token(column)?;
        entry.get(token)
    }

    fn require_ordered(&self, column: &[u8]) -> Result<&BTreeStore> {
        match self.indices.get(column) {
            Some(IndexEntry { backing: Backing::Ordered(tree), .. }) => Ok(tree),
            Some(_) => Err(Error::InvalidArgument(format!(
                "index on {:?} is not ordered",
                column
            ))),
            None => Err(Error::NoRecord(format!("no index on column {:?}", column))),
        }
    }

    fn require_token(&self, column: &[u8]) -> Result<&TokenIndex> {
        match self.indices.get(column) {
            Some(IndexEntry { backing: Backing::Token(tok), .. }) => Ok(tok),
            Some(_) => Err(Error::InvalidArgument(format!(
                "index on {:?} is not a token index",
                column
            ))),
            None => Err(Error::NoRecord(format!("no index on column {:?}", column))),
        }
    }
}

fn decode_decimal_key(key: &[u8]) -> Option<f64> {
    if key.first() == Some(&DECIMAL_TAG_NUMERIC) && key.len() >= 9 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[1..9]);
        Some(util::sortable_f64_decode(&buf))
    } else {
        None
    }
}

/// Compute the (entries-to-remove, entries-to-add) delta between an
/// old and new column map, per §4.2's "Record delta on overwrite". Both
/// maps are expected to already carry the primary-key pseudo-column
/// (empty name -> pk bytes) when a primary-key index is in play; the
/// caller (`Tdb::apply_write`) is responsible for that augmentation.
pub fn compute_delta(old: Option<&ColumnMap>, new: &ColumnMap) -> (ColumnMap, ColumnMap) {
    let mut to_remove = ColumnMap::new();
    let mut to_add = ColumnMap::new();
    if let Some(old) = old {
        for (name, value) in old.iter() {
            if !new.contains(name, value) {
                to_remove.insert(name, value);
            }
        }
    }
    for (name, value) in new.iter() {
        let unchanged = old.map(|o| o.contains(name, value)).unwrap_or(false);
        if !unchanged {
            to_add.insert(name, value);
        }
    }
    (to_remove, to_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_on_fresh_insert_adds_everything() {
        let mut new = ColumnMap::new();
        new.insert("name", "Alice");
        new.insert("age", "30");
        let (remove, add) = compute_delta(None, &new);
        assert!(remove.is_empty());
        assert_eq!(add.len(), 2);
    }

    #[test]
    fn delta_on_partial_update_is_minimal() {
        let mut old = ColumnMap::new();
        old.insert("name", "Alice");
        old.insert("age", "30");
        let mut new = ColumnMap::new();
        new.insert("name", "Alice");
        new.insert("age", "31");
        let (remove, add) = compute_delta(Some(&old), &new);
        assert_eq!(remove.iter().collect::<Vec<_>>(), vec![(b"age".as_ref(), b"30".as_ref())]);
        assert_eq!(add.iter().collect::<Vec<_>>(), vec![(b"age".as_ref(), b"31".as_ref())]);
    }

    #[test]
    fn decimal_key_groups_numeric_before_text() {
        let numeric = build_decimal_key(b"10", b"pk1", b"age");
        let text = build_decimal_key(b"n/a", b"pk2", b"age");
        assert!(numeric < text);
    }
}
