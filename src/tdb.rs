//! C11 — Public API surface.
//!
//! `Tdb` ties together the hash store (C1), index manager (C4/C5), the
//! transaction overlay (C6), the method lock (C10), and the UID
//! generator (C9) behind the operation set of §6.4. Every public
//! operation enters `MethodLock` first, in the mode appropriate to
//! whether it mutates state (§4.7, step 1), and releases it on return;
//! `tranbegin` is the one operation that releases the lock and retries
//! with backoff instead of blocking on it (§4.4). The separate
//! `Mutex<Inner>` underneath is the interior-mutability cell Rust's
//! `&self`-based API requires regardless of `MethodLock`'s mode; a
//! handful of thin wrappers (`vsiz`, `iter_next_cols`, `defrag`,
//! `qry_count`, `qry_search_out`) delegate to another public method
//! rather than taking their own `MethodLock` guard, since the delegate
//! already enters and releases it — taking a second guard around the
//! delegating call would self-deadlock. `qry_proc` is the exception
//! that holds its write guard for the entire multi-record walk
//! (§4.5's atomic variant): it talks to `Inner` through private
//! helpers instead of other public methods, since those also take
//! `MethodLock` and would deadlock against the guard `qry_proc` is
//! still holding.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;

use log::{debug, info, warn};

use crate::btree::IndexKind;
use crate::codec::ColumnMap;
use crate::config::{Config, OpenFlags};
use crate::engine::HashStore;
use crate::error::{Error, Result};
use crate::index::{self, IndexManager, SetIndexMode};
use crate::lock::MethodLock;
use crate::query::{ProcFlags, Query};
use crate::txn::{Staged, TxnState};
use crate::uid::UidGenerator;

struct Inner {
    mode: OpenFlags,
    store: Option<HashStore>,
    indices: Option<IndexManager>,
    txn: TxnState,
    iter_cursor: Option<(Vec<Vec<u8>>, usize)>,
}

impl Inner {
    fn store(&self) -> Result<&HashStore> {
        self.store.as_ref().ok_or_else(|| Error::InvalidState("database is not open".into()))
    }
}

pub struct Tdb {
    base_path: PathBuf,
    config: Mutex<Config>,
    lock: MethodLock,
    inner: Mutex<Inner>,
}

/// Compute the index delta for a record write, augmenting both sides
/// with the primary-key pseudo-column (empty name) when a pk index is
/// configured, per index::compute_delta's documented contract.
fn record_delta(indices: &IndexManager, pk: &[u8], old: Option<&ColumnMap>, new: Option<&ColumnMap>) -> (ColumnMap, ColumnMap) {
    let pk_indexed = indices.has_index(b"");
    let mut old_aug = old.cloned();
    let mut new_aug = new.cloned();
    if pk_indexed {
        if let Some(o) = &mut old_aug {
            o.insert(Vec::new(), pk.to_vec());
        }
        if let Some(n) = &mut new_aug {
            n.insert(Vec::new(), pk.to_vec());
        }
    }
    let empty = ColumnMap::new();
    index::compute_delta(old_aug.as_ref(), new_aug.as_ref().unwrap_or(&empty))
}

fn apply_record_write(inner: &mut Inner, pk: &[u8], new: Option<ColumnMap>) -> Result<()> {
    let old = match inner.store()?.get(pk)? {
        Some(bytes) => Some(ColumnMap::load(&bytes)?),
        None => None,
    };
    if let Some(indices) = &mut inner.indices {
        let (to_remove, to_add) = record_delta(indices, pk, old.as_ref(), new.as_ref());
        indices.out_indices(pk, &to_remove)?;
        indices.put_indices(pk, &to_add)?;
    }
    let store = inner.store()?;
    match new {
        Some(cols) => store.put(pk, &cols.dump()),
        None => {
            store.out(pk)?;
            Ok(())
        }
    }
}

impl Tdb {
    /// Open (and, with `CREATE`, initialize) a table database at
    /// `path` using a [`Config`] tuned beforehand via its setters.
    pub fn open(path: impl AsRef<Path>, mode: OpenFlags, mut config: Config) -> Result<Tdb> {
        let base_path = path.as_ref().to_path_buf();
        let store = HashStore::open(&base_path, mode, &config)?;
        let mut indices = IndexManager::new(&base_path, mode, config.token_flush_threshold);
        indices.discover_and_open()?;
        config.mark_opened();
        debug!(target: "tdb   ", "{:?}, opening with mode {:?}", base_path, mode);
        let tdb = Tdb {
            base_path,
            config: Mutex::new(config),
            lock: MethodLock::new(!mode.contains(OpenFlags::NOLCK)),
            inner: Mutex::new(Inner {
                mode,
                store: Some(store),
                indices: Some(indices),
                txn: TxnState::new(),
                iter_cursor: None,
            }),
        };
        info!(target: "tdb   ", "{:?}, opened", tdb.base_path);
        Ok(tdb)
    }

    /// Parse a `path#key=value#...` connection string and open it,
    /// per §6.3.
    pub fn open_dsn(dsn: &str, mode: OpenFlags) -> Result<Tdb> {
        let (path, config) = crate::config::parse_dsn(dsn)?;
        Tdb::open(path, mode, config)
    }

    pub fn close(&self) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        if let Some(indices) = &mut inner.indices {
            indices.flush_all_tokens()?;
        }
        if let Some(store) = &inner.store {
            store.sync()?;
        }
        inner.store = None;
        inner.indices = None;
        self.config.lock()?.mark_closed();
        info!(target: "tdb   ", "{:?}, closed", self.base_path);
        Ok(())
    }

    fn rnum_locked(inner: &Inner) -> Result<u64> {
        inner.store()?.rnum()
    }

    fn search_locked(query: &mut Query, inner: &Inner) -> Result<Vec<Vec<u8>>> {
        let store = inner.store()?;
        let indices = inner.indices.as_ref().ok_or_else(|| Error::InvalidState("database is not open".into()))?;
        let rnum = Self::rnum_locked(inner)?;
        crate::query::run::search(query, store, indices, rnum)
    }

    pub fn rnum(&self) -> Result<u64> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        Self::rnum_locked(&inner)
    }

    fn read_record(inner: &Inner, pk: &[u8]) -> Result<Option<ColumnMap>> {
        if inner.txn.is_open() {
            match inner.txn.overlay_get(pk) {
                Some(Staged::Put(cols)) => return Ok(Some(cols.clone())),
                Some(Staged::Out) => return Ok(None),
                None => {}
            }
        }
        match inner.store()?.get(pk)? {
            Some(bytes) => Ok(Some(ColumnMap::load(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_record(inner: &mut Inner, pk: &[u8], new: Option<ColumnMap>) -> Result<()> {
        if inner.txn.is_open() {
            match new {
                Some(cols) => inner.txn.stage_put(pk, cols),
                None => inner.txn.stage_out(pk),
            }
        } else {
            apply_record_write(inner, pk, new)
        }
    }

    // --- record operations (§6.4) ---

    pub fn get(&self, pk: &[u8]) -> Result<Option<ColumnMap>> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        Self::read_record(&inner, pk)
    }

    /// Delegates to [`Tdb::get`], which already enters the method lock.
    pub fn vsiz(&self, pk: &[u8]) -> Result<Option<usize>> {
        Ok(self.get(pk)?.map(|cols| cols.dump().len()))
    }

    pub fn put(&self, pk: &[u8], cols: ColumnMap) -> Result<()> {
        cols.validate()?;
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        Self::write_record(&mut inner, pk, Some(cols))
    }

    pub fn put_keep(&self, pk: &[u8], cols: ColumnMap) -> Result<()> {
        cols.validate()?;
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        if Self::read_record(&inner, pk)?.is_some() {
            return Err(Error::KeepViolation(format!("record {:?} already exists", pk)));
        }
        Self::write_record(&mut inner, pk, Some(cols))
    }

    pub fn put_cat(&self, pk: &[u8], cols: ColumnMap) -> Result<()> {
        cols.validate()?;
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let mut merged = Self::read_record(&inner, pk)?.unwrap_or_default();
        for (name, value) in cols.iter() {
            merged.insert(name.to_vec(), value.to_vec());
        }
        Self::write_record(&mut inner, pk, Some(merged))
    }

    pub fn out(&self, pk: &[u8]) -> Result<bool> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let existed = Self::read_record(&inner, pk)?.is_some();
        if existed {
            Self::write_record(&mut inner, pk, None)?;
        }
        Ok(existed)
    }

    /// Adds `amount` to the named column, parsed as a decimal integer.
    /// A missing column starts from 0; a present-but-unparseable column
    /// is left untouched and the call returns `i64::MIN` as the failure
    /// sentinel, matching the original's `tctdbaddint` contract.
    pub fn addint(&self, pk: &[u8], name: &[u8], amount: i64) -> Result<i64> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let mut cols = Self::read_record(&inner, pk)?.unwrap_or_default();
        let current = match cols.get(name) {
            None => 0,
            Some(v) => match std::str::from_utf8(v).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(n) => n,
                None => return Ok(i64::MIN),
            },
        };
        let sum = current + amount;
        cols.insert(name.to_vec(), sum.to_string().into_bytes());
        Self::write_record(&mut inner, pk, Some(cols))?;
        Ok(sum)
    }

    /// Adds `amount` to the named column, parsed as a float. A missing
    /// column starts from 0.0; a present-but-unparseable column is left
    /// untouched and the call returns `f64::NAN` as the failure
    /// sentinel, matching the original's `tctdbadddouble` contract.
    pub fn adddouble(&self, pk: &[u8], name: &[u8], amount: f64) -> Result<f64> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let mut cols = Self::read_record(&inner, pk)?.unwrap_or_default();
        let current = match cols.get(name) {
            None => 0.0,
            Some(v) => match crate::util::parse_leading_number(v) {
                Some(n) => n,
                None => return Ok(f64::NAN),
            },
        };
        let sum = current + amount;
        cols.insert(name.to_vec(), sum.to_string().into_bytes());
        Self::write_record(&mut inner, pk, Some(cols))?;
        Ok(sum)
    }

    /// §4.5's "process callback": `proc` inspects the current record (if
    /// any) and returns flags requesting `PUT`/`OUT`/`NOP`, optionally
    /// with the replacement column map for `PUT`.
    pub fn put_proc<F>(&self, pk: &[u8], mut proc: F) -> Result<bool>
    where
        F: FnMut(Option<&ColumnMap>) -> (ProcFlags, Option<ColumnMap>),
    {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let existing = Self::read_record(&inner, pk)?;
        let (flags, replacement) = proc(existing.as_ref());
        if flags.has(ProcFlags::PUT) {
            if let Some(cols) = &replacement {
                cols.validate()?;
            }
            Self::write_record(&mut inner, pk, replacement)?;
            Ok(true)
        } else if flags.has(ProcFlags::OUT) {
            Self::write_record(&mut inner, pk, None)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // --- iteration (§6.4) ---

    pub fn iter_init(&self) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let mut keys: Vec<Vec<u8>> = inner.store()?.iter_all()?.into_iter().map(|(k, _)| k).collect();
        keys.sort();
        inner.iter_cursor = Some((keys, 0));
        Ok(())
    }

    pub fn iter_init_at(&self, pk: &[u8]) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let mut keys: Vec<Vec<u8>> = inner.store()?.iter_all()?.into_iter().map(|(k, _)| k).collect();
        keys.sort();
        let start = keys.iter().position(|k| k.as_slice() >= pk).unwrap_or(keys.len());
        inner.iter_cursor = Some((keys, start));
        Ok(())
    }

    pub fn iter_next(&self) -> Result<Option<Vec<u8>>> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        match &mut inner.iter_cursor {
            Some((keys, pos)) if *pos < keys.len() => {
                let pk = keys[*pos].clone();
                *pos += 1;
                Ok(Some(pk))
            }
            Some(_) => Ok(None),
            None => Err(Error::InvalidState("iter_init was not called".into())),
        }
    }

    /// Delegates to [`Tdb::iter_next`] and [`Tdb::get`], which each
    /// enter the method lock on their own.
    pub fn iter_next_cols(&self) -> Result<Option<(Vec<u8>, ColumnMap)>> {
        let pk = match self.iter_next()? {
            Some(pk) => pk,
            None => return Ok(None),
        };
        let cols = self.get(&pk)?.unwrap_or_default();
        Ok(Some((pk, cols)))
    }

    pub fn fwmkeys(&self, prefix: &[u8], max: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        inner.store()?.fwmkeys(prefix, max)
    }

    // --- indexing (§4.2) ---

    pub fn set_index(&self, column: &[u8], kind: IndexKind, mode: SetIndexMode) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        if inner.txn.is_open() {
            return Err(Error::InvalidState("set_index while a transaction is open".into()));
        }
        let indices = inner.indices.as_mut().ok_or_else(|| Error::InvalidState("database is not open".into()))?;
        indices.set_index(column, kind, mode)
    }

    // --- UID generator (§4.6) ---

    pub fn genuid(&self) -> Result<u64> {
        let _mlock = self.lock.write()?;
        let inner = self.inner.lock()?;
        UidGenerator::new(inner.store()?).genuid()
    }

    pub fn uid_seed(&self) -> Result<u64> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        UidGenerator::new(inner.store()?).seed()
    }

    pub fn set_uid_seed(&self, value: u64) -> Result<()> {
        let _mlock = self.lock.write()?;
        let inner = self.inner.lock()?;
        UidGenerator::new(inner.store()?).set_seed(value)
    }

    // --- transactions (§4.4) ---

    /// Block (with exponential backoff) until no other transaction is
    /// open on this handle, then begin one.
    pub fn tranbegin(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            {
                let _mlock = self.lock.write()?;
                let mut inner = self.inner.lock()?;
                if !inner.txn.is_open() {
                    inner.txn.begin()?;
                    return Ok(());
                }
                // drop both guards before sleeping, per §4.4's "releases
                // the method lock" retry contract.
            }
            if attempt == 0 {
                debug!(target: "tdb   ", "{:?}, tranbegin blocked on an open transaction", self.base_path);
            }
            thread::sleep(TxnState::backoff_delay(attempt));
            attempt += 1;
        }
    }

    pub fn trancommit(&self) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        let staged = inner.txn.drain();
        for (pk, write) in staged {
            let new = match write {
                Staged::Put(cols) => Some(cols),
                Staged::Out => None,
            };
            apply_record_write(&mut inner, &pk, new)?;
        }
        Ok(())
    }

    pub fn tranabort(&self) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        inner.txn.abort();
        Ok(())
    }

    // --- maintenance (§4.7-§4.8) ---

    pub fn sync(&self) -> Result<()> {
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        if let Some(indices) = &mut inner.indices {
            indices.flush_all_tokens()?;
            indices.sync_all()?;
        }
        inner.store()?.sync()
    }

    pub fn vanish(&self) -> Result<()> {
        warn!(target: "tdb   ", "{:?}, vanishing all records and indices", self.base_path);
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        inner.store()?.vanish()?;
        if let Some(indices) = &mut inner.indices {
            indices.vanish_all()?;
        }
        Ok(())
    }

    /// Rebuild the hash-store file (and, transitively, every index's
    /// backing file) via full copy-then-replace, per §4.8's
    /// defragmentation note that optimization "is a full rewrite, not
    /// an incremental compaction," since LMDB exposes no incremental
    /// page-reclaim hook through the safe wrapper.
    pub fn optimize(&self) -> Result<()> {
        info!(target: "tdb   ", "{:?}, optimizing (full rewrite)", self.base_path);
        let _mlock = self.lock.write()?;
        let mut inner = self.inner.lock()?;
        if let Some(indices) = &mut inner.indices {
            indices.flush_all_tokens()?;
        }
        let tmp = self.base_path.with_extension("optimize.tmp");
        let _ = std::fs::remove_file(&tmp);
        inner.store()?.copy_to(&tmp)?;
        std::fs::rename(&tmp, &self.base_path).map_err(|e| Error::Rename(format!("{:?}", self.base_path), e))?;
        Ok(())
    }

    /// Delegates to [`Tdb::optimize`], which already enters the method
    /// lock.
    pub fn defrag(&self) -> Result<()> {
        self.optimize()
    }

    /// Copy the database to `dest`. A `dest` beginning with `@` is run
    /// as a shell command that receives the raw hash-store file bytes
    /// on its stdin, mirroring §6.6's copy-by-command escape.
    pub fn copy(&self, dest: &str) -> Result<()> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        inner.store()?.sync()?;
        if let Some(command) = dest.strip_prefix('@') {
            let mut file = std::fs::File::open(&self.base_path)?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            let mut child = Command::new("sh").arg("-c").arg(command).stdin(Stdio::piped()).spawn()?;
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(&bytes)?;
            }
            child.wait()?;
            Ok(())
        } else {
            let dest_path = PathBuf::from(dest);
            inner.store()?.copy_to(&dest_path)
        }
    }

    /// Walks every record, entering and releasing the method lock once
    /// per record via [`Tdb::get`]/[`Tdb::out`] rather than for the
    /// whole call, so a long walk doesn't starve other callers.
    pub fn foreach<F>(&self, mut proc: F) -> Result<()>
    where
        F: FnMut(&[u8], &ColumnMap) -> ProcFlags,
    {
        let pks: Vec<Vec<u8>> = {
            let _mlock = self.lock.read()?;
            let inner = self.inner.lock()?;
            inner.store()?.iter_all()?.into_iter().map(|(pk, _)| pk).collect()
        };
        for pk in pks {
            let cols = match self.get(&pk)? {
                Some(c) => c,
                None => continue,
            };
            let flags = proc(&pk, &cols);
            if flags.has(ProcFlags::OUT) {
                self.out(&pk)?;
            }
            if flags.has(ProcFlags::STOP) {
                break;
            }
        }
        Ok(())
    }

    // --- query execution (§4.5) ---

    pub fn qry_search(&self, query: &mut Query) -> Result<Vec<Vec<u8>>> {
        let _mlock = self.lock.read()?;
        let inner = self.inner.lock()?;
        Self::search_locked(query, &inner)
    }

    /// Delegates to [`Tdb::qry_search`], which already enters the
    /// method lock.
    pub fn qry_count(&self, query: &mut Query) -> Result<usize> {
        Ok(self.qry_search(query)?.len())
    }

    /// Delegates to [`Tdb::qry_search`] and [`Tdb::out`], each of which
    /// enters the method lock per call rather than for the whole
    /// deletion pass.
    pub fn qry_search_out(&self, query: &mut Query) -> Result<usize> {
        let pks = self.qry_search(query)?;
        let mut removed = 0;
        for pk in pks {
            if self.out(&pk)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Holds the method lock's write side for the entire call, per
    /// §4.5's atomic `qry_proc` variant — the search, every callback,
    /// and every resulting `out` are one step as seen by any other
    /// caller, since every other public method also enters this same
    /// lock before touching `Inner`. Talks to `Inner` through the
    /// private `search_locked`/`read_record`/`write_record` helpers
    /// instead of other public methods, since those would try to
    /// re-enter the write guard this call is still holding.
    pub fn qry_proc<F>(&self, query: &mut Query, mut proc: F) -> Result<()>
    where
        F: FnMut(&[u8], &ColumnMap) -> ProcFlags,
    {
        let _mlock = self.lock.write()?;
        let pks = {
            let inner = self.inner.lock()?;
            Self::search_locked(query, &inner)?
        };
        for pk in pks {
            let cols = {
                let inner = self.inner.lock()?;
                Self::read_record(&inner, &pk)?
            };
            let cols = match cols {
                Some(c) => c,
                None => continue,
            };
            let flags = proc(&pk, &cols);
            if flags.has(ProcFlags::OUT) {
                let mut inner = self.inner.lock()?;
                if Self::read_record(&inner, &pk)?.is_some() {
                    Self::write_record(&mut inner, &pk, None)?;
                }
            }
            if flags.has(ProcFlags::STOP) {
                break;
            }
        }
        Ok(())
    }

    /// Non-atomic variant: every record's read (via [`Tdb::get`]) and
    /// any resulting delete (via [`Tdb::out`]) enters and releases the
    /// method lock on its own, so other threads can interleave between
    /// records, per §4.5's "non-atomic variant" note — callers accept
    /// that the result set may reflect concurrent mutation mid-walk.
    pub fn qry_proc2<F>(&self, query: &mut Query, mut proc: F) -> Result<()>
    where
        F: FnMut(&[u8], &ColumnMap) -> ProcFlags,
    {
        let pks = self.qry_search(query)?;
        for pk in pks {
            let cols = match self.get(&pk)? {
                Some(c) => c,
                None => continue,
            };
            let flags = proc(&pk, &cols);
            if flags.has(ProcFlags::OUT) {
                self.out(&pk)?;
            }
            if flags.has(ProcFlags::STOP) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tdb_test.rs"]
mod tdb_test;
