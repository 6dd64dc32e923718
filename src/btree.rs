//! C2 — B+-Tree Store adapter, backing a single secondary index.
//!
//! Each index gets its own LMDB environment at the file path §6.1
//! prescribes (`P.idx.urlencode(C).{lex|dec|tok}`), opened
//! `NO_SUB_DIR` so the path names a single file rather than a
//! directory, matching the "one index, one file" contract callers can
//! `fs::remove_file` on `VOID`.
//!
//! Lexical and decimal indices use a `DUP_SORT` database so several
//! primary keys can share a composite key (possible on a 16-bit
//! disambiguator collision, per §4.2); the token index uses a plain
//! database since its values are opaque concatenated postings blobs,
//! not duplicate-sorted entries.

use std::path::{Path, PathBuf};

use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction,
    WriteFlags,
};

use crate::config::OpenFlags;
use crate::error::Result;

const INDEX_DB: &str = "index";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Lexical,
    Decimal,
    Token,
}

impl IndexKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            IndexKind::Lexical => "lex",
            IndexKind::Decimal => "dec",
            IndexKind::Token => "tok",
        }
    }

    pub fn from_suffix(s: &str) -> Option<IndexKind> {
        match s {
            "lex" => Some(IndexKind::Lexical),
            "dec" => Some(IndexKind::Decimal),
            "tok" => Some(IndexKind::Token),
            _ => None,
        }
    }

    fn dup_sorted(&self) -> bool {
        !matches!(self, IndexKind::Token)
    }
}

pub struct BTreeStore {
    env: Environment,
    db: Database,
    path: PathBuf,
    kind: IndexKind,
}

impl BTreeStore {
    /// File name for the index on `column` of the given `kind`, rooted
    /// at the table database's base path.
    pub fn index_path(base: &Path, column: &[u8], kind: IndexKind) -> PathBuf {
        let base_name = base.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let file = format!("{}.idx.{}.{}", base_name, crate::util::urlencode(column), kind.suffix());
        base.with_file_name(file)
    }

    pub fn open(path: &Path, kind: IndexKind, mode: OpenFlags, create: bool) -> Result<BTreeStore> {
        let mut flags = EnvironmentFlags::NO_SUB_DIR;
        if mode.contains(OpenFlags::NOLCK) {
            flags |= EnvironmentFlags::NO_LOCK;
        }
        if !mode.contains(OpenFlags::TSYNC) {
            flags |= EnvironmentFlags::NO_SYNC;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let env = Environment::new()
            .set_flags(flags)
            .set_max_dbs(1)
            .set_map_size(64 * 1024 * 1024)
            .open(path)?;

        let db_flags = if kind.dup_sorted() {
            DatabaseFlags::DUP_SORT
        } else {
            DatabaseFlags::empty()
        };
        let db = if create {
            env.create_db(Some(INDEX_DB), db_flags)?
        } else {
            env.open_db(Some(INDEX_DB))?
        };
        Ok(BTreeStore { env, db, path: path.to_path_buf(), kind })
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert `value` under `key`, allowing duplicates for dup-sorted
    /// (lexical/decimal) trees; for the token tree this overwrites.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    /// Exact-match lookup: for dup-sorted trees, whether `value` is one
    /// of the duplicates under `key`; for the token tree, whether the
    /// stored blob equals `value`.
    pub fn get_exact(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        for item in cursor.iter_dup_of(&key)? {
            let (_, v) = item;
            if v == value {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get_blob(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key) {
            Ok(v) => Ok(Some(v.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_exact(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key, Some(value)) {
            Ok(()) => {
                txn.commit()?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_key(&self, key: &[u8]) -> Result<bool> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key, None) {
            Ok(()) => {
                txn.commit()?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put_blob(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    /// Iterate all `(key, value)` pairs whose key starts with `prefix`,
    /// in ascending byte order, used for STRBW and ordered-scan plans.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut out = Vec::new();
        for item in cursor.iter_from(prefix) {
            let (k, v) = item;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Iterate all `(key, value)` pairs in ascending key order starting
    /// from `from` (inclusive), used by range scans (NUMGE/NUMGT/NUMBT)
    /// and order-driven plans.
    pub fn scan_from(&self, from: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut out = Vec::new();
        for item in cursor.iter_from(from) {
            let (k, v) = item;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut out = Vec::new();
        for item in cursor.iter_start() {
            let (k, v) = item;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn begin(&self) -> Result<RwTransaction> {
        Ok(self.env.begin_rw_txn()?)
    }

    pub fn sync(&self) -> Result<()> {
        self.env.sync(true)?;
        Ok(())
    }

    pub fn vanish(&self) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.db)?;
        txn.commit()?;
        Ok(())
    }

    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        std::fs::copy(&self.path, dest)?;
        Ok(())
    }

    pub fn remove_file(&self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .map_err(|e| crate::error::Error::Unlink(format!("{:?}", self.path), e))
    }
}
