//! C1 — Hash Store adapter.
//!
//! §1 treats the primary hash store's byte-level file format as an
//! external collaborator "specified elsewhere." This crate backs it
//! with an LMDB environment opened on a single file at the database's
//! base path, matching the `Environment` + `Database` handle pattern
//! the teacher's own (optional) `lmdb` dependency wraps around the
//! `rdms` binary's on-disk experiments. Two sub-databases live in the
//! environment: `records` (pk -> serialized column map) and `meta`
//! (the 64-byte opaque header of §6.1, under a single fixed key).

use std::path::Path;

use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, RoTransaction, RwTransaction,
    Transaction, WriteFlags,
};

use crate::config::{Config, OpenFlags};
use crate::error::Result;

const RECORDS_DB: &str = "records";
const META_DB: &str = "meta";
const HEADER_KEY: &[u8] = b"header";
pub const HEADER_SIZE: usize = 64;

pub struct HashStore {
    env: Environment,
    records: Database,
    meta: Database,
    writable: bool,
    path: std::path::PathBuf,
}

fn to_env_flags(mode: OpenFlags, tsync: bool) -> EnvironmentFlags {
    let mut flags = EnvironmentFlags::NO_SUB_DIR;
    if mode.contains(OpenFlags::READER) && !mode.contains(OpenFlags::WRITER) {
        flags |= EnvironmentFlags::READ_ONLY;
    }
    if mode.contains(OpenFlags::NOLCK) {
        flags |= EnvironmentFlags::NO_LOCK;
    }
    if mode.contains(OpenFlags::LCKNB) {
        flags |= EnvironmentFlags::NO_TLS;
    }
    if !tsync {
        flags |= EnvironmentFlags::NO_SYNC;
    }
    flags
}

impl HashStore {
    pub fn open(path: &Path, mode: OpenFlags, config: &Config) -> Result<HashStore> {
        if mode.contains(OpenFlags::TRUNC) {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(path.with_extension("lock"));
        }
        let writable = mode.contains(OpenFlags::WRITER);
        let tsync = mode.contains(OpenFlags::TSYNC);
        let flags = to_env_flags(mode, tsync);

        if mode.contains(OpenFlags::CREATE) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let map_size = std::cmp::max(config.xmsiz as usize, 16 * 1024 * 1024);
        let env = Environment::new()
            .set_flags(flags)
            .set_max_dbs(2)
            .set_map_size(map_size)
            .open(path)?;

        let (records, meta) = if writable {
            (
                env.create_db(Some(RECORDS_DB), DatabaseFlags::empty())?,
                env.create_db(Some(META_DB), DatabaseFlags::empty())?,
            )
        } else {
            (env.open_db(Some(RECORDS_DB))?, env.open_db(Some(META_DB))?)
        };

        let mut store = HashStore { env, records, meta, writable, path: path.to_path_buf() };
        store.ensure_header()?;
        Ok(store)
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        let mut txn = self.env.begin_rw_txn()?;
        if txn.get(self.meta, &HEADER_KEY).is_err() {
            txn.put(self.meta, &HEADER_KEY, &vec![0u8; HEADER_SIZE], WriteFlags::empty())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, pk: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.records, &pk) {
            Ok(v) => Ok(Some(v.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, pk: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.records, &pk, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    pub fn put_no_overwrite(&self, pk: &[u8], value: &[u8]) -> Result<bool> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.put(self.records, &pk, &value, WriteFlags::NO_OVERWRITE) {
            Ok(()) => {
                txn.commit()?;
                Ok(true)
            }
            Err(lmdb::Error::KeyExist) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn out(&self, pk: &[u8]) -> Result<bool> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.records, &pk, None) {
            Ok(()) => {
                txn.commit()?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn rnum(&self) -> Result<u64> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.records)?;
        Ok(cursor.iter_start().count() as u64)
    }

    /// Full-table iteration in the hash store's natural (bucket) order.
    /// LMDB orders `records` by key bytes, which this crate treats as
    /// an acceptable substitute for hash-bucket order: both are
    /// "unspecified but stable between writes," matching §3's lack of
    /// an ordering guarantee for natural scans.
    pub fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.records)?;
        let mut out = Vec::new();
        for item in cursor.iter_start() {
            let (k, v) = item;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    pub fn fwmkeys(&self, prefix: &[u8], max: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.records)?;
        let mut out = Vec::new();
        for item in cursor.iter_from(prefix) {
            let (k, _v) = item;
            if !k.starts_with(prefix) {
                break;
            }
            out.push(k.to_vec());
            if let Some(max) = max {
                if out.len() >= max {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn header(&self) -> Result<[u8; HEADER_SIZE]> {
        let txn = self.env.begin_ro_txn()?;
        let bytes = txn.get(self.meta, &HEADER_KEY)?;
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn set_header(&self, header: &[u8; HEADER_SIZE]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.meta, &HEADER_KEY, &header.as_ref(), WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    pub fn begin(&self) -> Result<RwTransaction> {
        Ok(self.env.begin_rw_txn()?)
    }

    pub fn begin_ro(&self) -> Result<RoTransaction> {
        Ok(self.env.begin_ro_txn()?)
    }

    pub fn sync(&self) -> Result<()> {
        self.env.sync(true)?;
        Ok(())
    }

    pub fn vanish(&self) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.records)?;
        txn.commit()?;
        self.ensure_header_locked()?;
        Ok(())
    }

    fn ensure_header_locked(&self) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.meta, &HEADER_KEY, &vec![0u8; HEADER_SIZE], WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        std::fs::copy(&self.path, dest)?;
        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

pub use lmdb::Error as LmdbError;
