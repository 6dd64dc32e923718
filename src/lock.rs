//! C10 — Method lock.
//!
//! A single process-wide reader-writer lock per `Tdb` handle, entered
//! by every public operation in the appropriate mode before it touches
//! any state (§4.7, step 1) — reads take the reader side, mutations
//! take the writer side. `qry_proc` holds its writer guard for an
//! entire multi-record walk instead of per record, making it atomic
//! relative to every other call, which also goes through this same
//! lock; `qry_proc2` and a few other multi-record walks re-enter the
//! lock once per record instead, per §4.5's non-atomic variant.
//! Grounded in the teacher's `wral::wral::Wal`, which shares an
//! `Arc<RwLock<Journals<S>>>` across clones for exactly this kind of
//! single-process multi-reader/one-writer coordination.
//!
//! When the handle was opened without a mutex configured (`NOLCK`),
//! the lock degrades to a no-op and the caller promises
//! single-threaded access, per §4.7.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

pub enum ReadGuard<'a> {
    Locked(RwLockReadGuard<'a, ()>),
    Unlocked,
}

pub enum WriteGuard<'a> {
    Locked(RwLockWriteGuard<'a, ()>),
    Unlocked,
}

pub struct MethodLock {
    inner: Option<RwLock<()>>,
}

impl MethodLock {
    pub fn new(enabled: bool) -> MethodLock {
        MethodLock { inner: if enabled { Some(RwLock::new(())) } else { None } }
    }

    pub fn read(&self) -> Result<ReadGuard<'_>> {
        match &self.inner {
            Some(lock) => {
                let guard = lock.read().map_err(|e| Error::Threading(e.to_string()))?;
                Ok(ReadGuard::Locked(guard))
            }
            None => Ok(ReadGuard::Unlocked),
        }
    }

    pub fn write(&self) -> Result<WriteGuard<'_>> {
        match &self.inner {
            Some(lock) => {
                let guard = lock.write().map_err(|e| Error::Threading(e.to_string()))?;
                Ok(WriteGuard::Locked(guard))
            }
            None => Ok(WriteGuard::Unlocked),
        }
    }
}
