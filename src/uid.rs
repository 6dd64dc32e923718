//! C9 — UID generator.
//!
//! The first 8 bytes of the hash store's opaque header region (§6.1)
//! hold a little-endian `u64` counter. Mutation is always performed
//! under the writer side of the method lock, so a plain (non-atomic)
//! read-modify-write against the header is race-free — unlike the
//! `AtomicU64` seqno counter the teacher's `wral::journals::Journals`
//! keeps in memory (grounded there), this counter's source of truth
//! is the persisted header itself, so no separate atomic is needed.

use crate::engine::HashStore;
use crate::error::Result;

pub struct UidGenerator<'a> {
    store: &'a HashStore,
}

impl<'a> UidGenerator<'a> {
    pub fn new(store: &'a HashStore) -> UidGenerator<'a> {
        UidGenerator { store }
    }

    fn read(&self) -> Result<u64> {
        let header = self.store.header()?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&header[..8]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn write(&self, value: u64) -> Result<()> {
        let mut header = self.store.header()?;
        header[..8].copy_from_slice(&value.to_le_bytes());
        self.store.set_header(&header)
    }

    /// Current seed, without incrementing.
    pub fn seed(&self) -> Result<u64> {
        self.read()
    }

    /// Atomically (with respect to the method lock) increment and
    /// return the new value. Strictly increasing across successful
    /// calls, per §3 invariant 3 and §8's quantified property 6.
    pub fn genuid(&self) -> Result<u64> {
        let next = self.read()?.wrapping_add(1);
        self.write(next)?;
        Ok(next)
    }

    pub fn set_seed(&self, value: u64) -> Result<()> {
        self.write(value)
    }
}
