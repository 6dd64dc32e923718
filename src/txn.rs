//! C6 — Transaction coordinator.
//!
//! §3's Lifecycle describes transactions as "all writes are staged;
//! commit persists them across hash store and all indices, abort
//! discards them." This crate stages writes as an in-memory overlay
//! (latest write per primary key wins, matching ordinary sequential
//! semantics) rather than holding open nested transactions against
//! every per-index LMDB environment — see DESIGN.md for why. Reads
//! made while a transaction is open consult the overlay first, which
//! is exactly the "no snapshot isolation, observe uncommitted state"
//! visibility §5 calls for.

use std::collections::HashMap;
use std::time::Duration;

use crate::codec::ColumnMap;
use crate::error::{Error, Result};

/// A pending write captured inside an open transaction.
#[derive(Clone)]
pub enum Staged {
    Put(ColumnMap),
    Out,
}

#[derive(Default)]
pub struct TxnState {
    open: bool,
    overlay: HashMap<Vec<u8>, Staged>,
}

impl TxnState {
    pub fn new() -> TxnState {
        TxnState::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::InvalidState("transaction already open".into()));
        }
        self.open = true;
        self.overlay.clear();
        Ok(())
    }

    /// Backoff policy for callers contending on the same handle's
    /// transaction slot: exponential, capped at one second, per §4.4.
    pub fn backoff_delay(attempt: u32) -> Duration {
        let millis = 10u64.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(millis.min(1000))
    }

    pub fn stage_put(&mut self, pk: &[u8], cols: ColumnMap) -> Result<()> {
        self.require_open()?;
        self.overlay.insert(pk.to_vec(), Staged::Put(cols));
        Ok(())
    }

    pub fn stage_out(&mut self, pk: &[u8]) -> Result<()> {
        self.require_open()?;
        self.overlay.insert(pk.to_vec(), Staged::Out);
        Ok(())
    }

    pub fn overlay_get(&self, pk: &[u8]) -> Option<&Staged> {
        self.overlay.get(pk)
    }

    /// Drain the overlay for `commit`, in no particular order (each
    /// staged pk is independent; last-write-per-pk already collapsed).
    pub fn drain(&mut self) -> Vec<(Vec<u8>, Staged)> {
        self.open = false;
        self.overlay.drain().collect()
    }

    pub fn abort(&mut self) {
        self.open = false;
        self.overlay.clear();
    }

    fn require_open(&self) -> Result<()> {
        if !self.open {
            Err(Error::InvalidState("no transaction is open".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_twice_fails() {
        let mut t = TxnState::new();
        t.begin().unwrap();
        assert!(t.begin().is_err());
    }

    #[test]
    fn abort_clears_overlay() {
        let mut t = TxnState::new();
        t.begin().unwrap();
        t.stage_put(b"k1", ColumnMap::new()).unwrap();
        t.abort();
        assert!(!t.is_open());
        assert!(t.overlay_get(b"k1").is_none());
    }

    #[test]
    fn last_write_per_key_wins() {
        let mut t = TxnState::new();
        t.begin().unwrap();
        let mut m1 = ColumnMap::new();
        m1.insert("a", "1");
        t.stage_put(b"k1", m1).unwrap();
        t.stage_out(b"k1").unwrap();
        let staged = t.overlay_get(b"k1").unwrap();
        assert!(matches!(staged, Staged::Out));
    }
}
