//! Column-map wire codec (§4.1).
//!
//! A record's column map is an ordered sequence of (name, value) byte
//! strings. On disk it is a flat run of `(name_len, value_len, name,
//! value)` entries, each length a little-endian `u32`. Entry order on
//! the wire is insertion order, so `load(dump(m)) == m`.

use std::convert::TryInto;

use crate::error::{Error, Result};

/// An ordered column-name -> column-value mapping. Backed by a `Vec`
/// rather than a `HashMap` so iteration order is preserved, matching
/// the wire format's insertion-order guarantee.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnMap {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl ColumnMap {
    pub fn new() -> ColumnMap {
        ColumnMap { entries: Vec::new() }
    }

    /// Insert or overwrite a column. Overwriting preserves the column's
    /// original position, matching a `BTreeMap`-like overwrite but
    /// keeping the ordered-map contract callers rely on for `dump`.
    pub fn insert(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == &name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_slice() == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<Vec<u8>> {
        let idx = self.entries.iter().position(|(n, _)| n.as_slice() == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &[u8], value: &[u8]) -> bool {
        self.entries
            .iter()
            .any(|(n, v)| n.as_slice() == name && v.as_slice() == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject the reserved empty column name, per spec.md §3.
    pub fn validate(&self) -> Result<()> {
        if self.entries.iter().any(|(n, _)| n.is_empty()) {
            return Err(Error::InvalidArgument(
                "empty column name is reserved".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to the on-disk wire form.
    pub fn dump(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.iter().map(|(n, v)| 8 + n.len() + v.len()).sum());
        for (name, value) in &self.entries {
            buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(name);
            buf.extend_from_slice(value);
        }
        buf
    }

    /// Deserialize the wire form produced by [`ColumnMap::dump`].
    pub fn load(bytes: &[u8]) -> Result<ColumnMap> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let (name, value, next) = read_entry(bytes, pos)?;
            entries.push((name.to_vec(), value.to_vec()));
            pos = next;
        }
        Ok(ColumnMap { entries })
    }

    /// Scan the wire form for a single column without materializing the
    /// full map, for the hot single-condition query path (§4.5).
    pub fn load_one(bytes: &[u8], name: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut pos = 0;
        while pos < bytes.len() {
            let (entry_name, value, next) = read_entry(bytes, pos)?;
            if entry_name == name {
                return Ok(Some(value.to_vec()));
            }
            pos = next;
        }
        Ok(None)
    }
}

impl FromIterator<(Vec<u8>, Vec<u8>)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
        let mut map = ColumnMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

fn read_entry(bytes: &[u8], pos: usize) -> Result<(&[u8], &[u8], usize)> {
    if bytes.len() < pos + 8 {
        return Err(Error::Encoding("truncated column-map header".into()));
    }
    let name_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
    let value_len = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
    let name_start = pos + 8;
    let value_start = name_start + name_len;
    let value_end = value_start + value_len;
    if bytes.len() < value_end {
        return Err(Error::Encoding("truncated column-map entry".into()));
    }
    Ok((&bytes[name_start..value_start], &bytes[value_start..value_end], value_end))
}

use std::iter::FromIterator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_load_roundtrip_preserves_order() {
        let mut m = ColumnMap::new();
        m.insert("name", "Alice");
        m.insert("age", "30");
        m.insert("city", "NYC");
        let bytes = m.dump();
        let back = ColumnMap::load(&bytes).unwrap();
        assert_eq!(m, back);
        assert_eq!(back.iter().collect::<Vec<_>>()[0].0, b"name");
    }

    #[test]
    fn load_one_scans_without_materializing() {
        let mut m = ColumnMap::new();
        m.insert("name", "Alice");
        m.insert("age", "30");
        let bytes = m.dump();
        assert_eq!(ColumnMap::load_one(&bytes, b"age").unwrap(), Some(b"30".to_vec()));
        assert_eq!(ColumnMap::load_one(&bytes, b"missing").unwrap(), None);
    }

    #[test]
    fn overwrite_preserves_position() {
        let mut m = ColumnMap::new();
        m.insert("a", "1");
        m.insert("b", "2");
        m.insert("a", "3");
        let entries: Vec<_> = m.iter().collect();
        assert_eq!(entries, vec![(b"a".as_ref(), b"3".as_ref()), (b"b".as_ref(), b"2".as_ref())]);
    }

    #[test]
    fn validate_rejects_empty_column_name() {
        let mut m = ColumnMap::new();
        m.insert("", "x");
        assert!(m.validate().is_err());
    }
}
