use tempfile::tempdir;

use crate::btree::IndexKind;
use crate::index::SetIndexMode;
use crate::tdb::Tdb;
use crate::{ColumnMap, Config, OpenFlags, Query};

fn open_rw(dir: &tempfile::TempDir, name: &str) -> Tdb {
    let config = Config::new(dir.path().to_str().unwrap(), name);
    let path = dir.path().join(name);
    Tdb::open(&path, OpenFlags::WRITER | OpenFlags::CREATE | OpenFlags::READER, config).unwrap()
}

fn cols(pairs: &[(&str, &str)]) -> ColumnMap {
    let mut m = ColumnMap::new();
    for (k, v) in pairs {
        m.insert(*k, *v);
    }
    m
}

#[test]
fn basic_put_and_get_roundtrips() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "basic.tdb");
    tdb.put(b"pk1", cols(&[("name", "Alice"), ("age", "30")])).unwrap();
    let got = tdb.get(b"pk1").unwrap().unwrap();
    assert_eq!(got.get(b"name"), Some(b"Alice".as_ref()));
    assert_eq!(tdb.rnum().unwrap(), 1);
    assert!(tdb.out(b"pk1").unwrap());
    assert!(tdb.get(b"pk1").unwrap().is_none());
}

#[test]
fn lexical_index_drives_streq() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "lex.tdb");
    tdb.set_index(b"name", IndexKind::Lexical, SetIndexMode::Create).unwrap();
    tdb.put(b"pk1", cols(&[("name", "Alice")])).unwrap();
    tdb.put(b"pk2", cols(&[("name", "Bob")])).unwrap();
    tdb.put(b"pk3", cols(&[("name", "Alice")])).unwrap();

    let mut query = Query::new();
    query.add_cond("name", "STREQ", "Alice").unwrap();
    let mut pks = tdb.qry_search(&mut query).unwrap();
    pks.sort();
    assert_eq!(pks, vec![b"pk1".to_vec(), b"pk3".to_vec()]);
    assert!(query.hint().contains(r#"using an index: "name" asc (STREQ)"#));
}

#[test]
fn decimal_range_and_order() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "dec.tdb");
    tdb.set_index(b"age", IndexKind::Decimal, SetIndexMode::Create).unwrap();
    for (pk, age) in [(b"a", 20), (b"b", 40), (b"c", 60), (b"d", 80)] {
        tdb.put(pk.as_ref(), cols(&[("age", &age.to_string())])).unwrap();
    }

    let mut query = Query::new();
    query.add_cond("age", "NUMGE", "40").unwrap();
    query.set_order("age", "NUMDESC").unwrap();
    let pks = tdb.qry_search(&mut query).unwrap();
    assert_eq!(pks, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec()]);
}

#[test]
fn token_index_strand_requires_every_token() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "tok.tdb");
    tdb.set_index(b"tags", IndexKind::Token, SetIndexMode::Create).unwrap();
    tdb.put(b"p1", cols(&[("tags", "red round fruit")])).unwrap();
    tdb.put(b"p2", cols(&[("tags", "red square box")])).unwrap();

    let mut query = Query::new();
    query.add_cond("tags", "STRAND", "red round").unwrap();
    let pks = tdb.qry_search(&mut query).unwrap();
    assert_eq!(pks, vec![b"p1".to_vec()]);
}

#[test]
fn transaction_abort_discards_writes() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "tran.tdb");
    tdb.put(b"pk1", cols(&[("v", "1")])).unwrap();

    tdb.tranbegin().unwrap();
    tdb.put(b"pk1", cols(&[("v", "2")])).unwrap();
    tdb.put(b"pk2", cols(&[("v", "new")])).unwrap();
    assert_eq!(tdb.get(b"pk1").unwrap().unwrap().get(b"v"), Some(b"2".as_ref()));
    tdb.tranabort().unwrap();

    assert_eq!(tdb.get(b"pk1").unwrap().unwrap().get(b"v"), Some(b"1".as_ref()));
    assert!(tdb.get(b"pk2").unwrap().is_none());
}

#[test]
fn transaction_commit_persists_writes() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "commit.tdb");
    tdb.tranbegin().unwrap();
    tdb.put(b"pk1", cols(&[("v", "1")])).unwrap();
    tdb.trancommit().unwrap();
    assert_eq!(tdb.get(b"pk1").unwrap().unwrap().get(b"v"), Some(b"1".as_ref()));
}

#[test]
fn qry_search_out_deletes_matches() {
    let dir = tempdir().unwrap();
    let tdb = open_rw(&dir, "delout.tdb");
    tdb.set_index(b"name", IndexKind::Lexical, SetIndexMode::Create).unwrap();
    tdb.put(b"p1", cols(&[("name", "Alice")])).unwrap();
    tdb.put(b"p2", cols(&[("name", "Bob")])).unwrap();

    let mut query = Query::new();
    query.add_cond("name", "STREQ", "Alice").unwrap();
    let removed = tdb.qry_search_out(&mut query).unwrap();
    assert_eq!(removed, 1);
    assert!(tdb.get(b"p1").unwrap().is_none());
    assert!(tdb.get(b"p2").unwrap().is_some());
}
