//! Black-box end-to-end scenarios with the literal values from §8,
//! run against the public crate surface rather than any internal
//! module.

use tempfile::tempdir;

use trdb::{ColumnMap, Config, IndexKind, OpenFlags, SetIndexMode, Tdb};

fn open(dir: &tempfile::TempDir, name: &str) -> Tdb {
    let config = Config::new(dir.path().to_str().unwrap(), name);
    let path = dir.path().join(name);
    let mode = OpenFlags::WRITER | OpenFlags::CREATE | OpenFlags::TRUNC | OpenFlags::READER;
    Tdb::open(&path, mode, config).unwrap()
}

fn cols(pairs: &[(&str, &str)]) -> ColumnMap {
    let mut m = ColumnMap::new();
    for (k, v) in pairs {
        m.insert(*k, *v);
    }
    m
}

#[test]
fn scenario_1_basic_put_get() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s1.tdb");

    let record = cols(&[("name", "Alice"), ("age", "30")]);
    tdb.put(b"k1", record.clone()).unwrap();

    assert_eq!(tdb.get(b"k1").unwrap().unwrap(), record);
    assert_eq!(tdb.vsiz(b"k1").unwrap(), Some(record.dump().len()));
    assert_eq!(tdb.rnum().unwrap(), 1);
}

#[test]
fn scenario_2_lexical_index_drives_streq() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s2.tdb");
    tdb.set_index(b"name", IndexKind::Lexical, SetIndexMode::Create).unwrap();

    tdb.put(b"k1", cols(&[("name", "Alice")])).unwrap();
    tdb.put(b"k2", cols(&[("name", "Bob")])).unwrap();
    tdb.put(b"k3", cols(&[("name", "Alice")])).unwrap();

    let mut query = trdb::Query::new();
    query.add_cond("name", "STREQ", "Alice").unwrap();
    let mut pks = tdb.qry_search(&mut query).unwrap();
    pks.sort();
    assert_eq!(pks, vec![b"k1".to_vec(), b"k3".to_vec()]);
    assert!(query.hint().contains(r#"using an index: "name" asc (STREQ)"#));
}

#[test]
fn scenario_3_decimal_range_and_order() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s3.tdb");
    tdb.set_index(b"age", IndexKind::Decimal, SetIndexMode::Create).unwrap();

    tdb.put(b"a", cols(&[("age", "10")])).unwrap();
    tdb.put(b"b", cols(&[("age", "25")])).unwrap();
    tdb.put(b"c", cols(&[("age", "7")])).unwrap();
    tdb.put(b"d", cols(&[("age", "100")])).unwrap();

    let mut query = trdb::Query::new();
    query.add_cond("age", "NUMGE", "10").unwrap();
    query.set_order("age", "NUMASC").unwrap();
    query.set_limit(2, 0);
    let pks = tdb.qry_search(&mut query).unwrap();
    assert_eq!(pks, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn scenario_4_token_and() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s4.tdb");
    tdb.set_index(b"tags", IndexKind::Token, SetIndexMode::Create).unwrap();

    tdb.put(b"x", cols(&[("tags", "red blue green")])).unwrap();
    tdb.put(b"y", cols(&[("tags", "red yellow")])).unwrap();
    tdb.put(b"z", cols(&[("tags", "blue green red")])).unwrap();

    let mut query = trdb::Query::new();
    query.add_cond("tags", "STRAND", "red green").unwrap();
    let mut pks = tdb.qry_search(&mut query).unwrap();
    pks.sort();
    assert_eq!(pks, vec![b"x".to_vec(), b"z".to_vec()]);
}

#[test]
fn scenario_5_transaction_abort() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s5.tdb");

    let pre_k1 = cols(&[("name", "Carol")]);
    tdb.put(b"k1", pre_k1.clone()).unwrap();
    let pre_rnum = tdb.rnum().unwrap();

    tdb.tranbegin().unwrap();
    tdb.put(b"new", cols(&[("name", "New")])).unwrap();
    tdb.out(b"k1").unwrap();
    tdb.tranabort().unwrap();

    assert_eq!(tdb.get(b"new").unwrap(), None);
    assert_eq!(tdb.get(b"k1").unwrap(), Some(pre_k1));
    assert_eq!(tdb.rnum().unwrap(), pre_rnum);
}

#[test]
fn scenario_6_query_delete() {
    let dir = tempdir().unwrap();
    let tdb = open(&dir, "s6.tdb");
    tdb.set_index(b"age", IndexKind::Decimal, SetIndexMode::Create).unwrap();

    tdb.put(b"minor1", cols(&[("age", "10")])).unwrap();
    tdb.put(b"minor2", cols(&[("age", "17")])).unwrap();
    tdb.put(b"adult1", cols(&[("age", "18")])).unwrap();
    tdb.put(b"adult2", cols(&[("age", "40")])).unwrap();

    let mut query = trdb::Query::new();
    query.add_cond("age", "NUMLT", "18").unwrap();
    let removed = tdb.qry_search_out(&mut query).unwrap();
    assert_eq!(removed, 2);

    let mut query = trdb::Query::new();
    query.add_cond("age", "NUMLT", "18").unwrap();
    assert_eq!(tdb.qry_search(&mut query).unwrap(), Vec::<Vec<u8>>::new());
}
