use super::{build_table, icmp, ikey, test_options};
use crate::{MergingIterator, ReadParams, TableReader, TableReaderOptions};
use anyhow::Result;
use memtable::MemTable;
use std::sync::Arc;
use tempfile::tempdir;
use types::{
    extract_user_key, EmptyIterator, InternalIterator, Status, ValueType, VecIterator,
};

fn vec_iter(records: &[(&[u8], u64)]) -> Box<dyn InternalIterator> {
    let entries = records
        .iter()
        .map(|(k, seq)| (ikey(k, *seq, ValueType::Value), format!("{seq}").into_bytes()))
        .collect();
    Box::new(VecIterator::new(entries, icmp()))
}

fn collect_forward(it: &mut MergingIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    it.seek_to_first();
    while it.valid() {
        out.push((extract_user_key(it.key()).to_vec(), it.value().to_vec()));
        it.next();
    }
    out
}

#[test]
fn interleaves_children_in_key_order() {
    let mut it = MergingIterator::new(
        icmp(),
        vec![
            vec_iter(&[(b"a", 1), (b"d", 4)]),
            vec_iter(&[(b"b", 2), (b"e", 5)]),
            vec_iter(&[(b"c", 3)]),
        ],
    );
    let keys: Vec<Vec<u8>> = collect_forward(&mut it).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
}

#[test]
fn same_user_key_comes_newest_first() {
    let mut it = MergingIterator::new(
        icmp(),
        vec![vec_iter(&[(b"k", 2)]), vec_iter(&[(b"k", 7)]), vec_iter(&[(b"k", 5)])],
    );
    let values: Vec<Vec<u8>> = collect_forward(&mut it).into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![b"7".to_vec(), b"5".to_vec(), b"2".to_vec()]);
}

#[test]
fn direction_changes_keep_position() {
    let mut it = MergingIterator::new(
        icmp(),
        vec![vec_iter(&[(b"a", 1), (b"c", 1), (b"e", 1)]), vec_iter(&[(b"b", 1), (b"d", 1)])],
    );
    it.seek(&ikey(b"c", 100, ValueType::Value));
    assert_eq!(extract_user_key(it.key()), b"c");
    it.prev();
    assert_eq!(extract_user_key(it.key()), b"b");
    it.prev();
    assert_eq!(extract_user_key(it.key()), b"a");
    it.next();
    assert_eq!(extract_user_key(it.key()), b"b");
    it.next();
    assert_eq!(extract_user_key(it.key()), b"c");
    it.next();
    assert_eq!(extract_user_key(it.key()), b"d");

    it.seek_to_last();
    assert_eq!(extract_user_key(it.key()), b"e");
    it.seek_for_prev(&ikey(b"bb", 0, ValueType::Value));
    assert_eq!(extract_user_key(it.key()), b"b");
}

#[test]
fn child_error_invalidates_merge() {
    let mut it = MergingIterator::new(
        icmp(),
        vec![
            vec_iter(&[(b"a", 1)]),
            Box::new(EmptyIterator::with_error(Status::corruption("bad block"))),
        ],
    );
    it.seek_to_first();
    assert!(!it.valid());
    assert!(it.status().unwrap_err().is_corruption());
}

#[test]
fn no_children_is_empty() {
    let mut it = MergingIterator::new(icmp(), Vec::new());
    it.seek_to_first();
    assert!(!it.valid());
    assert!(it.status().is_ok());
}

#[test]
fn merges_memtable_with_tables() -> Result<()> {
    let dir = tempdir()?;
    let old = dir.path().join("1.sst");
    build_table(
        &old,
        test_options(),
        &[(b"a", 1, ValueType::Value, b"a1"), (b"c", 2, ValueType::Value, b"c2")],
    )?;
    let reader = Arc::new(TableReader::open(&old, icmp(), TableReaderOptions::default())?);

    let mem = Arc::new(MemTable::new(1, icmp(), 3));
    mem.add(3, ValueType::Value, b"b", b"b3")?;
    mem.add(4, ValueType::Deletion, b"c", b"")?;

    let mut it = MergingIterator::new(
        icmp(),
        vec![Box::new(mem.iter()), Box::new(reader.new_iterator(ReadParams::default()))],
    );
    let got = collect_forward(&mut it);
    assert_eq!(
        got,
        vec![
            (b"a".to_vec(), b"a1".to_vec()),
            (b"b".to_vec(), b"b3".to_vec()),
            (b"c".to_vec(), Vec::new()),
            (b"c".to_vec(), b"c2".to_vec()),
        ]
    );
    Ok(())
}
