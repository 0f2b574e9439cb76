use anyhow::Result;
use tempfile::tempdir;
use types::reverse_bytewise_comparator;
use types::slice_transform::new_fixed_prefix_transform;

use super::helpers::options;
use crate::*;

fn collect(iter: DbIterator) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    Ok(iter.entries().collect::<types::Result<Vec<_>>>()?)
}

fn keys(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<&[u8]> {
    entries.iter().map(|(k, _)| k.as_slice()).collect()
}

// --------------------- Snapshots ---------------------

#[test]
fn snapshot_isolation() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"k", b"v1")?;
    let snap = db.get_snapshot();
    db.put(b"k", b"v2")?;
    db.delete(b"other")?;

    let at_snap = ReadOptions::new().snapshot(&snap);
    assert_eq!(db.get_opt(&at_snap, b"k")?, Some(b"v1".to_vec()));
    assert_eq!(db.get(b"k")?, Some(b"v2".to_vec()));
    assert_eq!(snap.sequence_number(), 1);
    Ok(())
}

#[test]
fn snapshot_survives_flush_and_compaction() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"k", b"old")?;
    let snap = db.get_snapshot();
    db.put(b"k", b"new")?;
    db.delete(b"k")?;
    db.flush()?;
    db.compact_range(None, None)?;

    let at_snap = ReadOptions::new().snapshot(&snap);
    assert_eq!(db.get_opt(&at_snap, b"k")?, Some(b"old".to_vec()));
    assert!(db.get(b"k")?.is_none());
    Ok(())
}

#[test]
fn released_snapshots_are_forgotten() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"k", b"v")?;

    let s1 = db.get_snapshot();
    let s2 = db.get_snapshot();
    assert_eq!(db.get_int_property("rocksdb.num-snapshots"), Some(2));
    drop(s1);
    drop(s2);
    assert_eq!(db.get_int_property("rocksdb.num-snapshots"), Some(0));
    Ok(())
}

// --------------------- Iterators ---------------------

#[test]
fn iterator_merges_memtable_and_tables_in_order() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"b", b"2")?;
    db.put(b"d", b"4")?;
    db.flush()?;
    db.put(b"a", b"1")?;
    db.put(b"c", b"3")?;
    db.delete(b"d")?;
    db.put(b"b", b"22")?;

    let entries = collect(db.iterator(&ReadOptions::default())?)?;
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"22".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn iterator_walks_backwards() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    for k in [b"a", b"b", b"c"] {
        db.put(k, k)?;
    }
    db.flush()?;
    db.delete(b"b")?;

    let mut it = db.iterator(&ReadOptions::default())?;
    it.seek_to_last();
    assert!(it.is_valid());
    assert_eq!(it.key(), b"c");
    it.prev();
    assert_eq!(it.key(), b"a");
    it.prev();
    assert!(!it.is_valid());
    it.status()?;
    Ok(())
}

#[test]
fn iterator_seek_and_seek_for_prev() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    for k in [b"b", b"d", b"f"] {
        db.put(k, b"v")?;
    }

    let mut it = db.iterator(&ReadOptions::default())?;
    it.seek(b"c");
    assert_eq!(it.key(), b"d");
    it.seek_for_prev(b"c");
    assert_eq!(it.key(), b"b");
    it.seek(b"g");
    assert!(!it.is_valid());
    it.seek_for_prev(b"a");
    assert!(!it.is_valid());

    // direction changes mid-scan
    it.seek(b"d");
    it.prev();
    assert_eq!(it.key(), b"b");
    it.next();
    assert_eq!(it.key(), b"d");
    Ok(())
}

#[test]
fn iterator_respects_bounds() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    for k in [b"a", b"b", b"c", b"d"] {
        db.put(k, b"v")?;
    }

    let ro = ReadOptions::new()
        .iterate_lower_bound(b"b".to_vec())
        .iterate_upper_bound(b"d".to_vec());
    let entries = collect(db.iterator(&ro)?)?;
    assert_eq!(keys(&entries), vec![b"b".as_slice(), b"c".as_slice()]);

    let mut it = db.iterator(&ro)?;
    it.seek_to_last();
    assert_eq!(it.key(), b"c");
    Ok(())
}

#[test]
fn iterator_is_a_consistent_view() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"a", b"1")?;

    let it = db.iterator(&ReadOptions::default())?;
    db.put(b"b", b"2")?;
    db.flush()?;

    let entries = collect(it)?;
    assert_eq!(keys(&entries), vec![b"a".as_slice()]);
    Ok(())
}

#[test]
fn prefix_iteration_stays_in_prefix() -> Result<()> {
    let dir = tempdir()?;
    let opts = options().prefix_extractor(new_fixed_prefix_transform(3));
    let db = DB::open(&opts, dir.path())?;
    for k in ["aaa1", "aaa2", "aab1", "bbb1"] {
        db.put(k, b"v")?;
    }
    db.flush()?;

    let ro = ReadOptions::new().prefix_same_as_start(true);
    let mut it = db.iterator(&ro)?;
    let mut seen = Vec::new();
    it.seek(b"aaa");
    while it.is_valid() {
        seen.push(it.key().to_vec());
        it.next();
    }
    it.status()?;
    assert_eq!(seen, vec![b"aaa1".to_vec(), b"aaa2".to_vec()]);
    Ok(())
}

#[test]
fn reverse_comparator_orders_descending() -> Result<()> {
    let dir = tempdir()?;
    let opts = options().comparator(reverse_bytewise_comparator());
    let db = DB::open(&opts, dir.path())?;
    for k in [b"a", b"c", b"b"] {
        db.put(k, b"v")?;
    }
    db.flush()?;
    db.put(b"d", b"v")?;

    let entries = collect(db.iterator(&ReadOptions::default())?)?;
    assert_eq!(
        keys(&entries),
        vec![b"d".as_slice(), b"c".as_slice(), b"b".as_slice(), b"a".as_slice()]
    );
    Ok(())
}

// --------------------- Multi-get / key_may_exist ---------------------

#[test]
fn multi_get_keeps_request_order() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"x", b"1")?;
    db.flush()?;
    db.put(b"z", b"3")?;

    let cf = db.default_column_family();
    let results = db.multi_get(
        &ReadOptions::default(),
        &[(cf, b"z".as_slice()), (cf, b"y".as_slice()), (cf, b"x".as_slice())],
    );
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().ok(), Some(&Some(b"3".to_vec())));
    assert_eq!(results[1].as_ref().ok(), Some(&None));
    assert_eq!(results[2].as_ref().ok(), Some(&Some(b"1".to_vec())));
    Ok(())
}

#[test]
fn key_may_exist_answers_from_memtable() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let cf = db.default_column_family();

    assert_eq!(db.key_may_exist(&ReadOptions::default(), cf, b"k")?, (false, None));
    db.put(b"k", b"v")?;
    assert_eq!(
        db.key_may_exist(&ReadOptions::default(), cf, b"k")?,
        (true, Some(b"v".to_vec()))
    );
    db.flush()?;
    assert!(db.key_may_exist(&ReadOptions::default(), cf, b"k")?.0);
    Ok(())
}
