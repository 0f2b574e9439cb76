use super::{build_table, icmp, ikey, test_options};
use crate::{BlockCache, ReadParams, TableBuilder, TableReader, TableReaderOptions};
use anyhow::Result;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use types::{
    bytewise_comparator, parse_internal_key, GetContext, GetState, InternalIterator, LookupKey,
    RangeTombstone, StringAppendOperator, Associative, MergeOperator, ValueType,
};
use types::slice_transform::new_fixed_prefix_transform;

fn open(path: &Path) -> Result<Arc<TableReader>> {
    Ok(Arc::new(TableReader::open(path, icmp(), TableReaderOptions::default())?))
}

fn lookup(
    reader: &TableReader,
    key: &[u8],
    snapshot: u64,
    merge: Option<&dyn MergeOperator>,
) -> Result<(GetState, Option<Vec<u8>>)> {
    let ucmp = bytewise_comparator();
    let lk = LookupKey::new(key, snapshot);
    let mut ctx = GetContext::new(ucmp.as_ref(), merge, key, snapshot);
    reader.get(&ReadParams::default(), &lk, &mut ctx)?;
    let state = ctx.state();
    let value = ctx.finish()?;
    Ok((state, value))
}

fn sample(path: &Path) -> Result<Arc<TableReader>> {
    build_table(
        path,
        test_options(),
        &[
            (b"apple", 3, ValueType::Value, b"red"),
            (b"banana", 5, ValueType::Value, b"yellow-new"),
            (b"banana", 2, ValueType::Value, b"yellow-old"),
            (b"cherry", 4, ValueType::Deletion, b""),
            (b"cherry", 1, ValueType::Value, b"dark"),
            (b"date", 6, ValueType::Value, b""),
        ],
    )?;
    open(path)
}

// -------------------- point lookups --------------------

#[test]
fn get_returns_newest_visible_version() -> Result<()> {
    let dir = tempdir()?;
    let reader = sample(&dir.path().join("s.sst"))?;

    assert_eq!(lookup(&reader, b"apple", 100, None)?.1, Some(b"red".to_vec()));
    assert_eq!(lookup(&reader, b"banana", 100, None)?.1, Some(b"yellow-new".to_vec()));
    assert_eq!(lookup(&reader, b"banana", 4, None)?.1, Some(b"yellow-old".to_vec()));
    assert_eq!(lookup(&reader, b"banana", 1, None)?.0, GetState::NotFound);
    assert_eq!(lookup(&reader, b"date", 100, None)?.1, Some(Vec::new()));
    Ok(())
}

#[test]
fn tombstone_settles_lookup() -> Result<()> {
    let dir = tempdir()?;
    let reader = sample(&dir.path().join("s.sst"))?;

    let (state, value) = lookup(&reader, b"cherry", 100, None)?;
    assert_eq!(state, GetState::Deleted);
    assert_eq!(value, None);
    // below the tombstone the older value is visible
    assert_eq!(lookup(&reader, b"cherry", 3, None)?.1, Some(b"dark".to_vec()));
    Ok(())
}

#[test]
fn missing_keys_are_not_found() -> Result<()> {
    let dir = tempdir()?;
    let reader = sample(&dir.path().join("s.sst"))?;
    for key in [&b"aaa"[..], b"blueberry", b"zzz", b""] {
        assert_eq!(lookup(&reader, key, 100, None)?.0, GetState::NotFound);
    }
    Ok(())
}

#[test]
fn lookups_cross_block_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("x.sst");
    let mut opts = test_options();
    opts.block_size = 48;
    let mut builder = TableBuilder::create(&path, opts)?;
    // 50 versions of one key spread over many blocks
    for seq in (1..=50u64).rev() {
        builder.add(&ikey(b"hot", seq, ValueType::Merge), format!("{seq}").as_bytes())?;
    }
    builder.add(&ikey(b"hot", 0, ValueType::Value), b"base")?;
    let out = builder.finish()?;
    assert!(out.properties.num_data_blocks > 1);

    let reader = open(&path)?;
    let op = Associative(StringAppendOperator::new(b','));
    let (_, value) = lookup(&reader, b"hot", 100, Some(&op))?;
    let expected: Vec<String> = std::iter::once("base".to_string())
        .chain((1..=50).map(|s| s.to_string()))
        .collect();
    assert_eq!(value, Some(expected.join(",").into_bytes()));
    Ok(())
}

// -------------------- filters --------------------

#[test]
fn whole_key_filter_excludes_absent_keys() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("f.sst");
    let mut builder = TableBuilder::create(&path, test_options())?;
    for i in 0..1000u32 {
        builder.add(&ikey(format!("k{i:06}").as_bytes(), 1, ValueType::Value), b"v")?;
    }
    builder.finish()?;
    let reader = open(&path)?;
    assert!(reader.has_filter());

    for i in 0..1000u32 {
        assert!(reader.key_may_match(format!("k{i:06}").as_bytes()));
    }
    let false_positives = (0..1000u32)
        .filter(|i| reader.key_may_match(format!("absent{i}").as_bytes()))
        .count();
    assert!(false_positives < 50, "false positives: {false_positives}");
    Ok(())
}

#[test]
fn prefix_filter_requires_matching_extractor() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("p.sst");
    let mut opts = test_options();
    opts.whole_key_filtering = false;
    opts.prefix_extractor = Some(new_fixed_prefix_transform(3));
    build_table(
        &path,
        opts,
        &[
            (b"abc1", 1, ValueType::Value, b""),
            (b"abc2", 1, ValueType::Value, b""),
            (b"xyz1", 1, ValueType::Value, b""),
        ],
    )?;

    let reader = TableReader::open(
        &path,
        icmp(),
        TableReaderOptions {
            prefix_extractor: Some(new_fixed_prefix_transform(3)),
            ..TableReaderOptions::default()
        },
    )?;
    assert!(reader.prefix_may_match(b"abc"));
    assert!(reader.key_may_match(b"abc9"));
    assert!(!reader.prefix_may_match(b"qqq") || !reader.prefix_may_match(b"rrr"));

    // a different extractor disables prefix checks
    let other = TableReader::open(
        &path,
        icmp(),
        TableReaderOptions {
            prefix_extractor: Some(new_fixed_prefix_transform(2)),
            ..TableReaderOptions::default()
        },
    )?;
    assert!(other.prefix_may_match(b"qq"));
    assert!(other.key_may_match(b"qqq1"));
    Ok(())
}

#[test]
fn disabled_filter_admits_everything() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("n.sst");
    let mut opts = test_options();
    opts.bloom_bits_per_key = 0;
    build_table(&path, opts, &[(b"a", 1, ValueType::Value, b"")])?;
    let reader = open(&path)?;
    assert!(!reader.has_filter());
    assert!(reader.key_may_match(b"anything"));
    Ok(())
}

// -------------------- range tombstones --------------------

#[test]
fn range_tombstones_hide_older_records() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("r.sst");
    let mut builder = TableBuilder::create(&path, test_options())?;
    builder.add(&ikey(b"b", 3, ValueType::Value), b"old")?;
    builder.add(&ikey(b"c", 9, ValueType::Value), b"new")?;
    builder.add_range_tombstone(RangeTombstone::new(&b"a"[..], &b"d"[..], 5));
    builder.finish()?;
    let reader = open(&path)?;

    assert_eq!(lookup(&reader, b"b", 100, None)?.0, GetState::Deleted);
    assert_eq!(lookup(&reader, b"c", 100, None)?.1, Some(b"new".to_vec()));
    // the tombstone is invisible to a snapshot taken before it
    assert_eq!(lookup(&reader, b"b", 4, None)?.1, Some(b"old".to_vec()));

    let frags = reader.range_tombstones();
    assert_eq!(frags.max_covering_seq(b"b", 100), 5);
    assert_eq!(frags.max_covering_seq(b"d", 100), 0);
    Ok(())
}

// -------------------- iteration --------------------

#[test]
fn iterator_visits_all_entries_in_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("i.sst");
    let mut opts = test_options();
    opts.block_size = 64;
    let mut builder = TableBuilder::create(&path, opts)?;
    for i in 0..300u32 {
        builder.add(&ikey(format!("{i:04}").as_bytes(), u64::from(i), ValueType::Value), b"v")?;
    }
    builder.finish()?;
    let reader = open(&path)?;

    let mut it = reader.new_iterator(ReadParams::default());
    it.seek_to_first();
    let mut n = 0u32;
    while it.valid() {
        let parsed = parse_internal_key(it.key())?;
        assert_eq!(parsed.user_key, format!("{n:04}").as_bytes());
        n += 1;
        it.next();
    }
    it.status()?;
    assert_eq!(n, 300);

    it.seek_to_last();
    let mut m = 300u32;
    while it.valid() {
        m -= 1;
        assert_eq!(parse_internal_key(it.key())?.user_key, format!("{m:04}").as_bytes());
        it.prev();
    }
    assert_eq!(m, 0);
    Ok(())
}

#[test]
fn iterator_seeks_across_blocks() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("i.sst");
    let mut opts = test_options();
    opts.block_size = 64;
    let mut builder = TableBuilder::create(&path, opts)?;
    for i in (0..100u32).map(|i| i * 2) {
        builder.add(&ikey(format!("{i:04}").as_bytes(), 1, ValueType::Value), b"v")?;
    }
    builder.finish()?;
    let reader = open(&path)?;
    let mut it = reader.new_iterator(ReadParams::default());

    it.seek(&ikey(b"0051", 100, ValueType::Value));
    assert_eq!(parse_internal_key(it.key())?.user_key, b"0052");

    it.seek_for_prev(&ikey(b"0051", 0, ValueType::Value));
    assert_eq!(parse_internal_key(it.key())?.user_key, b"0050");

    it.seek(&ikey(b"9999", 100, ValueType::Value));
    assert!(!it.valid());

    it.seek_for_prev(&ikey(b"0000", 100, ValueType::Value));
    assert!(!it.valid());
    it.status()?;
    Ok(())
}

// -------------------- cache & integrity --------------------

#[test]
fn block_cache_is_filled_and_reused() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("c.sst");
    build_table(&path, test_options(), &[(b"k", 1, ValueType::Value, b"v")])?;
    let cache = Arc::new(BlockCache::new(1 << 20));
    let reader = Arc::new(TableReader::open(
        &path,
        icmp(),
        TableReaderOptions {
            block_cache: Some(Arc::clone(&cache)),
            ..TableReaderOptions::default()
        },
    )?);

    lookup(&reader, b"k", 10, None)?;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.misses(), 1);
    lookup(&reader, b"k", 10, None)?;
    assert_eq!(cache.hits(), 1);

    let mut it = reader.new_iterator(ReadParams {
        fill_cache: false,
        ..ReadParams::default()
    });
    it.seek_to_first();
    assert!(it.valid());
    Ok(())
}

#[test]
fn corrupt_data_block_is_detected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.sst");
    build_table(&path, test_options(), &[(b"key", 1, ValueType::Value, b"value")])?;
    {
        let mut f = std::fs::OpenOptions::new().write(true).open(&path)?;
        f.seek(SeekFrom::Start(10))?;
        f.write_all(&[0xff, 0xee])?;
    }
    let reader = open(&path)?;
    assert!(reader.verify_checksum().unwrap_err().is_corruption());

    let ucmp = bytewise_comparator();
    let lk = LookupKey::new(b"key", 10);
    let mut ctx = GetContext::new(ucmp.as_ref(), None, b"key", 10);
    assert!(reader
        .get(&ReadParams::default(), &lk, &mut ctx)
        .unwrap_err()
        .is_corruption());

    let mut it = reader.new_iterator(ReadParams::default());
    it.seek_to_first();
    assert!(!it.valid());
    assert!(it.status().is_err());
    Ok(())
}

#[test]
fn truncated_file_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("short.sst");
    std::fs::write(&path, b"not a table")?;
    let err = TableReader::open(&path, icmp(), TableReaderOptions::default()).unwrap_err();
    assert!(err.is_corruption());
    Ok(())
}

#[test]
fn comparator_mismatch_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("cmp.sst");
    build_table(&path, test_options(), &[(b"k", 1, ValueType::Value, b"v")])?;
    let reverse = types::InternalKeyComparator::new(types::reverse_bytewise_comparator());
    let err = TableReader::open(&path, reverse, TableReaderOptions::default()).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}
