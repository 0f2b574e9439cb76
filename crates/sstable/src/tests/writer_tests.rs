use super::{build_table, icmp, ikey, test_options};
use crate::{TableBuilder, TableReader, TableReaderOptions, FOOTER_LEN};
use anyhow::Result;
use tempfile::tempdir;
use types::{RangeTombstone, ValueType};

#[test]
fn finish_renames_temp_file_into_place() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000007.sst");

    let mut builder = TableBuilder::create(&path, test_options())?;
    builder.add(&ikey(b"k", 1, ValueType::Value), b"v")?;
    assert!(dir.path().join("000007.sst.tmp").exists());
    assert!(!path.exists());

    let out = builder.finish()?;
    assert!(path.exists());
    assert!(!dir.path().join("000007.sst.tmp").exists());
    assert_eq!(std::fs::metadata(&path)?.len(), out.file_size);
    assert!(out.file_size > FOOTER_LEN as u64);
    Ok(())
}

#[test]
fn out_of_order_keys_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::create(dir.path().join("t.sst"), test_options())?;
    builder.add(&ikey(b"b", 1, ValueType::Value), b"")?;
    let err = builder.add(&ikey(b"a", 2, ValueType::Value), b"").unwrap_err();
    assert!(err.is_invalid_argument());

    // same user key must come with a lower sequence
    let err = builder.add(&ikey(b"b", 5, ValueType::Value), b"").unwrap_err();
    assert!(err.is_invalid_argument());
    builder.add(&ikey(b"b", 0, ValueType::Value), b"")?;
    Ok(())
}

#[test]
fn empty_table_is_refused_and_cleaned_up() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.sst");
    let builder = TableBuilder::create(&path, test_options())?;
    assert!(builder.is_empty());
    assert!(builder.finish().is_err());
    assert!(!path.exists());
    assert!(!dir.path().join("empty.sst.tmp").exists());
    Ok(())
}

#[test]
fn abandon_removes_temp_file() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::create(dir.path().join("a.sst"), test_options())?;
    builder.add(&ikey(b"k", 1, ValueType::Value), b"v")?;
    builder.abandon();
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn properties_describe_contents() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("p.sst");
    let mut opts = test_options();
    opts.column_family_id = 3;
    opts.column_family_name = "meta".into();
    opts.merge_operator_name = "StringAppendOperator".into();
    opts.creation_time = 1_700_000_000;

    let out = build_table(
        &path,
        opts,
        &[
            (b"a", 9, ValueType::Value, b"1"),
            (b"b", 4, ValueType::Deletion, b""),
            (b"c", 7, ValueType::Merge, b"x"),
            (b"c", 2, ValueType::Value, b"22"),
        ],
    )?;
    let p = &out.properties;
    assert_eq!(p.num_entries, 4);
    assert_eq!(p.num_deletions, 1);
    assert_eq!(p.num_merge_operands, 1);
    assert_eq!(p.smallest_seqno, 2);
    assert_eq!(p.largest_seqno, 9);
    assert_eq!(p.raw_value_size, 4);
    assert_eq!(p.comparator_name, "leveldb.BytewiseComparator");

    let reader = TableReader::open(&path, icmp(), TableReaderOptions::default())?;
    let read = reader.properties();
    assert_eq!(read.as_ref(), p);
    assert_eq!(read.column_family_id, 3);
    assert_eq!(read.column_family_name, "meta");
    assert_eq!(read.merge_operator_name, "StringAppendOperator");
    assert_eq!(read.creation_time, 1_700_000_000);
    assert_eq!(read.format_version, 4);
    Ok(())
}

#[test]
fn bounds_cover_range_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::create(dir.path().join("r.sst"), test_options())?;
    builder.add(&ikey(b"m", 5, ValueType::Value), b"v")?;
    builder.add_range_tombstone(RangeTombstone::new(&b"c"[..], &b"z"[..], 8));
    let out = builder.finish()?;

    assert_eq!(out.smallest, ikey(b"c", 8, ValueType::RangeDeletion));
    assert_eq!(types::extract_user_key(&out.largest), b"z");
    assert_eq!(out.properties.num_range_deletions, 1);
    assert_eq!(out.properties.largest_seqno, 8);
    Ok(())
}

#[test]
fn tombstone_only_table_is_written() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    let mut builder = TableBuilder::create(&path, test_options())?;
    builder.add_range_tombstone(RangeTombstone::new(&b"a"[..], &b"b"[..], 1));
    assert!(!builder.is_empty());
    builder.finish()?;

    let reader = TableReader::open(&path, icmp(), TableReaderOptions::default())?;
    assert_eq!(reader.range_tombstone_list().len(), 1);
    assert_eq!(reader.properties().num_entries, 0);
    Ok(())
}

#[test]
fn small_blocks_split_data() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options();
    opts.block_size = 64;
    let mut builder = TableBuilder::create(dir.path().join("s.sst"), opts)?;
    for i in 0..200u32 {
        builder.add(&ikey(format!("key{i:05}").as_bytes(), 1, ValueType::Value), b"value")?;
    }
    let out = builder.finish()?;
    assert!(out.properties.num_data_blocks > 10);
    Ok(())
}
