use crate::*;
use anyhow::Result;
use std::sync::Arc;
use tempfile::tempdir;
use types::{reverse_bytewise_comparator, CompactionFilter, Decision, FilterValueType};

struct DropAll;

impl CompactionFilter for DropAll {
    fn name(&self) -> &str {
        "DropAll"
    }

    fn filter(&self, _: usize, _: &[u8], _: FilterValueType, _: &[u8]) -> Decision {
        Decision::Remove
    }
}

// -------------------- defaults & builders --------------------

#[test]
fn defaults_are_documented_values() {
    let cf = ColumnFamilyOptions::default();
    assert_eq!(cf.write_buffer_size, 64 << 20);
    assert_eq!(cf.max_write_buffer_number, 2);
    assert_eq!(cf.num_levels, 7);
    assert_eq!(cf.level0_file_num_compaction_trigger, 4);
    assert_eq!(cf.compaction_style, CompactionStyle::Level);
    assert_eq!(cf.comparator.name(), "leveldb.BytewiseComparator");
    assert!(cf.merge_operator.is_none());

    let db = DbOptions::default();
    assert!(!db.create_if_missing);
    assert_eq!(db.wal_recovery_mode, WalRecoveryMode::TolerateCorruptedTailRecords);
    assert_eq!(db.background_limits(), (1, 1));
}

#[test]
fn background_limits_split_jobs() {
    let db = DbOptions::default().max_background_jobs(8);
    assert_eq!(db.background_limits(), (2, 6));
    let mut db = db;
    db.max_background_flushes = 3;
    db.max_background_compactions = 1;
    assert_eq!(db.background_limits(), (3, 1));
}

#[test]
fn level_sizes_grow_by_multiplier() {
    let cf = ColumnFamilyOptions::default()
        .max_bytes_for_level_base(100)
        .max_bytes_for_level_multiplier(10.0);
    assert_eq!(cf.max_bytes_for_level(1), 100);
    assert_eq!(cf.max_bytes_for_level(2), 1_000);
    assert_eq!(cf.max_bytes_for_level(3), 10_000);

    let mut cf = cf.target_file_size_base(64);
    cf.target_file_size_multiplier = 2;
    assert_eq!(cf.target_file_size(1), 64);
    assert_eq!(cf.target_file_size(3), 256);
}

#[test]
fn validation_rejects_nonsense() {
    assert!(ColumnFamilyOptions::default().write_buffer_size(0).validate().is_err());
    assert!(ColumnFamilyOptions::default().num_levels(1).validate().is_err());
    assert!(ColumnFamilyOptions::default()
        .num_levels(1)
        .compaction_style(CompactionStyle::Fifo)
        .validate()
        .is_ok());
    assert!(DbOptions::default().max_subcompactions(0).validate().is_err());
}

// -------------------- option strings --------------------

#[test]
fn option_pairs_respect_braces() -> Result<()> {
    let pairs = parse_option_pairs(" a=1; b={x=2;y=3;} ;c = d ;")?;
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "x=2;y=3;".to_string()),
            ("c".to_string(), "d".to_string()),
        ]
    );
    assert!(parse_option_pairs("a={x=1").is_err());
    assert!(parse_option_pairs("novalue").is_err());
    Ok(())
}

#[test]
fn cf_options_round_trip() -> Result<()> {
    let original = ColumnFamilyOptions::default()
        .write_buffer_size(1 << 20)
        .compaction_style(CompactionStyle::Universal)
        .num_levels(4)
        .merge_operator(builtin_merge_operator("UInt64AddOperator").unwrap())
        .prefix_extractor(types::slice_transform::new_fixed_prefix_transform(4))
        .comparator(reverse_bytewise_comparator())
        .compaction_options_fifo(CompactionOptionsFifo {
            max_table_files_size: 12345,
            allow_compaction: true,
        });
    let text = original.to_options_string();
    let restored = ColumnFamilyOptions::default().apply_options_string(&text)?;
    assert_eq!(restored.to_options_string(), text);
    assert_eq!(restored.comparator.name(), "rocksdb.ReverseBytewiseComparator");
    assert_eq!(restored.merge_operator.unwrap().name(), "UInt64AddOperator");
    assert_eq!(restored.prefix_extractor.unwrap().name(), "rocksdb.FixedPrefix.4");
    assert_eq!(restored.compaction_options_fifo.max_table_files_size, 12345);
    Ok(())
}

#[test]
fn db_options_round_trip() -> Result<()> {
    let original = DbOptions::default()
        .create_if_missing(true)
        .max_background_jobs(6)
        .wal_recovery_mode(WalRecoveryMode::PointInTimeRecovery);
    let text = original.to_options_string();
    let restored = DbOptions::default().apply_options_string(&text)?;
    assert_eq!(restored.to_options_string(), text);
    assert!(restored.create_if_missing);
    assert_eq!(restored.wal_recovery_mode, WalRecoveryMode::PointInTimeRecovery);
    Ok(())
}

#[test]
fn unknown_names_are_invalid_argument() {
    let err = ColumnFamilyOptions::default()
        .apply_options_string("write_buffer_size=10;no_such_option=1")
        .unwrap_err();
    assert!(err.is_invalid_argument());
    let err = DbOptions::default().apply_options_string("bogus=1").unwrap_err();
    assert!(err.is_invalid_argument());
    let err = ColumnFamilyOptions::default()
        .apply_options_string("compaction_options_fifo={unknown=1}")
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn bad_values_are_invalid_argument() {
    for s in [
        "write_buffer_size=lots",
        "disable_auto_compactions=maybe",
        "compaction_style=kCompactionStyleRandom",
        "merge_operator=NoSuchOperator",
        "prefix_extractor=rocksdb.Unknown",
    ] {
        let err = ColumnFamilyOptions::default().apply_options_string(s).unwrap_err();
        assert!(err.is_invalid_argument(), "{s}");
    }
}

#[test]
fn custom_hooks_survive_when_names_match() -> Result<()> {
    let base = ColumnFamilyOptions::default().compaction_filter(Arc::new(DropAll));
    let restored = base.apply_options_string("compaction_filter=DropAll")?;
    assert!(restored.compaction_filter.is_some());

    let cleared = base.apply_options_string("compaction_filter=nullptr")?;
    assert!(cleared.compaction_filter.is_none());

    assert!(base.apply_options_string("compaction_filter=Other").is_err());
    Ok(())
}

#[test]
fn mutable_options_only() -> Result<()> {
    let cf = ColumnFamilyOptions::default();
    let changed = cf.apply_mutable(&[
        ("write_buffer_size", "1048576"),
        ("disable_auto_compactions", "true"),
    ])?;
    assert_eq!(changed.write_buffer_size, 1 << 20);
    assert!(changed.disable_auto_compactions);

    assert!(cf.apply_mutable(&[("num_levels", "3")]).unwrap_err().is_invalid_argument());
    assert!(cf.apply_mutable(&[("nope", "3")]).unwrap_err().is_invalid_argument());
    assert!(cf.apply_mutable(&[]).is_err());
    // nothing applied when one entry fails validation
    assert!(cf.apply_mutable(&[("write_buffer_size", "0")]).is_err());

    let db = DbOptions::default().apply_mutable(&[("max_background_jobs", "4")])?;
    assert_eq!(db.max_background_jobs, 4);
    assert!(DbOptions::default()
        .apply_mutable(&[("create_if_missing", "true")])
        .is_err());
    Ok(())
}

#[test]
fn table_options_block_cache_capacity() -> Result<()> {
    let cf = ColumnFamilyOptions::default()
        .apply_options_string("block_based_table_factory={block_size=1024;block_cache_size=0;}")?;
    assert_eq!(cf.table_options.block_size, 1024);
    assert!(cf.table_options.block_cache.is_none());

    let cf = cf.apply_options_string("block_based_table_factory={block_cache_size=4096}")?;
    assert_eq!(cf.table_options.block_cache.unwrap().capacity(), 4096);
    Ok(())
}

// -------------------- OPTIONS file --------------------

#[test]
fn options_file_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let db = DbOptions::default().create_if_missing(true).max_subcompactions(3);
    let default_cf = ColumnFamilyOptions::default().write_buffer_size(4096);
    let meta_cf = ColumnFamilyOptions::default()
        .compaction_style(CompactionStyle::Fifo)
        .merge_operator(builtin_merge_operator("StringAppendOperator").unwrap());

    write_options_file(dir.path(), 5, &db, &[("default", &default_cf), ("meta", &meta_cf)])?;
    let (loaded_db, cfs) =
        load_latest_options(dir.path(), &DbOptions::default(), &ColumnFamilyOptions::default())?;

    assert_eq!(loaded_db.max_subcompactions, 3);
    assert!(loaded_db.create_if_missing);
    assert_eq!(cfs.len(), 2);
    assert_eq!(cfs[0].name, "default");
    assert_eq!(cfs[0].options.write_buffer_size, 4096);
    assert_eq!(cfs[1].name, "meta");
    assert_eq!(cfs[1].options.compaction_style, CompactionStyle::Fifo);
    assert_eq!(
        cfs[1].options.merge_operator.as_ref().map(|m| m.name().to_string()),
        Some("StringAppendOperator".to_string())
    );
    Ok(())
}

#[test]
fn newer_options_file_replaces_older() -> Result<()> {
    let dir = tempdir()?;
    let cf = ColumnFamilyOptions::default();
    write_options_file(dir.path(), 3, &DbOptions::default(), &[("default", &cf)])?;
    let newer = cf.clone().write_buffer_size(777);
    write_options_file(dir.path(), 9, &DbOptions::default(), &[("default", &newer)])?;

    assert!(!dir.path().join(options_file_name(3)).exists());
    let latest = latest_options_file(dir.path())?.unwrap();
    assert_eq!(latest, dir.path().join("OPTIONS-000009"));
    let (_, cfs) = load_options_file(&latest, &DbOptions::default(), &cf)?;
    assert_eq!(cfs[0].options.write_buffer_size, 777);
    Ok(())
}

#[test]
fn missing_options_file_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let err = load_latest_options(dir.path(), &DbOptions::default(), &ColumnFamilyOptions::default())
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn garbage_options_file_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("OPTIONS-000001"), "[Weird]\nx=1\n")?;
    let err = load_latest_options(dir.path(), &DbOptions::default(), &ColumnFamilyOptions::default())
        .unwrap_err();
    assert!(err.is_corruption());
    Ok(())
}
