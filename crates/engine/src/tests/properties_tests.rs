use anyhow::Result;
use config::ColumnFamilyOptions;
use tempfile::tempdir;

use super::helpers::options;
use crate::*;

// --------------------- Properties ---------------------

#[test]
fn memtable_counters() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"a", b"1")?;
    db.put(b"b", b"2")?;
    db.delete(b"a")?;

    assert_eq!(db.get_int_property("rocksdb.num-entries-active-mem-table"), Some(3));
    assert_eq!(db.get_int_property("rocksdb.num-deletes-active-mem-table"), Some(1));
    assert_eq!(db.get_int_property("rocksdb.num-immutable-mem-table"), Some(0));
    assert_eq!(db.get_int_property("rocksdb.mem-table-flush-pending"), Some(0));
    assert!(db.get_int_property("rocksdb.cur-size-active-mem-table").unwrap() > 0);
    assert!(
        db.get_int_property("rocksdb.cur-size-all-mem-tables").unwrap()
            >= db.get_int_property("rocksdb.cur-size-active-mem-table").unwrap()
    );
    Ok(())
}

#[test]
fn file_counters_follow_flushes() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options();
    opts.cf = opts.cf.disable_auto_compactions(true);
    let db = DB::open(&opts, dir.path())?;

    assert_eq!(db.get_int_property("rocksdb.num-files-at-level0"), Some(0));
    db.put(b"k", b"v")?;
    db.flush()?;
    db.put(b"k2", b"v")?;
    db.flush()?;

    assert_eq!(db.get_property("rocksdb.num-files-at-level0").as_deref(), Some("2"));
    assert_eq!(db.get_int_property("rocksdb.num-files-at-level1"), Some(0));
    let live = db.get_int_property("rocksdb.live-sst-files-size").unwrap();
    assert!(live > 0);
    assert!(db.get_int_property("rocksdb.total-sst-files-size").unwrap() >= live);
    assert_eq!(db.get_int_property("rocksdb.estimate-num-keys"), Some(2));
    // auto compactions are off
    assert_eq!(db.get_int_property("rocksdb.compaction-pending"), Some(0));
    Ok(())
}

#[test]
fn out_of_range_level_is_unknown() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    assert!(db.get_property("rocksdb.num-files-at-level99").is_none());
    assert!(db.get_property("rocksdb.no-such-property").is_none());
    assert!(db.get_property("num-files-at-level0").is_none());
    Ok(())
}

#[test]
fn snapshot_properties() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"a", b"1")?;
    let s1 = db.get_snapshot();
    db.put(b"b", b"2")?;
    let _s2 = db.get_snapshot();

    assert_eq!(db.get_int_property("rocksdb.num-snapshots"), Some(2));
    assert_eq!(db.get_int_property("rocksdb.oldest-snapshot-sequence"), Some(1));
    drop(s1);
    assert_eq!(db.get_int_property("rocksdb.oldest-snapshot-sequence"), Some(2));
    Ok(())
}

#[test]
fn background_state_properties() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    assert_eq!(db.get_int_property("rocksdb.background-errors"), Some(0));
    assert_eq!(db.get_int_property("rocksdb.is-write-stopped"), Some(0));
    assert_eq!(db.get_int_property("rocksdb.base-level"), Some(1));
    assert_eq!(db.get_int_property("rocksdb.is-file-deletions-enabled"), Some(1));

    db.disable_file_deletions()?;
    assert_eq!(db.get_int_property("rocksdb.is-file-deletions-enabled"), Some(0));
    db.enable_file_deletions(false)?;
    assert_eq!(db.get_int_property("rocksdb.is-file-deletions-enabled"), Some(1));
    Ok(())
}

#[test]
fn string_only_properties_render() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"k", b"v")?;
    db.flush()?;

    let stats = db.get_property("rocksdb.stats").unwrap();
    assert!(stats.contains("Compaction Stats [default]"));
    assert!(stats.contains("Flush: 1 flushes"));
    assert!(db.get_property("rocksdb.levelstats").unwrap().starts_with("Level Files"));
    assert!(db.get_property("rocksdb.sstables").is_some());
    assert!(db.get_int_property("rocksdb.stats").is_none());
    Ok(())
}

#[test]
fn every_listed_property_answers() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    for name in PROPERTY_NAMES {
        assert!(db.get_property(name).is_some(), "{name} returned nothing");
    }
    Ok(())
}

#[test]
fn properties_are_per_family() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let cf = db.create_column_family(ColumnFamilyOptions::new(), "other")?;
    db.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;

    assert_eq!(
        db.get_int_property_cf(&cf, "rocksdb.num-entries-active-mem-table"),
        Some(1)
    );
    assert_eq!(db.get_int_property("rocksdb.num-entries-active-mem-table"), Some(0));
    Ok(())
}

// --------------------- Dynamic options ---------------------

#[test]
fn set_options_accepts_mutable_names_only() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let cf = db.default_column_family();

    db.set_options(cf, &[("write_buffer_size", "131072")])?;
    assert_eq!(cf.options().write_buffer_size, 131_072);

    assert!(db
        .set_options(cf, &[("no_such_option", "1")])
        .unwrap_err()
        .is_invalid_argument());
    assert!(db
        .set_options(cf, &[("num_levels", "3")])
        .unwrap_err()
        .is_invalid_argument());
    assert!(db
        .set_options(cf, &[("write_buffer_size", "lots")])
        .unwrap_err()
        .is_invalid_argument());
    Ok(())
}

#[test]
fn set_options_is_persisted() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.set_options(db.default_column_family(), &[("disable_auto_compactions", "true")])?;
    }
    let (_, cfs) = config::load_latest_options(
        dir.path(),
        &config::DbOptions::new(),
        &ColumnFamilyOptions::new(),
    )?;
    let default = cfs
        .iter()
        .find(|d| d.name == "default")
        .expect("default family in OPTIONS");
    assert!(default.options.disable_auto_compactions);
    Ok(())
}

#[test]
fn set_db_options_rejects_immutable_names() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.set_db_options(&[("max_background_jobs", "4")])?;
    assert_eq!(db.db_options().max_background_jobs, 4);
    assert!(db
        .set_db_options(&[("create_if_missing", "false")])
        .unwrap_err()
        .is_invalid_argument());
    Ok(())
}
