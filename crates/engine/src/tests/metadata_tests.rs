use anyhow::Result;
use config::ColumnFamilyOptions;
use tempfile::tempdir;
use wal::WriteBatch;

use super::helpers::{options, wait_until};
use crate::*;

// --------------------- File metadata ---------------------

#[test]
fn column_family_metadata_lists_levels_and_files() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options();
    opts.cf = opts.cf.disable_auto_compactions(true);
    let db = DB::open(&opts, dir.path())?;

    db.put(b"a", b"1")?;
    db.delete(b"b")?;
    db.flush()?;
    db.put(b"c", b"3")?;
    db.flush()?;

    let meta = db.get_column_family_metadata(db.default_column_family())?;
    assert_eq!(meta.name, "default");
    assert_eq!(meta.file_count, 2);
    assert_eq!(meta.levels.len(), 7);
    assert_eq!(meta.levels[0].files.len(), 2);
    assert_eq!(meta.size, meta.levels[0].size);

    let first = meta.levels[0]
        .files
        .iter()
        .find(|f| f.smallest_key == b"a".to_vec())
        .expect("table holding a");
    assert_eq!(first.largest_key, b"b".to_vec());
    assert_eq!(first.num_entries, 2);
    assert_eq!(first.num_deletions, 1);
    assert_eq!((first.smallest_seqno, first.largest_seqno), (1, 2));
    assert!(first.name.ends_with(".sst"));
    assert!(!first.being_compacted);
    Ok(())
}

#[test]
fn live_files_metadata_names_the_family() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let cf = db.create_column_family(ColumnFamilyOptions::new(), "side")?;

    db.put(b"k", b"v")?;
    db.flush()?;
    db.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;
    db.flush_cf(&FlushOptions::default(), &cf)?;

    let mut families: Vec<String> = db
        .get_live_files_metadata()
        .into_iter()
        .map(|m| m.column_family_name)
        .collect();
    families.sort();
    assert_eq!(families, vec!["default".to_string(), "side".to_string()]);
    Ok(())
}

#[test]
fn live_files_cover_a_consistent_copy() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"k", b"v")?;

    let live = db.get_live_files(true)?;
    assert!(live.files.iter().any(|f| f == "CURRENT"));
    assert!(live.files.iter().any(|f| f.starts_with("MANIFEST-")));
    assert!(live.files.iter().any(|f| f.ends_with(".sst")));
    assert!(live.files.iter().any(|f| f.starts_with("OPTIONS-")));
    assert!(live.manifest_file_size > 0);
    for name in &live.files {
        assert!(dir.path().join(name).exists(), "{name} missing");
    }
    Ok(())
}

#[test]
fn live_files_without_flush_leave_memtable_alone() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"k", b"v")?;

    let live = db.get_live_files(false)?;
    assert!(!live.files.iter().any(|f| f.ends_with(".sst")));
    assert_eq!(db.get_int_property("rocksdb.num-entries-active-mem-table"), Some(1));
    Ok(())
}

#[test]
fn sorted_wal_files_report_first_sequence() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"a", b"1")?;
    db.put(b"b", b"2")?;

    let logs = db.get_sorted_wal_files()?;
    assert!(!logs.is_empty());
    let active = logs.last().unwrap();
    assert_eq!(active.start_sequence, 1);
    assert!(active.size_file_bytes > 0);
    assert!(active.path_name.ends_with(".log"));
    assert!(logs.windows(2).all(|w| w[0].log_number < w[1].log_number));
    Ok(())
}

#[test]
fn updates_since_replays_committed_batches() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"a", b"1")?;
    db.put(b"b", b"2")?;
    let mut batch = WriteBatch::new();
    batch.put(b"c", b"3");
    batch.delete(b"a");
    db.write(&WriteOptions::default(), batch)?;
    db.put(b"d", b"4")?;

    let updates = db.get_updates_since(2)?;
    let starts: Vec<u64> = updates.iter().map(|u| u.sequence).collect();
    assert_eq!(starts, vec![2, 3, 5]);
    assert_eq!(updates[1].write_batch.count(), 2);

    // a sequence inside a batch starts from that batch
    assert_eq!(db.get_updates_since(4)?.first().map(|u| u.sequence), Some(3));
    assert!(db.get_updates_since(6)?.is_empty());

    db.flush()?;
    assert!(wait_until(|| {
        db.get_updates_since(1).is_err_and(|e| e.is_not_found())
    }));
    Ok(())
}

#[test]
fn disabled_deletions_keep_obsolete_tables() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options();
    opts.cf = opts.cf.disable_auto_compactions(true);
    let db = DB::open(&opts, dir.path())?;
    db.put(b"a", b"1")?;
    db.flush()?;
    db.put(b"b", b"1")?;
    db.flush()?;

    db.disable_file_deletions()?;
    db.compact_range(None, None)?;
    // two inputs plus one output
    assert_eq!(super::helpers::count_sst_files(dir.path()), 3);

    db.enable_file_deletions(false)?;
    assert_eq!(super::helpers::count_sst_files(dir.path()), 1);
    Ok(())
}

// --------------------- Background work ---------------------

#[test]
fn healthy_database_has_no_background_error() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.background_error()?;
    // nothing to resume from
    db.resume()?;
    db.put(b"k", b"v")?;
    Ok(())
}

#[test]
fn pause_and_continue_nest() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.pause_background_work()?;
    db.pause_background_work()?;
    db.continue_background_work()?;
    db.continue_background_work()?;
    assert!(db
        .continue_background_work()
        .unwrap_err()
        .is_invalid_argument());
    Ok(())
}

#[test]
fn flush_waits_for_continue() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options();
    opts.cf = opts.cf.disable_auto_compactions(true);
    let db = DB::open(&opts, dir.path())?;

    db.put(b"k", b"v")?;
    db.pause_background_work()?;
    assert!(db.flush().unwrap_err().is_incomplete());
    assert_eq!(super::helpers::count_sst_files(dir.path()), 0);

    db.continue_background_work()?;
    assert!(super::helpers::wait_until(|| {
        db.get_int_property("rocksdb.num-files-at-level0") == Some(1)
    }));
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn cancelled_background_work_rejects_writes() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"k", b"v")?;
    db.cancel_all_background_work(true);

    assert!(db.put(b"k2", b"v").unwrap_err().is_shutdown_in_progress());
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}
