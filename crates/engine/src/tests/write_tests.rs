use std::sync::Arc;
use std::thread;

use anyhow::Result;
use config::Options;
use tempfile::tempdir;
use types::{Associative, StringAppendOperator, UInt64AddOperator};
use wal::WriteBatch;

use super::helpers::options;
use crate::*;

// --------------------- Basic put / get / delete ---------------------

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"name", b"alice")?;
    assert_eq!(db.get(b"name")?, Some(b"alice".to_vec()));
    assert_eq!(db.latest_sequence_number(), 1);
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    assert!(db.get(b"nope")?.is_none());
    Ok(())
}

#[test]
fn delete_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"k", b"v")?;
    db.delete(b"k")?;
    assert!(db.get(b"k")?.is_none());
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"k", b"v1")?;
    db.put(b"k", b"v2")?;
    assert_eq!(db.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn single_delete_removes_key_written_once() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"once", b"v")?;
    db.single_delete(b"once")?;
    assert!(db.get(b"once")?.is_none());

    db.flush()?;
    assert!(db.get(b"once")?.is_none());
    Ok(())
}

#[test]
fn empty_value_is_distinct_from_absent() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"empty", b"")?;
    assert_eq!(db.get(b"empty")?, Some(Vec::new()));
    Ok(())
}

// --------------------- Range deletion ---------------------

#[test]
fn delete_range_hides_half_open_range() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    for k in [b"a", b"b", b"c", b"d"] {
        db.put(k, b"v")?;
    }
    db.delete_range(b"b", b"d")?;

    assert!(db.get(b"a")?.is_some());
    assert!(db.get(b"b")?.is_none());
    assert!(db.get(b"c")?.is_none());
    assert!(db.get(b"d")?.is_some());

    // newer writes inside the range are visible again
    db.put(b"b", b"new")?;
    assert_eq!(db.get(b"b")?, Some(b"new".to_vec()));
    Ok(())
}

#[test]
fn delete_range_survives_flush() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    db.put(b"k1", b"v")?;
    db.put(b"k2", b"v")?;
    db.flush()?;
    db.delete_range(b"k1", b"k3")?;
    db.flush()?;

    assert!(db.get(b"k1")?.is_none());
    assert!(db.get(b"k2")?.is_none());
    Ok(())
}

#[test]
fn delete_range_rejects_reversed_bounds() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let err = db.delete_range(b"z", b"a").unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

// --------------------- Merge ---------------------

#[test]
fn merge_folds_operands_in_order() -> Result<()> {
    let dir = tempdir()?;
    let opts = options().merge_operator(Arc::new(Associative(StringAppendOperator::new(b','))));
    let db = DB::open(&opts, dir.path())?;

    db.put(b"list", b"a")?;
    db.merge(b"list", b"b")?;
    db.flush()?;
    db.merge(b"list", b"c")?;
    assert_eq!(db.get(b"list")?, Some(b"a,b,c".to_vec()));

    db.compact_range(None, None)?;
    assert_eq!(db.get(b"list")?, Some(b"a,b,c".to_vec()));
    Ok(())
}

#[test]
fn merge_counter_without_base_value() -> Result<()> {
    let dir = tempdir()?;
    let opts = options().merge_operator(Arc::new(Associative(UInt64AddOperator)));
    let db = DB::open(&opts, dir.path())?;

    for _ in 0..5 {
        db.merge(b"hits", 2u64.to_le_bytes())?;
    }
    assert_eq!(db.get(b"hits")?, Some(10u64.to_le_bytes().to_vec()));
    Ok(())
}

#[test]
fn merge_requires_operator() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let err = db.merge(b"k", b"v").unwrap_err();
    assert!(err.is_not_supported());
    Ok(())
}

// --------------------- Batches ---------------------

#[test]
fn write_batch_applies_every_record() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.put(b"gone", b"x")?;

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    batch.delete(b"gone");
    batch.put_log_data(b"not applied");
    db.write(&WriteOptions::default(), batch)?;

    assert_eq!(db.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(db.get(b"b")?, Some(b"2".to_vec()));
    assert!(db.get(b"gone")?.is_none());
    // one sequence number per counted record
    assert_eq!(db.latest_sequence_number(), 4);
    Ok(())
}

#[test]
fn batch_with_unknown_family_is_rejected_whole() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put_cf(42, b"b", b"2");
    assert!(db.write(&WriteOptions::default(), batch).is_err());
    assert!(db.get(b"a")?.is_none());
    Ok(())
}

#[test]
fn batch_ignoring_missing_families_applies_the_rest() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put_cf(42, b"b", b"2");
    let wo = WriteOptions::new().ignore_missing_column_families(true);
    db.write(&wo, batch)?;
    assert_eq!(db.get(b"a")?, Some(b"1".to_vec()));
    Ok(())
}

#[test]
fn empty_batch_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.write(&WriteOptions::default(), WriteBatch::new())?;
    assert_eq!(db.latest_sequence_number(), 0);
    Ok(())
}

// --------------------- Concurrency ---------------------

#[test]
fn concurrent_writers_all_land() -> Result<()> {
    let dir = tempdir()?;
    let db = Arc::new(DB::open(&options().write_buffer_size(16 * 1024), dir.path())?);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> types::Result<()> {
                for i in 0..200 {
                    db.put(format!("t{t}-{i:04}"), format!("v{i}"))?;
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked")?;
    }

    assert_eq!(db.latest_sequence_number(), 800);
    for t in 0..4 {
        for i in (0..200).step_by(37) {
            assert_eq!(
                db.get(format!("t{t}-{i:04}"))?,
                Some(format!("v{i}").into_bytes())
            );
        }
    }
    Ok(())
}

fn write_batches_from_threads(concurrent_memtable_write: bool) -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options();
    opts.db.allow_concurrent_memtable_write = concurrent_memtable_write;
    let db = Arc::new(DB::open(&opts, dir.path())?);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> types::Result<()> {
                for i in 0..100 {
                    let mut batch = WriteBatch::new();
                    for part in ["a", "b", "c"] {
                        batch.put(format!("t{t}-{i:03}-{part}"), format!("{t}.{i}"));
                    }
                    db.write(&WriteOptions::default(), batch)?;
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked")?;
    }

    assert_eq!(db.latest_sequence_number(), 2400);
    assert_eq!(db.get_int_property("rocksdb.num-entries-active-mem-table"), Some(2400));
    for t in 0..8 {
        for i in 0..100 {
            for part in ["a", "b", "c"] {
                assert_eq!(
                    db.get(format!("t{t}-{i:03}-{part}"))?,
                    Some(format!("{t}.{i}").into_bytes())
                );
            }
        }
    }
    Ok(())
}

#[test]
fn write_groups_insert_concurrently() -> Result<()> {
    write_batches_from_threads(true)
}

#[test]
fn write_groups_insert_serially() -> Result<()> {
    write_batches_from_threads(false)
}

// --------------------- Write options ---------------------

#[test]
fn synced_write_is_durable() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put_cf(
            &WriteOptions::new().sync(true),
            db.default_column_family(),
            b"k",
            b"v",
        )?;
    }
    let db = DB::open(&Options::new(), dir.path())?;
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn unlogged_writes_are_flushed_on_close() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        let wo = WriteOptions::new().disable_wal(true);
        db.put_cf(&wo, db.default_column_family(), b"nolog", b"v")?;
        db.close()?;
    }
    let db = DB::open(&Options::new(), dir.path())?;
    assert_eq!(db.get(b"nolog")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn writes_after_close_fail() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.close()?;
    assert!(db.put(b"k", b"v").is_err());
    // closing twice is fine
    db.close()?;
    Ok(())
}

#[test]
fn flush_wal_makes_writes_durable() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"k", b"v")?;
        db.flush_wal(false)?;
        db.flush_wal(true)?;
    }
    let db = DB::open(&Options::new(), dir.path())?;
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn flush_several_families_at_once() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let users = db.create_column_family(config::ColumnFamilyOptions::new(), "users")?;
    db.put(b"a", b"1")?;
    db.put_cf(&WriteOptions::default(), &users, b"b", b"2")?;

    db.flush_cfs(&FlushOptions::new(), &[db.default_column_family(), &users])?;

    for cf in [db.default_column_family(), &users] {
        assert_eq!(db.get_int_property_cf(cf, "rocksdb.num-files-at-level0"), Some(1));
        assert_eq!(db.get_int_property_cf(cf, "rocksdb.num-entries-active-mem-table"), Some(0));
    }
    assert_eq!(db.get_cf(&ReadOptions::default(), &users, b"b")?, Some(b"2".to_vec()));
    Ok(())
}

// --------------------- Write stalls ---------------------

fn stall_options(slowdown: usize, stop: usize) -> Options {
    let mut opts = options();
    opts.cf = opts
        .cf
        .level0_file_num_compaction_trigger(8)
        .level0_slowdown_writes_trigger(slowdown)
        .level0_stop_writes_trigger(stop);
    opts
}

#[test]
fn no_slowdown_write_is_busy_while_writes_are_delayed() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&stall_options(1, 10), dir.path())?;
    db.put(b"a", b"1")?;
    db.flush()?;

    let hasty = WriteOptions::new().no_slowdown(true);
    let err = db
        .put_cf(&hasty, db.default_column_family(), b"b", b"2")
        .expect_err("write should not wait");
    assert!(err.is_busy());
    assert!(db.get(b"b")?.is_none());

    // a patient writer just waits out the delay
    db.put(b"b", b"2")?;
    assert_eq!(db.get(b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn no_slowdown_write_is_busy_while_writes_are_stopped() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&stall_options(2, 2), dir.path())?;
    for key in [b"a", b"b"] {
        db.put(key, b"v")?;
        db.flush()?;
    }
    assert_eq!(db.get_int_property("rocksdb.num-files-at-level0"), Some(2));

    let hasty = WriteOptions::new().no_slowdown(true);
    let err = db
        .put_cf(&hasty, db.default_column_family(), b"c", b"v")
        .expect_err("writes are stopped");
    assert!(err.is_busy());

    db.compact_range(None, None)?;
    assert_eq!(db.get_int_property("rocksdb.num-files-at-level0"), Some(0));
    db.put_cf(&hasty, db.default_column_family(), b"c", b"v")?;
    assert_eq!(db.get(b"c")?, Some(b"v".to_vec()));
    Ok(())
}
