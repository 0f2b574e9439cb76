use std::sync::Arc;

use anyhow::Result;
use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, Options};
use tempfile::tempdir;
use types::bytewise_comparator;
use types::reverse_bytewise_comparator;
use wal::WriteBatch;

use super::helpers::{options, RecordingListener};
use crate::*;

fn descriptors(names: &[&str]) -> Vec<ColumnFamilyDescriptor> {
    names
        .iter()
        .map(|n| ColumnFamilyDescriptor::new(*n, ColumnFamilyOptions::new()))
        .collect()
}

// --------------------- Lifecycle ---------------------

#[test]
fn families_are_independent_keyspaces() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let users = db.create_column_family(ColumnFamilyOptions::new(), "users")?;
    assert_eq!(users.name(), "users");
    assert_ne!(users.id(), db.default_column_family().id());

    let wo = WriteOptions::default();
    let ro = ReadOptions::default();
    db.put(b"k", b"default")?;
    db.put_cf(&wo, &users, b"k", b"users")?;

    assert_eq!(db.get(b"k")?, Some(b"default".to_vec()));
    assert_eq!(db.get_cf(&ro, &users, b"k")?, Some(b"users".to_vec()));

    db.delete_cf(&wo, &users, b"k")?;
    assert!(db.get_cf(&ro, &users, b"k")?.is_none());
    assert!(db.get(b"k")?.is_some());
    Ok(())
}

#[test]
fn families_persist_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        let cf = db.create_column_family(ColumnFamilyOptions::new(), "logs")?;
        db.put_cf(&WriteOptions::default(), &cf, b"line", b"1")?;
    }

    let mut names = DB::list_column_families(dir.path())?;
    names.sort();
    assert_eq!(names, vec!["default".to_string(), "logs".to_string()]);

    let (db, handles) = DB::open_cf(DbOptions::new(), dir.path(), descriptors(&["default", "logs"]))?;
    assert_eq!(handles[1].name(), "logs");
    assert_eq!(
        db.get_cf(&ReadOptions::default(), &handles[1], b"line")?,
        Some(b"1".to_vec())
    );
    assert!(db.cf_handle("logs").is_some());
    Ok(())
}

#[test]
fn open_must_name_every_family() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.create_column_family(ColumnFamilyOptions::new(), "extra")?;
    }
    let err = DB::open(&Options::new(), dir.path()).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

#[test]
fn missing_families_are_created_on_request() -> Result<()> {
    let dir = tempdir()?;
    let db_opts = DbOptions::new()
        .create_if_missing(true)
        .create_missing_column_families(true);
    let (db, handles) = DB::open_cf(db_opts, dir.path(), descriptors(&["default", "a", "b"]))?;
    assert_eq!(handles.len(), 3);
    db.put_cf(&WriteOptions::default(), &handles[2], b"k", b"v")?;
    assert_eq!(db.get_cf(&ReadOptions::default(), &handles[2], b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn duplicate_family_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    db.create_column_family(ColumnFamilyOptions::new(), "dup")?;
    let err = db
        .create_column_family(ColumnFamilyOptions::new(), "dup")
        .unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

#[test]
fn dropped_family_handle_fails_every_call() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let cf = db.create_column_family(ColumnFamilyOptions::new(), "tmp")?;
    db.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;
    db.flush_cf(&FlushOptions::default(), &cf)?;

    db.drop_column_family(&cf)?;
    assert!(db
        .put_cf(&WriteOptions::default(), &cf, b"k", b"v")
        .unwrap_err()
        .is_invalid_argument());
    assert!(db
        .get_cf(&ReadOptions::default(), &cf, b"k")
        .unwrap_err()
        .is_invalid_argument());
    assert!(db.new_iterator(&ReadOptions::default(), &cf).is_err());
    assert!(db.drop_column_family(&cf).is_err());
    assert!(db.cf_handle("tmp").is_none());
    db.destroy_column_family_handle(cf);

    drop(db);
    let names = DB::list_column_families(dir.path())?;
    assert_eq!(names, vec!["default".to_string()]);
    Ok(())
}

#[test]
fn default_family_cannot_be_dropped() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let err = db.drop_column_family(db.default_column_family()).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

#[test]
fn releasing_a_handle_notifies_listeners() -> Result<()> {
    let dir = tempdir()?;
    let listener = Arc::new(RecordingListener::default());
    let mut opts = options();
    opts.db = opts.db.listener(listener.clone());
    let db = DB::open(&opts, dir.path())?;

    let cf = db.create_column_family(ColumnFamilyOptions::new(), "events")?;
    db.destroy_column_family_handle(cf);
    assert_eq!(*listener.handles_released.lock(), vec!["events".to_string()]);
    // the family itself is still there
    assert!(db.cf_handle("events").is_some());
    Ok(())
}

// --------------------- Cross-family batches ---------------------

#[test]
fn batch_spans_families_atomically() -> Result<()> {
    let dir = tempdir()?;
    let db = DB::open(&options(), dir.path())?;
    let orders = db.create_column_family(ColumnFamilyOptions::new(), "orders")?;

    let mut batch = WriteBatch::new();
    batch.put(b"user", b"1");
    batch.put_cf(orders.id(), b"order", b"1");
    db.write(&WriteOptions::default(), batch)?;

    assert_eq!(db.get(b"user")?, Some(b"1".to_vec()));
    assert_eq!(
        db.get_cf(&ReadOptions::default(), &orders, b"order")?,
        Some(b"1".to_vec())
    );
    Ok(())
}

#[test]
fn families_recover_from_shared_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        let a = db.create_column_family(ColumnFamilyOptions::new(), "a")?;
        db.put_cf(&WriteOptions::default(), &a, b"ka", b"va")?;
        db.put(b"kd", b"vd")?;
        // only "a" is flushed; the WAL must still hold the default family's write
        db.flush_cf(&FlushOptions::default(), &a)?;
    }
    let (db, handles) = DB::open_cf(DbOptions::new(), dir.path(), descriptors(&["default", "a"]))?;
    assert_eq!(db.get(b"kd")?, Some(b"vd".to_vec()));
    assert_eq!(
        db.get_cf(&ReadOptions::default(), &handles[1], b"ka")?,
        Some(b"va".to_vec())
    );
    Ok(())
}

// --------------------- Comparators ---------------------

#[test]
fn reopening_with_another_comparator_fails() -> Result<()> {
    let dir = tempdir()?;
    {
        let opts = options().comparator(reverse_bytewise_comparator());
        let db = DB::open(&opts, dir.path())?;
        db.put(b"k", b"v")?;
    }
    let err = DB::open(&Options::new().comparator(bytewise_comparator()), dir.path()).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}
