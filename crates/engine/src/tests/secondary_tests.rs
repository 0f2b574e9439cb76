use anyhow::Result;
use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, Options};
use tempfile::tempdir;

use super::helpers::options;
use crate::*;

// --------------------- Read-only ---------------------

#[test]
fn read_only_sees_tables_and_logs() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"flushed", b"1")?;
        db.flush()?;
        db.put(b"logged", b"2")?;
    }
    let db = DB::open_read_only(&Options::new(), dir.path(), false)?;
    assert_eq!(db.get(b"flushed")?, Some(b"1".to_vec()));
    assert_eq!(db.get(b"logged")?, Some(b"2".to_vec()));
    assert_eq!(db.latest_sequence_number(), 2);
    let n = db.iterator(&ReadOptions::default())?.entries().count();
    assert_eq!(n, 2);
    Ok(())
}

#[test]
fn read_only_rejects_every_mutation() -> Result<()> {
    let dir = tempdir()?;
    drop(DB::open(&options(), dir.path())?);
    let db = DB::open_read_only(&Options::new(), dir.path(), false)?;

    assert!(db.put(b"k", b"v").unwrap_err().is_not_supported());
    assert!(db.delete(b"k").unwrap_err().is_not_supported());
    assert!(db.flush().unwrap_err().is_not_supported());
    assert!(db.compact_range(None, None).unwrap_err().is_not_supported());
    assert!(db
        .create_column_family(ColumnFamilyOptions::new(), "x")
        .unwrap_err()
        .is_not_supported());
    assert!(db.disable_file_deletions().unwrap_err().is_not_supported());
    assert!(db.try_catch_up_with_primary().unwrap_err().is_not_supported());
    Ok(())
}

#[test]
fn read_only_open_leaves_directory_untouched() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"k", b"v")?;
    }
    let before: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()?;
    {
        let db = DB::open_read_only(&Options::new(), dir.path(), false)?;
        assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    }
    let mut after: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()?;
    let mut before = before;
    before.sort();
    after.sort();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn read_only_can_refuse_pending_logs() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"k", b"v")?;
    }
    let err = DB::open_read_only(&Options::new(), dir.path(), true).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

#[test]
fn read_only_may_skip_families() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        let cf = db.create_column_family(ColumnFamilyOptions::new(), "skipped")?;
        db.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;
        db.put(b"k", b"default")?;
    }
    let db = DB::open_read_only(&Options::new(), dir.path(), false)?;
    assert_eq!(db.get(b"k")?, Some(b"default".to_vec()));
    Ok(())
}

#[test]
fn read_only_open_of_missing_database_fails() -> Result<()> {
    let dir = tempdir()?;
    let err = DB::open_read_only(&options(), dir.path(), false).unwrap_err();
    assert!(err.is_invalid_argument());
    Ok(())
}

// --------------------- Secondary ---------------------

#[test]
fn secondary_follows_primary_after_catch_up() -> Result<()> {
    let dir = tempdir()?;
    let primary_path = dir.path().join("primary");
    let secondary_path = dir.path().join("secondary");

    let primary = DB::open(&options(), &primary_path)?;
    primary.put(b"early", b"1")?;
    primary.flush()?;

    let secondary = DB::open_as_secondary(&Options::new(), &primary_path, &secondary_path)?;
    assert!(secondary_path.is_dir());
    assert_eq!(secondary.get(b"early")?, Some(b"1".to_vec()));

    primary.put(b"late", b"2")?;
    assert!(secondary.get(b"late")?.is_none());

    secondary.try_catch_up_with_primary()?;
    assert_eq!(secondary.get(b"late")?, Some(b"2".to_vec()));

    primary.flush()?;
    primary.put(b"later", b"3")?;
    secondary.try_catch_up_with_primary()?;
    assert_eq!(secondary.get(b"late")?, Some(b"2".to_vec()));
    assert_eq!(secondary.get(b"later")?, Some(b"3".to_vec()));
    assert!(secondary.put(b"x", b"y").unwrap_err().is_not_supported());
    Ok(())
}

#[test]
fn secondary_marks_families_dropped_by_primary() -> Result<()> {
    let dir = tempdir()?;
    let primary_path = dir.path().join("primary");
    let primary = DB::open(&options(), &primary_path)?;
    let cf = primary.create_column_family(ColumnFamilyOptions::new(), "gone")?;
    primary.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;

    let (secondary, handles) = DB::open_as_secondary_cf(
        DbOptions::new(),
        &primary_path,
        dir.path().join("secondary"),
        vec![
            ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::new()),
            ColumnFamilyDescriptor::new("gone", ColumnFamilyOptions::new()),
        ],
    )?;
    assert_eq!(
        secondary.get_cf(&ReadOptions::default(), &handles[1], b"k")?,
        Some(b"v".to_vec())
    );

    primary.drop_column_family(&cf)?;
    secondary.try_catch_up_with_primary()?;
    assert!(secondary
        .get_cf(&ReadOptions::default(), &handles[1], b"k")
        .is_err());
    Ok(())
}
