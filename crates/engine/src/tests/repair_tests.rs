use std::fs;
use std::path::Path;

use anyhow::Result;
use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, Options};
use tempfile::tempdir;

use super::helpers::{count_sst_files, options};
use crate::*;

fn remove_manifests(path: &Path) -> Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "CURRENT" || name.starts_with("MANIFEST-") {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

// --------------------- Repair ---------------------

#[test]
fn repair_rebuilds_lost_manifest() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"flushed", b"1")?;
        db.flush()?;
        db.put(b"logged", b"2")?;
    }
    remove_manifests(dir.path())?;
    assert!(DB::open(&Options::new(), dir.path()).is_err());

    DB::repair(&Options::new(), dir.path())?;
    let db = DB::open(&Options::new(), dir.path())?;
    assert_eq!(db.get(b"flushed")?, Some(b"1".to_vec()));
    assert_eq!(db.get(b"logged")?, Some(b"2".to_vec()));
    // the log became a table
    assert_eq!(count_sst_files(dir.path()), 2);
    assert!(db.latest_sequence_number() >= 2);
    db.put(b"after", b"3")?;
    assert_eq!(db.get(b"after")?, Some(b"3".to_vec()));
    Ok(())
}

#[test]
fn repair_of_healthy_database_keeps_data() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        for i in 0..50 {
            db.put(format!("k{i:02}"), format!("v{i}"))?;
        }
        db.flush()?;
    }
    DB::repair(&Options::new(), dir.path())?;
    assert!(dir.path().join("lost").is_dir());

    let db = DB::open(&Options::new(), dir.path())?;
    let n = db.iterator(&ReadOptions::default())?.entries().count();
    assert_eq!(n, 50);
    assert_eq!(db.get(b"k49")?, Some(b"v49".to_vec()));
    Ok(())
}

#[test]
fn repair_recovers_families_from_table_properties() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        let cf = db.create_column_family(ColumnFamilyOptions::new(), "archive")?;
        db.put_cf(&WriteOptions::default(), &cf, b"k", b"v")?;
        db.flush_cf(&FlushOptions::default(), &cf)?;
    }
    remove_manifests(dir.path())?;

    DB::repair_cf(
        &DbOptions::new(),
        dir.path(),
        &[ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::new())],
        &ColumnFamilyOptions::new(),
    )?;
    let mut names = DB::list_column_families(dir.path())?;
    names.sort();
    assert_eq!(names, vec!["archive".to_string(), "default".to_string()]);

    let (db, handles) = DB::open_cf(
        DbOptions::new(),
        dir.path(),
        vec![
            ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::new()),
            ColumnFamilyDescriptor::new("archive", ColumnFamilyOptions::new()),
        ],
    )?;
    assert_eq!(
        db.get_cf(&ReadOptions::default(), &handles[1], b"k")?,
        Some(b"v".to_vec())
    );
    Ok(())
}

#[test]
fn unreadable_table_is_moved_aside() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(&options(), dir.path())?;
        db.put(b"good", b"1")?;
        db.flush()?;
    }
    fs::write(dir.path().join("000999.sst"), b"not a table at all")?;

    DB::repair(&Options::new(), dir.path())?;
    assert!(dir.path().join("lost").join("000999.sst").exists());
    let db = DB::open(&Options::new(), dir.path())?;
    assert_eq!(db.get(b"good")?, Some(b"1".to_vec()));
    Ok(())
}

#[test]
fn repair_of_empty_directory_fails() -> Result<()> {
    let dir = tempdir()?;
    assert!(DB::repair(&Options::new(), dir.path()).unwrap_err().is_corruption());
    Ok(())
}

#[test]
fn repair_needs_the_directory_lock() -> Result<()> {
    let dir = tempdir()?;
    let _db = DB::open(&options(), dir.path())?;
    assert!(DB::repair(&Options::new(), dir.path()).is_err());
    Ok(())
}
