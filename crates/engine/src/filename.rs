//! Names of the files living in a database directory.
//!
//! ```text
//! 000007.log        write-ahead log
//! 000012.sst        table file
//! MANIFEST-000005   version edit log
//! CURRENT           name of the live MANIFEST
//! LOCK              advisory lock held by the writer process
//! OPTIONS-000009    options the database was last opened with
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use types::{Result, Status};

pub(crate) const CURRENT: &str = "CURRENT";
pub(crate) const LOCK: &str = "LOCK";
pub(crate) const LOST_DIR: &str = "lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileType {
    Log(u64),
    Table(u64),
    Manifest(u64),
    Current,
    Lock,
    Options(u64),
    /// Leftover of an interrupted write (`*.dbtmp`, `*.sst.tmp`).
    Temp,
}

pub(crate) fn log_file_name(number: u64) -> String {
    format!("{number:06}.log")
}

pub(crate) fn table_file_name(number: u64) -> String {
    format!("{number:06}.sst")
}

pub(crate) fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{number:06}")
}

pub(crate) fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(log_file_name(number))
}

pub(crate) fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(table_file_name(number))
}

pub(crate) fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_file_name(number))
}

pub(crate) fn parse_file_name(name: &str) -> Option<FileType> {
    if name == CURRENT {
        return Some(FileType::Current);
    }
    if name == LOCK {
        return Some(FileType::Lock);
    }
    if name.ends_with(".dbtmp") || name.ends_with(".sst.tmp") {
        return Some(FileType::Temp);
    }
    if let Some(n) = name.strip_prefix("MANIFEST-") {
        return n.parse().ok().map(FileType::Manifest);
    }
    if let Some(n) = config::parse_options_file_name(name) {
        return Some(FileType::Options(n));
    }
    if let Some(n) = name.strip_suffix(".log") {
        return n.parse().ok().map(FileType::Log);
    }
    if let Some(n) = name.strip_suffix(".sst") {
        return n.parse().ok().map(FileType::Table);
    }
    None
}

/// Every recognized file in `dir` with its parsed type.
pub(crate) fn list_db_files(dir: &Path) -> Result<Vec<(FileType, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(t) = entry.file_name().to_str().and_then(parse_file_name) {
            out.push((t, entry.path()));
        }
    }
    Ok(out)
}

/// Points `CURRENT` at `MANIFEST-<number>` through a temp file and rename.
pub(crate) fn set_current_file(dir: &Path, manifest_number: u64) -> Result<()> {
    let tmp = dir.join(format!("{manifest_number:06}.dbtmp"));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(manifest_file_name(manifest_number).as_bytes())?;
        f.write_all(b"\n")?;
        f.sync_all()?;
    }
    fs::rename(&tmp, dir.join(CURRENT))?;
    sync_dir(dir)
}

/// Name of the MANIFEST `CURRENT` points at.
pub(crate) fn read_current_file(dir: &Path) -> Result<String> {
    let raw = fs::read_to_string(dir.join(CURRENT))
        .map_err(|e| Status::from(e).context(format!("{}/CURRENT", dir.display())))?;
    let name = raw.trim_end_matches('\n');
    if name.is_empty() || name.contains('\n') || !name.starts_with("MANIFEST-") {
        return Err(Status::corruption("CURRENT file does not name a MANIFEST"));
    }
    Ok(name.to_string())
}

pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
