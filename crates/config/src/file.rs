//! Persisted `OPTIONS-<n>` files.
//!
//! ```text
//! [Version]
//!   options_file_version=1.1
//!
//! [DBOptions]
//!   create_if_missing=true
//!   ...
//!
//! [CFOptions "default"]
//!   write_buffer_size=67108864
//!   ...
//! ```
//!
//! Nested groups stay on one line in their `{...}` form. A new file is
//! written next to the old one and the old one removed afterwards, so a crash
//! always leaves at least one complete file behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use types::{Result, Status};

use crate::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions};
use crate::options_string::parse_option_pairs;

pub const OPTIONS_FILE_PREFIX: &str = "OPTIONS-";
const OPTIONS_FILE_VERSION: &str = "1.1";

#[must_use]
pub fn options_file_name(number: u64) -> String {
    format!("{OPTIONS_FILE_PREFIX}{number:06}")
}

/// Number of an `OPTIONS-<n>` file name.
#[must_use]
pub fn parse_options_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(OPTIONS_FILE_PREFIX)?.parse().ok()
}

fn render(db: &DbOptions, cfs: &[(&str, &ColumnFamilyOptions)]) -> String {
    let mut out = String::new();
    out.push_str("# Written by RiptideDB. Do not edit while the database is open.\n\n");
    out.push_str(&format!("[Version]\n  options_file_version={OPTIONS_FILE_VERSION}\n\n"));
    out.push_str("[DBOptions]\n");
    for (name, value) in parse_option_pairs(&db.to_options_string()).unwrap_or_default() {
        out.push_str(&format!("  {name}={value}\n"));
    }
    for (cf_name, opts) in cfs {
        out.push_str(&format!("\n[CFOptions \"{cf_name}\"]\n"));
        for (name, value) in parse_option_pairs(&opts.to_options_string()).unwrap_or_default() {
            if value.contains('=') {
                out.push_str(&format!("  {name}={{{value}}}\n"));
            } else {
                out.push_str(&format!("  {name}={value}\n"));
            }
        }
    }
    out
}

/// Writes `dir/OPTIONS-<number>` and removes older options files.
pub fn write_options_file(
    dir: &Path,
    number: u64,
    db: &DbOptions,
    cfs: &[(&str, &ColumnFamilyOptions)],
) -> Result<PathBuf> {
    let path = dir.join(options_file_name(number));
    let tmp = dir.join(format!("{}.dbtmp", options_file_name(number)));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(render(db, cfs).as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(n) = name.to_str().and_then(parse_options_file_name) {
            if n < number {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
    debug!(path = %path.display(), "options file written");
    Ok(path)
}

/// Path of the newest options file in `dir`, if any.
pub fn latest_options_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(n) = entry.file_name().to_str().and_then(parse_options_file_name) else {
            continue;
        };
        if best.as_ref().map_or(true, |(b, _)| n > *b) {
            best = Some((n, entry.path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

/// Parses an options file. Hooks that are not built in must be supplied
/// through `base_cf`; a name that matches neither is `InvalidArgument`.
pub fn load_options_file(
    path: &Path,
    base_db: &DbOptions,
    base_cf: &ColumnFamilyOptions,
) -> Result<(DbOptions, Vec<ColumnFamilyDescriptor>)> {
    let text = fs::read_to_string(path)?;
    let mut db = base_db.clone();
    let mut cfs: Vec<ColumnFamilyDescriptor> = Vec::new();

    enum Section {
        None,
        Version,
        Db,
        Cf,
    }
    let mut section = Section::None;

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let corrupt = |what: &str| {
            Status::corruption(format!("{} line {}: {what}", path.display(), line_num + 1))
        };
        if line.starts_with('[') {
            let header = line
                .strip_prefix('[')
                .and_then(|l| l.strip_suffix(']'))
                .ok_or_else(|| corrupt("bad section header"))?;
            section = if header == "Version" {
                Section::Version
            } else if header == "DBOptions" {
                Section::Db
            } else if let Some(rest) = header.strip_prefix("CFOptions ") {
                let name = rest.trim().trim_matches('"').to_string();
                cfs.push(ColumnFamilyDescriptor::new(name, base_cf.clone()));
                Section::Cf
            } else {
                return Err(corrupt("unknown section"));
            };
            continue;
        }
        let (name, value) = line.split_once('=').ok_or_else(|| corrupt("missing '='"))?;
        let (name, mut value) = (name.trim(), value.trim());
        if value.starts_with('{') && value.ends_with('}') {
            value = &value[1..value.len() - 1];
        }
        match section {
            Section::None => return Err(corrupt("option outside a section")),
            Section::Version => {}
            Section::Db => db.set_option(name, value, false)?,
            Section::Cf => {
                if let Some(cf) = cfs.last_mut() {
                    cf.options.set_option(name, value, false)?;
                }
            }
        }
    }
    db.validate()?;
    for cf in &cfs {
        cf.options.validate()?;
    }
    Ok((db, cfs))
}

/// Loads the newest options file of the database at `dir`.
pub fn load_latest_options(
    dir: &Path,
    base_db: &DbOptions,
    base_cf: &ColumnFamilyOptions,
) -> Result<(DbOptions, Vec<ColumnFamilyDescriptor>)> {
    let path = latest_options_file(dir)?
        .ok_or_else(|| Status::not_found(format!("no options file in {}", dir.display())))?;
    load_options_file(&path, base_db, base_cf)
}
