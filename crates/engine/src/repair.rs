//! Best-effort reconstruction of a database whose MANIFEST is lost or
//! damaged.
//!
//! Every readable table is kept and placed at level 0 of the column family
//! named in its properties. WALs are converted into level-0 tables first.
//! A fresh MANIFEST describing the result replaces the old ones. Tables
//! that cannot be read, old MANIFESTs and converted logs are moved to
//! `lost/` rather than deleted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, DEFAULT_COLUMN_FAMILY_NAME};
use memtable::MemTable;
use sstable::TableReader;
use tracing::{info, warn};
use types::{bytewise_comparator, InternalKey, InternalKeyComparator, Result, SequenceNumber, Status};
use wal::{WalReader, WalRecoveryMode, WriteBatch};

use crate::column_family::reader_options;
use crate::filename::{list_db_files, sync_dir, table_file_path, FileType, LOCK, LOST_DIR};
use crate::flush::{write_level0_table, Level0Table};
use crate::ingest::{table_key_range, UNKNOWN_COLUMN_FAMILY_ID};
use crate::lock::FileLock;
use crate::open::new_cf_state;
use crate::table_cache::TableCache;
use crate::version_edit::{FileMetaData, VersionEdit};
use crate::version_set::{ManifestContents, VersionSet, DEFAULT_CF_ID};
use crate::write::MemTableInserter;

/// Rebuilds the MANIFEST of the database at `path`. Families found in
/// tables but missing from `descriptors` get `unknown_cf_options`.
pub(crate) fn repair(
    options: &DbOptions,
    path: &Path,
    descriptors: &[ColumnFamilyDescriptor],
    unknown_cf_options: &ColumnFamilyOptions,
) -> Result<()> {
    let _lock = FileLock::lock(&path.join(LOCK))?;
    let mut repairer = Repairer {
        path,
        options,
        descriptors,
        unknown_cf_options,
        table_cache: Arc::new(TableCache::new(path, options.table_cache_capacity())),
        families: BTreeMap::new(),
        tables: Vec::new(),
        next_file_number: 1,
        max_sequence: 0,
    };
    repairer.run()
}

struct Repairer<'a> {
    path: &'a Path,
    options: &'a DbOptions,
    descriptors: &'a [ColumnFamilyDescriptor],
    unknown_cf_options: &'a ColumnFamilyOptions,
    table_cache: Arc<TableCache>,
    /// Family id to name.
    families: BTreeMap<u32, String>,
    tables: Vec<(u32, FileMetaData)>,
    next_file_number: u64,
    max_sequence: SequenceNumber,
}

impl Repairer<'_> {
    fn run(&mut self) -> Result<()> {
        let mut logs = Vec::new();
        let mut tables = Vec::new();
        let mut manifests = Vec::new();
        for (ft, file) in list_db_files(self.path)? {
            match ft {
                FileType::Log(n) => logs.push((n, file)),
                FileType::Table(n) => tables.push((n, file)),
                FileType::Manifest(n) => manifests.push((n, file)),
                FileType::Options(n) => self.note_file_number(n),
                _ => {}
            }
        }
        if logs.is_empty() && tables.is_empty() && manifests.is_empty() {
            return Err(Status::corruption(format!(
                "{}: repair found no files",
                self.path.display()
            )));
        }
        for (n, _) in logs.iter().chain(&tables).chain(&manifests) {
            self.note_file_number(*n);
        }
        logs.sort_by_key(|(n, _)| *n);

        self.families.insert(DEFAULT_CF_ID, DEFAULT_COLUMN_FAMILY_NAME.to_string());
        match ManifestContents::recover(self.path) {
            Ok(contents) => {
                for cf in contents.cfs.values() {
                    self.families.insert(cf.id, cf.name.clone());
                }
                self.max_sequence = contents.last_sequence;
            }
            Err(e) => warn!(error = %e, "old manifest unreadable, families come from tables only"),
        }

        for (number, file) in tables {
            if let Err(e) = self.scan_table(number) {
                warn!(file = %file.display(), error = %e, "table unreadable, moved aside");
                self.archive(&file);
            }
        }
        for (number, file) in logs {
            if let Err(e) = self.convert_log(number, &file) {
                warn!(log = number, error = %e, "converting log failed");
            }
            self.archive(&file);
        }

        self.write_descriptor()?;
        for (_, file) in manifests {
            self.archive(&file);
        }
        info!(
            path = %self.path.display(),
            tables = self.tables.len(),
            families = self.families.len(),
            last_sequence = self.max_sequence,
            "database repaired"
        );
        Ok(())
    }

    fn note_file_number(&mut self, number: u64) {
        self.next_file_number = self.next_file_number.max(number + 1);
    }

    fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    fn cf_options(&self, name: &str) -> ColumnFamilyOptions {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .map_or_else(|| self.unknown_cf_options.clone(), |d| d.options.clone())
    }

    /// Reads a whole table and records it under the family its properties
    /// name.
    fn scan_table(&mut self, number: u64) -> Result<()> {
        let path = table_file_path(self.path, number);
        let probe = TableReader::open(
            &path,
            InternalKeyComparator::new(bytewise_comparator()),
            reader_options(self.unknown_cf_options),
        )?;
        let props = Arc::clone(probe.properties());
        drop(probe);

        let cf_id = if props.column_family_id == UNKNOWN_COLUMN_FAMILY_ID {
            DEFAULT_CF_ID
        } else {
            props.column_family_id
        };
        match self.families.get(&cf_id) {
            Some(name) if cf_id != DEFAULT_CF_ID && name != &props.column_family_name => {
                return Err(Status::corruption(format!(
                    "column family {cf_id} is named both {name} and {}",
                    props.column_family_name
                )));
            }
            Some(_) => {}
            None => {
                info!(cf = %props.column_family_name, id = cf_id, "column family recovered from table");
                self.families.insert(cf_id, props.column_family_name.clone());
            }
        }
        let name = self.families.get(&cf_id).cloned().unwrap_or_default();
        let options = self.cf_options(&name);
        if options.comparator.name() != props.comparator_name {
            return Err(Status::corruption(format!(
                "table comparator {} does not match {} of column family {name}",
                props.comparator_name,
                options.comparator.name()
            )));
        }

        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let reader = Arc::new(TableReader::open(&path, icmp.clone(), reader_options(&options))?);
        let Some((smallest, largest)) = table_key_range(&reader, &icmp, true)? else {
            return Err(Status::corruption("table holds no entries"));
        };
        let mut meta = FileMetaData::new(
            number,
            reader.file_size(),
            InternalKey::from_encoded(smallest),
            InternalKey::from_encoded(largest),
        );
        meta.smallest_seqno = props.smallest_seqno;
        meta.largest_seqno = props.largest_seqno;
        meta.num_entries = props.num_entries;
        meta.num_deletions = props.num_deletions;
        self.max_sequence = self.max_sequence.max(props.largest_seqno);
        self.tables.push((cf_id, meta));
        Ok(())
    }

    /// Replays one log into fresh memtables and writes each non-empty one
    /// as a table. Records after the first damaged one are dropped.
    fn convert_log(&mut self, number: u64, file: &Path) -> Result<()> {
        let mut mems: HashMap<u32, Arc<MemTable>> = HashMap::new();
        for (id, name) in &self.families {
            let options = self.cf_options(name);
            let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
            mems.insert(*id, Arc::new(MemTable::new(u64::from(*id) + 1, icmp, 0)));
        }
        let mut reader = WalReader::open(file, WalRecoveryMode::PointInTimeRecovery)?;
        let mut batches = 0u64;
        while let Some(record) = reader.read_record()? {
            let batch = match WriteBatch::from_data(record) {
                Ok(b) => b,
                Err(e) => {
                    warn!(log = number, error = %e, "damaged batch, rest of log dropped");
                    break;
                }
            };
            let mut inserter = MemTableInserter::new(batch.sequence(), &mems, true);
            if let Err(e) = batch.iterate(&mut inserter) {
                warn!(log = number, error = %e, "batch rejected, rest of log dropped");
                break;
            }
            if batch.count() > 0 {
                self.max_sequence = self
                    .max_sequence
                    .max(batch.sequence() + u64::from(batch.count()) - 1);
            }
            batches += 1;
        }
        if reader.corruption_seen() {
            warn!(log = number, dropped_bytes = reader.dropped_bytes(), "log damaged");
        }

        for (id, mem) in mems {
            if mem.is_empty() {
                continue;
            }
            let name = self.families.get(&id).cloned().unwrap_or_default();
            let options = self.cf_options(&name);
            let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
            let table = self.new_file_number();
            let output = write_level0_table(
                Level0Table {
                    dir: self.path,
                    number: table,
                    cf_id: id,
                    cf_name: &name,
                    icmp: &icmp,
                    options: &options,
                    snapshots: Vec::new(),
                    creation_time: self.options.env.unix_time_secs(),
                    rate_limiter: None,
                },
                &[mem],
            )?;
            if let Some(out) = output {
                info!(log = number, cf = %name, file = table, "log converted to table");
                self.tables.push((id, out.meta));
            }
        }
        info!(log = number, batches, "log replayed for repair");
        Ok(())
    }

    /// Writes a MANIFEST placing every table at level 0 and an OPTIONS
    /// file for the recovered families.
    fn write_descriptor(&mut self) -> Result<()> {
        let mut versions = VersionSet::new(self.path, Arc::clone(&self.table_cache));
        versions.next_file_number = self.next_file_number;
        versions.max_column_family = self.families.keys().copied().max().unwrap_or(0);
        let families: Vec<(u32, String)> = self
            .families
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        for (memtable_id, (id, name)) in (1u64..).zip(families) {
            let mut edit = VersionEdit::for_column_family(id);
            for (_, meta) in self.tables.iter().filter(|(cf, _)| *cf == id) {
                edit.add_file(0, meta.clone());
            }
            let cf = new_cf_state(
                id,
                &name,
                self.cf_options(&name),
                &self.table_cache,
                Some(&edit),
                memtable_id,
                self.max_sequence,
            )?;
            versions.cfs.insert(id, cf);
        }
        versions.create_new_manifest(self.max_sequence)?;
        versions.close_manifest()?;

        let options_number = versions.new_file_number();
        let cf_options: Vec<(String, ColumnFamilyOptions)> = versions
            .cfs
            .values()
            .map(|cf| (cf.name().to_string(), (*cf.data.options()).clone()))
            .collect();
        let refs: Vec<(&str, &ColumnFamilyOptions)> =
            cf_options.iter().map(|(n, o)| (n.as_str(), o)).collect();
        config::write_options_file(self.path, options_number, self.options, &refs)?;
        sync_dir(self.path)
    }

    fn archive(&self, file: &Path) {
        let lost = self.path.join(LOST_DIR);
        let Some(name) = file.file_name() else {
            return;
        };
        let target: PathBuf = lost.join(name);
        let moved = std::fs::create_dir_all(&lost).and_then(|()| std::fs::rename(file, &target));
        if let Err(e) = moved {
            warn!(file = %file.display(), error = %e, "moving file to lost/ failed");
        }
    }
}
