//! File-level views of a database: per-family level layout, the set of
//! live files for backups, and the WALs still on disk.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use types::listener::FlushReason;
use types::{Result, SequenceNumber, Status};
use wal::{WalReader, WalRecoveryMode, WriteBatch};

use crate::column_family::ColumnFamilyData;
use crate::db_impl::DbInner;
use crate::filename::{log_file_name, log_file_path, manifest_file_name, table_file_name, CURRENT};
use crate::options::FlushOptions;
use crate::version::Version;
use crate::version_edit::FileMetaData;

/// One table file of a column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstFileMetaData {
    /// File name relative to `db_path`.
    pub name: String,
    pub db_path: PathBuf,
    pub file_number: u64,
    pub size: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub num_entries: u64,
    pub num_deletions: u64,
    pub being_compacted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMetaData {
    pub level: usize,
    pub size: u64,
    pub files: Vec<SstFileMetaData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyMetaData {
    pub name: String,
    pub size: u64,
    pub file_count: usize,
    pub levels: Vec<LevelMetaData>,
}

/// A table file with the family and level it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFileMetaData {
    pub column_family_name: String,
    pub level: usize,
    pub file: SstFileMetaData,
}

/// Files a consistent copy of the database needs, as names relative to
/// the database directory. Only the first `manifest_file_size` bytes of
/// the MANIFEST are meaningful to the copy.
#[derive(Debug, Clone)]
pub struct LiveFiles {
    pub files: Vec<String>,
    pub manifest_file_size: u64,
}

/// A WAL still needed by some column family. Obsolete logs are deleted,
/// never archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path_name: String,
    pub log_number: u64,
    /// Sequence of the first batch in the log, 0 if it holds none.
    pub start_sequence: SequenceNumber,
    pub size_file_bytes: u64,
}

/// A write batch read back from the WAL. `sequence` is the number of its
/// first record.
#[derive(Debug)]
pub struct BatchResult {
    pub sequence: SequenceNumber,
    pub write_batch: WriteBatch,
}

fn sst_meta(version: &Version, f: &FileMetaData) -> SstFileMetaData {
    SstFileMetaData {
        name: table_file_name(f.number),
        db_path: version.table_cache.dir().to_path_buf(),
        file_number: f.number,
        size: f.file_size,
        smallest_key: f.smallest.user_key().to_vec(),
        largest_key: f.largest.user_key().to_vec(),
        smallest_seqno: f.smallest_seqno,
        largest_seqno: f.largest_seqno,
        num_entries: f.num_entries,
        num_deletions: f.num_deletions,
        being_compacted: f.is_being_compacted(),
    }
}

impl DbInner {
    pub(crate) fn column_family_metadata(&self, cf: &Arc<ColumnFamilyData>) -> ColumnFamilyMetaData {
        let version = &cf.super_version().current;
        let levels: Vec<LevelMetaData> = (0..version.num_levels())
            .map(|level| LevelMetaData {
                level,
                size: version.level_bytes(level),
                files: version
                    .files(level)
                    .iter()
                    .map(|f| sst_meta(version, f))
                    .collect(),
            })
            .collect();
        ColumnFamilyMetaData {
            name: cf.name.clone(),
            size: version.total_file_size(),
            file_count: version.num_files(),
            levels,
        }
    }

    pub(crate) fn live_files_metadata(&self) -> Vec<LiveFileMetaData> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for cf in state.versions.cfs.values() {
            for (level, f) in cf.current.all_files() {
                out.push(LiveFileMetaData {
                    column_family_name: cf.name().to_string(),
                    level,
                    file: sst_meta(&cf.current, f),
                });
            }
        }
        out
    }

    /// Lists CURRENT, the MANIFEST, every live table and the latest OPTIONS
    /// file. With `flush_memtable` all families are flushed first so the
    /// list covers every write made so far without needing the WALs.
    pub(crate) fn get_live_files(self: &Arc<Self>, flush_memtable: bool) -> Result<LiveFiles> {
        if flush_memtable {
            let ids: Vec<u32> = self.state.lock().versions.cfs.keys().copied().collect();
            let options = FlushOptions {
                wait: true,
                allow_write_stall: true,
            };
            self.flush_column_families(&ids, &options, FlushReason::GetLiveFiles)?;
        }
        let state = self.state.lock();
        let mut files = vec![
            CURRENT.to_string(),
            manifest_file_name(state.versions.manifest_file_number),
        ];
        files.extend(state.versions.current_files().into_iter().map(table_file_name));
        if let Some(options) = config::latest_options_file(&self.path)? {
            if let Some(name) = options.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }
        debug!(files = files.len(), flush_memtable, "live files listed");
        Ok(LiveFiles {
            files,
            manifest_file_size: state.versions.manifest_file_size(),
        })
    }

    /// WALs still on disk, oldest first.
    pub(crate) fn get_sorted_wal_files(&self) -> Result<Vec<LogFile>> {
        let numbers: Vec<u64> = {
            let state = self.state.lock();
            let mut numbers: Vec<u64> = state.alive_logs.iter().map(|(n, _)| *n).collect();
            numbers.push(state.log_number);
            numbers.sort_unstable();
            numbers.dedup();
            numbers
        };
        let mut out = Vec::with_capacity(numbers.len());
        for number in numbers {
            let path = log_file_path(&self.path, number);
            let size = match std::fs::metadata(&path) {
                Ok(m) => m.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            out.push(LogFile {
                path_name: log_file_name(number),
                log_number: number,
                start_sequence: first_sequence(&path)?,
                size_file_bytes: size,
            });
        }
        Ok(out)
    }

    /// Committed batches still in the WALs on disk, oldest first, starting
    /// with the one holding `seq`. `NotFound` once the WAL no longer reaches
    /// back that far.
    pub(crate) fn get_updates_since(&self, seq: SequenceNumber) -> Result<Vec<BatchResult>> {
        let latest = self.latest_sequence();
        if seq > latest {
            return Ok(Vec::new());
        }
        let files = self.get_sorted_wal_files()?;
        let oldest = files.iter().map(|f| f.start_sequence).find(|&s| s > 0);
        if !oldest.is_some_and(|start| start <= seq.max(1)) {
            return Err(Status::not_found(format!(
                "sequence {seq} is no longer in the WAL"
            )));
        }

        let mut out = Vec::new();
        for file in files {
            let path = log_file_path(&self.path, file.log_number);
            if !path.exists() {
                continue;
            }
            let mut reader = WalReader::open(&path, WalRecoveryMode::TolerateCorruptedTailRecords)?;
            reader.replay(|record| {
                let batch = WriteBatch::from_data(record.to_vec())?;
                let first = batch.sequence();
                let count = u64::from(batch.count());
                if count > 0 && first + count > seq && first <= latest {
                    out.push(BatchResult {
                        sequence: first,
                        write_batch: batch,
                    });
                }
                Ok(())
            })?;
        }
        debug!(since = seq, batches = out.len(), "read updates from the WAL");
        Ok(out)
    }
}

fn first_sequence(path: &std::path::Path) -> Result<SequenceNumber> {
    let mut reader = WalReader::open(path, WalRecoveryMode::TolerateCorruptedTailRecords)?;
    match reader.read_record()? {
        Some(record) => Ok(WriteBatch::from_data(record)?.sequence()),
        None => Ok(0),
    }
}
