//! Opening, recovering, closing and destroying a database.
//!
//! Recovery replays the MANIFEST named by `CURRENT` to rebuild every
//! column family's files, then replays the WALs that may still hold
//! unflushed writes. A read-write open flushes what it replayed (unless
//! `avoid_flush_during_recovery`), starts a fresh WAL and a fresh MANIFEST,
//! and writes an OPTIONS file. Read-only and secondary opens keep the
//! replayed writes in memory and never touch the directory.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, DEFAULT_COLUMN_FAMILY_NAME};
use memtable::MemTable;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};
use types::listener::{FlushReason, TableFileCreationInfo, TableFileCreationReason};
use types::{InternalKeyComparator, Result, SequenceNumber, Status};
use wal::{WalReader, WalRecoveryMode, WalWriter, WriteBatch};

use crate::column_family::{reader_options, CfState, ColumnFamilyData, ColumnFamilyHandle, SuperVersion};
use crate::db_impl::{DbInner, DbState, OpenMode};
use crate::filename::{list_db_files, log_file_path, FileType, CURRENT, LOCK, LOST_DIR};
use crate::flush::{write_level0_table, Level0Table};
use crate::lock::FileLock;
use crate::options::FlushOptions;
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotList;
use crate::table_cache::TableCache;
use crate::version::Version;
use crate::version_edit::VersionEdit;
use crate::version_set::{ManifestContents, VersionSet, DEFAULT_CF_ID};
use crate::write::MemTableInserter;

/// Builds the in-memory state of a family holding the files of `files`.
pub(crate) fn new_cf_state(
    id: u32,
    name: &str,
    options: ColumnFamilyOptions,
    table_cache: &Arc<TableCache>,
    files: Option<&VersionEdit>,
    memtable_id: u64,
    earliest_seq: SequenceNumber,
) -> Result<CfState> {
    options.validate()?;
    let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
    let empty = Version::empty(
        id,
        options.num_levels,
        icmp.clone(),
        Arc::clone(table_cache),
        reader_options(&options),
    );
    let current = Arc::new(match files {
        Some(edit) => empty.apply(edit)?,
        None => empty,
    });
    let mem = Arc::new(MemTable::new(memtable_id, icmp, earliest_seq));
    let sv = SuperVersion {
        mem: Arc::clone(&mem),
        imm: Vec::new(),
        current: Arc::clone(&current),
        options: Arc::new(options.clone()),
        number: 0,
    };
    let data = Arc::new(ColumnFamilyData::new(id, name.to_string(), options, sv));
    Ok(CfState::new(data, mem, current))
}

/// Names of the column families recorded in the database at `path`.
pub(crate) fn list_column_families(path: &Path) -> Result<Vec<String>> {
    let contents = ManifestContents::recover(path)?;
    Ok(contents.cfs.values().map(|cf| cf.name.clone()).collect())
}

/// Result of replaying write-ahead logs into memtables.
#[derive(Debug, Default)]
struct LogReplay {
    max_sequence: SequenceNumber,
    /// Logs read, with their sizes.
    logs: Vec<(u64, u64)>,
    /// Level-0 tables written when a memtable filled up mid-replay.
    created: Vec<TableFileCreationInfo>,
}

struct Recovery<'a> {
    path: &'a Path,
    options: &'a DbOptions,
    mode: OpenMode,
    next_memtable_id: u64,
}

impl Recovery<'_> {
    fn new_memtable_id(&mut self) -> u64 {
        let id = self.next_memtable_id;
        self.next_memtable_id += 1;
        id
    }

    /// Rebuilds the version set from the MANIFEST. Recorded families
    /// without a descriptor are an error for read-write opens and skipped
    /// otherwise.
    fn recover_versions(
        &mut self,
        descriptors: &[ColumnFamilyDescriptor],
        table_cache: &Arc<TableCache>,
    ) -> Result<VersionSet> {
        let contents = ManifestContents::recover(self.path)?;
        let mut versions = VersionSet::new(self.path, Arc::clone(table_cache));
        versions.next_file_number = contents.next_file_number;
        versions.last_sequence = contents.last_sequence;
        versions.prev_log_number = contents.prev_log_number;
        versions.max_column_family = contents.max_column_family;
        versions.manifest_file_number = contents.manifest_number;

        let mut unopened = Vec::new();
        for cf in contents.cfs.values() {
            let Some(desc) = descriptors.iter().find(|d| d.name == cf.name) else {
                unopened.push(cf.name.clone());
                continue;
            };
            if let Some(recorded) = &cf.comparator {
                let given = desc.options.comparator.name();
                if recorded != given {
                    return Err(Status::invalid_argument(format!(
                        "{given} does not match existing comparator {recorded}"
                    )));
                }
            }
            if cf.max_level() >= desc.options.num_levels && !cf.files.is_empty() {
                return Err(Status::invalid_argument(format!(
                    "column family {} has files at level {} but num_levels is {}",
                    cf.name,
                    cf.max_level(),
                    desc.options.num_levels
                )));
            }
            if self.options.paranoid_checks {
                for (_, f) in cf.files.values() {
                    let file = crate::filename::table_file_path(self.path, f.number);
                    if !file.exists() {
                        return Err(Status::corruption(format!(
                            "sst file {} is missing",
                            file.display()
                        )));
                    }
                }
            }
            let memtable_id = self.new_memtable_id();
            let mut state = new_cf_state(
                cf.id,
                &cf.name,
                desc.options.clone(),
                table_cache,
                Some(&cf.files_edit()),
                memtable_id,
                contents.last_sequence,
            )?;
            state.log_number = cf.log_number;
            versions.cfs.insert(cf.id, state);
        }
        if self.mode == OpenMode::ReadWrite && !unopened.is_empty() {
            return Err(Status::invalid_argument(format!(
                "Column families not opened: {}",
                unopened.join(", ")
            )));
        }
        Ok(versions)
    }

    /// Replays every log at or after the oldest family log number, in
    /// number order. Records of a family are skipped in logs older than
    /// that family's log number.
    fn replay_logs(
        &mut self,
        versions: &mut VersionSet,
        log_dir: &Path,
        allow_flush: bool,
    ) -> Result<LogReplay> {
        let mut replay = LogReplay {
            max_sequence: versions.last_sequence,
            ..Default::default()
        };
        let min_log = versions
            .cfs
            .values()
            .map(|cf| cf.log_number)
            .min()
            .unwrap_or(0);
        let mut logs: Vec<(u64, PathBuf)> = list_db_files(log_dir)?
            .into_iter()
            .filter_map(|(ft, p)| match ft {
                FileType::Log(n) => Some((n, p)),
                _ => None,
            })
            .collect();
        logs.sort_by_key(|(n, _)| *n);
        for (n, _) in &logs {
            versions.mark_file_number_used(*n);
        }

        let mode = self.options.wal_recovery_mode;
        let mut mems = memtable_map(versions);
        for (number, path) in logs.into_iter().filter(|(n, _)| *n >= min_log) {
            let skip: HashSet<u32> = versions
                .cfs
                .values()
                .filter(|cf| cf.log_number > number)
                .map(CfState::id)
                .collect();
            let mut reader = WalReader::open(&path, mode)?;
            let mut stop = false;
            while let Some(record) = reader.read_record()? {
                let batch = WriteBatch::from_data(record)?;
                let mut inserter =
                    MemTableInserter::new(batch.sequence(), &mems, true).with_skip(&skip);
                batch.iterate(&mut inserter)?;
                if batch.count() > 0 {
                    replay.max_sequence = replay.max_sequence.max(inserter.sequence() - 1);
                }
                if allow_flush {
                    let full: Vec<u32> = versions
                        .cfs
                        .values()
                        .filter(|cf| cf.mem.should_flush(cf.data.options().write_buffer_size))
                        .map(CfState::id)
                        .collect();
                    for cf_id in full {
                        self.flush_recovered(versions, cf_id, &mut replay)?;
                    }
                    mems = memtable_map(versions);
                }
            }
            if reader.corruption_seen() {
                warn!(
                    log = number,
                    dropped_bytes = reader.dropped_bytes(),
                    mode = mode.as_str(),
                    "corruption in write-ahead log"
                );
                if mode == WalRecoveryMode::PointInTimeRecovery {
                    stop = true;
                }
            }
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            replay.logs.push((number, size));
            debug!(log = number, records = reader.records_read(), "log replayed");
            if stop {
                break;
            }
        }
        Ok(replay)
    }

    /// Writes the active memtable of `cf_id` to a level-0 table and swaps
    /// in an empty one.
    fn flush_recovered(
        &mut self,
        versions: &mut VersionSet,
        cf_id: u32,
        replay: &mut LogReplay,
    ) -> Result<()> {
        let number = versions.new_file_number();
        let memtable_id = self.new_memtable_id();
        let cf = versions.cf_state_mut(cf_id)?;
        if cf.mem.is_empty() {
            return Ok(());
        }
        let data = Arc::clone(&cf.data);
        let options = data.options();
        let mem = std::mem::replace(
            &mut cf.mem,
            Arc::new(MemTable::new(memtable_id, data.icmp.clone(), replay.max_sequence)),
        );
        let output = write_level0_table(
            Level0Table {
                dir: self.path,
                number,
                cf_id,
                cf_name: &data.name,
                icmp: &data.icmp,
                options: &options,
                snapshots: Vec::new(),
                creation_time: self.options.env.unix_time_secs(),
                rate_limiter: self.options.rate_limiter.clone(),
            },
            &[mem],
        )?;
        if let Some(out) = output {
            info!(cf = %data.name, file = number, bytes = out.meta.file_size, "recovered memtable flushed");
            let mut edit = VersionEdit::for_column_family(cf_id);
            edit.add_file(0, out.meta.clone());
            versions.apply_edit(&edit)?;
            replay.created.push(TableFileCreationInfo {
                db_name: self.path.to_path_buf(),
                cf_name: data.name.clone(),
                file_path: out.path.clone(),
                file_size: out.meta.file_size,
                job_id: 0,
                table_properties: out.properties.clone(),
                reason: TableFileCreationReason::Recovery,
                status: Ok(()),
            });
        }
        Ok(())
    }
}

fn memtable_map(versions: &VersionSet) -> HashMap<u32, Arc<MemTable>> {
    versions
        .cfs
        .iter()
        .map(|(id, cf)| (*id, Arc::clone(&cf.mem)))
        .collect()
}

fn check_descriptors(descriptors: &[ColumnFamilyDescriptor]) -> Result<()> {
    if !descriptors.iter().any(|d| d.name == DEFAULT_COLUMN_FAMILY_NAME) {
        return Err(Status::invalid_argument("Default column family not specified"));
    }
    let mut seen = HashSet::new();
    for d in descriptors {
        if !seen.insert(d.name.as_str()) {
            return Err(Status::invalid_argument(format!(
                "column family {} specified twice",
                d.name
            )));
        }
        d.options.validate()?;
    }
    Ok(())
}

fn open_scheduler(mode: OpenMode, options: &DbOptions) -> Option<Scheduler> {
    if mode != OpenMode::ReadWrite {
        return None;
    }
    let (flushes, compactions) = options.background_limits();
    Some(Scheduler::new(flushes, compactions))
}

impl DbInner {
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        path: &Path,
        mode: OpenMode,
        options: DbOptions,
        versions: VersionSet,
        table_cache: Arc<TableCache>,
        last_sequence: SequenceNumber,
        next_memtable_id: u64,
        file_lock: Option<FileLock>,
    ) -> Arc<Self> {
        let mut state = DbState::new(versions);
        state.next_memtable_id = next_memtable_id;
        Arc::new(Self {
            path: path.to_path_buf(),
            mode,
            scheduler: open_scheduler(mode, &options),
            env: Arc::clone(&options.env),
            listeners: options.listeners.clone(),
            db_options: RwLock::new(options),
            state: Mutex::new(state),
            bg_cv: Condvar::new(),
            write_cv: Condvar::new(),
            log: Mutex::new(None),
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::default()),
            table_cache,
            shutting_down: AtomicBool::new(false),
            file_lock: Mutex::new(file_lock),
            next_job_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    fn handles_for(
        &self,
        descriptors: &[ColumnFamilyDescriptor],
    ) -> Result<Vec<ColumnFamilyHandle>> {
        let state = self.state.lock();
        descriptors
            .iter()
            .map(|d| {
                state
                    .versions
                    .cf_by_name(&d.name)
                    .map(|cf| ColumnFamilyHandle::new(Arc::clone(&cf.data)))
                    .ok_or_else(|| {
                        Status::invalid_argument(format!("Column family not found: {}", d.name))
                    })
            })
            .collect()
    }

    /// Opens (or creates) a database for reading and writing.
    pub(crate) fn open(
        options: DbOptions,
        path: &Path,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Arc<Self>, Vec<ColumnFamilyHandle>)> {
        options.validate()?;
        check_descriptors(&descriptors)?;
        if options.create_if_missing {
            std::fs::create_dir_all(path)
                .map_err(|e| Status::from(e).context(path.display()))?;
        } else if !path.is_dir() {
            return Err(Status::invalid_argument(format!(
                "{}: does not exist (create_if_missing is false)",
                path.display()
            )));
        }
        let file_lock = FileLock::lock(&path.join(LOCK))?;
        let table_cache = Arc::new(TableCache::new(path, options.table_cache_capacity()));
        let mut recovery = Recovery {
            path,
            options: &options,
            mode: OpenMode::ReadWrite,
            next_memtable_id: 1,
        };

        let exists = path.join(CURRENT).exists();
        let (mut versions, replay) = if exists {
            if options.error_if_exists {
                return Err(Status::invalid_argument(format!(
                    "{}: exists (error_if_exists is true)",
                    path.display()
                )));
            }
            let mut versions = recovery.recover_versions(&descriptors, &table_cache)?;
            let allow_flush = !options.avoid_flush_during_recovery;
            let mut replay = recovery.replay_logs(&mut versions, path, allow_flush)?;
            if allow_flush {
                let ids: Vec<u32> = versions.cfs.keys().copied().collect();
                for cf_id in ids {
                    recovery.flush_recovered(&mut versions, cf_id, &mut replay)?;
                }
            }
            (versions, replay)
        } else {
            if !options.create_if_missing {
                return Err(Status::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            info!(path = %path.display(), "creating new database");
            let mut versions = VersionSet::new(path, Arc::clone(&table_cache));
            let default = descriptors
                .iter()
                .find(|d| d.name == DEFAULT_COLUMN_FAMILY_NAME)
                .map(|d| d.options.clone())
                .unwrap_or_default();
            let memtable_id = recovery.new_memtable_id();
            let cf = new_cf_state(
                DEFAULT_CF_ID,
                DEFAULT_COLUMN_FAMILY_NAME,
                default,
                &table_cache,
                None,
                memtable_id,
                0,
            )?;
            versions.cfs.insert(DEFAULT_CF_ID, cf);
            (versions, LogReplay::default())
        };

        let last_sequence = replay.max_sequence.max(versions.last_sequence);
        let new_log = versions.new_file_number();
        for cf in versions.cfs.values_mut() {
            if cf.mem.is_empty() {
                cf.log_number = new_log;
            }
        }
        versions.prev_log_number = 0;
        let writer = WalWriter::create(log_file_path(path, new_log), false)?;
        versions.create_new_manifest(last_sequence)?;

        let inner = Self::assemble(
            path,
            OpenMode::ReadWrite,
            options.clone(),
            versions,
            table_cache,
            last_sequence,
            recovery.next_memtable_id,
            Some(file_lock),
        );
        *inner.log.lock() = Some(writer);
        {
            let mut state = inner.state.lock();
            state.log_number = new_log;
            let min_log = state.versions.min_log_number_to_keep(new_log);
            state.alive_logs = replay
                .logs
                .iter()
                .copied()
                .filter(|(n, _)| *n >= min_log && *n != new_log)
                .collect::<VecDeque<_>>();
            let ids: Vec<u32> = state.versions.cfs.keys().copied().collect();
            for id in &ids {
                state.versions.install_super_version(*id);
            }

            let missing: Vec<&ColumnFamilyDescriptor> = descriptors
                .iter()
                .filter(|d| state.versions.cf_by_name(&d.name).is_none())
                .collect();
            if !missing.is_empty() && !options.create_missing_column_families {
                return Err(Status::invalid_argument(format!(
                    "Column family not found: {}",
                    missing[0].name
                )));
            }
            for d in missing {
                inner.create_column_family_locked(&mut state, &d.name, d.options.clone())?;
            }
            inner.persist_options(&mut state)?;
            let job_id = inner.new_job_id();
            inner.delete_obsolete_files(&mut state, job_id);
            for id in state.versions.cfs.keys().copied().collect::<Vec<_>>() {
                inner.enqueue_compaction_if_needed(&mut state, id);
            }
            inner.maybe_schedule_work(&mut state);
        }
        for created in &replay.created {
            inner.notify(|l| l.on_table_file_created(created));
        }
        info!(
            path = %path.display(),
            last_sequence,
            log = new_log,
            replayed_logs = replay.logs.len(),
            "database opened"
        );
        let handles = inner.handles_for(&descriptors)?;
        Ok((inner, handles))
    }

    /// Opens a database without writing anything. Replayed WAL contents
    /// stay in memory; recorded families may be left out of `descriptors`.
    pub(crate) fn open_read_only(
        options: DbOptions,
        path: &Path,
        descriptors: Vec<ColumnFamilyDescriptor>,
        error_if_wal_file_exists: bool,
    ) -> Result<(Arc<Self>, Vec<ColumnFamilyHandle>)> {
        check_descriptors(&descriptors)?;
        if !path.join(CURRENT).exists() {
            return Err(Status::invalid_argument(format!(
                "{}: does not exist",
                path.display()
            )));
        }
        let table_cache = Arc::new(TableCache::new(path, options.table_cache_capacity()));
        let mut recovery = Recovery {
            path,
            options: &options,
            mode: OpenMode::ReadOnly,
            next_memtable_id: 1,
        };
        let mut versions = recovery.recover_versions(&descriptors, &table_cache)?;
        let replay = recovery.replay_logs(&mut versions, path, false)?;
        if error_if_wal_file_exists && !replay.logs.iter().all(|(_, size)| *size == 0) {
            return Err(Status::invalid_argument(
                "Write-ahead log files are not empty",
            ));
        }
        let last_sequence = replay.max_sequence.max(versions.last_sequence);
        let next_memtable_id = recovery.next_memtable_id;
        let inner = Self::assemble(
            path,
            OpenMode::ReadOnly,
            options,
            versions,
            table_cache,
            last_sequence,
            next_memtable_id,
            None,
        );
        inner.install_all_super_versions();
        let handles = inner.handles_for(&descriptors)?;
        info!(path = %path.display(), last_sequence, "database opened read-only");
        Ok((inner, handles))
    }

    /// Opens a follower of the database at `primary`. It reads the
    /// primary's files and WALs; [`try_catch_up_with_primary`] refreshes the
    /// view. `secondary` is created if missing and holds nothing else.
    ///
    /// [`try_catch_up_with_primary`]: Self::try_catch_up_with_primary
    pub(crate) fn open_as_secondary(
        options: DbOptions,
        primary: &Path,
        secondary: &Path,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Arc<Self>, Vec<ColumnFamilyHandle>)> {
        check_descriptors(&descriptors)?;
        std::fs::create_dir_all(secondary)
            .map_err(|e| Status::from(e).context(secondary.display()))?;
        let inner = {
            let table_cache = Arc::new(TableCache::new(primary, options.table_cache_capacity()));
            let mut recovery = Recovery {
                path: primary,
                options: &options,
                mode: OpenMode::Secondary,
                next_memtable_id: 1,
            };
            let mut versions = recovery.recover_versions(&descriptors, &table_cache)?;
            let replay = recovery.replay_logs(&mut versions, primary, false)?;
            let last_sequence = replay.max_sequence.max(versions.last_sequence);
            let next_memtable_id = recovery.next_memtable_id;
            Self::assemble(
                primary,
                OpenMode::Secondary,
                options,
                versions,
                table_cache,
                last_sequence,
                next_memtable_id,
                None,
            )
        };
        inner.install_all_super_versions();
        let handles = inner.handles_for(&descriptors)?;
        info!(primary = %primary.display(), "database opened as secondary");
        Ok((inner, handles))
    }

    fn install_all_super_versions(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u32> = state.versions.cfs.keys().copied().collect();
        for id in ids {
            state.versions.install_super_version(id);
        }
    }

    /// Re-reads the primary's MANIFEST and WALs. Families the primary
    /// dropped become dropped here; families it created are ignored.
    pub(crate) fn try_catch_up_with_primary(&self) -> Result<()> {
        if self.mode != OpenMode::Secondary {
            return Err(Status::not_supported(
                "try_catch_up_with_primary is only supported in secondary mode",
            ));
        }
        let options = self.db_options.read().clone();
        let mut state = self.state.lock();
        let contents = ManifestContents::recover(&self.path)?;
        let table_cache = Arc::clone(&state.versions.table_cache);
        let mut next_memtable_id = state.next_memtable_id;

        let mut fresh = VersionSet::new(&self.path, Arc::clone(&table_cache));
        fresh.next_file_number = contents.next_file_number;
        fresh.last_sequence = contents.last_sequence;
        fresh.prev_log_number = contents.prev_log_number;
        fresh.max_column_family = contents.max_column_family;
        fresh.manifest_file_number = contents.manifest_number;
        fresh.super_version_number = state.versions.super_version_number;

        let old: BTreeMap<u32, Arc<ColumnFamilyData>> = state
            .versions
            .cfs
            .iter()
            .map(|(id, cf)| (*id, Arc::clone(&cf.data)))
            .collect();
        for (id, data) in &old {
            let Some(recovered) = contents.cfs.get(id) else {
                info!(cf = %data.name, "column family dropped by primary");
                data.set_dropped();
                continue;
            };
            let cf_options = data.options();
            let current = Arc::new(
                Version::empty(
                    *id,
                    cf_options.num_levels,
                    data.icmp.clone(),
                    Arc::clone(&table_cache),
                    reader_options(&cf_options),
                )
                .apply(&recovered.files_edit())?,
            );
            let mem = Arc::new(MemTable::new(
                next_memtable_id,
                data.icmp.clone(),
                contents.last_sequence,
            ));
            next_memtable_id += 1;
            let mut cf = CfState::new(Arc::clone(data), mem, current);
            cf.log_number = recovered.log_number;
            fresh.cfs.insert(*id, cf);
        }

        let mut recovery = Recovery {
            path: &self.path,
            options: &options,
            mode: OpenMode::Secondary,
            next_memtable_id,
        };
        let replay = recovery.replay_logs(&mut fresh, &self.path, false)?;
        state.next_memtable_id = recovery.next_memtable_id;
        let last_sequence = replay.max_sequence.max(fresh.last_sequence);
        state.versions = fresh;
        let ids: Vec<u32> = state.versions.cfs.keys().copied().collect();
        for id in ids {
            state.versions.install_super_version(id);
        }
        self.last_sequence.fetch_max(last_sequence, Ordering::AcqRel);
        debug!(last_sequence, logs = replay.logs.len(), "caught up with primary");
        Ok(())
    }

    /// Stops background work and releases the directory. Unpersisted
    /// writes are flushed first unless `avoid_flush_during_shutdown`.
    /// Later calls are no-ops.
    pub(crate) fn close(self: &Arc<Self>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut result = Ok(());
        if self.mode == OpenMode::ReadWrite {
            let needs_flush = !self.db_options.read().avoid_flush_during_shutdown
                && self.state.lock().unpersisted_data;
            if needs_flush {
                result = flush_unpersisted(self);
            }
        }
        self.shutting_down.store(true, Ordering::Release);
        {
            let mut state = self.state.lock();
            self.bg_cv.notify_all();
            self.wait_for_background_idle(&mut state);
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
        if let Some(mut writer) = self.log.lock().take() {
            if let Err(e) = writer.sync_to_disk() {
                warn!(error = %e, "syncing WAL on close failed");
                result = result.and(Err(e));
            }
        }
        {
            let mut state = self.state.lock();
            if let Err(e) = state.versions.close_manifest() {
                result = result.and(Err(e));
            }
        }
        self.file_lock.lock().take();
        info!(path = %self.path.display(), "database closed");
        result
    }
}

/// Flushes every family that holds writes skipped by the WAL.
fn flush_unpersisted(inner: &Arc<DbInner>) -> Result<()> {
    let ids: Vec<u32> = {
        let state = inner.state.lock();
        state
            .versions
            .cfs
            .values()
            .filter(|cf| cf.has_unflushed_data())
            .map(CfState::id)
            .collect()
    };
    if ids.is_empty() {
        return Ok(());
    }
    let options = FlushOptions {
        wait: true,
        allow_write_stall: true,
    };
    inner.flush_column_families(&ids, &options, FlushReason::Shutdown)
}

/// Deletes every file of the database at `path`, then the directory if it
/// ends up empty. Fails while another process has it open.
pub(crate) fn destroy(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let lock_path = path.join(LOCK);
    let lock = FileLock::lock(&lock_path)?;
    let mut result = Ok(());
    for (ft, file) in list_db_files(path)? {
        if ft == FileType::Lock {
            continue;
        }
        if let Err(e) = std::fs::remove_file(&file) {
            warn!(path = %file.display(), error = %e, "destroy: removing file failed");
            result = result.and(Err(Status::from(e)));
        }
    }
    let lost = path.join(LOST_DIR);
    if lost.is_dir() {
        if let Err(e) = std::fs::remove_dir_all(&lost) {
            result = result.and(Err(Status::from(e)));
        }
    }
    drop(lock);
    let _ = std::fs::remove_file(&lock_path);
    // Left in place when foreign files remain.
    let _ = std::fs::remove_dir(path);
    info!(path = %path.display(), "database destroyed");
    result
}
