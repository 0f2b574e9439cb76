//! Shared state behind a [`DB`](crate::DB) handle.
//!
//! [`DbInner`] is reference counted: background jobs hold a clone while
//! they run. Everything that changes together lives in [`DbState`] behind
//! one mutex. Reads never take it; they pin a super version instead.
//!
//! Locking order: `state`, then `log`. Table I/O, WAL appends and listener
//! callbacks happen with `state` released.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use config::{ColumnFamilyOptions, DbOptions};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use types::listener::{BackgroundErrorReason, TableFileDeletionInfo};
use types::{Env, EventListener, Result, SequenceNumber, Status};
use wal::WalWriter;

use crate::column_family::ColumnFamilyData;
use crate::filename::{list_db_files, FileType};
use crate::lock::FileLock;
use crate::scheduler::{Priority, Scheduler};
use crate::snapshot::SnapshotList;
use crate::table_cache::TableCache;
use crate::version_set::VersionSet;
use crate::write::{ParallelInsert, Writer};

/// How the database was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMode {
    ReadWrite,
    ReadOnly,
    /// Follows another instance's files without writing anything.
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ErrorSeverity {
    /// Compactions failed; writes continue.
    Soft,
    /// Flush or WAL failure; writes fail until `resume`.
    Hard,
}

#[derive(Debug, Clone)]
pub(crate) struct BackgroundError {
    pub(crate) status: Status,
    pub(crate) severity: ErrorSeverity,
}

/// Compactions of a family are suspended after this many failures in a
/// row, until `resume`.
pub(crate) const MAX_CONSECUTIVE_COMPACTION_FAILURES: u32 = 3;

pub(crate) struct DbState {
    pub(crate) versions: VersionSet,
    pub(crate) writers: VecDeque<Writer>,
    /// Results of writers committed by another group leader.
    pub(crate) completed: HashMap<u64, Result<()>>,
    /// Memtable inserts handed to followers of a concurrent write group.
    pub(crate) parallel_inserts: HashMap<u64, ParallelInsert>,
    pub(crate) next_writer_id: u64,
    /// Number of the WAL currently written.
    pub(crate) log_number: u64,
    /// Nothing was appended to the current WAL yet.
    pub(crate) log_empty: bool,
    /// Older WALs still on disk: `(number, size)`.
    pub(crate) alive_logs: VecDeque<(u64, u64)>,
    /// Writes skipped the WAL since the last flush.
    pub(crate) unpersisted_data: bool,
    pub(crate) bg_error: Option<BackgroundError>,
    /// Background errors recorded since open, including suppressed ones.
    pub(crate) num_bg_errors: u64,
    pub(crate) flush_queue: VecDeque<u32>,
    pub(crate) compaction_queue: VecDeque<u32>,
    pub(crate) unscheduled_flushes: usize,
    pub(crate) unscheduled_compactions: usize,
    pub(crate) bg_flush_scheduled: usize,
    pub(crate) bg_compaction_scheduled: usize,
    pub(crate) running_flushes: usize,
    pub(crate) running_compactions: usize,
    pub(crate) manual_compactions: usize,
    /// Manual compactions that keep automatic ones from starting.
    pub(crate) exclusive_manual_compactions: usize,
    pub(crate) bg_work_paused: usize,
    /// File numbers handed to jobs that have not installed them yet.
    pub(crate) pending_outputs: BTreeSet<u64>,
    pub(crate) disable_file_deletions: usize,
    pub(crate) next_memtable_id: u64,
    pub(crate) write_stopped: bool,
    pub(crate) write_delayed: bool,
}

impl DbState {
    pub(crate) fn new(versions: VersionSet) -> Self {
        Self {
            versions,
            writers: VecDeque::new(),
            completed: HashMap::new(),
            parallel_inserts: HashMap::new(),
            next_writer_id: 1,
            log_number: 0,
            log_empty: true,
            alive_logs: VecDeque::new(),
            unpersisted_data: false,
            bg_error: None,
            num_bg_errors: 0,
            flush_queue: VecDeque::new(),
            compaction_queue: VecDeque::new(),
            unscheduled_flushes: 0,
            unscheduled_compactions: 0,
            bg_flush_scheduled: 0,
            bg_compaction_scheduled: 0,
            running_flushes: 0,
            running_compactions: 0,
            manual_compactions: 0,
            exclusive_manual_compactions: 0,
            bg_work_paused: 0,
            pending_outputs: BTreeSet::new(),
            disable_file_deletions: 0,
            next_memtable_id: 1,
            write_stopped: false,
            write_delayed: false,
        }
    }

    pub(crate) fn new_memtable_id(&mut self) -> u64 {
        let id = self.next_memtable_id;
        self.next_memtable_id += 1;
        id
    }

    /// Allocates a file number protected from obsolete-file deletion until
    /// [`DbState::release_output`].
    pub(crate) fn reserve_output(&mut self) -> u64 {
        let n = self.versions.new_file_number();
        self.pending_outputs.insert(n);
        n
    }

    pub(crate) fn release_output(&mut self, number: u64) {
        self.pending_outputs.remove(&number);
    }

    pub(crate) fn hard_error(&self) -> Option<Status> {
        self.bg_error
            .as_ref()
            .filter(|e| e.severity == ErrorSeverity::Hard)
            .map(|e| e.status.clone())
    }

    pub(crate) fn total_log_size(&self) -> u64 {
        self.alive_logs.iter().map(|(_, size)| size).sum()
    }

    pub(crate) fn bg_jobs_scheduled(&self) -> usize {
        self.bg_flush_scheduled + self.bg_compaction_scheduled
    }
}

pub(crate) struct DbInner {
    pub(crate) path: PathBuf,
    pub(crate) mode: OpenMode,
    pub(crate) db_options: RwLock<DbOptions>,
    pub(crate) env: Arc<dyn Env>,
    pub(crate) state: Mutex<DbState>,
    /// Signalled whenever background work finishes or its state changes.
    pub(crate) bg_cv: Condvar,
    /// Signalled when the writer queue changes.
    pub(crate) write_cv: Condvar,
    /// Only the write-group leader appends; only a leader switches it.
    pub(crate) log: Mutex<Option<WalWriter>>,
    /// Last sequence number visible to reads.
    pub(crate) last_sequence: AtomicU64,
    pub(crate) snapshots: Arc<SnapshotList>,
    pub(crate) table_cache: Arc<TableCache>,
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) listeners: Vec<Arc<dyn EventListener>>,
    pub(crate) file_lock: Mutex<Option<FileLock>>,
    pub(crate) next_job_id: AtomicU64,
    pub(crate) closed: AtomicBool,
}

impl DbInner {
    pub(crate) fn new_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn latest_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self, mut f: impl FnMut(&dyn EventListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.mode {
            OpenMode::ReadWrite => {}
            OpenMode::ReadOnly => {
                return Err(Status::not_supported("not supported operation in read only mode"))
            }
            OpenMode::Secondary => {
                return Err(Status::not_supported("not supported operation in secondary mode"))
            }
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Status::shutdown_in_progress("database is closing"));
        }
        Ok(())
    }

    /// Live family data by id.
    pub(crate) fn cf_data(&self, state: &DbState, id: u32) -> Result<Arc<ColumnFamilyData>> {
        let cf = state.versions.cf_state(id)?;
        Ok(Arc::clone(&cf.data))
    }

    /// Records a background failure. Listeners may override the status; an
    /// `Ok` override drops it. A new error never downgrades an existing,
    /// more severe one.
    pub(crate) fn set_bg_error(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        reason: BackgroundErrorReason,
        status: Status,
    ) {
        if status.is_shutdown_in_progress() {
            return;
        }
        state.num_bg_errors += 1;
        let mut result: Result<()> = Err(status);
        if !self.listeners.is_empty() {
            MutexGuard::unlocked(state, || {
                self.notify(|l| l.on_background_error(reason, &mut result));
            });
        }
        let Err(status) = result else {
            info!(?reason, "background error suppressed by listener");
            return;
        };
        let severity = match reason {
            BackgroundErrorReason::Compaction => ErrorSeverity::Soft,
            BackgroundErrorReason::Flush
            | BackgroundErrorReason::WriteCallback
            | BackgroundErrorReason::MemTable => ErrorSeverity::Hard,
        };
        if state.bg_error.as_ref().is_some_and(|e| e.severity > severity) {
            return;
        }
        error!(?reason, ?severity, error = %status, "background error");
        state.bg_error = Some(BackgroundError { status, severity });
        self.bg_cv.notify_all();
    }

    pub(crate) fn enqueue_flush(&self, state: &mut DbState, cf_id: u32) {
        let Some(cf) = state.versions.cf_mut(cf_id) else {
            return;
        };
        if cf.queued_for_flush || !cf.has_pending_flush() {
            return;
        }
        cf.queued_for_flush = true;
        state.flush_queue.push_back(cf_id);
        state.unscheduled_flushes += 1;
    }

    /// Queues `cf_id` for an automatic compaction when its shape asks for one.
    pub(crate) fn enqueue_compaction_if_needed(&self, state: &mut DbState, cf_id: u32) {
        let Some(cf) = state.versions.cf_mut(cf_id) else {
            return;
        };
        if cf.queued_for_compaction || cf.compactions_suspended || cf.data.is_dropped() {
            return;
        }
        let options = cf.data.options();
        if options.disable_auto_compactions
            || !crate::compaction::picker::needs_compaction(&cf.current, &options)
        {
            return;
        }
        cf.queued_for_compaction = true;
        state.compaction_queue.push_back(cf_id);
        state.unscheduled_compactions += 1;
    }

    /// Hands queued flushes and compactions to the background pools, up to
    /// the configured concurrency.
    pub(crate) fn maybe_schedule_work(self: &Arc<Self>, state: &mut DbState) {
        if self.mode != OpenMode::ReadWrite
            || self.shutting_down.load(Ordering::Acquire)
            || state.bg_work_paused > 0
            || state.hard_error().is_some()
        {
            return;
        }
        let Some(scheduler) = self.scheduler.as_ref() else {
            return;
        };
        let (max_flushes, max_compactions) = self.db_options.read().background_limits();
        scheduler.ensure_threads(Priority::High, max_flushes);
        scheduler.ensure_threads(Priority::Low, max_compactions);

        while state.unscheduled_flushes > 0 && state.bg_flush_scheduled < max_flushes {
            let inner = Arc::clone(self);
            if !scheduler.schedule(Priority::High, Box::new(move || inner.background_flush_call())) {
                break;
            }
            state.unscheduled_flushes -= 1;
            state.bg_flush_scheduled += 1;
        }
        if state.exclusive_manual_compactions > 0 {
            return;
        }
        while state.unscheduled_compactions > 0 && state.bg_compaction_scheduled < max_compactions
        {
            let inner = Arc::clone(self);
            if !scheduler.schedule(
                Priority::Low,
                Box::new(move || inner.background_compaction_call()),
            ) {
                break;
            }
            state.unscheduled_compactions -= 1;
            state.bg_compaction_scheduled += 1;
        }
    }

    /// Blocks until no background job is scheduled or running.
    pub(crate) fn wait_for_background_idle(&self, state: &mut MutexGuard<'_, DbState>) {
        while state.bg_jobs_scheduled() > 0 {
            self.bg_cv.wait(state);
        }
    }

    /// Removes table files no version references, WALs older than every
    /// family's unflushed data, and superseded MANIFESTs.
    pub(crate) fn delete_obsolete_files(&self, state: &mut MutexGuard<'_, DbState>, job_id: u64) {
        if self.mode != OpenMode::ReadWrite || state.disable_file_deletions > 0 {
            return;
        }
        let mut live = state.versions.live_files();
        live.extend(state.pending_outputs.iter().copied());
        let min_log = state.versions.min_log_number_to_keep(state.log_number);
        let current_log = state.log_number;
        let manifest = state.versions.manifest_file_number;

        let files = match list_db_files(&self.path) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "listing database directory failed");
                return;
            }
        };
        let doomed: Vec<(FileType, PathBuf)> = files
            .into_iter()
            .filter(|(ft, _)| match *ft {
                FileType::Table(n) => !live.contains(&n),
                FileType::Log(n) => n < min_log && n != current_log,
                FileType::Manifest(n) => n < manifest,
                _ => false,
            })
            .collect();
        state.alive_logs.retain(|(n, _)| *n >= min_log);
        if doomed.is_empty() {
            return;
        }

        MutexGuard::unlocked(state, || {
            for (ft, path) in doomed {
                let status = match std::fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => Err(Status::from(e)),
                };
                match &status {
                    Ok(()) => debug!(path = %path.display(), "obsolete file deleted"),
                    Err(e) => warn!(path = %path.display(), error = %e, "deleting obsolete file failed"),
                }
                if let FileType::Table(n) = ft {
                    self.table_cache.evict(n);
                    let info = TableFileDeletionInfo {
                        db_name: self.path.clone(),
                        file_path: path.clone(),
                        job_id,
                        status: status.clone(),
                    };
                    self.notify(|l| l.on_table_file_deleted(&info));
                }
            }
        });
    }

    /// Writes a fresh OPTIONS file describing the database and every live
    /// family.
    pub(crate) fn persist_options(&self, state: &mut DbState) -> Result<()> {
        if self.mode != OpenMode::ReadWrite {
            return Ok(());
        }
        let number = state.versions.new_file_number();
        let db = self.db_options.read().clone();
        let cfs: Vec<(String, Arc<ColumnFamilyOptions>)> = state
            .versions
            .cfs
            .values()
            .map(|cf| (cf.name().to_string(), cf.data.options()))
            .collect();
        let refs: Vec<(&str, &ColumnFamilyOptions)> =
            cfs.iter().map(|(n, o)| (n.as_str(), o.as_ref())).collect();
        config::write_options_file(&self.path, number, &db, &refs)?;
        Ok(())
    }
}

/// Stable numeric id of the calling thread, for listener payloads.
pub(crate) fn current_thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut h);
    h.finish()
}
