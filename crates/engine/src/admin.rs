//! Administrative operations: column family lifecycle, dynamic options,
//! background work control, file deletion control, and recovery from
//! background errors.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use config::ColumnFamilyOptions;
use parking_lot::MutexGuard;
use tracing::{info, warn};
use types::listener::FlushReason;
use types::{Result, Status};

use crate::column_family::{ColumnFamilyData, ColumnFamilyHandle};
use crate::db_impl::{DbInner, DbState, ErrorSeverity, OpenMode};
use crate::open::new_cf_state;
use crate::options::FlushOptions;
use crate::version_edit::VersionEdit;
use crate::version_set::DEFAULT_CF_ID;

impl DbInner {
    pub(crate) fn create_column_family(
        self: &Arc<Self>,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let data = self.create_column_family_locked(&mut state, name, options)?;
        self.persist_options(&mut state)?;
        Ok(ColumnFamilyHandle::new(data))
    }

    /// Records a new family in the MANIFEST and installs it. Its log
    /// number is the current WAL, so older logs are never replayed into it.
    pub(crate) fn create_column_family_locked(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<Arc<ColumnFamilyData>> {
        if state.versions.cf_by_name(name).is_some() {
            return Err(Status::invalid_argument(format!(
                "Column family already exists: {name}"
            )));
        }
        options.validate()?;
        let id = state.versions.max_column_family + 1;
        let mut edit = VersionEdit::for_column_family(id);
        edit.column_family_add = Some(name.to_string());
        edit.comparator = Some(options.comparator.name().to_string());
        edit.log_number = Some(state.log_number);
        edit.max_column_family = Some(id);

        let memtable_id = state.new_memtable_id();
        let table_cache = Arc::clone(&state.versions.table_cache);
        let mut cf = new_cf_state(
            id,
            name,
            options,
            &table_cache,
            None,
            memtable_id,
            self.latest_sequence(),
        )?;
        cf.log_number = state.log_number;
        let last_seq = self.latest_sequence();
        state.versions.write_edits(&mut [edit], last_seq)?;
        state.versions.max_column_family = id;
        let data = Arc::clone(&cf.data);
        state.versions.cfs.insert(id, cf);
        state.versions.install_super_version(id);
        info!(cf = name, id, "column family created");
        Ok(data)
    }

    /// Drops `cf`. Handles to it stay usable only for releasing; reads and
    /// writes through them fail. Its files go once no reader pins them.
    pub(crate) fn drop_column_family(self: &Arc<Self>, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        self.check_writable()?;
        if cf.id == DEFAULT_CF_ID {
            return Err(Status::invalid_argument("Can't drop default column family"));
        }
        let mut state = self.state.lock();
        if cf.is_dropped() || state.versions.cf(cf.id).is_none() {
            return Err(Status::invalid_argument(format!(
                "column family {} has been dropped",
                cf.name
            )));
        }
        let mut edit = VersionEdit::for_column_family(cf.id);
        edit.is_column_family_drop = true;
        let last_seq = self.latest_sequence();
        state.versions.write_edits(&mut [edit], last_seq)?;
        cf.set_dropped();
        state.versions.remove_column_family(cf.id);
        state.flush_queue.retain(|id| *id != cf.id);
        state.compaction_queue.retain(|id| *id != cf.id);
        info!(cf = %cf.name, id = cf.id, "column family dropped");
        self.persist_options(&mut state)?;
        let job_id = self.new_job_id();
        self.delete_obsolete_files(&mut state, job_id);
        self.bg_cv.notify_all();
        Ok(())
    }

    pub(crate) fn set_options(
        self: &Arc<Self>,
        cf: &Arc<ColumnFamilyData>,
        changes: &[(&str, &str)],
    ) -> Result<()> {
        self.check_writable()?;
        let next = cf.options().apply_mutable(changes)?;
        next.validate()?;
        let mut state = self.state.lock();
        state.versions.cf_state(cf.id)?;
        cf.set_options(next);
        state.versions.install_super_version(cf.id);
        info!(cf = %cf.name, ?changes, "column family options changed");
        self.persist_options(&mut state)?;
        self.enqueue_compaction_if_needed(&mut state, cf.id);
        self.maybe_schedule_work(&mut state);
        self.bg_cv.notify_all();
        Ok(())
    }

    pub(crate) fn set_db_options(self: &Arc<Self>, changes: &[(&str, &str)]) -> Result<()> {
        self.check_writable()?;
        let next = self.db_options.read().apply_mutable(changes)?;
        next.validate()?;
        let mut state = self.state.lock();
        *self.db_options.write() = next;
        info!(?changes, "database options changed");
        self.persist_options(&mut state)?;
        self.maybe_schedule_work(&mut state);
        Ok(())
    }

    /// Stops new background jobs from starting and waits for running ones.
    /// Nests; each call needs a matching `continue_background_work`.
    pub(crate) fn pause_background_work(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.bg_work_paused += 1;
        while state.running_flushes > 0 || state.running_compactions > 0 {
            self.bg_cv.wait(&mut state);
        }
        info!(depth = state.bg_work_paused, "background work paused");
        Ok(())
    }

    pub(crate) fn continue_background_work(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if state.bg_work_paused == 0 {
            return Err(Status::invalid_argument("background work is not paused"));
        }
        state.bg_work_paused -= 1;
        if state.bg_work_paused == 0 {
            info!("background work resumed");
            self.maybe_schedule_work(&mut state);
        }
        self.bg_cv.notify_all();
        Ok(())
    }

    /// Stops all background work for good, optionally waiting for running
    /// jobs. Writes skipped by the WAL are flushed first unless
    /// `avoid_flush_during_shutdown`.
    pub(crate) fn cancel_all_background_work(self: &Arc<Self>, wait: bool) {
        if self.mode == OpenMode::ReadWrite
            && !self.shutting_down.load(Ordering::Acquire)
            && !self.db_options.read().avoid_flush_during_shutdown
        {
            let ids: Vec<u32> = {
                let state = self.state.lock();
                if state.unpersisted_data {
                    state
                        .versions
                        .cfs
                        .values()
                        .filter(|cf| cf.has_unflushed_data())
                        .map(|cf| cf.id())
                        .collect()
                } else {
                    Vec::new()
                }
            };
            if !ids.is_empty() {
                let options = FlushOptions {
                    wait: true,
                    allow_write_stall: true,
                };
                if let Err(e) = self.flush_column_families(&ids, &options, FlushReason::Shutdown) {
                    warn!(error = %e, "flush before cancelling background work failed");
                }
            }
        }
        self.shutting_down.store(true, Ordering::Release);
        let mut state = self.state.lock();
        self.bg_cv.notify_all();
        if wait {
            self.wait_for_background_idle(&mut state);
        }
        info!(wait, "background work cancelled");
    }

    pub(crate) fn disable_file_deletions(&self) {
        let mut state = self.state.lock();
        state.disable_file_deletions += 1;
        info!(depth = state.disable_file_deletions, "file deletions disabled");
    }

    /// Re-enables deletions once every `disable_file_deletions` call is
    /// matched, or at once with `force`.
    pub(crate) fn enable_file_deletions(&self, force: bool) {
        let mut state = self.state.lock();
        if force {
            state.disable_file_deletions = 0;
        } else {
            state.disable_file_deletions = state.disable_file_deletions.saturating_sub(1);
        }
        if state.disable_file_deletions == 0 {
            info!("file deletions enabled");
            let job_id = self.new_job_id();
            self.delete_obsolete_files(&mut state, job_id);
        }
    }

    pub(crate) fn background_error(&self) -> Result<()> {
        match &self.state.lock().bg_error {
            Some(e) => Err(e.status.clone()),
            None => Ok(()),
        }
    }

    /// Clears the background error and restarts background work. After a
    /// hard error the families holding unflushed data are flushed, and the
    /// error comes back if that fails.
    pub(crate) fn resume(self: &Arc<Self>) -> Result<()> {
        self.check_writable()?;
        let (severity, ids) = {
            let mut state = self.state.lock();
            let Some(err) = state.bg_error.take() else {
                return Ok(());
            };
            for cf in state.versions.cfs.values_mut() {
                cf.compactions_suspended = false;
                cf.consecutive_compaction_failures = 0;
            }
            info!(error = %err.status, severity = ?err.severity, "resuming after background error");
            let ids: Vec<u32> = state
                .versions
                .cfs
                .values()
                .filter(|cf| cf.has_unflushed_data())
                .map(|cf| cf.id())
                .collect();
            (err.severity, ids)
        };
        if severity == ErrorSeverity::Hard && !ids.is_empty() {
            let options = FlushOptions {
                wait: true,
                allow_write_stall: true,
            };
            self.flush_column_families(&ids, &options, FlushReason::ManualFlush)?;
        }
        let mut state = self.state.lock();
        let all: Vec<u32> = state.versions.cfs.keys().copied().collect();
        for id in all {
            self.enqueue_flush(&mut state, id);
            self.enqueue_compaction_if_needed(&mut state, id);
        }
        self.maybe_schedule_work(&mut state);
        let job_id = self.new_job_id();
        self.delete_obsolete_files(&mut state, job_id);
        self.bg_cv.notify_all();
        Ok(())
    }
}
