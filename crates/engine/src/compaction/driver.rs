//! Scheduling and installing compactions: automatic ones picked per family
//! on the low-priority pool, and manual `compact_range` requests.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use config::CompactionStyle;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use types::listener::{
    BackgroundErrorReason, CompactionJobInfo, CompactionJobStats, FlushReason,
    TableFileCreationInfo, TableFileCreationReason,
};
use types::{Result, Status};

use super::job::{run_compaction, JobContext, OutputFile};
use super::picker::{full_compaction, manual_compaction, pick_compaction};
use super::Compaction;
use crate::column_family::ColumnFamilyData;
use crate::db_impl::{current_thread_id, DbInner, DbState, MAX_CONSECUTIVE_COMPACTION_FAILURES};
use crate::filename::table_file_path;
use crate::options::{BottommostLevelCompaction, CompactRangeOptions, FlushOptions};
use crate::version_edit::VersionEdit;

impl DbInner {
    /// Entry point of a compaction job on the low-priority pool.
    pub(crate) fn background_compaction_call(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if self.shutting_down.load(Ordering::Acquire)
            || state.bg_work_paused > 0
            || state.hard_error().is_some()
        {
            state.unscheduled_compactions += 1;
        } else {
            let max_subcompactions = self.db_options.read().max_subcompactions;
            while let Some(cf_id) = state.compaction_queue.pop_front() {
                let picked = state.versions.cf_mut(cf_id).and_then(|cf| {
                    cf.queued_for_compaction = false;
                    if cf.compactions_suspended || cf.data.is_dropped() {
                        None
                    } else {
                        pick_compaction(cf, max_subcompactions)
                    }
                });
                let Some(c) = picked else {
                    continue;
                };
                let result = self.run_compaction_job(&mut state, c);
                self.record_compaction_result(&mut state, cf_id, result);
                self.enqueue_compaction_if_needed(&mut state, cf_id);
                break;
            }
        }
        state.bg_compaction_scheduled -= 1;
        self.maybe_schedule_work(&mut state);
        self.bg_cv.notify_all();
    }

    fn record_compaction_result(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        cf_id: u32,
        result: Result<()>,
    ) {
        let Some(cf) = state.versions.cf_mut(cf_id) else {
            return;
        };
        match result {
            Ok(()) => cf.consecutive_compaction_failures = 0,
            Err(e) if e.is_shutdown_in_progress() => {}
            Err(e) => {
                cf.consecutive_compaction_failures += 1;
                if cf.consecutive_compaction_failures >= MAX_CONSECUTIVE_COMPACTION_FAILURES {
                    cf.compactions_suspended = true;
                    warn!(
                        cf = %cf.name(),
                        failures = cf.consecutive_compaction_failures,
                        "compactions suspended until resume"
                    );
                }
                self.set_bg_error(state, BackgroundErrorReason::Compaction, e);
            }
        }
    }

    /// Runs `c` with the mutex released and installs its result. The inputs
    /// are released from `being_compacted` whatever the outcome.
    pub(crate) fn run_compaction_job(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        c: Compaction,
    ) -> Result<()> {
        let cf_id = c.cf_id;
        state.running_compactions += 1;
        if let Some(cf) = state.versions.cf_mut(cf_id) {
            cf.running_compactions += 1;
        }
        let result = self.execute_compaction(state, &c);
        c.mark_being_compacted(false);
        state.running_compactions -= 1;
        if let Some(cf) = state.versions.cf_mut(cf_id) {
            cf.running_compactions -= 1;
        }
        self.bg_cv.notify_all();
        result
    }

    fn execute_compaction(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        c: &Compaction,
    ) -> Result<()> {
        let data = self.cf_data(state, c.cf_id)?;
        let job_id = self.new_job_id();
        let start = self.env.now_micros();
        let mut info = CompactionJobInfo {
            cf_id: c.cf_id,
            cf_name: data.name.clone(),
            status: Ok(()),
            thread_id: current_thread_id(),
            job_id,
            base_input_level: c.start_level(),
            output_level: c.output_level,
            input_files: c
                .input_files()
                .map(|(_, f)| table_file_path(&self.path, f.number))
                .collect(),
            output_files: Vec::new(),
            compaction_reason: c.reason,
            stats: CompactionJobStats::default(),
        };

        let mut edit = VersionEdit::for_column_family(c.cf_id);
        c.add_input_deletions(&mut edit);
        let mut outputs: Vec<OutputFile> = Vec::new();
        let allocated: Mutex<Vec<u64>> = Mutex::new(Vec::new());

        if c.deletion_only {
            info!(cf = %data.name, inputs = %c.input_levels_summary(), reason = ?c.reason, "dropping files");
        } else if c.trivial_move {
            for (_, f) in c.input_files() {
                edit.add_file(c.output_level, (**f).clone());
            }
            debug!(cf = %data.name, inputs = %c.input_levels_summary(), to = c.output_level, "trivial move");
        } else {
            info!(
                cf = %data.name,
                job = job_id,
                inputs = %c.input_levels_summary(),
                output_level = c.output_level,
                reason = ?c.reason,
                "compaction started"
            );
            let snapshots = self.snapshots.sequences();
            let rate_limiter = self.db_options.read().rate_limiter.clone();
            let creation_time = self.env.unix_time_secs();
            let new_file_number = || {
                let n = self.state.lock().reserve_output();
                allocated.lock().push(n);
                n
            };
            let outcome = MutexGuard::unlocked(state, || {
                self.notify(|l| l.on_compaction_begin(&info));
                let ctx = JobContext {
                    dir: &self.path,
                    cf_name: &data.name,
                    snapshots,
                    new_file_number: &new_file_number,
                    rate_limiter,
                    creation_time,
                    shutting_down: &self.shutting_down,
                    job_id,
                };
                run_compaction(c, &ctx)
            });
            match outcome {
                Ok(outcome) => {
                    for out in &outcome.outputs {
                        edit.add_file(c.output_level, out.meta.clone());
                    }
                    info.stats = outcome.stats;
                    outputs = outcome.outputs;
                }
                Err(e) => {
                    self.release_outputs(state, &allocated);
                    warn!(cf = %data.name, job = job_id, error = %e, "compaction failed");
                    info.status = Err(e.clone());
                    self.notify_compaction_completed(state, &info, &[]);
                    return Err(e);
                }
            }
        }

        if data.is_dropped() || state.versions.cf(c.cf_id).is_none() {
            self.release_outputs(state, &allocated);
            return Ok(());
        }
        let last_seq = self.latest_sequence();
        let applied = state.versions.log_and_apply(vec![edit], last_seq);
        self.release_outputs(state, &allocated);
        if let Err(e) = applied {
            info.status = Err(e.clone());
            self.notify_compaction_completed(state, &info, &[]);
            return Err(e);
        }

        let elapsed = self.env.now_micros().saturating_sub(start);
        let bytes_read = if c.trivial_move || c.deletion_only { 0 } else { c.input_bytes() };
        let bytes_written: u64 = outputs.iter().map(|o| o.meta.file_size).sum();
        if let Some(cf) = state.versions.cf_mut(c.cf_id) {
            let stats = cf.stats.level_mut(c.output_level);
            stats.compactions += 1;
            stats.bytes_read += bytes_read;
            stats.bytes_written += bytes_written;
            stats.micros += elapsed;
        }
        info.stats.elapsed_micros = elapsed;
        info.stats.num_input_files = c.num_input_files() as u64;
        info.stats.num_input_files_at_output_level = c.num_input_files_at_output_level() as u64;
        info.stats.is_manual_compaction = c.is_manual;
        info.stats.total_input_bytes = c.input_bytes();
        info.output_files = outputs.iter().map(|o| o.path.clone()).collect();
        info!(
            cf = %data.name,
            job = job_id,
            outputs = outputs.len(),
            bytes_read,
            bytes_written,
            micros = elapsed,
            summary = %state.versions.cf(c.cf_id).map(|cf| cf.current.level_summary()).unwrap_or_default(),
            "compaction finished"
        );

        self.delete_obsolete_files(state, job_id);
        self.notify_compaction_completed(state, &info, &outputs);
        Ok(())
    }

    fn release_outputs(&self, state: &mut DbState, allocated: &Mutex<Vec<u64>>) {
        for n in allocated.lock().drain(..) {
            state.release_output(n);
        }
    }

    fn notify_compaction_completed(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        info: &CompactionJobInfo,
        outputs: &[OutputFile],
    ) {
        if self.listeners.is_empty() {
            return;
        }
        let created: Vec<TableFileCreationInfo> = outputs
            .iter()
            .map(|out| TableFileCreationInfo {
                db_name: self.path.clone(),
                cf_name: info.cf_name.clone(),
                file_path: out.path.clone(),
                file_size: out.meta.file_size,
                job_id: info.job_id,
                table_properties: out.properties.clone(),
                reason: TableFileCreationReason::Compaction,
                status: Ok(()),
            })
            .collect();
        MutexGuard::unlocked(state, || {
            for c in &created {
                self.notify(|l| l.on_table_file_created(c));
            }
            self.notify(|l| l.on_compaction_completed(info));
        });
    }

    /// Compacts every file of `cf` overlapping `[begin, end]` down the
    /// tree. Unflushed data is flushed first.
    pub(crate) fn compact_range(
        self: &Arc<Self>,
        cf: &Arc<ColumnFamilyData>,
        options: &CompactRangeOptions,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.check_writable()?;
        if let (Some(b), Some(e)) = (begin, end) {
            if cf.icmp.compare_user(b, e) == std::cmp::Ordering::Greater {
                return Err(Status::invalid_argument("compact_range: begin is after end"));
            }
        }
        let unflushed = {
            let state = self.state.lock();
            state.versions.cf(cf.id).is_some_and(|c| c.has_unflushed_data())
        };
        if unflushed {
            let flush = FlushOptions {
                wait: true,
                allow_write_stall: true,
            };
            self.flush_column_families(&[cf.id], &flush, FlushReason::ManualFlush)?;
        }

        let mut state = self.state.lock();
        state.manual_compactions += 1;
        if options.exclusive_manual_compaction {
            state.exclusive_manual_compactions += 1;
            while state.running_compactions > 0 && state.hard_error().is_none() {
                self.bg_cv.wait(&mut state);
            }
        }
        let result = self.run_manual_compaction(&mut state, cf, options, begin, end);
        state.manual_compactions -= 1;
        if options.exclusive_manual_compaction {
            state.exclusive_manual_compactions -= 1;
        }
        self.enqueue_compaction_if_needed(&mut state, cf.id);
        self.maybe_schedule_work(&mut state);
        self.bg_cv.notify_all();
        result
    }

    fn run_manual_compaction(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cf: &Arc<ColumnFamilyData>,
        options: &CompactRangeOptions,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let cf_options = cf.options();
        let max_subcompactions = if options.max_subcompactions > 0 {
            options.max_subcompactions
        } else {
            self.db_options.read().max_subcompactions
        };

        if cf_options.compaction_style != CompactionStyle::Level {
            let output_level = match cf_options.compaction_style {
                CompactionStyle::Fifo => 0,
                _ => cf_options.num_levels - 1,
            };
            return self.run_manual_step(state, cf, |version| {
                if version.num_files() == 0 {
                    return Ok(None);
                }
                Ok(full_compaction(version, &cf_options, output_level, max_subcompactions))
            });
        }

        let version = Arc::clone(&state.versions.cf_state(cf.id)?.current);
        let overlapping: Vec<usize> = (0..version.num_levels())
            .filter(|&l| !version.overlapping_inputs(l, begin, end).is_empty())
            .collect();
        let Some(&last) = overlapping.last() else {
            return Ok(());
        };
        let compact_bottommost = match options.bottommost_level_compaction {
            BottommostLevelCompaction::Skip => false,
            BottommostLevelCompaction::Force => true,
            BottommostLevelCompaction::IfHaveCompactionFilter => {
                cf_options.compaction_filter.is_some()
                    || cf_options.compaction_filter_factory.is_some()
            }
        };
        let mut final_level = last;
        for level in overlapping[0]..=last {
            let bottommost = level == last && level > 0;
            let output_level = if bottommost {
                if !compact_bottommost {
                    break;
                }
                level
            } else {
                (level + 1).min(version.num_levels() - 1)
            };
            self.run_manual_step(state, cf, |v| {
                if v.overlapping_inputs(level, begin, end).is_empty() {
                    return Ok(None);
                }
                Ok(manual_compaction(
                    v,
                    &cf_options,
                    level,
                    output_level,
                    begin,
                    end,
                    max_subcompactions,
                ))
            })?;
            final_level = output_level;
        }

        if options.change_level {
            self.refit_level(state, cf, final_level, options.target_level)?;
        }
        Ok(())
    }

    /// Picks with `pick` against the current version until it yields a
    /// compaction (then runs it) or reports nothing to do. Busy inputs make
    /// it wait for running jobs.
    fn run_manual_step(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cf: &Arc<ColumnFamilyData>,
        mut pick: impl FnMut(&Arc<crate::version::Version>) -> Result<Option<Compaction>>,
    ) -> Result<()> {
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Status::shutdown_in_progress("database is closing"));
            }
            if cf.is_dropped() {
                return Err(Status::invalid_argument(format!(
                    "column family {} has been dropped",
                    cf.name
                )));
            }
            let version = Arc::clone(&state.versions.cf_state(cf.id)?.current);
            let has_files = version.num_files() > 0;
            match pick(&version)? {
                Some(mut c) => {
                    c.is_manual = true;
                    c.reason = types::listener::CompactionReason::ManualCompaction;
                    return self.run_compaction_job(state, c);
                }
                None if !has_files || !version.all_files().any(|(_, f)| f.is_being_compacted()) => {
                    return Ok(());
                }
                None => {
                    if state.bg_work_paused > 0 {
                        return Err(Status::incomplete("background work is paused"));
                    }
                    self.bg_cv.wait(state);
                }
            }
        }
    }

    /// Moves every file of `level` to `target_level` (or, when negative, to
    /// the lowest level that is empty and can hold it). Only legal when
    /// every level in between is empty.
    fn refit_level(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        cf: &Arc<ColumnFamilyData>,
        level: usize,
        target_level: i32,
    ) -> Result<()> {
        let cf_state = state.versions.cf_state(cf.id)?;
        let version = Arc::clone(&cf_state.current);
        let options = cf.options();
        let target = if target_level < 0 {
            let bytes = version.level_bytes(level);
            let mut t = level;
            while t > 1
                && version.num_level_files(t - 1) == 0
                && bytes <= options.max_bytes_for_level(t - 1)
            {
                t -= 1;
            }
            t
        } else {
            target_level as usize
        };
        if target >= version.num_levels() {
            return Err(Status::invalid_argument(format!(
                "target level {target} exceeds num_levels {}",
                version.num_levels()
            )));
        }
        if target == level || version.num_level_files(level) == 0 {
            return Ok(());
        }
        let (lo, hi) = if target < level { (target, level) } else { (level + 1, target + 1) };
        if (lo..hi).any(|l| l != level && version.num_level_files(l) > 0) {
            return Err(Status::not_supported(format!(
                "cannot move level {level} to {target}: levels in between are not empty"
            )));
        }
        if version.files(level).iter().any(|f| f.is_being_compacted()) {
            return Err(Status::busy("files of the level are being compacted"));
        }
        let mut edit = VersionEdit::for_column_family(cf.id);
        for f in version.files(level) {
            edit.delete_file(level, f.number);
            edit.add_file(target, (**f).clone());
        }
        let last_seq = self.latest_sequence();
        state.versions.log_and_apply(vec![edit], last_seq)?;
        info!(cf = %cf.name, from = level, to = target, "level refitted");
        Ok(())
    }
}
