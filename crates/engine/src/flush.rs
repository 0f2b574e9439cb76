//! Memtable flushes: turning immutable memtables into level-0 tables.
//!
//! At most one flush per family runs at a time and it always takes every
//! sealed memtable of the family, oldest first. That keeps the family's
//! `log_number` monotonic: once the edit is installed, every WAL older than
//! the newest flushed memtable's successor log holds nothing unflushed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use config::ColumnFamilyOptions;
use memtable::MemTable;
use parking_lot::MutexGuard;
use sstable::MergingIterator;
use tracing::{debug, info, warn};
use types::listener::{
    BackgroundErrorReason, FlushJobInfo, FlushReason, TableFileCreationInfo,
    TableFileCreationReason,
};
use types::{
    FragmentedRangeTombstones, InternalIterator, InternalKeyComparator, RangeTombstone,
    RateLimiter, Result, SequenceNumber, Status,
};

use crate::compaction::iterator::{CompactionIterator, CompactionIteratorOptions};
use crate::compaction::job::{build_table, table_builder_options, OutputFile};
use crate::db_impl::{current_thread_id, DbInner, DbState};
use crate::filename::table_file_path;
use crate::options::{FlushOptions, WriteOptions};
use crate::version_edit::VersionEdit;

/// Describes where a level-0 table built from memtables goes.
pub(crate) struct Level0Table<'a> {
    pub(crate) dir: &'a Path,
    pub(crate) number: u64,
    pub(crate) cf_id: u32,
    pub(crate) cf_name: &'a str,
    pub(crate) icmp: &'a InternalKeyComparator,
    pub(crate) options: &'a ColumnFamilyOptions,
    /// Live snapshots, ascending.
    pub(crate) snapshots: Vec<SequenceNumber>,
    pub(crate) creation_time: u64,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
}

/// Writes the merged contents of `mems` into one table. Versions hidden
/// from every snapshot are dropped and merge operands are partially merged
/// where the operator allows it. `None` when nothing survives.
pub(crate) fn write_level0_table(
    target: Level0Table<'_>,
    mems: &[Arc<MemTable>],
) -> Result<Option<OutputFile>> {
    let children: Vec<Box<dyn InternalIterator>> = mems
        .iter()
        .map(|m| Box::new(m.iter()) as Box<dyn InternalIterator>)
        .collect();
    let mut input = MergingIterator::new(target.icmp.clone(), children);
    input.seek_to_first();
    let tombstones: Vec<RangeTombstone> =
        mems.iter().flat_map(|m| m.range_tombstone_list()).collect();
    let range_dels = Arc::new(FragmentedRangeTombstones::new(
        &tombstones,
        Arc::clone(target.icmp.user_comparator()),
    ));
    let mut iter = CompactionIterator::new(
        Box::new(input),
        target.icmp.clone(),
        CompactionIteratorOptions {
            snapshots: target.snapshots,
            range_dels,
            merge_operator: target.options.merge_operator.clone(),
            filter: None,
            level: 0,
            key_not_exists_beyond: Box::new(|_| false),
            end: None,
        },
    );
    let path = table_file_path(target.dir, target.number);
    let opts = table_builder_options(
        target.cf_id,
        target.cf_name,
        target.icmp,
        target.options,
        target.creation_time,
        target.rate_limiter,
    );
    build_table(&path, target.number, opts, &mut iter, &tombstones)
}

impl DbInner {
    /// Entry point of a flush job on the high-priority pool.
    pub(crate) fn background_flush_call(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if self.shutting_down.load(Ordering::Acquire)
            || state.bg_work_paused > 0
            || state.hard_error().is_some()
        {
            // Left queued; rescheduled by `continue_background_work` or `resume`.
            state.unscheduled_flushes += 1;
        } else if let Some(cf_id) = state.flush_queue.pop_front() {
            if let Some(cf) = state.versions.cf_mut(cf_id) {
                cf.queued_for_flush = false;
            }
            state.running_flushes += 1;
            if let Err(e) = self.flush_memtables(&mut state, cf_id, FlushReason::WriteBufferFull) {
                self.set_bg_error(&mut state, BackgroundErrorReason::Flush, e);
            }
            state.running_flushes -= 1;
        }
        state.bg_flush_scheduled -= 1;
        self.maybe_schedule_work(&mut state);
        self.bg_cv.notify_all();
    }

    /// Flushes every sealed memtable of `cf_id` into one L0 table and
    /// installs it. No-op when another flush of the family is running or
    /// nothing is sealed.
    pub(crate) fn flush_memtables(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cf_id: u32,
        reason: FlushReason,
    ) -> Result<()> {
        let Some(cf) = state.versions.cf_mut(cf_id) else {
            return Ok(());
        };
        if cf.imm.iter().any(|m| m.flush_in_progress) {
            return Ok(());
        }
        let picked: Vec<Arc<MemTable>> = cf
            .imm
            .iter_mut()
            .map(|m| {
                m.flush_in_progress = true;
                Arc::clone(&m.mem)
            })
            .collect();
        let Some(newest) = picked.last() else {
            return Ok(());
        };
        let next_log = newest.next_log_number();
        let data = Arc::clone(&cf.data);
        let options = data.options();

        let number = state.reserve_output();
        let job_id = self.new_job_id();
        let path = table_file_path(&self.path, number);
        let (rate_limiter, creation_time) = (
            self.db_options.read().rate_limiter.clone(),
            self.env.unix_time_secs(),
        );
        let mut info = FlushJobInfo {
            cf_id,
            cf_name: data.name.clone(),
            file_path: path.clone(),
            file_number: number,
            thread_id: current_thread_id(),
            job_id,
            triggered_writes_slowdown: state.write_delayed,
            triggered_writes_stop: state.write_stopped,
            smallest_seqno: picked.iter().map(|m| m.first_seqno()).min().unwrap_or(0),
            largest_seqno: self.latest_sequence(),
            table_properties: Default::default(),
            flush_reason: reason,
        };
        let snapshots = self.snapshots.sequences();
        let start = self.env.now_micros();
        debug!(cf = %data.name, memtables = picked.len(), file = number, ?reason, "flush started");

        let built = MutexGuard::unlocked(state, || {
            self.notify(|l| l.on_flush_begin(&info));
            write_level0_table(
                Level0Table {
                    dir: &self.path,
                    number,
                    cf_id,
                    cf_name: &data.name,
                    icmp: &data.icmp,
                    options: &options,
                    snapshots,
                    creation_time,
                    rate_limiter,
                },
                &picked,
            )
        });

        let ids: HashSet<u64> = picked.iter().map(|m| m.id()).collect();
        let output = match built {
            Ok(output) => output,
            Err(e) => {
                self.rollback_flush(state, cf_id, &ids);
                state.release_output(number);
                warn!(cf = %data.name, error = %e, "flush failed");
                return Err(e);
            }
        };
        if data.is_dropped() || state.versions.cf(cf_id).is_none() {
            state.release_output(number);
            return Ok(());
        }

        let mut edit = VersionEdit::for_column_family(cf_id);
        edit.log_number = Some(next_log);
        if let Some(out) = &output {
            edit.add_file(0, out.meta.clone());
        }
        let last_seq = self.latest_sequence();
        if let Err(e) = state.versions.log_and_apply(vec![edit], last_seq) {
            self.rollback_flush(state, cf_id, &ids);
            state.release_output(number);
            return Err(e);
        }
        state.release_output(number);

        let bytes = output.as_ref().map_or(0, |o| o.meta.file_size);
        let cf = state.versions.cf_state_mut(cf_id)?;
        cf.imm.retain(|m| !ids.contains(&m.mem.id()));
        cf.stats.flushes += 1;
        cf.stats.flush_bytes += bytes;
        let l0 = cf.stats.level_mut(0);
        l0.bytes_written += bytes;
        l0.micros += self.env.now_micros().saturating_sub(start);
        state.versions.install_super_version(cf_id);
        if !state.versions.cfs.values().any(|cf| cf.has_unflushed_data()) {
            state.unpersisted_data = false;
        }

        self.enqueue_flush(state, cf_id);
        self.enqueue_compaction_if_needed(state, cf_id);
        self.maybe_schedule_work(state);
        self.delete_obsolete_files(state, job_id);
        self.bg_cv.notify_all();

        match &output {
            Some(out) => info!(
                cf = %data.name,
                file = number,
                bytes,
                entries = out.meta.num_entries,
                "flush finished"
            ),
            None => info!(cf = %data.name, "flush finished with no surviving entries"),
        }
        if !self.listeners.is_empty() {
            if let Some(out) = &output {
                info.table_properties = out.properties.clone();
                info.smallest_seqno = out.meta.smallest_seqno;
                info.largest_seqno = out.meta.largest_seqno;
            }
            let created = output.as_ref().map(|out| TableFileCreationInfo {
                db_name: self.path.clone(),
                cf_name: data.name.clone(),
                file_path: out.path.clone(),
                file_size: out.meta.file_size,
                job_id,
                table_properties: out.properties.clone(),
                reason: TableFileCreationReason::Flush,
                status: Ok(()),
            });
            MutexGuard::unlocked(state, || {
                if let Some(created) = &created {
                    self.notify(|l| l.on_table_file_created(created));
                }
                self.notify(|l| l.on_flush_completed(&info));
            });
        }
        Ok(())
    }

    fn rollback_flush(&self, state: &mut DbState, cf_id: u32, ids: &HashSet<u64>) {
        if let Some(cf) = state.versions.cf_mut(cf_id) {
            for m in cf.imm.iter_mut().filter(|m| ids.contains(&m.mem.id())) {
                m.flush_in_progress = false;
            }
        }
    }

    /// Seals the active memtables of `cf_ids` and, with `options.wait`,
    /// blocks until every memtable sealed up to now is flushed.
    pub(crate) fn flush_column_families(
        self: &Arc<Self>,
        cf_ids: &[u32],
        options: &FlushOptions,
        reason: FlushReason,
    ) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if !options.allow_write_stall {
            self.wait_until_flush_would_not_stall(&mut state, cf_ids);
        }

        // Holding the head of the writer queue keeps the memtables still.
        if let Some(result) = self.join_write_queue(&mut state, None, WriteOptions::default()) {
            result?;
        }
        let mut targets: Vec<(u32, u64)> = Vec::new();
        let mut switched = Ok(());
        for &id in cf_ids {
            if let Err(e) = self.switch_memtable(&mut state, id) {
                switched = Err(e);
                break;
            }
            if let Some(newest) = state.versions.cf(id).and_then(|cf| cf.imm.last()) {
                targets.push((id, newest.mem.id()));
            }
        }
        self.leave_write_queue(&mut state, 1);
        switched?;
        debug!(?reason, families = cf_ids.len(), "manual flush requested");
        if !options.wait {
            return Ok(());
        }

        loop {
            if let Some(e) = state.hard_error() {
                return Err(e);
            }
            let pending = targets.iter().any(|&(id, mem_id)| {
                state
                    .versions
                    .cf(id)
                    .is_some_and(|cf| cf.imm.iter().any(|m| m.mem.id() <= mem_id))
            });
            if !pending {
                return Ok(());
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Status::shutdown_in_progress("database is closing"));
            }
            if state.bg_work_paused > 0 {
                return Err(Status::incomplete("background work is paused"));
            }
            self.bg_cv.wait(&mut state);
        }
    }

    /// Waits while sealing another memtable would stop writes.
    fn wait_until_flush_would_not_stall(&self, state: &mut MutexGuard<'_, DbState>, cf_ids: &[u32]) {
        loop {
            if state.hard_error().is_some()
                || state.bg_work_paused > 0
                || self.shutting_down.load(Ordering::Acquire)
            {
                return;
            }
            let would_stall = cf_ids.iter().any(|id| {
                state.versions.cf(*id).is_some_and(|cf| {
                    let o = cf.data.options();
                    !cf.mem.is_empty() && cf.imm.len() + 2 > o.max_write_buffer_number
                })
            });
            if !would_stall {
                return;
            }
            self.bg_cv.wait(state);
        }
    }
}
