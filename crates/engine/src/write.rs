//! Write path: group commit, WAL append, memtable insert.
//!
//! Writers queue up behind the database mutex. The writer at the head of
//! the queue becomes the leader: it makes room in the memtables, merges
//! the batches of compatible writers behind it into one WAL record, and
//! inserts the batches with the mutex released. With
//! `allow_concurrent_memtable_write` each follower inserts its own batch
//! in parallel; otherwise the leader inserts them one after another.
//! Followers wake up with the leader's verdict.
//!
//! Sequence numbers are assigned per record in queue order and published
//! only after the whole group is in the memtables, so a read never sees
//! half a batch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use config::CompactionStyle;
use memtable::MemTable;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use types::listener::{BackgroundErrorReason, MemTableInfo};
use types::{Result, SequenceNumber, Status, ValueType};
use wal::{Handler, WalWriter, WriteBatch};

use crate::column_family::ImmutableMemTable;
use crate::db_impl::{DbInner, DbState};
use crate::filename::log_file_path;
use crate::options::WriteOptions;

/// Upper bound on the bytes merged into one group.
const MAX_GROUP_BYTES: usize = 1 << 20;

/// A queued write. `batch` is `None` for callers that only need to hold
/// the head of the queue (memtable switches for flushes and ingestion).
pub(crate) struct Writer {
    pub(crate) id: u64,
    pub(crate) batch: Option<WriteBatch>,
    pub(crate) options: WriteOptions,
}

/// Applies batch records to memtables, one sequence number per record.
pub(crate) struct MemTableInserter<'a> {
    seq: SequenceNumber,
    mems: &'a HashMap<u32, Arc<MemTable>>,
    ignore_missing: bool,
    /// Families whose records are skipped (already flushed past this WAL).
    skip: Option<&'a HashSet<u32>>,
}

impl<'a> MemTableInserter<'a> {
    pub(crate) fn new(
        seq: SequenceNumber,
        mems: &'a HashMap<u32, Arc<MemTable>>,
        ignore_missing: bool,
    ) -> Self {
        Self {
            seq,
            mems,
            ignore_missing,
            skip: None,
        }
    }

    pub(crate) fn with_skip(mut self, skip: &'a HashSet<u32>) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sequence number the next record would get.
    pub(crate) fn sequence(&self) -> SequenceNumber {
        self.seq
    }

    fn add(&mut self, cf: u32, t: ValueType, key: &[u8], value: &[u8]) -> Result<()> {
        let seq = self.seq;
        self.seq += 1;
        if self.skip.is_some_and(|s| s.contains(&cf)) {
            return Ok(());
        }
        match self.mems.get(&cf) {
            Some(mem) => mem.add(seq, t, key, value),
            None if self.ignore_missing => Ok(()),
            None => Err(Status::invalid_argument(format!(
                "Invalid column family specified in write batch: {cf}"
            ))),
        }
    }
}

impl Handler for MemTableInserter<'_> {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(cf, ValueType::Value, key, value)
    }

    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()> {
        self.add(cf, ValueType::Deletion, key, &[])
    }

    fn single_delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()> {
        self.add(cf, ValueType::SingleDeletion, key, &[])
    }

    fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(cf, ValueType::Merge, key, value)
    }

    fn delete_range_cf(&mut self, cf: u32, begin: &[u8], end: &[u8]) -> Result<()> {
        self.add(cf, ValueType::RangeDeletion, begin, end)
    }
}

fn insert_batch(
    batch: &WriteBatch,
    first_seq: SequenceNumber,
    mems: &HashMap<u32, Arc<MemTable>>,
    ignore_missing: bool,
) -> Result<()> {
    let mut inserter = MemTableInserter::new(first_seq, mems, ignore_missing);
    batch.iterate(&mut inserter)
}

/// A follower's share of a concurrently inserted write group.
pub(crate) struct ParallelInsert {
    batch: WriteBatch,
    first_seq: SequenceNumber,
    ignore_missing: bool,
    mems: Arc<HashMap<u32, Arc<MemTable>>>,
    group: Arc<ParallelGroup>,
}

impl ParallelInsert {
    pub(crate) fn run(self) {
        let result = insert_batch(&self.batch, self.first_seq, &self.mems, self.ignore_missing);
        self.group.finish(result);
    }
}

struct GroupProgress {
    remaining: usize,
    error: Option<Status>,
}

/// Counts down the members still inserting; keeps the first failure.
struct ParallelGroup {
    progress: Mutex<GroupProgress>,
    done: Condvar,
}

impl ParallelGroup {
    fn new(members: usize) -> Self {
        Self {
            progress: Mutex::new(GroupProgress {
                remaining: members,
                error: None,
            }),
            done: Condvar::new(),
        }
    }

    fn finish(&self, result: Result<()>) {
        let mut p = self.progress.lock();
        if let Err(e) = result {
            p.error.get_or_insert(e);
        }
        p.remaining -= 1;
        if p.remaining == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) -> Result<()> {
        let mut p = self.progress.lock();
        while p.remaining > 0 {
            self.done.wait(&mut p);
        }
        match p.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A group member after validation.
struct Member {
    id: u64,
    batch: WriteBatch,
    options: WriteOptions,
    result: Result<()>,
    first_seq: SequenceNumber,
}

impl DbInner {
    /// Queues a writer and waits until it either reached the head of the
    /// queue (`None`) or a leader committed it (`Some(result)`).
    pub(crate) fn join_write_queue(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        batch: Option<WriteBatch>,
        options: WriteOptions,
    ) -> Option<Result<()>> {
        let id = state.next_writer_id;
        state.next_writer_id += 1;
        state.writers.push_back(Writer { id, batch, options });
        loop {
            if let Some(result) = state.completed.remove(&id) {
                return Some(result);
            }
            if let Some(task) = state.parallel_inserts.remove(&id) {
                MutexGuard::unlocked(state, || task.run());
                continue;
            }
            if state.writers.front().is_some_and(|w| w.id == id) {
                return None;
            }
            self.write_cv.wait(state);
        }
    }

    /// Pops the `n` writers at the head of the queue and wakes the rest.
    pub(crate) fn leave_write_queue(&self, state: &mut DbState, n: usize) {
        for _ in 0..n {
            state.writers.pop_front();
        }
        self.write_cv.notify_all();
    }

    pub(crate) fn write_impl(self: &Arc<Self>, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if let Some(result) = self.join_write_queue(&mut state, Some(batch), *options) {
            return result;
        }
        self.lead_write_group(&mut state)
    }

    fn lead_write_group(self: &Arc<Self>, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(leader_options) = state.writers.front().map(|w| w.options) else {
            return Err(Status::aborted("write queue is empty"));
        };
        if let Err(e) = self.make_room_for_write(state, leader_options.no_slowdown) {
            self.leave_write_queue(state, 1);
            return Err(e);
        }

        let mut members = self.build_write_group(state, leader_options);
        let group_size = members.len();
        let first_seq = self.latest_sequence() + 1;
        let mut next_seq = first_seq;
        let mut merged = WriteBatch::new();
        for m in members.iter_mut() {
            m.result = validate_column_families(state, &m.batch, m.options.ignore_missing_column_families);
            if m.result.is_ok() {
                m.first_seq = next_seq;
                next_seq += u64::from(m.batch.count());
                merged.append(&m.batch);
            }
        }
        merged.set_sequence(first_seq);
        let inserting = members.iter().filter(|m| m.result.is_ok()).count();
        let committed = inserting > 0;
        let concurrent = inserting > 1 && self.db_options.read().allow_concurrent_memtable_write;
        let mems: Arc<HashMap<u32, Arc<MemTable>>> = Arc::new(
            state
                .versions
                .cfs
                .iter()
                .map(|(id, cf)| (*id, Arc::clone(&cf.mem)))
                .collect(),
        );

        let outcome: std::result::Result<(), (BackgroundErrorReason, Status, bool)> =
            MutexGuard::unlocked(state, || {
                if !committed {
                    return Ok(());
                }
                if !leader_options.disable_wal {
                    let mut log = self.log.lock();
                    let writer = log.as_mut().ok_or_else(|| {
                        (BackgroundErrorReason::WriteCallback, Status::io_error("WAL is not open"), false)
                    })?;
                    writer
                        .append(merged.data())
                        .and_then(|()| {
                            if leader_options.sync {
                                writer.sync_to_disk()
                            } else {
                                Ok(())
                            }
                        })
                        .map_err(|e| (BackgroundErrorReason::WriteCallback, e, false))?;
                }
                let inserted = if concurrent {
                    self.insert_concurrently(&mut members, &mems, inserting)
                } else {
                    members.iter().filter(|m| m.result.is_ok()).try_for_each(|m| {
                        insert_batch(
                            &m.batch,
                            m.first_seq,
                            &mems,
                            m.options.ignore_missing_column_families,
                        )
                    })
                };
                inserted.map_err(|e| (BackgroundErrorReason::MemTable, e, true))
            });

        let last_seq = next_seq - 1;
        match outcome {
            Ok(()) => {
                if next_seq > first_seq {
                    self.last_sequence.store(last_seq, Ordering::Release);
                }
                if committed {
                    if leader_options.disable_wal {
                        state.unpersisted_data = true;
                    } else {
                        state.log_empty = false;
                    }
                }
            }
            Err((reason, status, partially_applied)) => {
                if partially_applied && next_seq > first_seq {
                    self.last_sequence.store(last_seq, Ordering::Release);
                }
                warn!(error = %status, "write group failed");
                for m in members.iter_mut().filter(|m| m.result.is_ok()) {
                    m.result = Err(status.clone());
                }
                self.set_bg_error(state, reason, status);
            }
        }

        let mut leader_result = Ok(());
        for (i, m) in members.into_iter().enumerate() {
            if i == 0 {
                leader_result = m.result;
            } else {
                state.completed.insert(m.id, m.result);
            }
        }
        self.leave_write_queue(state, group_size);
        leader_result
    }

    /// Hands every follower its own batch to insert, inserts the leader's,
    /// then waits for the whole group. Called with the mutex released.
    fn insert_concurrently(
        &self,
        members: &mut [Member],
        mems: &Arc<HashMap<u32, Arc<MemTable>>>,
        inserting: usize,
    ) -> Result<()> {
        let group = Arc::new(ParallelGroup::new(inserting));
        let (leader, followers) = members.split_at_mut(1);
        {
            let mut state = self.state.lock();
            for m in followers.iter_mut().filter(|m| m.result.is_ok()) {
                let task = ParallelInsert {
                    batch: std::mem::take(&mut m.batch),
                    first_seq: m.first_seq,
                    ignore_missing: m.options.ignore_missing_column_families,
                    mems: Arc::clone(mems),
                    group: Arc::clone(&group),
                };
                state.parallel_inserts.insert(m.id, task);
            }
            self.write_cv.notify_all();
        }
        if let Some(m) = leader.first().filter(|m| m.result.is_ok()) {
            group.finish(insert_batch(
                &m.batch,
                m.first_seq,
                mems,
                m.options.ignore_missing_column_families,
            ));
        }
        debug!(members = inserting, "write group inserted concurrently");
        group.wait()
    }

    /// Takes the batches of the leader and the compatible writers behind it.
    fn build_write_group(&self, state: &mut DbState, leader: WriteOptions) -> Vec<Member> {
        let mut members = Vec::new();
        let mut bytes = 0usize;
        let mut max_bytes = MAX_GROUP_BYTES;
        for (i, w) in state.writers.iter_mut().enumerate() {
            let Some(size) = w.batch.as_ref().map(WriteBatch::data_size) else {
                break;
            };
            if i == 0 {
                // Keep small writes from waiting behind a large group.
                if size <= 128 << 10 {
                    max_bytes = size + (128 << 10);
                }
            } else {
                if w.options.sync && !leader.sync {
                    break;
                }
                if w.options.disable_wal != leader.disable_wal {
                    break;
                }
                if bytes + size > max_bytes {
                    break;
                }
            }
            bytes += size;
            let Some(batch) = w.batch.take() else {
                break;
            };
            members.push(Member {
                id: w.id,
                batch,
                options: w.options,
                result: Ok(()),
                first_seq: 0,
            });
        }
        members
    }

    /// Ensures every family's active memtable has room, switching full ones
    /// and stalling while flushes or L0 compactions lag behind.
    ///
    /// The caller must hold the head of the writer queue. The mutex may be
    /// released and reacquired.
    pub(crate) fn make_room_for_write(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        no_slowdown: bool,
    ) -> Result<()> {
        let mut allow_delay = true;
        let mut wal_limit_handled = false;
        loop {
            if let Some(e) = state.hard_error() {
                return Err(e);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Status::shutdown_in_progress("database is closing"));
            }

            let max_wal = self.db_options.read().max_total_wal_size;
            if !wal_limit_handled && max_wal > 0 && state.total_log_size() > max_wal {
                wal_limit_handled = true;
                if let Some(&(oldest, _)) = state.alive_logs.front() {
                    let targets: Vec<u32> = state
                        .versions
                        .cfs
                        .values()
                        .filter(|cf| cf.has_unflushed_data() && cf.log_number <= oldest)
                        .map(|cf| cf.id())
                        .collect();
                    info!(
                        total_wal_bytes = state.total_log_size(),
                        families = targets.len(),
                        "WAL size limit reached; flushing families pinning the oldest log"
                    );
                    for id in targets {
                        self.switch_memtable(state, id)?;
                    }
                }
                continue;
            }

            let mut stalled: Option<(u32, &'static str)> = None;
            let mut delay = false;
            let mut full = Vec::new();
            for cf in state.versions.cfs.values() {
                let o = cf.data.options();
                let l0_limits = !o.disable_auto_compactions && o.compaction_style != CompactionStyle::Fifo;
                let l0 = cf.current.num_level_files(0);
                if cf.mem.should_flush(o.write_buffer_size) {
                    if cf.imm.len() + 1 >= o.max_write_buffer_number {
                        stalled = Some((cf.id(), "too many immutable memtables"));
                    } else {
                        full.push(cf.id());
                    }
                }
                if l0_limits && l0 >= o.level0_stop_writes_trigger {
                    stalled = Some((cf.id(), "too many level-0 files"));
                } else if l0_limits && l0 >= o.level0_slowdown_writes_trigger {
                    delay = true;
                }
            }

            for id in full {
                self.switch_memtable(state, id)?;
            }

            if let Some((cf_id, why)) = stalled {
                if no_slowdown {
                    return Err(Status::busy(format!("write stall: {why}")));
                }
                debug!(cf = cf_id, reason = why, "writes stopped");
                state.write_stopped = true;
                let start = self.env.now_micros();
                self.bg_cv.wait_for(state, Duration::from_secs(1));
                let waited = self.env.now_micros().saturating_sub(start);
                state.write_stopped = false;
                if let Some(cf) = state.versions.cf_mut(cf_id) {
                    cf.stats.stall_micros += waited;
                }
                continue;
            }

            if delay && allow_delay {
                if no_slowdown {
                    return Err(Status::busy("write stall: level-0 slowdown"));
                }
                // One short pause per write hands the compaction threads some
                // room before the hard limit is reached.
                allow_delay = false;
                state.write_delayed = true;
                let env = Arc::clone(&self.env);
                MutexGuard::unlocked(state, || env.sleep_micros(1000));
                continue;
            }
            state.write_delayed = false;
            return Ok(());
        }
    }

    /// Seals the active memtable of `cf_id` and queues it for flushing.
    /// Starts a new WAL first when the current one holds data. An empty
    /// memtable is left alone.
    ///
    /// The caller must hold the head of the writer queue.
    pub(crate) fn switch_memtable(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cf_id: u32,
    ) -> Result<()> {
        let Some(cf) = state.versions.cf(cf_id) else {
            return Ok(());
        };
        if cf.mem.is_empty() {
            return Ok(());
        }
        if !state.log_empty {
            let number = state.versions.new_file_number();
            let path = log_file_path(&self.path, number);
            let writer = WalWriter::create(&path, false)?;
            let mut log = self.log.lock();
            if let Some(old) = log.as_mut() {
                old.sync_to_disk()?;
            }
            if let Some(old) = log.replace(writer) {
                let old_number = state.log_number;
                state.alive_logs.push_back((old_number, old.file_size()));
            }
            drop(log);
            state.log_number = number;
            state.log_empty = true;
            info!(log = number, "switched to a new WAL");
        }

        let mem_id = state.new_memtable_id();
        let seq = self.latest_sequence();
        let log_number = state.log_number;
        let cf = state.versions.cf_state_mut(cf_id)?;
        let mem = Arc::new(MemTable::new(mem_id, cf.data.icmp.clone(), seq));
        let sealed = std::mem::replace(&mut cf.mem, mem);
        sealed.set_next_log_number(log_number);
        let info = MemTableInfo {
            cf_name: cf.name().to_string(),
            first_seqno: sealed.first_seqno(),
            earliest_seqno: sealed.earliest_seqno(),
            num_entries: sealed.num_entries(),
            num_deletes: sealed.num_deletes(),
        };
        debug!(
            cf = %info.cf_name,
            memtable = sealed.id(),
            entries = info.num_entries,
            bytes = sealed.approximate_memory_usage(),
            "memtable sealed"
        );
        cf.imm.push(ImmutableMemTable {
            mem: sealed,
            flush_in_progress: false,
        });
        state.versions.install_super_version(cf_id);
        self.enqueue_flush(state, cf_id);
        self.maybe_schedule_work(state);
        if !self.listeners.is_empty() {
            MutexGuard::unlocked(state, || self.notify(|l| l.on_memtable_sealed(&info)));
        }
        Ok(())
    }
}

fn validate_column_families(state: &DbState, batch: &WriteBatch, ignore_missing: bool) -> Result<()> {
    let cfs = batch.column_families()?;
    if ignore_missing {
        return Ok(());
    }
    for id in cfs {
        if state.versions.cf(id).is_none() {
            return Err(Status::invalid_argument(format!(
                "Invalid column family specified in write batch: {id}"
            )));
        }
    }
    Ok(())
}
