//! Per-call options of reads, writes and maintenance operations.

use sstable::ReadParams;
use types::SequenceNumber;

use crate::snapshot::Snapshot;

/// Options of `get`, `multi_get` and iterators.
#[derive(Debug, Clone)]
pub struct ReadOptions<'a> {
    /// Read as of this snapshot; `None` reads the latest state.
    pub snapshot: Option<&'a Snapshot>,
    /// Inclusive lower bound of iteration.
    pub iterate_lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound of iteration.
    pub iterate_upper_bound: Option<Vec<u8>>,
    /// Stop an iterator once it leaves the prefix of the seek target.
    pub prefix_same_as_start: bool,
    /// Ignore the prefix extractor and iterate in total order.
    pub total_order_seek: bool,
    pub fill_cache: bool,
    pub verify_checksums: bool,
    /// Skip range tombstones. Only safe when none were ever written.
    pub ignore_range_deletions: bool,
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        Self {
            snapshot: None,
            iterate_lower_bound: None,
            iterate_upper_bound: None,
            prefix_same_as_start: false,
            total_order_seek: false,
            fill_cache: true,
            verify_checksums: true,
            ignore_range_deletions: false,
        }
    }
}

impl<'a> ReadOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(mut self, snapshot: &'a Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn iterate_lower_bound(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.iterate_lower_bound = Some(key.into());
        self
    }

    pub fn iterate_upper_bound(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.iterate_upper_bound = Some(key.into());
        self
    }

    pub fn prefix_same_as_start(mut self, v: bool) -> Self {
        self.prefix_same_as_start = v;
        self
    }

    pub fn total_order_seek(mut self, v: bool) -> Self {
        self.total_order_seek = v;
        self
    }

    pub fn fill_cache(mut self, v: bool) -> Self {
        self.fill_cache = v;
        self
    }

    pub fn verify_checksums(mut self, v: bool) -> Self {
        self.verify_checksums = v;
        self
    }

    pub fn ignore_range_deletions(mut self, v: bool) -> Self {
        self.ignore_range_deletions = v;
        self
    }

    pub(crate) fn snapshot_seq(&self) -> Option<SequenceNumber> {
        self.snapshot.map(Snapshot::sequence_number)
    }

    pub(crate) fn params(&self) -> ReadParams {
        ReadParams {
            verify_checksums: self.verify_checksums,
            fill_cache: self.fill_cache,
            ignore_range_deletions: self.ignore_range_deletions,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// fsync the WAL before the write returns.
    pub sync: bool,
    /// Skip the WAL; the write is lost on a crash until flushed.
    pub disable_wal: bool,
    /// Fail with `Busy` instead of waiting when writes are stalled.
    pub no_slowdown: bool,
    /// Silently skip records for column families that do not exist.
    pub ignore_missing_column_families: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(mut self, v: bool) -> Self {
        self.sync = v;
        self
    }

    pub fn disable_wal(mut self, v: bool) -> Self {
        self.disable_wal = v;
        self
    }

    pub fn no_slowdown(mut self, v: bool) -> Self {
        self.no_slowdown = v;
        self
    }

    pub fn ignore_missing_column_families(mut self, v: bool) -> Self {
        self.ignore_missing_column_families = v;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOptions {
    /// Block until the flush has been installed.
    pub wait: bool,
    /// Flush even if it has to wait for a write stall to clear.
    pub allow_write_stall: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            wait: true,
            allow_write_stall: false,
        }
    }
}

impl FlushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, v: bool) -> Self {
        self.wait = v;
        self
    }
}

/// How `compact_range` treats the bottommost level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BottommostLevelCompaction {
    Skip,
    /// Only when a compaction filter is configured.
    #[default]
    IfHaveCompactionFilter,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactRangeOptions {
    /// Move the result to `target_level` afterwards.
    pub change_level: bool,
    /// -1 means the lowest level that can hold the data.
    pub target_level: i32,
    pub bottommost_level_compaction: BottommostLevelCompaction,
    /// Wait for automatic compactions to finish first.
    pub exclusive_manual_compaction: bool,
    pub max_subcompactions: usize,
}

impl Default for CompactRangeOptions {
    fn default() -> Self {
        Self {
            change_level: false,
            target_level: -1,
            bottommost_level_compaction: BottommostLevelCompaction::default(),
            exclusive_manual_compaction: true,
            max_subcompactions: 0,
        }
    }
}

impl CompactRangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change_level(mut self, v: bool) -> Self {
        self.change_level = v;
        self
    }

    pub fn target_level(mut self, v: i32) -> Self {
        self.target_level = v;
        self
    }

    pub fn bottommost_level_compaction(mut self, v: BottommostLevelCompaction) -> Self {
        self.bottommost_level_compaction = v;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestExternalFileOptions {
    /// Hard-link (falling back to rename) instead of copying.
    pub move_files: bool,
    /// Assign a sequence number newer than every live snapshot so snapshots
    /// taken before the ingestion do not see the new data.
    pub snapshot_consistency: bool,
    /// Allow assigning a global sequence number at all. Without it, files
    /// overlapping existing data are rejected.
    pub allow_global_seqno: bool,
    /// Flush an overlapping memtable instead of failing.
    pub allow_blocking_flush: bool,
}

impl Default for IngestExternalFileOptions {
    fn default() -> Self {
        Self {
            move_files: false,
            snapshot_consistency: true,
            allow_global_seqno: true,
            allow_blocking_flush: true,
        }
    }
}

impl IngestExternalFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_files(mut self, v: bool) -> Self {
        self.move_files = v;
        self
    }

    pub fn allow_global_seqno(mut self, v: bool) -> Self {
        self.allow_global_seqno = v;
        self
    }

    pub fn allow_blocking_flush(mut self, v: bool) -> Self {
        self.allow_blocking_flush = v;
        self
    }

    pub fn snapshot_consistency(mut self, v: bool) -> Self {
        self.snapshot_consistency = v;
        self
    }
}
