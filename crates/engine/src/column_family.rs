//! Column families: independent keyspaces sharing one WAL and one
//! sequence-number space.
//!
//! Shared, read-mostly data lives in [`ColumnFamilyData`] behind an `Arc`
//! handed to [`ColumnFamilyHandle`]s. The mutable bookkeeping (memtables,
//! current version, compaction cursors) is [`CfState`], owned by the version
//! set and protected by the database mutex. Readers never take that mutex:
//! they clone the current [`SuperVersion`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::ColumnFamilyOptions;
use memtable::MemTable;
use parking_lot::RwLock;
use sstable::TableReaderOptions;
use types::{InternalKeyComparator, Result, Status};

use crate::version::Version;

/// Everything a read needs, pinned together.
pub(crate) struct SuperVersion {
    pub(crate) mem: Arc<MemTable>,
    /// Newest first.
    pub(crate) imm: Vec<Arc<MemTable>>,
    pub(crate) current: Arc<Version>,
    pub(crate) options: Arc<ColumnFamilyOptions>,
    pub(crate) number: u64,
}

pub(crate) struct ColumnFamilyData {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) icmp: InternalKeyComparator,
    options: RwLock<Arc<ColumnFamilyOptions>>,
    dropped: AtomicBool,
    super_version: RwLock<Arc<SuperVersion>>,
}

impl ColumnFamilyData {
    pub(crate) fn new(
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
        initial: SuperVersion,
    ) -> Self {
        Self {
            id,
            name,
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            options: RwLock::new(Arc::new(options)),
            dropped: AtomicBool::new(false),
            super_version: RwLock::new(Arc::new(initial)),
        }
    }

    pub(crate) fn options(&self) -> Arc<ColumnFamilyOptions> {
        Arc::clone(&self.options.read())
    }

    pub(crate) fn set_options(&self, options: ColumnFamilyOptions) {
        *self.options.write() = Arc::new(options);
    }

    pub(crate) fn super_version(&self) -> Arc<SuperVersion> {
        Arc::clone(&self.super_version.read())
    }

    pub(crate) fn install_super_version(&self, sv: SuperVersion) {
        *self.super_version.write() = Arc::new(sv);
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn set_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub(crate) fn reader_options(&self) -> TableReaderOptions {
        reader_options(&self.options())
    }
}

pub(crate) fn reader_options(opts: &ColumnFamilyOptions) -> TableReaderOptions {
    TableReaderOptions {
        block_cache: opts.table_options.block_cache.clone(),
        prefix_extractor: opts.prefix_extractor.clone(),
    }
}

/// Handle naming a column family in API calls. Cloning is cheap; a handle
/// of a dropped family makes every call fail with `InvalidArgument`.
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    pub(crate) data: Arc<ColumnFamilyData>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(data: Arc<ColumnFamilyData>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.data.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Options the family currently runs with.
    #[must_use]
    pub fn options(&self) -> ColumnFamilyOptions {
        (*self.data.options()).clone()
    }

    pub(crate) fn live(&self) -> Result<&Arc<ColumnFamilyData>> {
        if self.data.is_dropped() {
            return Err(Status::invalid_argument(format!(
                "column family {} has been dropped",
                self.data.name
            )));
        }
        Ok(&self.data)
    }
}

impl std::fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("id", &self.data.id)
            .field("name", &self.data.name)
            .field("dropped", &self.data.is_dropped())
            .finish()
    }
}

pub(crate) struct ImmutableMemTable {
    pub(crate) mem: Arc<MemTable>,
    pub(crate) flush_in_progress: bool,
}

/// Per-level compaction counters reported by `rocksdb.stats`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LevelStats {
    pub(crate) compactions: u64,
    pub(crate) bytes_read: u64,
    pub(crate) bytes_written: u64,
    pub(crate) micros: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct InternalStats {
    pub(crate) levels: Vec<LevelStats>,
    pub(crate) flushes: u64,
    pub(crate) flush_bytes: u64,
    pub(crate) stall_micros: u64,
    pub(crate) ingested_files: u64,
}

impl InternalStats {
    pub(crate) fn level_mut(&mut self, level: usize) -> &mut LevelStats {
        if self.levels.len() <= level {
            self.levels.resize(level + 1, LevelStats::default());
        }
        &mut self.levels[level]
    }
}

/// Mutable state of one column family, guarded by the database mutex.
pub(crate) struct CfState {
    pub(crate) data: Arc<ColumnFamilyData>,
    pub(crate) mem: Arc<MemTable>,
    /// Oldest first.
    pub(crate) imm: Vec<ImmutableMemTable>,
    pub(crate) current: Arc<Version>,
    /// WALs older than this hold nothing for this family that is not
    /// already in a table.
    pub(crate) log_number: u64,
    /// Per level, the largest key of the last compaction picked there.
    pub(crate) compact_cursors: Vec<Option<Vec<u8>>>,
    pub(crate) stats: InternalStats,
    pub(crate) queued_for_flush: bool,
    pub(crate) queued_for_compaction: bool,
    pub(crate) running_compactions: usize,
    pub(crate) consecutive_compaction_failures: u32,
    pub(crate) compactions_suspended: bool,
}

impl CfState {
    pub(crate) fn new(data: Arc<ColumnFamilyData>, mem: Arc<MemTable>, current: Arc<Version>) -> Self {
        let num_levels = current.num_levels();
        Self {
            data,
            mem,
            imm: Vec::new(),
            current,
            log_number: 0,
            compact_cursors: vec![None; num_levels],
            stats: InternalStats::default(),
            queued_for_flush: false,
            queued_for_compaction: false,
            running_compactions: 0,
            consecutive_compaction_failures: 0,
            compactions_suspended: false,
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.data.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.data.name
    }

    pub(crate) fn make_super_version(&self, number: u64) -> SuperVersion {
        SuperVersion {
            mem: Arc::clone(&self.mem),
            imm: self.imm.iter().rev().map(|m| Arc::clone(&m.mem)).collect(),
            current: Arc::clone(&self.current),
            options: self.data.options(),
            number,
        }
    }

    /// Immutable memtables waiting for a flush to pick them up.
    pub(crate) fn has_pending_flush(&self) -> bool {
        self.imm.iter().any(|m| !m.flush_in_progress)
    }

    pub(crate) fn has_unflushed_data(&self) -> bool {
        !self.mem.is_empty() || !self.imm.is_empty()
    }
}
