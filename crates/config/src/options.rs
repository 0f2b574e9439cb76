use sstable::BlockCache;
use std::sync::Arc;
use types::{
    bytewise_comparator, default_env, CompactionFilter, CompactionFilterFactory, Comparator,
    Env, EventListener, MergeOperator, RateLimiter, Result, SliceTransform, Status,
};
use wal::WalRecoveryMode;

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 << 20;
pub const DEFAULT_MAX_WRITE_BUFFER_NUMBER: usize = 2;
pub const DEFAULT_NUM_LEVELS: usize = 7;
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;
pub const DEFAULT_L0_SLOWDOWN_TRIGGER: usize = 20;
pub const DEFAULT_L0_STOP_TRIGGER: usize = 36;
pub const DEFAULT_MAX_BYTES_FOR_LEVEL_BASE: u64 = 256 << 20;
pub const DEFAULT_TARGET_FILE_SIZE_BASE: u64 = 64 << 20;
pub const DEFAULT_MAX_BACKGROUND_JOBS: usize = 2;
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStyle {
    #[default]
    Level,
    Universal,
    Fifo,
}

impl CompactionStyle {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStyle::Level => "kCompactionStyleLevel",
            CompactionStyle::Universal => "kCompactionStyleUniversal",
            CompactionStyle::Fifo => "kCompactionStyleFIFO",
        }
    }

    /// Accepts the `kCompactionStyle*` names and the short forms `level`,
    /// `universal` and `fifo`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kCompactionStyleLevel" | "level" => Some(Self::Level),
            "kCompactionStyleUniversal" | "universal" => Some(Self::Universal),
            "kCompactionStyleFIFO" | "fifo" => Some(Self::Fifo),
            _ => None,
        }
    }
}

/// Size-tiered compaction settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionOptionsUniversal {
    /// A run joins the candidate set while the set's total size, grown by
    /// this percentage, is at least the run's size.
    pub size_ratio: u32,
    pub min_merge_width: u32,
    pub max_merge_width: u32,
    /// Full compaction happens once all runs but the oldest exceed this
    /// percentage of the oldest run.
    pub max_size_amplification_percent: u32,
}

impl Default for CompactionOptionsUniversal {
    fn default() -> Self {
        Self {
            size_ratio: 1,
            min_merge_width: 2,
            max_merge_width: u32::MAX,
            max_size_amplification_percent: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionOptionsFifo {
    /// Oldest files are dropped while the total table size exceeds this.
    pub max_table_files_size: u64,
    /// Merge small level-0 files once the compaction trigger is reached.
    pub allow_compaction: bool,
}

impl Default for CompactionOptionsFifo {
    fn default() -> Self {
        Self {
            max_table_files_size: 1 << 30,
            allow_compaction: false,
        }
    }
}

/// Table format settings of a column family.
#[derive(Clone)]
pub struct BlockBasedTableOptions {
    pub block_size: usize,
    /// 0 disables filter blocks.
    pub bloom_bits_per_key: u32,
    pub whole_key_filtering: bool,
    /// Shared data-block cache; `None` reads every block from the file.
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for BlockBasedTableOptions {
    fn default() -> Self {
        Self {
            block_size: sstable::DEFAULT_BLOCK_SIZE,
            bloom_bits_per_key: sstable::DEFAULT_BLOOM_BITS_PER_KEY,
            whole_key_filtering: true,
            block_cache: Some(Arc::new(BlockCache::new(8 << 20))),
        }
    }
}

impl std::fmt::Debug for BlockBasedTableOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBasedTableOptions")
            .field("block_size", &self.block_size)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .field("whole_key_filtering", &self.whole_key_filtering)
            .field(
                "block_cache_capacity",
                &self.block_cache.as_ref().map(|c| c.capacity()),
            )
            .finish()
    }
}

/// Database-wide options.
#[derive(Clone)]
pub struct DbOptions {
    pub create_if_missing: bool,
    pub create_missing_column_families: bool,
    pub error_if_exists: bool,
    /// Verify table checksums when files are opened during recovery.
    pub paranoid_checks: bool,
    pub max_background_jobs: usize,
    /// Negative values derive the limit from `max_background_jobs`.
    pub max_background_compactions: i32,
    pub max_background_flushes: i32,
    /// Threads one compaction may split its key range across.
    pub max_subcompactions: usize,
    /// Capacity of the table cache; -1 keeps every table open.
    pub max_open_files: i32,
    /// Once the live WALs exceed this size the column families pinning the
    /// oldest log are flushed. 0 means four times the total write buffer size.
    pub max_total_wal_size: u64,
    pub wal_recovery_mode: WalRecoveryMode,
    pub allow_concurrent_memtable_write: bool,
    pub avoid_flush_during_recovery: bool,
    pub avoid_flush_during_shutdown: bool,
    /// Use `fsync` instead of `fdatasync` semantics when syncing.
    pub use_fsync: bool,
    pub listeners: Vec<Arc<dyn EventListener>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub env: Arc<dyn Env>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            create_missing_column_families: false,
            error_if_exists: false,
            paranoid_checks: true,
            max_background_jobs: DEFAULT_MAX_BACKGROUND_JOBS,
            max_background_compactions: -1,
            max_background_flushes: -1,
            max_subcompactions: 1,
            max_open_files: -1,
            max_total_wal_size: 0,
            wal_recovery_mode: WalRecoveryMode::default(),
            allow_concurrent_memtable_write: true,
            avoid_flush_during_recovery: false,
            avoid_flush_during_shutdown: false,
            use_fsync: false,
            listeners: Vec::new(),
            rate_limiter: None,
            env: default_env(),
        }
    }
}

impl std::fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbOptions")
            .field("create_if_missing", &self.create_if_missing)
            .field("create_missing_column_families", &self.create_missing_column_families)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("max_background_jobs", &self.max_background_jobs)
            .field("max_subcompactions", &self.max_subcompactions)
            .field("max_open_files", &self.max_open_files)
            .field("wal_recovery_mode", &self.wal_recovery_mode)
            .field("listeners", &self.listeners.len())
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

impl DbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, v: bool) -> Self {
        self.create_if_missing = v;
        self
    }

    pub fn create_missing_column_families(mut self, v: bool) -> Self {
        self.create_missing_column_families = v;
        self
    }

    pub fn error_if_exists(mut self, v: bool) -> Self {
        self.error_if_exists = v;
        self
    }

    pub fn paranoid_checks(mut self, v: bool) -> Self {
        self.paranoid_checks = v;
        self
    }

    pub fn max_background_jobs(mut self, v: usize) -> Self {
        self.max_background_jobs = v;
        self
    }

    pub fn max_subcompactions(mut self, v: usize) -> Self {
        self.max_subcompactions = v;
        self
    }

    pub fn max_open_files(mut self, v: i32) -> Self {
        self.max_open_files = v;
        self
    }

    pub fn wal_recovery_mode(mut self, v: WalRecoveryMode) -> Self {
        self.wal_recovery_mode = v;
        self
    }

    pub fn allow_concurrent_memtable_write(mut self, v: bool) -> Self {
        self.allow_concurrent_memtable_write = v;
        self
    }

    pub fn avoid_flush_during_recovery(mut self, v: bool) -> Self {
        self.avoid_flush_during_recovery = v;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    /// `(flush threads, compaction threads)`.
    #[must_use]
    pub fn background_limits(&self) -> (usize, usize) {
        let jobs = self.max_background_jobs.max(2);
        let flushes = match self.max_background_flushes {
            n if n > 0 => n as usize,
            _ => (jobs / 4).max(1),
        };
        let compactions = match self.max_background_compactions {
            n if n > 0 => n as usize,
            _ => jobs.saturating_sub(flushes).max(1),
        };
        (flushes, compactions)
    }

    /// Table cache capacity in open files.
    #[must_use]
    pub fn table_cache_capacity(&self) -> usize {
        match self.max_open_files {
            n if n > 10 => n as usize - 10,
            n if n > 0 => n as usize,
            _ => 1 << 20,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_subcompactions == 0 {
            return Err(Status::invalid_argument("max_subcompactions must be at least 1"));
        }
        Ok(())
    }
}

/// Options of one column family.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    pub comparator: Arc<dyn Comparator>,
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    /// A single filter shared by every compaction. Takes precedence over the
    /// factory.
    pub compaction_filter: Option<Arc<dyn CompactionFilter>>,
    pub compaction_filter_factory: Option<Arc<dyn CompactionFilterFactory>>,
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub write_buffer_size: usize,
    /// Active plus immutable memtables allowed before writes stall.
    pub max_write_buffer_number: usize,
    pub compaction_style: CompactionStyle,
    pub num_levels: usize,
    pub level0_file_num_compaction_trigger: usize,
    pub level0_slowdown_writes_trigger: usize,
    pub level0_stop_writes_trigger: usize,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: f64,
    pub target_file_size_base: u64,
    pub target_file_size_multiplier: u64,
    pub disable_auto_compactions: bool,
    pub compaction_options_universal: CompactionOptionsUniversal,
    pub compaction_options_fifo: CompactionOptionsFifo,
    pub table_options: BlockBasedTableOptions,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            comparator: bytewise_comparator(),
            merge_operator: None,
            compaction_filter: None,
            compaction_filter_factory: None,
            prefix_extractor: None,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_write_buffer_number: DEFAULT_MAX_WRITE_BUFFER_NUMBER,
            compaction_style: CompactionStyle::Level,
            num_levels: DEFAULT_NUM_LEVELS,
            level0_file_num_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            level0_slowdown_writes_trigger: DEFAULT_L0_SLOWDOWN_TRIGGER,
            level0_stop_writes_trigger: DEFAULT_L0_STOP_TRIGGER,
            max_bytes_for_level_base: DEFAULT_MAX_BYTES_FOR_LEVEL_BASE,
            max_bytes_for_level_multiplier: 10.0,
            target_file_size_base: DEFAULT_TARGET_FILE_SIZE_BASE,
            target_file_size_multiplier: 1,
            disable_auto_compactions: false,
            compaction_options_universal: CompactionOptionsUniversal::default(),
            compaction_options_fifo: CompactionOptionsFifo::default(),
            table_options: BlockBasedTableOptions::default(),
        }
    }
}

fn hook_name<T: ?Sized>(hook: &Option<Arc<T>>, name: impl Fn(&T) -> &str) -> String {
    hook.as_ref()
        .map_or_else(|| "nullptr".to_string(), |h| name(h).to_string())
}

impl std::fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("comparator", &self.comparator.name())
            .field("merge_operator", &hook_name(&self.merge_operator, |m| m.name()))
            .field("compaction_filter", &hook_name(&self.compaction_filter, |c| c.name()))
            .field("prefix_extractor", &hook_name(&self.prefix_extractor, |p| p.name()))
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("compaction_style", &self.compaction_style)
            .field("num_levels", &self.num_levels)
            .field("level0_file_num_compaction_trigger", &self.level0_file_num_compaction_trigger)
            .field("disable_auto_compactions", &self.disable_auto_compactions)
            .field("table_options", &self.table_options)
            .finish_non_exhaustive()
    }
}

impl ColumnFamilyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comparator(mut self, cmp: Arc<dyn Comparator>) -> Self {
        self.comparator = cmp;
        self
    }

    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(op);
        self
    }

    pub fn compaction_filter(mut self, filter: Arc<dyn CompactionFilter>) -> Self {
        self.compaction_filter = Some(filter);
        self
    }

    pub fn compaction_filter_factory(mut self, factory: Arc<dyn CompactionFilterFactory>) -> Self {
        self.compaction_filter_factory = Some(factory);
        self
    }

    pub fn prefix_extractor(mut self, extractor: Arc<dyn SliceTransform>) -> Self {
        self.prefix_extractor = Some(extractor);
        self
    }

    pub fn write_buffer_size(mut self, v: usize) -> Self {
        self.write_buffer_size = v;
        self
    }

    pub fn max_write_buffer_number(mut self, v: usize) -> Self {
        self.max_write_buffer_number = v;
        self
    }

    pub fn compaction_style(mut self, v: CompactionStyle) -> Self {
        self.compaction_style = v;
        self
    }

    pub fn num_levels(mut self, v: usize) -> Self {
        self.num_levels = v;
        self
    }

    pub fn level0_file_num_compaction_trigger(mut self, v: usize) -> Self {
        self.level0_file_num_compaction_trigger = v;
        self
    }

    pub fn level0_slowdown_writes_trigger(mut self, v: usize) -> Self {
        self.level0_slowdown_writes_trigger = v;
        self
    }

    pub fn level0_stop_writes_trigger(mut self, v: usize) -> Self {
        self.level0_stop_writes_trigger = v;
        self
    }

    pub fn max_bytes_for_level_base(mut self, v: u64) -> Self {
        self.max_bytes_for_level_base = v;
        self
    }

    pub fn max_bytes_for_level_multiplier(mut self, v: f64) -> Self {
        self.max_bytes_for_level_multiplier = v;
        self
    }

    pub fn target_file_size_base(mut self, v: u64) -> Self {
        self.target_file_size_base = v;
        self
    }

    pub fn disable_auto_compactions(mut self, v: bool) -> Self {
        self.disable_auto_compactions = v;
        self
    }

    pub fn compaction_options_universal(mut self, v: CompactionOptionsUniversal) -> Self {
        self.compaction_options_universal = v;
        self
    }

    pub fn compaction_options_fifo(mut self, v: CompactionOptionsFifo) -> Self {
        self.compaction_options_fifo = v;
        self
    }

    pub fn table_options(mut self, v: BlockBasedTableOptions) -> Self {
        self.table_options = v;
        self
    }

    /// Target size of compaction outputs at `level`.
    #[must_use]
    pub fn target_file_size(&self, level: usize) -> u64 {
        let mut size = self.target_file_size_base.max(1);
        for _ in 1..level.max(1) {
            size = size.saturating_mul(self.target_file_size_multiplier.max(1));
        }
        size
    }

    /// Size limit of `level` (1-based; level 0 is count-triggered).
    #[must_use]
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut size = self.max_bytes_for_level_base as f64;
        for _ in 1..level.max(1) {
            size *= self.max_bytes_for_level_multiplier;
        }
        size.min(u64::MAX as f64) as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size == 0 {
            return Err(Status::invalid_argument("write_buffer_size must be positive"));
        }
        if self.max_write_buffer_number == 0 {
            return Err(Status::invalid_argument("max_write_buffer_number must be at least 1"));
        }
        if self.num_levels == 0 {
            return Err(Status::invalid_argument("num_levels must be at least 1"));
        }
        if self.compaction_style == CompactionStyle::Level && self.num_levels < 2 {
            return Err(Status::invalid_argument(
                "level compaction requires num_levels of at least 2",
            ));
        }
        if self.max_bytes_for_level_multiplier <= 0.0 {
            return Err(Status::invalid_argument(
                "max_bytes_for_level_multiplier must be positive",
            ));
        }
        if self.compaction_options_universal.min_merge_width < 2 {
            return Err(Status::invalid_argument("min_merge_width must be at least 2"));
        }
        Ok(())
    }
}

/// DB-wide and default-column-family options together, as `DB::open` takes
/// them.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub db: DbOptions,
    pub cf: ColumnFamilyOptions,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(db: DbOptions, cf: ColumnFamilyOptions) -> Self {
        Self { db, cf }
    }

    pub fn create_if_missing(mut self, v: bool) -> Self {
        self.db.create_if_missing = v;
        self
    }

    pub fn create_missing_column_families(mut self, v: bool) -> Self {
        self.db.create_missing_column_families = v;
        self
    }

    pub fn write_buffer_size(mut self, v: usize) -> Self {
        self.cf.write_buffer_size = v;
        self
    }

    pub fn compaction_style(mut self, v: CompactionStyle) -> Self {
        self.cf.compaction_style = v;
        self
    }

    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.cf.merge_operator = Some(op);
        self
    }

    pub fn comparator(mut self, cmp: Arc<dyn Comparator>) -> Self {
        self.cf.comparator = cmp;
        self
    }

    pub fn prefix_extractor(mut self, extractor: Arc<dyn SliceTransform>) -> Self {
        self.cf.prefix_extractor = Some(extractor);
        self
    }

    pub fn max_background_jobs(mut self, v: usize) -> Self {
        self.db.max_background_jobs = v;
        self
    }

    pub fn wal_recovery_mode(mut self, v: WalRecoveryMode) -> Self {
        self.db.wal_recovery_mode = v;
        self
    }

    #[must_use]
    pub fn map_db_options(&self) -> DbOptions {
        self.db.clone()
    }

    #[must_use]
    pub fn map_cf_options(&self) -> ColumnFamilyOptions {
        self.cf.clone()
    }
}

/// A column family name with the options to open it with.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}
