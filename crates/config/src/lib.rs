//! # Config - database and column family options
//!
//! [`DbOptions`] hold settings shared by the whole database;
//! [`ColumnFamilyOptions`] are per keyspace and carry the pluggable hooks
//! (comparator, merge operator, compaction filter, prefix extractor).
//! [`Options`] bundles both for `DB::open`.
//!
//! Every option has a documented default and a consuming builder setter:
//!
//! ```
//! use config::{CompactionStyle, Options};
//!
//! let opts = Options::new()
//!     .create_if_missing(true)
//!     .write_buffer_size(4 << 20)
//!     .compaction_style(CompactionStyle::Universal);
//! assert!(opts.db.create_if_missing);
//! ```
//!
//! Options serialize to `name=value;` strings and to `OPTIONS-<n>` files
//! written into the database directory. Parsing rejects unknown names with
//! `InvalidArgument`; live reconfiguration only accepts the names listed in
//! [`MUTABLE_CF_OPTIONS`] and [`MUTABLE_DB_OPTIONS`].

mod file;
mod options;
mod options_string;

pub use file::{
    latest_options_file, load_latest_options, load_options_file, options_file_name,
    parse_options_file_name, write_options_file, OPTIONS_FILE_PREFIX,
};
pub use options::{
    BlockBasedTableOptions, ColumnFamilyDescriptor, ColumnFamilyOptions, CompactionOptionsFifo,
    CompactionOptionsUniversal, CompactionStyle, DbOptions, Options, DEFAULT_COLUMN_FAMILY_NAME,
    DEFAULT_L0_COMPACTION_TRIGGER, DEFAULT_L0_SLOWDOWN_TRIGGER, DEFAULT_L0_STOP_TRIGGER,
    DEFAULT_MAX_BACKGROUND_JOBS, DEFAULT_MAX_BYTES_FOR_LEVEL_BASE,
    DEFAULT_MAX_WRITE_BUFFER_NUMBER, DEFAULT_NUM_LEVELS, DEFAULT_TARGET_FILE_SIZE_BASE,
    DEFAULT_WRITE_BUFFER_SIZE,
};
pub use options_string::{
    builtin_merge_operator, parse_option_pairs, MUTABLE_CF_OPTIONS, MUTABLE_DB_OPTIONS,
};
pub use wal::WalRecoveryMode;

#[cfg(test)]
mod tests;
