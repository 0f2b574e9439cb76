//! `name=value;` option strings.
//!
//! Nested option groups are written in braces, e.g.
//! `compaction_options_fifo={max_table_files_size=1024;allow_compaction=false;}`.
//! Hooks (comparator, merge operator, filters, prefix extractor) are written
//! by name. On parse a name equal to the base options' hook keeps that hook;
//! otherwise it must name a built-in, or `nullptr` to clear it.

use std::sync::Arc;
use types::{
    builtin_comparator, slice_transform::builtin_slice_transform, Associative, MergeOperator,
    Result, Status, StringAppendOperator, UInt64AddOperator,
};
use wal::WalRecoveryMode;

use crate::options::{
    BlockBasedTableOptions, ColumnFamilyOptions, CompactionOptionsFifo,
    CompactionOptionsUniversal, CompactionStyle, DbOptions,
};

const NULL_HOOK: &str = "nullptr";

/// Column family options that `DB::set_options` may change on a live
/// database.
pub const MUTABLE_CF_OPTIONS: &[&str] = &[
    "write_buffer_size",
    "max_write_buffer_number",
    "disable_auto_compactions",
    "level0_file_num_compaction_trigger",
    "level0_slowdown_writes_trigger",
    "level0_stop_writes_trigger",
    "max_bytes_for_level_base",
    "max_bytes_for_level_multiplier",
    "target_file_size_base",
    "target_file_size_multiplier",
    "compaction_options_fifo",
    "compaction_options_universal",
];

/// DB options that `DB::set_db_options` may change on a live database.
pub const MUTABLE_DB_OPTIONS: &[&str] = &[
    "max_background_jobs",
    "max_background_compactions",
    "max_background_flushes",
    "max_subcompactions",
    "max_total_wal_size",
    "avoid_flush_during_shutdown",
];

/// Merge operators that can be restored by name.
pub fn builtin_merge_operator(name: &str) -> Option<Arc<dyn MergeOperator>> {
    match name {
        "StringAppendOperator" => Some(Arc::new(Associative(StringAppendOperator::default()))),
        "UInt64AddOperator" => Some(Arc::new(Associative(UInt64AddOperator))),
        _ => None,
    }
}

/// Splits `a=1;b={x=2;y=3};` into pairs, honouring brace nesting. Braces
/// around a value are stripped.
pub fn parse_option_pairs(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Status::invalid_argument("unbalanced '}' in option string"))?;
            }
            b';' if depth == 0 => {
                push_pair(&s[start..i], &mut pairs)?;
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Status::invalid_argument("unbalanced '{' in option string"));
    }
    push_pair(&s[start..], &mut pairs)?;
    Ok(pairs)
}

fn push_pair(raw: &str, out: &mut Vec<(String, String)>) -> Result<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| Status::invalid_argument(format!("missing '=' in option: {raw}")))?;
    let mut value = value.trim();
    if value.starts_with('{') && value.ends_with('}') {
        value = &value[1..value.len() - 1];
    }
    out.push((name.trim().to_string(), value.trim().to_string()));
    Ok(())
}

fn bad_value(name: &str, value: &str) -> Status {
    Status::invalid_argument(format!("invalid value for option {name}: {value}"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(bad_value(name, value)),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| bad_value(name, value))
}

fn unknown(kind: &str, name: &str) -> Status {
    Status::invalid_argument(format!("unrecognized {kind} option: {name}"))
}

// -------------------- DB options --------------------

impl DbOptions {
    pub fn to_options_string(&self) -> String {
        format!(
            "create_if_missing={};create_missing_column_families={};error_if_exists={};\
             paranoid_checks={};max_background_jobs={};max_background_compactions={};\
             max_background_flushes={};max_subcompactions={};max_open_files={};\
             max_total_wal_size={};wal_recovery_mode={};allow_concurrent_memtable_write={};\
             avoid_flush_during_recovery={};avoid_flush_during_shutdown={};use_fsync={};",
            self.create_if_missing,
            self.create_missing_column_families,
            self.error_if_exists,
            self.paranoid_checks,
            self.max_background_jobs,
            self.max_background_compactions,
            self.max_background_flushes,
            self.max_subcompactions,
            self.max_open_files,
            self.max_total_wal_size,
            self.wal_recovery_mode.as_str(),
            self.allow_concurrent_memtable_write,
            self.avoid_flush_during_recovery,
            self.avoid_flush_during_shutdown,
            self.use_fsync,
        )
    }

    /// Sets one option by name. With `mutable_only` only options listed in
    /// [`MUTABLE_DB_OPTIONS`] are accepted.
    pub fn set_option(&mut self, name: &str, value: &str, mutable_only: bool) -> Result<()> {
        if mutable_only && !MUTABLE_DB_OPTIONS.contains(&name) {
            return Err(Status::invalid_argument(format!(
                "option {name} cannot be changed on an open database"
            )));
        }
        match name {
            "create_if_missing" => self.create_if_missing = parse_bool(name, value)?,
            "create_missing_column_families" => {
                self.create_missing_column_families = parse_bool(name, value)?
            }
            "error_if_exists" => self.error_if_exists = parse_bool(name, value)?,
            "paranoid_checks" => self.paranoid_checks = parse_bool(name, value)?,
            "max_background_jobs" => self.max_background_jobs = parse_num(name, value)?,
            "max_background_compactions" => {
                self.max_background_compactions = parse_num(name, value)?
            }
            "max_background_flushes" => self.max_background_flushes = parse_num(name, value)?,
            "max_subcompactions" => self.max_subcompactions = parse_num(name, value)?,
            "max_open_files" => self.max_open_files = parse_num(name, value)?,
            "max_total_wal_size" => self.max_total_wal_size = parse_num(name, value)?,
            "wal_recovery_mode" => {
                self.wal_recovery_mode =
                    WalRecoveryMode::parse(value).ok_or_else(|| bad_value(name, value))?
            }
            "allow_concurrent_memtable_write" => {
                self.allow_concurrent_memtable_write = parse_bool(name, value)?
            }
            "avoid_flush_during_recovery" => {
                self.avoid_flush_during_recovery = parse_bool(name, value)?
            }
            "avoid_flush_during_shutdown" => {
                self.avoid_flush_during_shutdown = parse_bool(name, value)?
            }
            "use_fsync" => self.use_fsync = parse_bool(name, value)?,
            _ => return Err(unknown("DB", name)),
        }
        Ok(())
    }

    /// Returns a copy of `self` with the options in `s` applied.
    pub fn apply_options_string(&self, s: &str) -> Result<DbOptions> {
        let mut out = self.clone();
        for (name, value) in parse_option_pairs(s)? {
            out.set_option(&name, &value, false)?;
        }
        out.validate()?;
        Ok(out)
    }
}

// -------------------- nested groups --------------------

impl CompactionOptionsUniversal {
    pub fn to_options_string(&self) -> String {
        format!(
            "size_ratio={};min_merge_width={};max_merge_width={};\
             max_size_amplification_percent={};",
            self.size_ratio,
            self.min_merge_width,
            self.max_merge_width,
            self.max_size_amplification_percent
        )
    }

    fn apply(&mut self, s: &str) -> Result<()> {
        for (name, value) in parse_option_pairs(s)? {
            match name.as_str() {
                "size_ratio" => self.size_ratio = parse_num(&name, &value)?,
                "min_merge_width" => self.min_merge_width = parse_num(&name, &value)?,
                "max_merge_width" => self.max_merge_width = parse_num(&name, &value)?,
                "max_size_amplification_percent" => {
                    self.max_size_amplification_percent = parse_num(&name, &value)?
                }
                _ => return Err(unknown("universal compaction", &name)),
            }
        }
        Ok(())
    }
}

impl CompactionOptionsFifo {
    pub fn to_options_string(&self) -> String {
        format!(
            "max_table_files_size={};allow_compaction={};",
            self.max_table_files_size, self.allow_compaction
        )
    }

    fn apply(&mut self, s: &str) -> Result<()> {
        for (name, value) in parse_option_pairs(s)? {
            match name.as_str() {
                "max_table_files_size" => self.max_table_files_size = parse_num(&name, &value)?,
                "allow_compaction" => self.allow_compaction = parse_bool(&name, &value)?,
                _ => return Err(unknown("FIFO compaction", &name)),
            }
        }
        Ok(())
    }
}

impl BlockBasedTableOptions {
    /// The cache is shared state and is not serialized, only its capacity.
    pub fn to_options_string(&self) -> String {
        format!(
            "block_size={};bloom_bits_per_key={};whole_key_filtering={};block_cache_size={};",
            self.block_size,
            self.bloom_bits_per_key,
            self.whole_key_filtering,
            self.block_cache.as_ref().map_or(0, |c| c.capacity()),
        )
    }

    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "block_size" => self.block_size = parse_num(name, value)?,
            "bloom_bits_per_key" => self.bloom_bits_per_key = parse_num(name, value)?,
            "whole_key_filtering" => self.whole_key_filtering = parse_bool(name, value)?,
            "block_cache_size" => {
                let cap: usize = parse_num(name, value)?;
                self.block_cache = match (&self.block_cache, cap) {
                    (_, 0) => None,
                    (Some(c), cap) if c.capacity() == cap => Some(Arc::clone(c)),
                    (_, cap) => Some(Arc::new(sstable::BlockCache::new(cap))),
                };
            }
            _ => return Err(unknown("table", name)),
        }
        Ok(())
    }

    fn apply(&mut self, s: &str) -> Result<()> {
        for (name, value) in parse_option_pairs(s)? {
            self.set_option(&name, &value)?;
        }
        Ok(())
    }
}

// -------------------- column family options --------------------

impl ColumnFamilyOptions {
    pub fn to_options_string(&self) -> String {
        format!(
            "comparator={};merge_operator={};compaction_filter={};\
             compaction_filter_factory={};prefix_extractor={};write_buffer_size={};\
             max_write_buffer_number={};compaction_style={};num_levels={};\
             level0_file_num_compaction_trigger={};level0_slowdown_writes_trigger={};\
             level0_stop_writes_trigger={};max_bytes_for_level_base={};\
             max_bytes_for_level_multiplier={};target_file_size_base={};\
             target_file_size_multiplier={};disable_auto_compactions={};\
             compaction_options_universal={{{}}};compaction_options_fifo={{{}}};\
             block_based_table_factory={{{}}};",
            self.comparator.name(),
            self.merge_operator.as_ref().map_or(NULL_HOOK, |m| m.name()),
            self.compaction_filter.as_ref().map_or(NULL_HOOK, |f| f.name()),
            self.compaction_filter_factory
                .as_ref()
                .map_or(NULL_HOOK, |f| f.name()),
            self.prefix_extractor.as_ref().map_or(NULL_HOOK, |p| p.name()),
            self.write_buffer_size,
            self.max_write_buffer_number,
            self.compaction_style.as_str(),
            self.num_levels,
            self.level0_file_num_compaction_trigger,
            self.level0_slowdown_writes_trigger,
            self.level0_stop_writes_trigger,
            self.max_bytes_for_level_base,
            self.max_bytes_for_level_multiplier,
            self.target_file_size_base,
            self.target_file_size_multiplier,
            self.disable_auto_compactions,
            self.compaction_options_universal.to_options_string(),
            self.compaction_options_fifo.to_options_string(),
            self.table_options.to_options_string(),
        )
    }

    /// Sets one option by name. With `mutable_only` only options listed in
    /// [`MUTABLE_CF_OPTIONS`] are accepted.
    pub fn set_option(&mut self, name: &str, value: &str, mutable_only: bool) -> Result<()> {
        if mutable_only && !MUTABLE_CF_OPTIONS.contains(&name) {
            return Err(Status::invalid_argument(format!(
                "option {name} cannot be changed on an open database"
            )));
        }
        match name {
            "comparator" => {
                if value != self.comparator.name() {
                    self.comparator =
                        builtin_comparator(value).ok_or_else(|| bad_value(name, value))?;
                }
            }
            "merge_operator" => {
                let keep = self.merge_operator.as_ref().map_or(false, |m| m.name() == value);
                if !keep {
                    self.merge_operator = match value {
                        NULL_HOOK | "" => None,
                        _ => Some(builtin_merge_operator(value).ok_or_else(|| bad_value(name, value))?),
                    };
                }
            }
            "compaction_filter" => {
                let keep = self
                    .compaction_filter
                    .as_ref()
                    .map_or(value == NULL_HOOK, |f| f.name() == value);
                if !keep {
                    if value != NULL_HOOK {
                        return Err(bad_value(name, value));
                    }
                    self.compaction_filter = None;
                }
            }
            "compaction_filter_factory" => {
                let keep = self
                    .compaction_filter_factory
                    .as_ref()
                    .map_or(value == NULL_HOOK, |f| f.name() == value);
                if !keep {
                    if value != NULL_HOOK {
                        return Err(bad_value(name, value));
                    }
                    self.compaction_filter_factory = None;
                }
            }
            "prefix_extractor" => {
                let keep = self.prefix_extractor.as_ref().map_or(false, |p| p.name() == value);
                if !keep {
                    self.prefix_extractor = match value {
                        NULL_HOOK | "" => None,
                        _ => Some(builtin_slice_transform(value).ok_or_else(|| bad_value(name, value))?),
                    };
                }
            }
            "write_buffer_size" => self.write_buffer_size = parse_num(name, value)?,
            "max_write_buffer_number" => self.max_write_buffer_number = parse_num(name, value)?,
            "compaction_style" => {
                self.compaction_style =
                    CompactionStyle::parse(value).ok_or_else(|| bad_value(name, value))?
            }
            "num_levels" => self.num_levels = parse_num(name, value)?,
            "level0_file_num_compaction_trigger" => {
                self.level0_file_num_compaction_trigger = parse_num(name, value)?
            }
            "level0_slowdown_writes_trigger" => {
                self.level0_slowdown_writes_trigger = parse_num(name, value)?
            }
            "level0_stop_writes_trigger" => {
                self.level0_stop_writes_trigger = parse_num(name, value)?
            }
            "max_bytes_for_level_base" => self.max_bytes_for_level_base = parse_num(name, value)?,
            "max_bytes_for_level_multiplier" => {
                self.max_bytes_for_level_multiplier = parse_num(name, value)?
            }
            "target_file_size_base" => self.target_file_size_base = parse_num(name, value)?,
            "target_file_size_multiplier" => {
                self.target_file_size_multiplier = parse_num(name, value)?
            }
            "disable_auto_compactions" => {
                self.disable_auto_compactions = parse_bool(name, value)?
            }
            "compaction_options_universal" => self.compaction_options_universal.apply(value)?,
            "compaction_options_fifo" => self.compaction_options_fifo.apply(value)?,
            "block_based_table_factory" => self.table_options.apply(value)?,
            _ => return Err(unknown("column family", name)),
        }
        Ok(())
    }

    /// Returns a copy of `self` with the options in `s` applied.
    pub fn apply_options_string(&self, s: &str) -> Result<ColumnFamilyOptions> {
        let mut out = self.clone();
        for (name, value) in parse_option_pairs(s)? {
            out.set_option(&name, &value, false)?;
        }
        out.validate()?;
        Ok(out)
    }

    /// Applies `(name, value)` pairs as a live reconfiguration: every name
    /// must be mutable and the result must validate, or nothing changes.
    pub fn apply_mutable(&self, changes: &[(&str, &str)]) -> Result<ColumnFamilyOptions> {
        if changes.is_empty() {
            return Err(Status::invalid_argument("empty option list"));
        }
        let mut out = self.clone();
        for (name, value) in changes {
            out.set_option(name, value, true)?;
        }
        out.validate()?;
        Ok(out)
    }
}

impl DbOptions {
    /// Live reconfiguration counterpart of [`ColumnFamilyOptions::apply_mutable`].
    pub fn apply_mutable(&self, changes: &[(&str, &str)]) -> Result<DbOptions> {
        if changes.is_empty() {
            return Err(Status::invalid_argument("empty option list"));
        }
        let mut out = self.clone();
        for (name, value) in changes {
            out.set_option(name, value, true)?;
        }
        out.validate()?;
        Ok(out)
    }
}
