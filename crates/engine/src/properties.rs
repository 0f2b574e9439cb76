//! `rocksdb.*` introspection properties.
//!
//! Every property has a string form; the numeric ones are also available
//! through `get_int_property`. Unknown names yield `None`.

use std::fmt::Write as _;
use std::sync::Arc;

use config::CompactionStyle;

use crate::column_family::{CfState, ColumnFamilyData};
use crate::compaction::picker::needs_compaction;
use crate::db_impl::{DbInner, DbState};
use crate::version::Version;

const PREFIX: &str = "rocksdb.";
const NUM_FILES_AT_LEVEL: &str = "num-files-at-level";

/// Names accepted by `get_property`, minus per-level variants.
pub const PROPERTY_NAMES: &[&str] = &[
    "rocksdb.stats",
    "rocksdb.levelstats",
    "rocksdb.sstables",
    "rocksdb.num-immutable-mem-table",
    "rocksdb.mem-table-flush-pending",
    "rocksdb.compaction-pending",
    "rocksdb.background-errors",
    "rocksdb.cur-size-active-mem-table",
    "rocksdb.cur-size-all-mem-tables",
    "rocksdb.num-entries-active-mem-table",
    "rocksdb.num-entries-imm-mem-tables",
    "rocksdb.num-deletes-active-mem-table",
    "rocksdb.estimate-num-keys",
    "rocksdb.num-snapshots",
    "rocksdb.oldest-snapshot-sequence",
    "rocksdb.num-live-versions",
    "rocksdb.current-super-version-number",
    "rocksdb.total-sst-files-size",
    "rocksdb.live-sst-files-size",
    "rocksdb.estimate-live-data-size",
    "rocksdb.is-write-stopped",
    "rocksdb.num-running-compactions",
    "rocksdb.num-running-flushes",
    "rocksdb.is-file-deletions-enabled",
    "rocksdb.estimate-pending-compaction-bytes",
    "rocksdb.base-level",
    "rocksdb.estimate-table-readers-mem",
    "rocksdb.block-cache-capacity",
    "rocksdb.block-cache-usage",
];

impl DbInner {
    pub(crate) fn get_property(&self, cf: &Arc<ColumnFamilyData>, name: &str) -> Option<String> {
        let key = name.strip_prefix(PREFIX)?;
        let state = self.state.lock();
        let cf_state = state.versions.cf(cf.id)?;
        match key {
            "stats" => Some(stats(&state, cf_state)),
            "levelstats" => Some(level_stats(&cf_state.current)),
            "sstables" => Some(cf_state.current.debug_string()),
            _ => self
                .int_property_locked(&state, cf_state, key)
                .map(|v| v.to_string()),
        }
    }

    pub(crate) fn get_int_property(&self, cf: &Arc<ColumnFamilyData>, name: &str) -> Option<u64> {
        let key = name.strip_prefix(PREFIX)?;
        let state = self.state.lock();
        let cf_state = state.versions.cf(cf.id)?;
        self.int_property_locked(&state, cf_state, key)
    }

    fn int_property_locked(&self, state: &DbState, cf: &CfState, key: &str) -> Option<u64> {
        if let Some(level) = key.strip_prefix(NUM_FILES_AT_LEVEL) {
            let level: usize = level.parse().ok()?;
            if level >= cf.current.num_levels() {
                return None;
            }
            return Some(cf.current.num_level_files(level) as u64);
        }
        let options = cf.data.options();
        let imm = || cf.imm.iter().map(|m| &m.mem);
        let value = match key {
            "num-immutable-mem-table" => cf.imm.iter().filter(|m| !m.flush_in_progress).count() as u64,
            "mem-table-flush-pending" => u64::from(cf.has_pending_flush()),
            "compaction-pending" => u64::from(
                !cf.compactions_suspended && needs_compaction(&cf.current, &options),
            ),
            "background-errors" => state.num_bg_errors,
            "cur-size-active-mem-table" => cf.mem.approximate_memory_usage() as u64,
            "cur-size-all-mem-tables" => {
                cf.mem.approximate_memory_usage() as u64
                    + imm().map(|m| m.approximate_memory_usage() as u64).sum::<u64>()
            }
            "num-entries-active-mem-table" => cf.mem.num_entries(),
            "num-entries-imm-mem-tables" => imm().map(|m| m.num_entries()).sum(),
            "num-deletes-active-mem-table" => cf.mem.num_deletes(),
            "estimate-num-keys" => {
                let mems = std::iter::once(&cf.mem).chain(imm());
                let (mut entries, mut deletes) = (0u64, 0u64);
                for m in mems {
                    entries += m.num_entries();
                    deletes += m.num_deletes();
                }
                for (_, f) in cf.current.all_files() {
                    entries += f.num_entries;
                    deletes += f.num_deletions;
                }
                // every deletion is assumed to shadow one live key
                entries.saturating_sub(deletes.saturating_mul(2))
            }
            "num-snapshots" => self.snapshots.count() as u64,
            "oldest-snapshot-sequence" => self.snapshots.oldest().unwrap_or(0),
            "num-live-versions" => state.versions.live_versions(cf.id()).len() as u64,
            "current-super-version-number" => cf.data.super_version().number,
            "total-sst-files-size" => {
                let mut seen = std::collections::BTreeSet::new();
                let mut total = 0;
                for v in state.versions.live_versions(cf.id()) {
                    for (_, f) in v.all_files() {
                        if seen.insert(f.number) {
                            total += f.file_size;
                        }
                    }
                }
                total
            }
            "live-sst-files-size" => cf.current.total_file_size(),
            "estimate-live-data-size" => estimate_live_data_size(&cf.current),
            "is-write-stopped" => u64::from(state.write_stopped),
            "num-running-compactions" => state.running_compactions as u64,
            "num-running-flushes" => state.running_flushes as u64,
            "is-file-deletions-enabled" => u64::from(state.disable_file_deletions == 0),
            "estimate-pending-compaction-bytes" => pending_compaction_bytes(cf),
            "base-level" => match options.compaction_style {
                CompactionStyle::Level => 1,
                CompactionStyle::Universal | CompactionStyle::Fifo => 0,
            },
            "estimate-table-readers-mem" => self.table_cache.memory_usage() as u64,
            "block-cache-capacity" => options
                .table_options
                .block_cache
                .as_ref()
                .map_or(0, |c| c.capacity() as u64),
            "block-cache-usage" => options
                .table_options
                .block_cache
                .as_ref()
                .map_or(0, |c| c.usage() as u64),
            _ => return None,
        };
        Some(value)
    }
}

/// Bytes of the deepest non-empty level, plus whatever shallower levels
/// hold beyond a tenth of it (later compactions would fold them in).
fn estimate_live_data_size(version: &Version) -> u64 {
    let deepest = version.max_non_empty_level();
    let base = version.level_bytes(deepest);
    let upper: u64 = (0..deepest).map(|l| version.level_bytes(l)).sum();
    base + upper.saturating_sub(base / 10)
}

fn pending_compaction_bytes(cf: &CfState) -> u64 {
    let options = cf.data.options();
    let version = &cf.current;
    match options.compaction_style {
        CompactionStyle::Level => {
            let mut pending = 0;
            if version.num_level_files(0) >= options.level0_file_num_compaction_trigger.max(1) {
                pending += version.level_bytes(0) + version.level_bytes(1);
            }
            for level in 1..version.num_levels().saturating_sub(1) {
                let target = options.max_bytes_for_level(level);
                let bytes = version.level_bytes(level);
                if bytes > target {
                    pending += bytes - target;
                }
            }
            pending
        }
        CompactionStyle::Universal => {
            if needs_compaction(version, &options) {
                version.total_file_size()
            } else {
                0
            }
        }
        CompactionStyle::Fifo => version
            .total_file_size()
            .saturating_sub(options.compaction_options_fifo.max_table_files_size),
    }
}

fn level_stats(version: &Version) -> String {
    let mut out = String::from("Level Files Size(MB)\n--------------------\n");
    for level in 0..version.num_levels() {
        let _ = writeln!(
            out,
            "{level:>5} {:>5} {:>8.0}",
            version.num_level_files(level),
            version.level_bytes(level) as f64 / 1_048_576.0
        );
    }
    out
}

fn stats(state: &DbState, cf: &CfState) -> String {
    let mb = |b: u64| b as f64 / 1_048_576.0;
    let mut out = String::new();
    let _ = writeln!(out, "\n** Compaction Stats [{}] **", cf.name());
    let _ = writeln!(
        out,
        "Level    Files   Size(MB) Read(MB) Write(MB) Comp(cnt) Comp(sec)"
    );
    let _ = writeln!(out, "{}", "-".repeat(64));
    let version = &cf.current;
    let mut totals = (0usize, 0u64, 0u64, 0u64, 0u64, 0u64);
    for level in 0..version.num_levels() {
        let files = version.num_level_files(level);
        let bytes = version.level_bytes(level);
        let s = cf.stats.levels.get(level).copied().unwrap_or_default();
        if files == 0 && s.compactions == 0 && s.bytes_written == 0 {
            continue;
        }
        let _ = writeln!(
            out,
            "  L{level:<4} {files:>6} {:>10.1} {:>8.1} {:>9.1} {:>9} {:>9.3}",
            mb(bytes),
            mb(s.bytes_read),
            mb(s.bytes_written),
            s.compactions,
            s.micros as f64 / 1e6
        );
        totals.0 += files;
        totals.1 += bytes;
        totals.2 += s.bytes_read;
        totals.3 += s.bytes_written;
        totals.4 += s.compactions;
        totals.5 += s.micros;
    }
    let _ = writeln!(
        out,
        "  Sum   {:>6} {:>10.1} {:>8.1} {:>9.1} {:>9} {:>9.3}",
        totals.0,
        mb(totals.1),
        mb(totals.2),
        mb(totals.3),
        totals.4,
        totals.5 as f64 / 1e6
    );
    let _ = writeln!(
        out,
        "Flush: {} flushes, {:.1} MB written",
        cf.stats.flushes,
        mb(cf.stats.flush_bytes)
    );
    let _ = writeln!(out, "Ingested files: {}", cf.stats.ingested_files);
    let _ = writeln!(out, "Write stall (micros): {}", cf.stats.stall_micros);
    let _ = writeln!(
        out,
        "Memtables: active {} entries, {} immutable",
        cf.mem.num_entries(),
        cf.imm.len()
    );
    let _ = writeln!(
        out,
        "\n** DB Stats **\nWAL: current log {}, {} older logs ({} bytes)\nBackground errors: {}",
        state.log_number,
        state.alive_logs.len(),
        state.total_log_size(),
        state.num_bg_errors
    );
    out
}
