//! Choosing what to compact next.
//!
//! Each compaction style has its own picker. Pickers run under the database
//! mutex and never pick a file another compaction is already rewriting.

use std::cmp::Ordering;
use std::sync::Arc;

use config::{ColumnFamilyOptions, CompactionStyle};
use types::listener::CompactionReason;

use crate::column_family::CfState;
use crate::compaction::{Compaction, CompactionInputs};
use crate::version::{user_key_range, Version};
use crate::version_edit::FileMetaData;

fn any_being_compacted(files: &[Arc<FileMetaData>]) -> bool {
    files.iter().any(|f| f.is_being_compacted())
}

/// Whether `version` has work for the picker of `options`' style.
pub(crate) fn needs_compaction(version: &Version, options: &ColumnFamilyOptions) -> bool {
    match options.compaction_style {
        CompactionStyle::Level => level_scores(version, options)
            .first()
            .is_some_and(|&(score, _)| score >= 1.0),
        CompactionStyle::Universal => {
            sorted_runs(version).len() >= options.level0_file_num_compaction_trigger.max(1)
        }
        CompactionStyle::Fifo => {
            version.total_file_size() > options.compaction_options_fifo.max_table_files_size
                || (options.compaction_options_fifo.allow_compaction
                    && version.num_level_files(0)
                        >= options.level0_file_num_compaction_trigger.max(2))
        }
    }
}

/// Picks the next automatic compaction for `cf`, or `None` when nothing
/// needs (or can currently be) compacted.
pub(crate) fn pick_compaction(cf: &mut CfState, max_subcompactions: usize) -> Option<Compaction> {
    let options = cf.data.options();
    let version = Arc::clone(&cf.current);
    let c = match options.compaction_style {
        CompactionStyle::Level => pick_level(cf, &version, &options, max_subcompactions),
        CompactionStyle::Universal => pick_universal(&version, &options, max_subcompactions),
        CompactionStyle::Fifo => pick_fifo(&version, &options),
    }?;
    c.mark_being_compacted(true);
    Some(c)
}

/// `(score, level)` for every level that may start a compaction, highest
/// score first. L0 is scored by file count, deeper levels by size.
pub(crate) fn level_scores(version: &Version, options: &ColumnFamilyOptions) -> Vec<(f64, usize)> {
    let last = version.num_levels().saturating_sub(1);
    let mut scores = Vec::new();
    let trigger = options.level0_file_num_compaction_trigger.max(1) as f64;
    scores.push((version.num_level_files(0) as f64 / trigger, 0));
    for level in 1..last {
        let bytes: u64 = version
            .files(level)
            .iter()
            .filter(|f| !f.is_being_compacted())
            .map(|f| f.file_size)
            .sum();
        let target = options.max_bytes_for_level(level).max(1);
        scores.push((bytes as f64 / target as f64, level));
    }
    scores.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scores
}

fn pick_level(
    cf: &mut CfState,
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    max_subcompactions: usize,
) -> Option<Compaction> {
    for (score, level) in level_scores(version, options) {
        if score < 1.0 {
            break;
        }
        let picked = if level == 0 {
            pick_level0(version, options, max_subcompactions)
        } else {
            pick_level_n(cf, version, options, level, max_subcompactions)
        };
        if picked.is_some() {
            return picked;
        }
    }
    None
}

fn pick_level0(
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    max_subcompactions: usize,
) -> Option<Compaction> {
    let l0 = version.files(0).to_vec();
    if l0.is_empty() || any_being_compacted(&l0) {
        return None;
    }
    let output_level = 1.min(version.num_levels() - 1);
    let (smallest, largest) = user_key_range(&version.icmp, &l0)?;
    let next = if output_level > 0 {
        version.overlapping_inputs(output_level, Some(&smallest), Some(&largest))
    } else {
        Vec::new()
    };
    if any_being_compacted(&next) {
        return None;
    }
    let trivial = l0.len() == 1 && next.is_empty() && output_level > 0;
    let mut c = Compaction::new(
        Arc::clone(version),
        Arc::clone(options),
        vec![
            CompactionInputs { level: 0, files: l0 },
            CompactionInputs {
                level: output_level,
                files: next,
            },
        ],
        output_level,
        CompactionReason::LevelL0FilesNum,
        options.target_file_size(output_level),
        false,
        max_subcompactions,
    );
    c.trivial_move = trivial;
    Some(c)
}

/// Picks one file of `level` round-robin after the level's cursor.
fn pick_level_n(
    cf: &mut CfState,
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    level: usize,
    max_subcompactions: usize,
) -> Option<Compaction> {
    let files = version.files(level);
    if files.is_empty() {
        return None;
    }
    let ucmp = Arc::clone(version.icmp.user_comparator());
    let start = cf
        .compact_cursors
        .get(level)
        .and_then(Option::as_ref)
        .map_or(0, |cursor| {
            files.partition_point(|f| ucmp.compare(f.smallest.user_key(), cursor) != Ordering::Greater)
        });
    let output_level = level + 1;
    for i in 0..files.len() {
        let f = &files[(start + i) % files.len()];
        if f.is_being_compacted() {
            continue;
        }
        let next = version.overlapping_inputs(
            output_level,
            Some(f.smallest.user_key()),
            Some(f.largest.user_key()),
        );
        if any_being_compacted(&next) {
            continue;
        }
        if let Some(cursor) = cf.compact_cursors.get_mut(level) {
            *cursor = Some(f.largest.user_key().to_vec());
        }
        let trivial = next.is_empty();
        let mut c = Compaction::new(
            Arc::clone(version),
            Arc::clone(options),
            vec![
                CompactionInputs {
                    level,
                    files: vec![Arc::clone(f)],
                },
                CompactionInputs {
                    level: output_level,
                    files: next,
                },
            ],
            output_level,
            CompactionReason::LevelMaxLevelSize,
            options.target_file_size(output_level),
            false,
            max_subcompactions,
        );
        c.trivial_move = trivial;
        return Some(c);
    }
    None
}

/// A sorted run for universal compaction: one L0 file or one whole level.
#[derive(Debug, Clone)]
pub(crate) struct SortedRun {
    pub(crate) level: usize,
    pub(crate) files: Vec<Arc<FileMetaData>>,
    pub(crate) size: u64,
}

/// Runs newest first: each L0 file, then every non-empty deeper level.
pub(crate) fn sorted_runs(version: &Version) -> Vec<SortedRun> {
    let mut runs: Vec<SortedRun> = version
        .files(0)
        .iter()
        .map(|f| SortedRun {
            level: 0,
            files: vec![Arc::clone(f)],
            size: f.file_size,
        })
        .collect();
    for level in 1..version.num_levels() {
        let files = version.files(level);
        if !files.is_empty() {
            runs.push(SortedRun {
                level,
                files: files.to_vec(),
                size: version.level_bytes(level),
            });
        }
    }
    runs
}

fn pick_universal(
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    max_subcompactions: usize,
) -> Option<Compaction> {
    let runs = sorted_runs(version);
    let trigger = options.level0_file_num_compaction_trigger.max(1);
    if runs.len() < trigger || version.all_files().any(|(_, f)| f.is_being_compacted()) {
        return None;
    }
    let uopts = &options.compaction_options_universal;

    if runs.len() >= 2 {
        let (last, rest) = runs.split_last()?;
        let candidate: u64 = rest.iter().map(|r| r.size).sum();
        if candidate.saturating_mul(100)
            > (uopts.max_size_amplification_percent as u64).saturating_mul(last.size)
        {
            return Some(universal_compaction(
                version,
                options,
                &runs,
                0,
                runs.len(),
                CompactionReason::UniversalSizeAmplification,
                max_subcompactions,
            ));
        }
    }

    let min_width = uopts.min_merge_width.max(2) as usize;
    let max_width = (uopts.max_merge_width as usize).max(min_width);
    for start in 0..runs.len() {
        let mut candidate = runs[start].size;
        let mut end = start + 1;
        while end < runs.len() && end - start < max_width {
            let grown = candidate.saturating_mul(100 + uopts.size_ratio as u64) / 100;
            if grown < runs[end].size {
                break;
            }
            candidate += runs[end].size;
            end += 1;
        }
        if end - start >= min_width {
            return Some(universal_compaction(
                version,
                options,
                &runs,
                start,
                end,
                CompactionReason::UniversalSizeRatio,
                max_subcompactions,
            ));
        }
    }

    if runs.len() > trigger {
        let width = (runs.len() - trigger + 1).max(min_width).min(runs.len());
        return Some(universal_compaction(
            version,
            options,
            &runs,
            0,
            width,
            CompactionReason::UniversalSortedRunNum,
            max_subcompactions,
        ));
    }
    None
}

/// Compaction of `runs[start..end]`. The output goes to the level just
/// above the next older run, or the last level if none is left.
fn universal_compaction(
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    runs: &[SortedRun],
    start: usize,
    end: usize,
    reason: CompactionReason,
    max_subcompactions: usize,
) -> Compaction {
    let last_level = version.num_levels() - 1;
    let output_level = match runs.get(end) {
        None => last_level,
        Some(next) if next.level == 0 => 0,
        Some(next) => next.level - 1,
    };
    let mut by_level: Vec<CompactionInputs> = Vec::new();
    for run in &runs[start..end] {
        match by_level.last_mut() {
            Some(last) if last.level == run.level => last.files.extend(run.files.iter().cloned()),
            _ => by_level.push(CompactionInputs {
                level: run.level,
                files: run.files.clone(),
            }),
        }
    }
    // Level-0 outputs are single runs and must not be split.
    let max_output = if output_level == 0 {
        u64::MAX
    } else {
        options.target_file_size(output_level)
    };
    Compaction::new(
        Arc::clone(version),
        Arc::clone(options),
        by_level,
        output_level,
        reason,
        max_output,
        false,
        max_subcompactions,
    )
}

fn pick_fifo(version: &Arc<Version>, options: &Arc<ColumnFamilyOptions>) -> Option<Compaction> {
    let fopts = &options.compaction_options_fifo;
    let l0 = version.files(0);
    if any_being_compacted(l0) {
        return None;
    }
    let total = version.total_file_size();
    if total > fopts.max_table_files_size {
        let mut remaining = total;
        let mut doomed = Vec::new();
        for f in l0.iter().rev() {
            if remaining <= fopts.max_table_files_size {
                break;
            }
            remaining -= f.file_size;
            doomed.push(Arc::clone(f));
        }
        if doomed.is_empty() {
            return None;
        }
        let mut c = Compaction::new(
            Arc::clone(version),
            Arc::clone(options),
            vec![CompactionInputs {
                level: 0,
                files: doomed,
            }],
            0,
            CompactionReason::FifoMaxSize,
            u64::MAX,
            false,
            1,
        );
        c.deletion_only = true;
        return Some(c);
    }

    let trigger = options.level0_file_num_compaction_trigger.max(2);
    if fopts.allow_compaction && l0.len() >= trigger {
        let files: Vec<Arc<FileMetaData>> = l0.iter().take(trigger).cloned().collect();
        return Some(Compaction::new(
            Arc::clone(version),
            Arc::clone(options),
            vec![CompactionInputs { level: 0, files }],
            0,
            CompactionReason::FifoReduceNumFiles,
            u64::MAX,
            false,
            1,
        ));
    }
    None
}

/// Compaction of `input_level` files overlapping `[begin, end]` into
/// `output_level`, for `compact_range`. `None` when no file overlaps or an
/// overlapping file is busy.
pub(crate) fn manual_compaction(
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    input_level: usize,
    output_level: usize,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
    max_subcompactions: usize,
) -> Option<Compaction> {
    let files = version.overlapping_inputs(input_level, begin, end);
    if files.is_empty() || any_being_compacted(&files) {
        return None;
    }
    let mut inputs = vec![CompactionInputs {
        level: input_level,
        files: files.clone(),
    }];
    if output_level != input_level {
        let (smallest, largest) = user_key_range(&version.icmp, &files)?;
        let next = version.overlapping_inputs(output_level, Some(&smallest), Some(&largest));
        if any_being_compacted(&next) {
            return None;
        }
        inputs.push(CompactionInputs {
            level: output_level,
            files: next,
        });
    }
    let max_output = if output_level == 0 {
        u64::MAX
    } else {
        options.target_file_size(output_level)
    };
    let c = Compaction::new(
        Arc::clone(version),
        Arc::clone(options),
        inputs,
        output_level,
        CompactionReason::ManualCompaction,
        max_output,
        true,
        max_subcompactions,
    );
    c.mark_being_compacted(true);
    Some(c)
}

/// Compaction of every file of the family into `output_level`.
pub(crate) fn full_compaction(
    version: &Arc<Version>,
    options: &Arc<ColumnFamilyOptions>,
    output_level: usize,
    max_subcompactions: usize,
) -> Option<Compaction> {
    let mut inputs = Vec::new();
    for level in 0..version.num_levels() {
        let files = version.files(level);
        if any_being_compacted(files) {
            return None;
        }
        inputs.push(CompactionInputs {
            level,
            files: files.to_vec(),
        });
    }
    if version.num_files() == 0 {
        return None;
    }
    let max_output = if output_level == 0 {
        u64::MAX
    } else {
        options.target_file_size(output_level)
    };
    let c = Compaction::new(
        Arc::clone(version),
        Arc::clone(options),
        inputs,
        output_level,
        CompactionReason::ManualCompaction,
        max_output,
        true,
        max_subcompactions,
    );
    c.mark_being_compacted(true);
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_cache::TableCache;
    use crate::version_edit::VersionEdit;
    use types::{bytewise_comparator, InternalKey, InternalKeyComparator, ValueType};

    fn meta(number: u64, smallest: &str, largest: &str, size: u64, seq: u64) -> FileMetaData {
        let mut f = FileMetaData::new(
            number,
            size,
            InternalKey::new(smallest.as_bytes(), seq, ValueType::Value),
            InternalKey::new(largest.as_bytes(), seq, ValueType::Value),
        );
        f.smallest_seqno = seq;
        f.largest_seqno = seq;
        f
    }

    fn version_with(files: &[(usize, FileMetaData)]) -> Arc<Version> {
        let dir = std::env::temp_dir();
        let cache = Arc::new(TableCache::new(&dir, 16));
        let base = Version::empty(
            0,
            4,
            InternalKeyComparator::new(bytewise_comparator()),
            cache,
            Default::default(),
        );
        let mut edit = VersionEdit::new();
        for (level, f) in files {
            edit.add_file(*level, f.clone());
        }
        Arc::new(base.apply(&edit).unwrap())
    }

    #[test]
    fn level_scores_rank_l0_by_file_count() {
        let v = version_with(&[
            (0, meta(1, "a", "c", 10, 1)),
            (0, meta(2, "b", "d", 10, 2)),
        ]);
        let opts = ColumnFamilyOptions::default().level0_file_num_compaction_trigger(2);
        let scores = level_scores(&v, &opts);
        assert_eq!(scores[0], (1.0, 0));
        assert!(needs_compaction(&v, &opts));
    }

    #[test]
    fn universal_runs_list_l0_files_then_levels() {
        let v = version_with(&[
            (0, meta(3, "a", "b", 10, 3)),
            (0, meta(4, "a", "b", 10, 4)),
            (3, meta(1, "a", "z", 100, 1)),
        ]);
        let runs = sorted_runs(&v);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].files[0].number, 4);
        assert_eq!(runs[2].level, 3);
        assert_eq!(runs[2].size, 100);
    }

    #[test]
    fn universal_size_amplification_compacts_everything_to_last_level() {
        let v = version_with(&[
            (0, meta(3, "a", "b", 150, 3)),
            (0, meta(4, "a", "b", 150, 4)),
            (3, meta(1, "a", "z", 100, 1)),
        ]);
        let opts = Arc::new(
            ColumnFamilyOptions::default()
                .compaction_style(CompactionStyle::Universal)
                .level0_file_num_compaction_trigger(2),
        );
        let c = pick_universal(&v, &opts, 1).unwrap();
        assert_eq!(c.reason, CompactionReason::UniversalSizeAmplification);
        assert_eq!(c.output_level, 3);
        assert_eq!(c.num_input_files(), 3);
        assert!(c.bottommost_level);
    }

    #[test]
    fn universal_size_ratio_merges_similar_runs_above_older_run() {
        let v = version_with(&[
            (0, meta(5, "a", "b", 10, 5)),
            (0, meta(4, "a", "b", 10, 4)),
            (3, meta(1, "a", "z", 1000, 1)),
        ]);
        let opts = Arc::new(
            ColumnFamilyOptions::default()
                .compaction_style(CompactionStyle::Universal)
                .level0_file_num_compaction_trigger(3),
        );
        let c = pick_universal(&v, &opts, 1).unwrap();
        assert_eq!(c.reason, CompactionReason::UniversalSizeRatio);
        assert_eq!(c.num_input_files(), 2);
        assert_eq!(c.output_level, 2);
        assert!(!c.bottommost_level);
    }

    #[test]
    fn fifo_deletes_oldest_files_over_the_size_limit() {
        let v = version_with(&[
            (0, meta(1, "a", "b", 100, 1)),
            (0, meta(2, "a", "b", 100, 2)),
            (0, meta(3, "a", "b", 100, 3)),
        ]);
        let opts = Arc::new(
            ColumnFamilyOptions::default()
                .compaction_style(CompactionStyle::Fifo)
                .compaction_options_fifo(config::CompactionOptionsFifo {
                    max_table_files_size: 150,
                    allow_compaction: false,
                }),
        );
        let c = pick_fifo(&v, &opts).unwrap();
        assert!(c.deletion_only);
        let doomed: Vec<u64> = c.input_files().map(|(_, f)| f.number).collect();
        assert_eq!(doomed, vec![1, 2]);
    }

    #[test]
    fn manual_compaction_pulls_in_only_overlapping_output_files() {
        let v = version_with(&[(1, meta(7, "m", "p", 500, 1)), (2, meta(8, "a", "c", 10, 1))]);
        let opts = Arc::new(ColumnFamilyOptions::default().max_bytes_for_level_base(100));
        let c = manual_compaction(&v, &opts, 1, 2, Some(b"m"), Some(b"p"), 1).unwrap();
        assert_eq!(c.num_input_files(), 1);
        assert_eq!(c.num_input_files_at_output_level(), 0);
        c.mark_being_compacted(false);
    }

    #[test]
    fn deletions_survive_when_older_files_hold_the_key() {
        let v = version_with(&[
            (0, meta(3, "a", "f", 10, 3)),
            (2, meta(1, "c", "d", 10, 1)),
        ]);
        let opts = Arc::new(ColumnFamilyOptions::default());
        let c = manual_compaction(&v, &opts, 0, 1, None, None, 1).unwrap();
        assert!(!c.key_not_exists_beyond_output_level(b"c"));
        assert!(c.key_not_exists_beyond_output_level(b"e"));
        assert!(!c.bottommost_level);
    }
}
