//! Compaction: rewriting a set of table files into new ones at an output
//! level.
//!
//! | Module       | Purpose                                                  |
//! |--------------|----------------------------------------------------------|
//! | [`picker`]   | Chooses inputs per compaction style (level/universal/FIFO) |
//! | [`iterator`] | Drops obsolete versions, applies filters and merges      |
//! | [`job`]      | Runs a [`Compaction`] into output tables, in parallel ranges |
//! | [`driver`]   | Schedules background and manual compactions, installs results |

pub(crate) mod driver;
pub(crate) mod iterator;
pub(crate) mod job;
pub(crate) mod picker;

use std::cmp::Ordering;
use std::sync::Arc;

use config::ColumnFamilyOptions;
use types::listener::CompactionReason;
use types::{CompactionFilterContext, InternalKeyComparator};

use crate::version::{user_key_range, Version};
use crate::version_edit::{FileMetaData, VersionEdit};

/// Input files of one level.
#[derive(Debug, Clone)]
pub(crate) struct CompactionInputs {
    pub(crate) level: usize,
    pub(crate) files: Vec<Arc<FileMetaData>>,
}

pub(crate) struct Compaction {
    pub(crate) cf_id: u32,
    /// Newest sorted run first.
    pub(crate) inputs: Vec<CompactionInputs>,
    pub(crate) output_level: usize,
    pub(crate) reason: CompactionReason,
    pub(crate) max_output_file_size: u64,
    pub(crate) is_manual: bool,
    /// Every file of the family is an input.
    pub(crate) is_full: bool,
    /// Inputs are dropped without being read (FIFO).
    pub(crate) deletion_only: bool,
    /// The single input file is moved to the output level unchanged.
    pub(crate) trivial_move: bool,
    /// No file outside the inputs holds data older than them.
    pub(crate) bottommost_level: bool,
    pub(crate) max_subcompactions: usize,
    pub(crate) version: Arc<Version>,
    pub(crate) options: Arc<ColumnFamilyOptions>,
    /// Files holding data older than the oldest input, in sorted-run order.
    older_files: Vec<Arc<FileMetaData>>,
}

impl Compaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        version: Arc<Version>,
        options: Arc<ColumnFamilyOptions>,
        inputs: Vec<CompactionInputs>,
        output_level: usize,
        reason: CompactionReason,
        max_output_file_size: u64,
        is_manual: bool,
        max_subcompactions: usize,
    ) -> Self {
        let inputs: Vec<CompactionInputs> =
            inputs.into_iter().filter(|i| !i.files.is_empty()).collect();
        let older_files = older_files(&version, &inputs);
        let num_inputs: usize = inputs.iter().map(|i| i.files.len()).sum();
        let is_full = num_inputs == version.num_files();
        Self {
            cf_id: version.cf_id,
            bottommost_level: older_files.is_empty(),
            inputs,
            output_level,
            reason,
            max_output_file_size,
            is_manual,
            is_full,
            deletion_only: false,
            trivial_move: false,
            max_subcompactions: max_subcompactions.max(1),
            version,
            options,
            older_files,
        }
    }

    pub(crate) fn icmp(&self) -> &InternalKeyComparator {
        &self.version.icmp
    }

    pub(crate) fn start_level(&self) -> usize {
        self.inputs.first().map_or(self.output_level, |i| i.level)
    }

    pub(crate) fn input_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetaData>)> {
        self.inputs
            .iter()
            .flat_map(|i| i.files.iter().map(move |f| (i.level, f)))
    }

    pub(crate) fn num_input_files(&self) -> usize {
        self.inputs.iter().map(|i| i.files.len()).sum()
    }

    pub(crate) fn input_bytes(&self) -> u64 {
        self.input_files().map(|(_, f)| f.file_size).sum()
    }

    pub(crate) fn num_input_files_at_output_level(&self) -> usize {
        self.inputs
            .iter()
            .filter(|i| i.level == self.output_level)
            .map(|i| i.files.len())
            .sum()
    }

    pub(crate) fn mark_being_compacted(&self, v: bool) {
        for (_, f) in self.input_files() {
            f.set_being_compacted(v);
        }
    }

    /// Whether a deletion of `user_key` may be dropped: no file outside
    /// the inputs holds an older version of it.
    pub(crate) fn key_not_exists_beyond_output_level(&self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp().user_comparator();
        !self.older_files.iter().any(|f| {
            ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
        })
    }

    pub(crate) fn filter_context(&self) -> CompactionFilterContext {
        CompactionFilterContext {
            is_full_compaction: self.is_full,
            is_manual_compaction: self.is_manual,
            column_family_id: self.cf_id,
        }
    }

    /// Edit removing every input file.
    pub(crate) fn add_input_deletions(&self, edit: &mut VersionEdit) {
        for (level, f) in self.input_files() {
            edit.delete_file(level, f.number);
        }
    }

    pub(crate) fn input_levels_summary(&self) -> String {
        self.inputs
            .iter()
            .map(|i| {
                let numbers: Vec<String> = i.files.iter().map(|f| f.number.to_string()).collect();
                format!("L{}[{}]", i.level, numbers.join(","))
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compaction")
            .field("cf_id", &self.cf_id)
            .field("inputs", &self.input_levels_summary())
            .field("output_level", &self.output_level)
            .field("reason", &self.reason)
            .field("trivial_move", &self.trivial_move)
            .field("deletion_only", &self.deletion_only)
            .finish()
    }
}

/// Files of `version` overlapping the inputs' key range that come after the
/// oldest input in sorted-run order (L0 newest first, then each deeper
/// level).
fn older_files(version: &Version, inputs: &[CompactionInputs]) -> Vec<Arc<FileMetaData>> {
    let all_inputs: Vec<Arc<FileMetaData>> = inputs
        .iter()
        .flat_map(|i| i.files.iter().map(Arc::clone))
        .collect();
    let Some((smallest, largest)) = user_key_range(&version.icmp, &all_inputs) else {
        return Vec::new();
    };
    let ucmp = version.icmp.user_comparator();
    let input_numbers: std::collections::HashSet<u64> = inputs
        .iter()
        .flat_map(|i| i.files.iter().map(|f| f.number))
        .collect();
    let ordered: Vec<&Arc<FileMetaData>> = version.all_files().map(|(_, f)| f).collect();
    let Some(oldest_input) = ordered.iter().rposition(|f| input_numbers.contains(&f.number))
    else {
        return Vec::new();
    };
    ordered[oldest_input + 1..]
        .iter()
        .filter(|f| {
            ucmp.compare(f.largest.user_key(), &smallest) != Ordering::Less
                && ucmp.compare(f.smallest.user_key(), &largest) != Ordering::Greater
        })
        .map(|f| Arc::clone(f))
        .collect()
}
