//! Compaction-time filtering hooks.
//!
//! Filters run only while a compaction rewrites a key, never on reads, so a
//! filter decision becomes observable only after a compaction covering the
//! key has completed.

/// Kind of record handed to a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValueType {
    Value,
    MergeOperand,
}

/// Outcome of [`CompactionFilter::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep,
    /// Drop the record. It is rewritten as a tombstone so older versions stay
    /// hidden.
    Remove,
    ChangeValue(Vec<u8>),
    /// Drop the record and every record whose user key sorts before the given
    /// key without looking at them. Older versions of the skipped keys are
    /// removed too, so this may expose nothing but also shadows nothing.
    RemoveAndSkipUntil(Vec<u8>),
}

pub trait CompactionFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, level: usize, key: &[u8], value_type: FilterValueType, value: &[u8]) -> Decision;

    /// When true the filter also sees records pinned by live snapshots.
    fn ignore_snapshots(&self) -> bool {
        false
    }
}

/// Describes the compaction a filter is being created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionFilterContext {
    /// Every file of the column family is an input.
    pub is_full_compaction: bool,
    pub is_manual_compaction: bool,
    pub column_family_id: u32,
}

/// Creates one filter per compaction job.
pub trait CompactionFilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create_compaction_filter(
        &self,
        context: &CompactionFilterContext,
    ) -> Option<Box<dyn CompactionFilter>>;
}
