mod cache_tests;
mod merge_tests;
mod reader_tests;
mod writer_tests;

use crate::{TableBuildOutput, TableBuilder, TableBuilderOptions};
use std::path::Path;
use types::{bytewise_comparator, make_internal_key, InternalKeyComparator, ValueType};

pub(crate) fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(bytewise_comparator())
}

pub(crate) fn ikey(user_key: &[u8], seq: u64, t: ValueType) -> Vec<u8> {
    make_internal_key(user_key, seq, t)
}

pub(crate) fn test_options() -> TableBuilderOptions {
    let mut opts = TableBuilderOptions::new(icmp());
    opts.sync = false;
    opts
}

/// Builds a table from `(user_key, seq, type, value)` records, which must
/// already be in internal-key order.
pub(crate) fn build_table(
    path: &Path,
    opts: TableBuilderOptions,
    records: &[(&[u8], u64, ValueType, &[u8])],
) -> types::Result<TableBuildOutput> {
    let mut builder = TableBuilder::create(path, opts)?;
    for (k, seq, t, v) in records {
        builder.add(&ikey(k, *seq, *t), v)?;
    }
    builder.finish()
}
