//! Point lookups: `get`, `multi_get` and `key_may_exist`.
//!
//! A lookup pins the family's [`SuperVersion`] and probes the active
//! memtable, then the immutable ones (newest first), then the table files
//! of the current version. Range tombstones met along the way raise the
//! covering watermark in the [`GetContext`], so they hide older records in
//! every source probed afterwards.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use types::{GetContext, LookupKey, Result, SequenceNumber};

use crate::column_family::{ColumnFamilyData, SuperVersion};
use crate::db_impl::DbInner;
use crate::options::ReadOptions;

impl DbInner {
    /// Sequence a read observes: the snapshot's, or the latest published.
    pub(crate) fn read_sequence(&self, options: &ReadOptions<'_>) -> SequenceNumber {
        options
            .snapshot_seq()
            .unwrap_or_else(|| self.latest_sequence())
    }

    pub(crate) fn get(
        &self,
        options: &ReadOptions<'_>,
        cf: &Arc<ColumnFamilyData>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        // The sequence is read before the super version so every write at
        // or below it is reachable from the pinned memtables or files.
        let seq = self.read_sequence(options);
        let sv = cf.super_version();
        get_from(&sv, cf, options, key, seq)
    }

    /// Looks up several keys at one sequence number. Results come back in
    /// the order of `keys`.
    pub(crate) fn multi_get(
        &self,
        options: &ReadOptions<'_>,
        keys: &[(&Arc<ColumnFamilyData>, &[u8])],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let seq = self.read_sequence(options);
        let mut pinned: HashMap<u32, Arc<SuperVersion>> = HashMap::new();
        for (cf, _) in keys {
            pinned.entry(cf.id).or_insert_with(|| cf.super_version());
        }
        keys.iter()
            .map(|(cf, key)| get_from(&pinned[&cf.id], cf, options, key, seq))
            .collect()
    }

    /// Cheap existence probe. `false` means the key definitely does not
    /// exist; `true` means it may. When a memtable settles the lookup the
    /// value is returned too.
    pub(crate) fn key_may_exist(
        &self,
        options: &ReadOptions<'_>,
        cf: &Arc<ColumnFamilyData>,
        key: &[u8],
    ) -> Result<(bool, Option<Vec<u8>>)> {
        let seq = self.read_sequence(options);
        let sv = cf.super_version();
        let lookup = LookupKey::new(key, seq);
        let merge_operator = sv.options.merge_operator.as_deref();
        let mut ctx = GetContext::new(
            cf.icmp.user_comparator().as_ref(),
            merge_operator,
            key,
            seq,
        );
        let mut settled = sv.mem.get(&lookup, &mut ctx)?;
        for imm in &sv.imm {
            if settled {
                break;
            }
            settled = imm.get(&lookup, &mut ctx)?;
        }
        if settled {
            let value = ctx.finish()?;
            return Ok((value.is_some(), value));
        }

        let version = &sv.current;
        for (_, f) in version.all_files() {
            if cf.icmp.compare_user(key, f.smallest.user_key()) == Ordering::Less
                || cf.icmp.compare_user(key, f.largest.user_key()) == Ordering::Greater
            {
                continue;
            }
            if version.table(f)?.key_may_match(key) {
                return Ok((true, None));
            }
        }
        Ok((false, None))
    }
}

fn get_from(
    sv: &SuperVersion,
    cf: &ColumnFamilyData,
    options: &ReadOptions<'_>,
    key: &[u8],
    seq: SequenceNumber,
) -> Result<Option<Vec<u8>>> {
    let lookup = LookupKey::new(key, seq);
    let mut ctx = GetContext::new(
        cf.icmp.user_comparator().as_ref(),
        sv.options.merge_operator.as_deref(),
        key,
        seq,
    );
    if sv.mem.get(&lookup, &mut ctx)? {
        return ctx.finish();
    }
    for imm in &sv.imm {
        if imm.get(&lookup, &mut ctx)? {
            return ctx.finish();
        }
    }
    sv.current.get(&options.params(), &lookup, &mut ctx)?;
    ctx.finish()
}
