//! User-facing iterator.
//!
//! [`DbIterator`] wraps a merging iterator over the memtables and table
//! files pinned by one super version. For each user key it gathers every
//! record visible at the read sequence, newest first, and resolves them to
//! at most one value: range tombstones and point deletions hide older
//! records, merge operands are folded onto the base value. Keys that
//! resolve to nothing are skipped.
//!
//! Moving forward the internal cursor rests on the first record of the key
//! after the current one; moving backward it rests on the last record of
//! the key before it. Changing direction re-seeks around the current key.

use std::cmp::Ordering;
use std::sync::Arc;

use sstable::MergingIterator;
use types::key::append_internal_key;
use types::{
    parse_internal_key, Comparator, FragmentedRangeTombstones, InternalIterator,
    InternalKeyComparator, MergeOperator, RangeTombstone, Result, SequenceNumber, SliceTransform,
    Status, ValueType, MAX_SEQUENCE_NUMBER,
};

use crate::column_family::{ColumnFamilyData, SuperVersion};
use crate::db_impl::DbInner;
use crate::options::ReadOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Ordered cursor over one column family at a fixed sequence number.
///
/// A fresh iterator is invalid until positioned with one of the seek
/// methods. Errors met while moving make it invalid and are reported by
/// [`status`](Self::status).
pub struct DbIterator {
    inner: MergingIterator,
    ucmp: Arc<dyn Comparator>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    prefix_extractor: Option<Arc<dyn SliceTransform>>,
    tombstones: FragmentedRangeTombstones,
    sequence: SequenceNumber,
    lower_bound: Option<Vec<u8>>,
    upper_bound: Option<Vec<u8>>,
    prefix_same_as_start: bool,
    /// Prefix of the last seek target, when iteration is confined to it.
    prefix: Option<Vec<u8>>,
    direction: Direction,
    /// Set by the first seek.
    positioned: bool,
    valid: bool,
    key: Vec<u8>,
    value: Vec<u8>,
    status: Result<()>,
    _sv: Arc<SuperVersion>,
}

impl DbInner {
    pub(crate) fn new_iterator(
        &self,
        options: &ReadOptions<'_>,
        cf: &Arc<ColumnFamilyData>,
    ) -> Result<DbIterator> {
        let sequence = self.read_sequence(options);
        let sv = cf.super_version();
        DbIterator::new(sv, &cf.icmp, options, sequence)
    }
}

impl DbIterator {
    pub(crate) fn new(
        sv: Arc<SuperVersion>,
        icmp: &InternalKeyComparator,
        options: &ReadOptions<'_>,
        sequence: SequenceNumber,
    ) -> Result<Self> {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        let mut tombstones: Vec<RangeTombstone> = Vec::new();
        children.push(Box::new(sv.mem.iter()));
        if !options.ignore_range_deletions {
            tombstones.extend(sv.mem.range_tombstone_list());
        }
        for imm in &sv.imm {
            children.push(Box::new(imm.iter()));
            if !options.ignore_range_deletions {
                tombstones.extend(imm.range_tombstone_list());
            }
        }
        sv.current.add_iterators(options.params(), &mut children)?;
        if !options.ignore_range_deletions {
            sv.current.range_tombstones(&mut tombstones)?;
        }
        let ucmp = Arc::clone(icmp.user_comparator());
        let tombstones = FragmentedRangeTombstones::new(&tombstones, Arc::clone(&ucmp));
        let prefix_extractor = if options.total_order_seek {
            None
        } else {
            sv.options.prefix_extractor.clone()
        };
        Ok(Self {
            inner: MergingIterator::new(icmp.clone(), children),
            ucmp,
            merge_operator: sv.options.merge_operator.clone(),
            prefix_extractor,
            tombstones,
            sequence,
            lower_bound: options.iterate_lower_bound.clone(),
            upper_bound: options.iterate_upper_bound.clone(),
            prefix_same_as_start: options.prefix_same_as_start,
            prefix: None,
            direction: Direction::Forward,
            positioned: false,
            valid: false,
            key: Vec::new(),
            value: Vec::new(),
            status: Ok(()),
            _sv: sv,
        })
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Current key. Only meaningful while [`is_valid`](Self::is_valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current value. Only meaningful while [`is_valid`](Self::is_valid).
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// First error met, if any. Once set the iterator stays invalid until
    /// re-seeked.
    pub fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.inner.status()
    }

    pub fn seek_to_first(&mut self) {
        self.reset(None);
        match self.lower_bound.clone() {
            Some(lower) => self.inner.seek(&seek_key(&lower)),
            None => self.inner.seek_to_first(),
        }
        self.direction = Direction::Forward;
        self.find_next_user_entry();
    }

    pub fn seek_to_last(&mut self) {
        self.reset(None);
        match self.upper_bound.clone() {
            Some(upper) => {
                self.inner.seek_for_prev(&seek_key(&upper));
                self.skip_backward_while(|ucmp, uk| ucmp.compare(uk, &upper) != Ordering::Less);
            }
            None => self.inner.seek_to_last(),
        }
        self.direction = Direction::Reverse;
        self.find_prev_user_entry();
    }

    /// Positions at the first key at or after `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let target = match &self.lower_bound {
            Some(lower) if self.ucmp.compare(target, lower) == Ordering::Less => lower.clone(),
            _ => target.to_vec(),
        };
        self.reset(Some(&target));
        self.inner.seek(&seek_key(&target));
        self.direction = Direction::Forward;
        self.find_next_user_entry();
    }

    /// Positions at the last key at or before `target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        self.reset(Some(target));
        self.inner.seek_for_prev(&seek_for_prev_key(target));
        if let Some(upper) = self.upper_bound.clone() {
            self.skip_backward_while(|ucmp, uk| ucmp.compare(uk, &upper) != Ordering::Less);
        }
        self.direction = Direction::Reverse;
        self.find_prev_user_entry();
    }

    pub fn next(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Reverse {
            let current = self.key.clone();
            self.inner.seek(&seek_key(&current));
            self.skip_forward_while(|ucmp, uk| ucmp.compare(uk, &current) != Ordering::Greater);
            self.direction = Direction::Forward;
        }
        self.find_next_user_entry();
    }

    pub fn prev(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Forward {
            let current = self.key.clone();
            self.inner.seek_for_prev(&seek_key(&current));
            self.skip_backward_while(|ucmp, uk| ucmp.compare(uk, &current) != Ordering::Less);
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry();
    }

    /// Adapter yielding entries from the current position onwards as an
    /// [`Iterator`]. An unpositioned cursor starts from the first key.
    pub fn entries(self) -> Entries {
        Entries {
            iter: self,
            first: true,
            done: false,
        }
    }

    fn reset(&mut self, target: Option<&[u8]>) {
        self.positioned = true;
        self.valid = false;
        self.status = Ok(());
        self.prefix = match (&self.prefix_extractor, target) {
            (Some(extractor), Some(t)) if self.prefix_same_as_start && extractor.in_domain(t) => {
                Some(extractor.transform(t).to_vec())
            }
            _ => None,
        };
    }

    fn skip_forward_while(&mut self, skip: impl Fn(&dyn Comparator, &[u8]) -> bool) {
        while self.inner.valid() {
            match parse_internal_key(self.inner.key()) {
                Ok(parsed) if skip(self.ucmp.as_ref(), parsed.user_key) => self.inner.next(),
                Ok(_) => break,
                Err(e) => {
                    self.status = Err(e);
                    break;
                }
            }
        }
    }

    fn skip_backward_while(&mut self, skip: impl Fn(&dyn Comparator, &[u8]) -> bool) {
        while self.inner.valid() {
            match parse_internal_key(self.inner.key()) {
                Ok(parsed) if skip(self.ucmp.as_ref(), parsed.user_key) => self.inner.prev(),
                Ok(_) => break,
                Err(e) => {
                    self.status = Err(e);
                    break;
                }
            }
        }
    }

    fn outside_prefix(&self, user_key: &[u8]) -> bool {
        match (&self.prefix, &self.prefix_extractor) {
            (Some(prefix), Some(extractor)) => {
                !extractor.in_domain(user_key) || extractor.transform(user_key) != prefix.as_slice()
            }
            _ => false,
        }
    }

    fn find_next_user_entry(&mut self) {
        self.valid = false;
        while self.status.is_ok() && self.inner.valid() {
            let user_key = match parse_internal_key(self.inner.key()) {
                Ok(parsed) => parsed.user_key.to_vec(),
                Err(e) => {
                    self.status = Err(e);
                    return;
                }
            };
            if let Some(upper) = &self.upper_bound {
                if self.ucmp.compare(&user_key, upper) != Ordering::Less {
                    return;
                }
            }
            if self.outside_prefix(&user_key) {
                return;
            }
            let mut records = Vec::new();
            while self.inner.valid() {
                let parsed = match parse_internal_key(self.inner.key()) {
                    Ok(p) => p,
                    Err(e) => {
                        self.status = Err(e);
                        return;
                    }
                };
                if !self.ucmp.equal(parsed.user_key, &user_key) {
                    break;
                }
                if parsed.sequence <= self.sequence {
                    records.push((parsed.sequence, parsed.value_type, self.inner.value().to_vec()));
                }
                self.inner.next();
            }
            if let Err(e) = self.inner.status() {
                self.status = Err(e);
                return;
            }
            if self.resolve(user_key, &records) {
                return;
            }
        }
    }

    fn find_prev_user_entry(&mut self) {
        self.valid = false;
        while self.status.is_ok() && self.inner.valid() {
            let user_key = match parse_internal_key(self.inner.key()) {
                Ok(parsed) => parsed.user_key.to_vec(),
                Err(e) => {
                    self.status = Err(e);
                    return;
                }
            };
            if let Some(lower) = &self.lower_bound {
                if self.ucmp.compare(&user_key, lower) == Ordering::Less {
                    return;
                }
            }
            if self.outside_prefix(&user_key) {
                return;
            }
            let mut records = Vec::new();
            while self.inner.valid() {
                let parsed = match parse_internal_key(self.inner.key()) {
                    Ok(p) => p,
                    Err(e) => {
                        self.status = Err(e);
                        return;
                    }
                };
                if !self.ucmp.equal(parsed.user_key, &user_key) {
                    break;
                }
                if parsed.sequence <= self.sequence {
                    records.push((parsed.sequence, parsed.value_type, self.inner.value().to_vec()));
                }
                self.inner.prev();
            }
            if let Err(e) = self.inner.status() {
                self.status = Err(e);
                return;
            }
            // collected oldest first
            records.reverse();
            if self.resolve(user_key, &records) {
                return;
            }
        }
    }

    /// Resolves the visible records of `user_key` (newest first). Returns
    /// `true` when the key has a live value, which becomes current.
    fn resolve(&mut self, user_key: Vec<u8>, records: &[(SequenceNumber, ValueType, Vec<u8>)]) -> bool {
        let covering = if self.tombstones.is_empty() {
            0
        } else {
            self.tombstones.max_covering_seq(&user_key, self.sequence)
        };
        let mut operands: Vec<&[u8]> = Vec::new();
        for (seq, value_type, value) in records {
            let value_type = if *seq < covering {
                ValueType::RangeDeletion
            } else {
                *value_type
            };
            match value_type {
                ValueType::Value => {
                    return if operands.is_empty() {
                        self.set_current(user_key, value.clone())
                    } else {
                        self.merge(user_key, Some(value.as_slice()), &mut operands)
                    };
                }
                ValueType::Deletion | ValueType::SingleDeletion | ValueType::RangeDeletion => {
                    return if operands.is_empty() {
                        false
                    } else {
                        self.merge(user_key, None, &mut operands)
                    };
                }
                ValueType::Merge => operands.push(value.as_slice()),
                ValueType::LogData => {}
            }
        }
        if operands.is_empty() {
            false
        } else {
            self.merge(user_key, None, &mut operands)
        }
    }

    /// Folds `operands` (newest first) onto `base`.
    fn merge(&mut self, user_key: Vec<u8>, base: Option<&[u8]>, operands: &mut Vec<&[u8]>) -> bool {
        let Some(op) = self.merge_operator.clone() else {
            self.status = Err(Status::invalid_argument(
                "merge_operator is not properly initialized",
            ));
            return false;
        };
        operands.reverse();
        match op.full_merge(&user_key, base, operands.as_slice()) {
            Some(value) => self.set_current(user_key, value),
            None => {
                self.status = Err(Status::corruption("Error: Could not perform merge."));
                false
            }
        }
    }

    fn set_current(&mut self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.key = key;
        self.value = value;
        self.valid = true;
        true
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("sequence", &self.sequence)
            .field("valid", &self.valid)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Forward [`Iterator`] over a [`DbIterator`], ending at the first error.
pub struct Entries {
    iter: DbIterator,
    first: bool,
    done: bool,
}

impl Iterator for Entries {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.first {
            self.iter.next();
        } else if !self.iter.positioned {
            self.iter.seek_to_first();
        }
        self.first = false;
        if self.iter.is_valid() {
            return Some(Ok((self.iter.key.clone(), self.iter.value.clone())));
        }
        self.done = true;
        match self.iter.status() {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

fn seek_key(user_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + 8);
    append_internal_key(&mut buf, user_key, MAX_SEQUENCE_NUMBER, types::key::VALUE_TYPE_FOR_SEEK);
    buf
}

fn seek_for_prev_key(user_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + 8);
    append_internal_key(&mut buf, user_key, 0, types::key::VALUE_TYPE_FOR_SEEK_FOR_PREV);
    buf
}
