//! Version selection while rewriting a sorted stream of records.
//!
//! [`CompactionIterator`] pulls every version of one user key from its
//! input, decides which versions survive and hands the survivors out in
//! internal-key order. Survival is decided per snapshot stripe: a record
//! belongs to the stripe of the oldest snapshot that can see it, and only
//! the newest record of a key within a stripe is observable by anyone.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use types::listener::CompactionJobStats;
use types::{
    make_internal_key, parse_internal_key, CompactionFilter, Decision, FilterValueType,
    FragmentedRangeTombstones, InternalIterator, InternalKeyComparator, MergeOperator, Result,
    SequenceNumber, Status, ValueType,
};

struct Record {
    seq: SequenceNumber,
    value_type: ValueType,
    value: Vec<u8>,
}

pub(crate) struct CompactionIterator<'a> {
    input: Box<dyn InternalIterator + 'a>,
    icmp: InternalKeyComparator,
    /// Live snapshots, ascending.
    snapshots: Vec<SequenceNumber>,
    range_dels: Arc<FragmentedRangeTombstones>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    filter: Option<Arc<dyn CompactionFilter>>,
    level: usize,
    /// True when no file outside the compaction can hold `key`.
    key_not_exists_beyond: Box<dyn Fn(&[u8]) -> bool + Send + 'a>,
    /// Exclusive upper user-key bound of the input.
    end: Option<Vec<u8>>,
    skip_until: Option<Vec<u8>>,
    output: VecDeque<(Vec<u8>, Vec<u8>)>,
    pub(crate) stats: CompactionJobStats,
}

pub(crate) struct CompactionIteratorOptions<'a> {
    pub(crate) snapshots: Vec<SequenceNumber>,
    pub(crate) range_dels: Arc<FragmentedRangeTombstones>,
    pub(crate) merge_operator: Option<Arc<dyn MergeOperator>>,
    pub(crate) filter: Option<Arc<dyn CompactionFilter>>,
    pub(crate) level: usize,
    pub(crate) key_not_exists_beyond: Box<dyn Fn(&[u8]) -> bool + Send + 'a>,
    pub(crate) end: Option<Vec<u8>>,
}

impl<'a> CompactionIterator<'a> {
    /// `input` must already be positioned at the first record to process.
    pub(crate) fn new(
        input: Box<dyn InternalIterator + 'a>,
        icmp: InternalKeyComparator,
        opts: CompactionIteratorOptions<'a>,
    ) -> Self {
        Self {
            input,
            icmp,
            snapshots: opts.snapshots,
            range_dels: opts.range_dels,
            merge_operator: opts.merge_operator,
            filter: opts.filter,
            level: opts.level,
            key_not_exists_beyond: opts.key_not_exists_beyond,
            end: opts.end,
            skip_until: None,
            output: VecDeque::new(),
            stats: CompactionJobStats::default(),
        }
    }

    /// Next surviving `(internal_key, value)`, or `None` once the input is
    /// exhausted.
    pub(crate) fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if let Some(entry) = self.output.pop_front() {
                return Ok(Some(entry));
            }
            let Some((user_key, records)) = self.read_key()? else {
                return Ok(None);
            };
            self.process_key(&user_key, records)?;
        }
    }

    /// Collects every record of the next user key, newest first.
    fn read_key(&mut self) -> Result<Option<(Vec<u8>, Vec<Record>)>> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        loop {
            if !self.input.valid() {
                self.input.status()?;
                return Ok(None);
            }
            let parsed = parse_internal_key(self.input.key())?;
            if let Some(end) = &self.end {
                if ucmp.compare(parsed.user_key, end) != Ordering::Less {
                    return Ok(None);
                }
            }
            if let Some(until) = &self.skip_until {
                if ucmp.compare(parsed.user_key, until) == Ordering::Less {
                    self.stats.num_input_records += 1;
                    self.stats.num_filtered_records += 1;
                    self.input.next();
                    continue;
                }
                self.skip_until = None;
            }
            break;
        }

        let user_key = parse_internal_key(self.input.key())?.user_key.to_vec();
        let mut records = Vec::new();
        while self.input.valid() {
            let parsed = parse_internal_key(self.input.key())?;
            if !ucmp.equal(parsed.user_key, &user_key) {
                break;
            }
            self.stats.num_input_records += 1;
            self.stats.total_input_raw_key_bytes += self.input.key().len() as u64;
            self.stats.total_input_raw_value_bytes += self.input.value().len() as u64;
            if parsed.value_type.is_deletion() {
                self.stats.num_input_deletion_records += 1;
            }
            records.push(Record {
                seq: parsed.sequence,
                value_type: parsed.value_type,
                value: self.input.value().to_vec(),
            });
            self.input.next();
        }
        self.input.status()?;
        Ok(Some((user_key, records)))
    }

    /// Index of the stripe holding `seq`: the position of the oldest
    /// snapshot that sees it, `snapshots.len()` for the unpinned tip.
    fn stripe(&self, seq: SequenceNumber) -> usize {
        self.snapshots.partition_point(|&s| s < seq)
    }

    fn tip_stripe(&self) -> usize {
        self.snapshots.len()
    }

    /// A newer tombstone in the same stripe hides the record from every
    /// reader.
    fn covered_in_stripe(&self, user_key: &[u8], seq: SequenceNumber) -> bool {
        let stripe = self.stripe(seq);
        self.range_dels
            .covering_seqs(user_key)
            .iter()
            .any(|&t| t > seq && self.stripe(t) == stripe)
    }

    fn filter_applies(&self, stripe: usize) -> bool {
        self.filter
            .as_ref()
            .is_some_and(|f| stripe == self.tip_stripe() || f.ignore_snapshots())
    }

    fn emit(&mut self, user_key: &[u8], seq: SequenceNumber, t: ValueType, value: Vec<u8>) {
        self.output
            .push_back((make_internal_key(user_key, seq, t), value));
    }

    fn process_key(&mut self, user_key: &[u8], records: Vec<Record>) -> Result<()> {
        let mut last_stripe: Option<usize> = None;
        let mut i = 0;
        while i < records.len() {
            let rec = &records[i];
            let stripe = self.stripe(rec.seq);
            if last_stripe == Some(stripe) {
                self.stats.num_records_replaced += 1;
                i += 1;
                continue;
            }
            if self.covered_in_stripe(user_key, rec.seq) {
                self.stats.num_records_replaced += 1;
                i += 1;
                continue;
            }
            last_stripe = Some(stripe);

            match rec.value_type {
                ValueType::Merge => {
                    i = self.process_merge(user_key, &records, i, stripe)?;
                    continue;
                }
                ValueType::Value => {
                    let mut value_type = ValueType::Value;
                    let mut value = rec.value.clone();
                    if self.filter_applies(stripe) {
                        match self.run_filter(user_key, FilterValueType::Value, &rec.value) {
                            Decision::Keep => {}
                            Decision::ChangeValue(v) => value = v,
                            Decision::Remove => {
                                value_type = ValueType::Deletion;
                                value.clear();
                            }
                            Decision::RemoveAndSkipUntil(until) => {
                                let ucmp = self.icmp.user_comparator();
                                if ucmp.compare(&until, user_key) == Ordering::Greater {
                                    self.stats.num_filtered_records += (records.len() - i) as u64;
                                    self.skip_until = Some(until);
                                    return Ok(());
                                }
                            }
                        }
                    }
                    if value_type == ValueType::Value {
                        self.emit(user_key, rec.seq, ValueType::Value, value);
                    } else {
                        self.stats.num_filtered_records += 1;
                        self.emit_deletion(user_key, rec.seq, stripe);
                    }
                }
                ValueType::Deletion | ValueType::SingleDeletion => {
                    if stripe == 0 && (self.key_not_exists_beyond)(user_key) {
                        self.stats.num_expired_deletion_records += 1;
                    } else {
                        self.emit(user_key, rec.seq, rec.value_type, Vec::new());
                    }
                }
                ValueType::RangeDeletion | ValueType::LogData => {
                    return Err(Status::corruption(format!(
                        "unexpected {:?} record in compaction input",
                        rec.value_type
                    )));
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn emit_deletion(&mut self, user_key: &[u8], seq: SequenceNumber, stripe: usize) {
        if stripe == 0 && (self.key_not_exists_beyond)(user_key) {
            self.stats.num_expired_deletion_records += 1;
        } else {
            self.emit(user_key, seq, ValueType::Deletion, Vec::new());
        }
    }

    fn run_filter(&mut self, user_key: &[u8], t: FilterValueType, value: &[u8]) -> Decision {
        match &self.filter {
            Some(filter) => filter.filter(self.level, user_key, t, value),
            None => Decision::Keep,
        }
    }

    /// Folds the run of merge operands starting at `start`. Returns the
    /// index of the first record not consumed.
    fn process_merge(
        &mut self,
        user_key: &[u8],
        records: &[Record],
        start: usize,
        stripe: usize,
    ) -> Result<usize> {
        let Some(op) = self.merge_operator.clone() else {
            return Err(Status::invalid_argument(
                "merge_operator is not properly initialized",
            ));
        };
        let newest_seq = records[start].seq;
        let filtering = self.filter_applies(stripe);

        // (seq, operand), newest first
        let mut operands: Vec<(SequenceNumber, Vec<u8>)> = Vec::new();
        let mut j = start;
        let mut base: Option<Option<&[u8]>> = None;
        while j < records.len() {
            let rec = &records[j];
            if self.stripe(rec.seq) != stripe {
                break;
            }
            if j > start && self.covered_in_stripe(user_key, rec.seq) {
                // everything older in the stripe is covered too
                base = Some(None);
                j = records[j..]
                    .iter()
                    .position(|r| self.stripe(r.seq) != stripe)
                    .map_or(records.len(), |p| j + p);
                break;
            }
            match rec.value_type {
                ValueType::Merge => {
                    let operand = if filtering {
                        match self.run_filter(user_key, FilterValueType::MergeOperand, &rec.value) {
                            Decision::Keep => Some(rec.value.clone()),
                            Decision::ChangeValue(v) => Some(v),
                            Decision::Remove | Decision::RemoveAndSkipUntil(_) => {
                                self.stats.num_filtered_records += 1;
                                None
                            }
                        }
                    } else {
                        Some(rec.value.clone())
                    };
                    if let Some(operand) = operand {
                        operands.push((rec.seq, operand));
                    }
                    j += 1;
                }
                ValueType::Value => {
                    base = Some(Some(rec.value.as_slice()));
                    j += 1;
                    break;
                }
                _ => {
                    base = Some(None);
                    j += 1;
                    break;
                }
            }
        }
        // older records of the stripe are shadowed by the merge result
        while j < records.len() && self.stripe(records[j].seq) == stripe {
            self.stats.num_records_replaced += 1;
            j += 1;
        }

        let key_ends_here = j == records.len();
        if base.is_none() && key_ends_here && (self.key_not_exists_beyond)(user_key) {
            base = Some(None);
        }
        self.stats.num_merged_operands += operands.len() as u64;

        if let Some(base) = base {
            let ops: Vec<&[u8]> = operands.iter().rev().map(|(_, v)| v.as_slice()).collect();
            if ops.is_empty() {
                // every operand was filtered away
                match base {
                    Some(v) => self.emit(user_key, newest_seq, ValueType::Value, v.to_vec()),
                    None => self.emit_deletion(user_key, newest_seq, stripe),
                }
                return Ok(j);
            }
            let merged = op
                .full_merge(user_key, base, &ops)
                .ok_or_else(|| Status::corruption("Error: Could not perform merge."))?;
            self.emit(user_key, newest_seq, ValueType::Value, merged);
            return Ok(j);
        }

        if operands.len() > 1 {
            let mut iter = operands.iter().rev();
            let mut acc = iter.next().map(|(_, v)| v.clone());
            for (_, right) in iter {
                acc = match acc {
                    Some(left) => op.partial_merge(user_key, &left, right),
                    None => None,
                };
            }
            if let Some(folded) = acc {
                self.emit(user_key, newest_seq, ValueType::Merge, folded);
                return Ok(j);
            }
        }
        for (seq, operand) in operands {
            self.emit(user_key, seq, ValueType::Merge, operand);
        }
        Ok(j)
    }
}
