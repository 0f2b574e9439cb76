//! Per-lookup state carried across memtables and tables.
//!
//! A point lookup probes sources newest to oldest. Each source feeds the
//! records it holds for the key into [`GetContext::save_value`], which
//! decides whether the lookup has reached a definitive answer (a value or a
//! tombstone) or has to keep collecting merge operands from older sources.

use crate::comparator::Comparator;
use crate::key::{ParsedInternalKey, SequenceNumber, ValueType};
use crate::merge_operator::MergeOperator;
use crate::status::{Result, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetState {
    NotFound,
    Found,
    Deleted,
    /// Operands collected, base value not found yet.
    Merge,
    /// A merge operand was found but no operator is configured.
    MergeOperatorMissing,
    /// The merge operator failed.
    MergeFailed,
}

pub struct GetContext<'a> {
    ucmp: &'a dyn Comparator,
    merge_operator: Option<&'a dyn MergeOperator>,
    user_key: &'a [u8],
    snapshot: SequenceNumber,
    state: GetState,
    value: Option<Vec<u8>>,
    /// Newest first.
    operands: Vec<Vec<u8>>,
    max_covering_tombstone_seq: SequenceNumber,
    seq: SequenceNumber,
}

impl<'a> GetContext<'a> {
    pub fn new(
        ucmp: &'a dyn Comparator,
        merge_operator: Option<&'a dyn MergeOperator>,
        user_key: &'a [u8],
        snapshot: SequenceNumber,
    ) -> Self {
        Self {
            ucmp,
            merge_operator,
            user_key,
            snapshot,
            state: GetState::NotFound,
            value: None,
            operands: Vec::new(),
            max_covering_tombstone_seq: 0,
            seq: 0,
        }
    }

    #[must_use]
    pub fn user_key(&self) -> &[u8] {
        self.user_key
    }

    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    #[must_use]
    pub fn state(&self) -> GetState {
        self.state
    }

    /// Sequence number of the record that settled the lookup.
    #[must_use]
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    /// True once no older source can change the answer.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(self.state, GetState::NotFound | GetState::Merge)
    }

    #[must_use]
    pub fn max_covering_tombstone_seq(&self) -> SequenceNumber {
        self.max_covering_tombstone_seq
    }

    /// Raises the covering range-tombstone watermark. Records older than the
    /// watermark are treated as deleted.
    pub fn update_covering_tombstone(&mut self, seq: SequenceNumber) {
        if seq > self.max_covering_tombstone_seq {
            self.max_covering_tombstone_seq = seq;
        }
    }

    /// Feeds one record. Returns `true` when the caller should keep feeding
    /// older records of the same key.
    pub fn save_value(&mut self, parsed: &ParsedInternalKey<'_>, value: &[u8]) -> bool {
        if !self.ucmp.equal(parsed.user_key, self.user_key) {
            return false;
        }
        if parsed.sequence > self.snapshot {
            return true;
        }
        let covered = self.max_covering_tombstone_seq > parsed.sequence;
        let value_type = if covered {
            ValueType::RangeDeletion
        } else {
            parsed.value_type
        };

        match value_type {
            ValueType::Value => {
                self.seq = parsed.sequence;
                match self.state {
                    GetState::NotFound => {
                        self.state = GetState::Found;
                        self.value = Some(value.to_vec());
                    }
                    GetState::Merge => self.fold_operands(Some(value)),
                    _ => {}
                }
                false
            }
            ValueType::Deletion | ValueType::SingleDeletion | ValueType::RangeDeletion => {
                self.seq = parsed.sequence;
                match self.state {
                    GetState::NotFound => self.state = GetState::Deleted,
                    GetState::Merge => self.fold_operands(None),
                    _ => {}
                }
                false
            }
            ValueType::Merge => {
                if self.merge_operator.is_none() {
                    self.state = GetState::MergeOperatorMissing;
                    return false;
                }
                self.seq = parsed.sequence;
                self.state = GetState::Merge;
                self.operands.push(value.to_vec());
                true
            }
            ValueType::LogData => true,
        }
    }

    fn fold_operands(&mut self, base: Option<&[u8]>) {
        let Some(op) = self.merge_operator else {
            self.state = GetState::MergeOperatorMissing;
            return;
        };
        let operands: Vec<&[u8]> = self.operands.iter().rev().map(Vec::as_slice).collect();
        match op.full_merge(self.user_key, base, &operands) {
            Some(v) => {
                self.value = Some(v);
                self.state = GetState::Found;
            }
            None => self.state = GetState::MergeFailed,
        }
        self.operands.clear();
    }

    /// Resolves the lookup after every source has been probed.
    ///
    /// `Ok(None)` means the key does not exist at the snapshot.
    pub fn finish(mut self) -> Result<Option<Vec<u8>>> {
        if self.state == GetState::Merge {
            self.fold_operands(None);
        }
        match self.state {
            GetState::Found => Ok(self.value),
            GetState::NotFound | GetState::Deleted => Ok(None),
            GetState::Merge => Err(Status::merge_in_progress("unresolved merge operands")),
            GetState::MergeOperatorMissing => Err(Status::invalid_argument(
                "merge_operator is not properly initialized",
            )),
            GetState::MergeFailed => Err(Status::corruption("Error: Could not perform merge.")),
        }
    }
}
