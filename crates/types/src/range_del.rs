//! Range tombstones and their fragmented, query-friendly form.
//!
//! A range tombstone `[start, end) @ seq` deletes every record of a user key
//! in the range with a sequence number below `seq`. Overlapping tombstones are
//! split into non-overlapping fragments so the covering sequence for a key can
//! be found with one binary search.
//!
//! ```text
//! input:     [a ------------ e)@5
//!                  [c ------------- g)@9
//! fragments: [a,c){5}  [c,e){9,5}  [e,g){9}
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::key::SequenceNumber;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seq: SequenceNumber,
}

impl RangeTombstone {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, seq: SequenceNumber) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            seq,
        }
    }
}

/// One non-overlapping slice of key space with every tombstone sequence that
/// covers it, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seqs: Vec<SequenceNumber>,
}

#[derive(Clone)]
pub struct FragmentedRangeTombstones {
    fragments: Vec<Fragment>,
    ucmp: Arc<dyn Comparator>,
}

impl std::fmt::Debug for FragmentedRangeTombstones {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentedRangeTombstones")
            .field("fragments", &self.fragments)
            .finish()
    }
}

impl FragmentedRangeTombstones {
    pub fn new(tombstones: &[RangeTombstone], ucmp: Arc<dyn Comparator>) -> Self {
        let valid: Vec<&RangeTombstone> = tombstones
            .iter()
            .filter(|t| ucmp.compare(&t.start, &t.end) == Ordering::Less)
            .collect();

        let mut bounds: Vec<&[u8]> = valid
            .iter()
            .flat_map(|t| [t.start.as_slice(), t.end.as_slice()])
            .collect();
        bounds.sort_by(|a, b| ucmp.compare(a, b));
        bounds.dedup_by(|a, b| ucmp.equal(a, b));

        let mut fragments = Vec::new();
        for pair in bounds.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            let mut seqs: Vec<SequenceNumber> = valid
                .iter()
                .filter(|t| {
                    ucmp.compare(&t.start, lo) != Ordering::Greater
                        && ucmp.compare(hi, &t.end) != Ordering::Greater
                })
                .map(|t| t.seq)
                .collect();
            if seqs.is_empty() {
                continue;
            }
            seqs.sort_unstable_by(|a, b| b.cmp(a));
            seqs.dedup();
            fragments.push(Fragment {
                start: lo.to_vec(),
                end: hi.to_vec(),
                seqs,
            });
        }
        Self { fragments, ucmp }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    fn fragment_for(&self, user_key: &[u8]) -> Option<&Fragment> {
        let idx = self
            .fragments
            .partition_point(|f| self.ucmp.compare(&f.end, user_key) != Ordering::Greater);
        let frag = self.fragments.get(idx)?;
        (self.ucmp.compare(&frag.start, user_key) != Ordering::Greater).then_some(frag)
    }

    /// Newest tombstone sequence covering `user_key` that is visible at
    /// `read_seq`, or 0 when none is.
    #[must_use]
    pub fn max_covering_seq(&self, user_key: &[u8], read_seq: SequenceNumber) -> SequenceNumber {
        self.fragment_for(user_key)
            .and_then(|f| f.seqs.iter().copied().find(|&s| s <= read_seq))
            .unwrap_or(0)
    }

    /// All tombstone sequences covering `user_key`, newest first.
    #[must_use]
    pub fn covering_seqs(&self, user_key: &[u8]) -> &[SequenceNumber] {
        self.fragment_for(user_key)
            .map(|f| f.seqs.as_slice())
            .unwrap_or(&[])
    }

    /// Expands the fragments back into plain tombstones, one per sequence.
    #[must_use]
    pub fn to_tombstones(&self) -> Vec<RangeTombstone> {
        self.fragments
            .iter()
            .flat_map(|f| {
                f.seqs
                    .iter()
                    .map(move |&seq| RangeTombstone::new(f.start.clone(), f.end.clone(), seq))
            })
            .collect()
    }
}
