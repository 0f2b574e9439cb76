//! Registered read points.
//!
//! A snapshot pins a sequence number: compactions keep, for every live
//! snapshot, the newest version of each key visible at it. Dropping the
//! [`Snapshot`] releases it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use types::SequenceNumber;

#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    /// sequence -> number of snapshots taken at it
    live: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub(crate) fn acquire(self: &Arc<Self>, seq: SequenceNumber, unix_time: u64) -> Snapshot {
        *self.live.lock().entry(seq).or_insert(0) += 1;
        Snapshot {
            seq,
            unix_time,
            list: Arc::clone(self),
        }
    }

    fn release(&self, seq: SequenceNumber) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                live.remove(&seq);
            }
        }
    }

    /// Distinct live sequences, ascending.
    pub(crate) fn sequences(&self) -> Vec<SequenceNumber> {
        self.live.lock().keys().copied().collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.live.lock().values().sum()
    }

    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.live.lock().keys().next().copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

/// A consistent read point. Pass it through
/// [`ReadOptions::snapshot`](crate::ReadOptions::snapshot).
pub struct Snapshot {
    seq: SequenceNumber,
    unix_time: u64,
    list: Arc<SnapshotList>,
}

impl Snapshot {
    #[must_use]
    pub fn sequence_number(&self) -> SequenceNumber {
        self.seq
    }

    /// Wall-clock seconds when the snapshot was taken.
    #[must_use]
    pub fn unix_time(&self) -> u64 {
        self.unix_time
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.seq);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}
