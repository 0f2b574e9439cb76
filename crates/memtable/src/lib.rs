//! # MemTable
//!
//! In-memory write buffer of a column family. Every write lands here (after
//! the WAL) and stays until the table is frozen and flushed to an L0 file.
//!
//! Entries are keyed by internal key, `user_key ‖ (seq << 8 | type)`, and
//! ordered by the column family's [`InternalKeyComparator`]: user key
//! ascending, then newest first. Several versions of one user key therefore
//! sit next to each other, newest at the front, which is what
//! [`MemTable::get`] relies on.
//!
//! ```text
//!   "apple"@9 Put  ─┐
//!   "apple"@7 Merge │ one user key, newest first
//!   "apple"@3 Put  ─┘
//!   "banana"@8 Del
//! ```
//!
//! The point-key index is a lock-free `crossbeam_skiplist::SkipMap`, so
//! inserts take `&self` and may run from several writer threads at once.
//! Range tombstones are kept in a separate list and fragmented lazily the
//! first time a reader needs them.

use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use types::{
    make_internal_key, parse_internal_key, FragmentedRangeTombstones, GetContext,
    InternalIterator, InternalKeyComparator, LookupKey, RangeTombstone, Result, SequenceNumber,
    Status, ValueType,
};

/// Per-entry bookkeeping charged on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 32;

/// Skip-list key: an encoded internal key that orders itself with the
/// column family's comparator.
#[derive(Clone)]
pub struct MemKey {
    ikey: Vec<u8>,
    icmp: InternalKeyComparator,
}

impl MemKey {
    fn new(ikey: Vec<u8>, icmp: &InternalKeyComparator) -> Self {
        Self {
            ikey,
            icmp: icmp.clone(),
        }
    }

    #[must_use]
    pub fn encoded(&self) -> &[u8] {
        &self.ikey
    }
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.icmp.compare(&self.ikey, &other.ikey)
    }
}

impl std::fmt::Debug for MemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match parse_internal_key(&self.ikey) {
            Ok(p) => write!(
                f,
                "{}@{}:{:?}",
                String::from_utf8_lossy(p.user_key),
                p.sequence,
                p.value_type
            ),
            Err(_) => write!(f, "{:?}", self.ikey),
        }
    }
}

pub struct MemTable {
    id: u64,
    icmp: InternalKeyComparator,
    table: SkipMap<MemKey, Vec<u8>>,
    range_dels: Mutex<Vec<RangeTombstone>>,
    fragmented: RwLock<Option<Arc<FragmentedRangeTombstones>>>,

    memory_usage: AtomicUsize,
    num_entries: AtomicU64,
    num_deletes: AtomicU64,
    num_range_deletes: AtomicU64,
    data_size: AtomicU64,

    /// Sequence of the first insert, 0 while empty.
    first_seqno: AtomicU64,
    /// Lower bound on every sequence this table can hold.
    earliest_seqno: SequenceNumber,
    /// WAL number that holds writes newer than this table; set when frozen.
    next_log_number: AtomicU64,
}

impl MemTable {
    /// Creates an empty memtable. `earliest_seqno` is the last sequence
    /// number published before the table became active.
    pub fn new(id: u64, icmp: InternalKeyComparator, earliest_seqno: SequenceNumber) -> Self {
        Self {
            id,
            icmp,
            table: SkipMap::new(),
            range_dels: Mutex::new(Vec::new()),
            fragmented: RwLock::new(None),
            memory_usage: AtomicUsize::new(0),
            num_entries: AtomicU64::new(0),
            num_deletes: AtomicU64::new(0),
            num_range_deletes: AtomicU64::new(0),
            data_size: AtomicU64::new(0),
            first_seqno: AtomicU64::new(0),
            earliest_seqno,
            next_log_number: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Inserts one record. For `RangeDeletion`, `key` is the inclusive
    /// begin and `value` the exclusive end of the range.
    ///
    /// Never blocks on I/O. Safe to call from several threads at once.
    pub fn add(
        &self,
        seq: SequenceNumber,
        value_type: ValueType,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let charge = key.len() + value.len() + ENTRY_OVERHEAD;
        match value_type {
            ValueType::RangeDeletion => {
                self.range_dels
                    .lock()
                    .push(RangeTombstone::new(key, value, seq));
                *self.fragmented.write() = None;
                self.num_range_deletes.fetch_add(1, AtomicOrdering::Relaxed);
            }
            ValueType::Value | ValueType::Merge => {
                self.table
                    .insert(MemKey::new(make_internal_key(key, seq, value_type), &self.icmp), value.to_vec());
            }
            ValueType::Deletion | ValueType::SingleDeletion => {
                self.table
                    .insert(MemKey::new(make_internal_key(key, seq, value_type), &self.icmp), Vec::new());
                self.num_deletes.fetch_add(1, AtomicOrdering::Relaxed);
            }
            ValueType::LogData => {
                return Err(Status::invalid_argument("log data cannot be inserted into a memtable"))
            }
        }
        self.num_entries.fetch_add(1, AtomicOrdering::Relaxed);
        self.data_size
            .fetch_add((key.len() + value.len()) as u64, AtomicOrdering::Relaxed);
        self.memory_usage.fetch_add(charge, AtomicOrdering::Relaxed);
        // Group members may insert out of sequence order.
        let _ = self.first_seqno.fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |cur| {
            (cur == 0 || seq < cur).then_some(seq)
        });
        Ok(())
    }

    /// Feeds the records of `key` visible at the lookup's snapshot into
    /// `ctx`, newest first. Returns `true` once the lookup is settled and
    /// older sources need not be consulted.
    pub fn get(&self, key: &LookupKey, ctx: &mut GetContext<'_>) -> Result<bool> {
        if self.num_range_deletes.load(AtomicOrdering::Acquire) > 0 {
            let frags = self.range_tombstones();
            ctx.update_covering_tombstone(frags.max_covering_seq(key.user_key(), key.sequence()));
        }

        let probe = MemKey::new(key.internal_key().to_vec(), &self.icmp);
        let mut cursor = self.table.lower_bound(Bound::Included(&probe));
        while let Some(entry) = cursor {
            let parsed = parse_internal_key(entry.key().encoded())?;
            if !self.icmp.user_comparator().equal(parsed.user_key, key.user_key()) {
                break;
            }
            if !ctx.save_value(&parsed, entry.value()) {
                break;
            }
            cursor = entry.next();
        }
        Ok(ctx.is_done())
    }

    /// Fragmented view of the range tombstones inserted so far.
    pub fn range_tombstones(&self) -> Arc<FragmentedRangeTombstones> {
        if let Some(cached) = self.fragmented.read().as_ref() {
            return Arc::clone(cached);
        }
        let tombstones = self.range_dels.lock().clone();
        let frags = Arc::new(FragmentedRangeTombstones::new(
            &tombstones,
            Arc::clone(self.icmp.user_comparator()),
        ));
        *self.fragmented.write() = Some(Arc::clone(&frags));
        frags
    }

    /// Unfragmented range tombstones in insertion order.
    pub fn range_tombstone_list(&self) -> Vec<RangeTombstone> {
        self.range_dels.lock().clone()
    }

    /// Cursor over point records. Range tombstones are not included; see
    /// [`range_tombstones`](Self::range_tombstones).
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            current: None,
        }
    }

    /// True once the accounted memory reaches `write_buffer_size`.
    #[must_use]
    pub fn should_flush(&self, write_buffer_size: usize) -> bool {
        self.approximate_memory_usage() >= write_buffer_size
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.memory_usage.load(AtomicOrdering::Relaxed)
    }

    /// Raw key and value bytes inserted.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_size.load(AtomicOrdering::Relaxed)
    }

    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.num_entries.load(AtomicOrdering::Relaxed)
    }

    #[must_use]
    pub fn num_deletes(&self) -> u64 {
        self.num_deletes.load(AtomicOrdering::Relaxed)
    }

    #[must_use]
    pub fn num_range_deletes(&self) -> u64 {
        self.num_range_deletes.load(AtomicOrdering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_entries() == 0
    }

    #[must_use]
    pub fn first_seqno(&self) -> SequenceNumber {
        self.first_seqno.load(AtomicOrdering::Acquire)
    }

    #[must_use]
    pub fn earliest_seqno(&self) -> SequenceNumber {
        self.earliest_seqno
    }

    #[must_use]
    pub fn next_log_number(&self) -> u64 {
        self.next_log_number.load(AtomicOrdering::Acquire)
    }

    pub fn set_next_log_number(&self, log_number: u64) {
        self.next_log_number.store(log_number, AtomicOrdering::Release);
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("id", &self.id)
            .field("entries", &self.num_entries())
            .field("range_deletes", &self.num_range_deletes())
            .field("memory_usage", &self.approximate_memory_usage())
            .finish()
    }
}

/// Cursor over a memtable's point records.
///
/// Holds its own copy of the current entry and re-seeks the skip list on
/// every step, so concurrent inserts never invalidate it.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(MemKey, Vec<u8>)>,
}

impl MemTableIterator {
    fn set(&mut self, entry: Option<crossbeam_skiplist::map::Entry<'_, MemKey, Vec<u8>>>) {
        self.current = entry.map(|e| (e.key().clone(), e.value().clone()));
    }

    fn probe(&self, target: &[u8]) -> MemKey {
        MemKey::new(target.to_vec(), &self.mem.icmp)
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        let mem = Arc::clone(&self.mem);
        self.set(mem.table.front());
    }

    fn seek_to_last(&mut self) {
        let mem = Arc::clone(&self.mem);
        self.set(mem.table.back());
    }

    fn seek(&mut self, target: &[u8]) {
        let mem = Arc::clone(&self.mem);
        let probe = self.probe(target);
        self.set(mem.table.lower_bound(Bound::Included(&probe)));
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let mem = Arc::clone(&self.mem);
        let probe = self.probe(target);
        self.set(mem.table.upper_bound(Bound::Included(&probe)));
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        let mem = Arc::clone(&self.mem);
        self.set(mem.table.lower_bound(Bound::Excluded(&key)));
    }

    fn prev(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        let mem = Arc::clone(&self.mem);
        self.set(mem.table.upper_bound(Bound::Excluded(&key)));
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.encoded()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
