//! `WriteBatch`: an ordered, atomically applied group of mutations.
//!
//! ## Encoding
//!
//! ```text
//! [sequence: u64 LE][count: u32 LE][record]*
//!
//! record := Put          0x01 cf:u32 key value
//!         | Delete       0x00 cf:u32 key
//!         | SingleDelete 0x07 cf:u32 key
//!         | Merge        0x02 cf:u32 key value
//!         | DeleteRange  0x0F cf:u32 begin end
//!         | LogData      0x03 blob
//!         | BeginPrepare 0x09
//!         | EndPrepare   0x0A xid
//!         | Commit       0x0B xid
//!         | Rollback     0x0C xid
//!         | Noop         0x0D
//!
//! key, value, begin, end, blob, xid := [len: u32 LE][bytes]
//! ```
//!
//! `count` is the number of sequence-consuming records (puts, deletes,
//! merges and range deletions). Log data and transaction markers are replayed
//! to handlers but never reach a memtable.

use byteorder::{ByteOrder, LittleEndian};
use types::{Result, SequenceNumber, Status};

/// Bytes occupied by the sequence number and count.
pub const HEADER_LEN: usize = 12;

pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

const TAG_DELETE: u8 = 0x00;
const TAG_PUT: u8 = 0x01;
const TAG_MERGE: u8 = 0x02;
const TAG_LOG_DATA: u8 = 0x03;
const TAG_SINGLE_DELETE: u8 = 0x07;
const TAG_BEGIN_PREPARE: u8 = 0x09;
const TAG_END_PREPARE: u8 = 0x0A;
const TAG_COMMIT: u8 = 0x0B;
const TAG_ROLLBACK: u8 = 0x0C;
const TAG_NOOP: u8 = 0x0D;
const TAG_DELETE_RANGE: u8 = 0x0F;

const HAS_PUT: u32 = 1 << 0;
const HAS_DELETE: u32 = 1 << 1;
const HAS_SINGLE_DELETE: u32 = 1 << 2;
const HAS_MERGE: u32 = 1 << 3;
const HAS_DELETE_RANGE: u32 = 1 << 4;
const HAS_BEGIN_PREPARE: u32 = 1 << 5;
const HAS_END_PREPARE: u32 = 1 << 6;
const HAS_COMMIT: u32 = 1 << 7;
const HAS_ROLLBACK: u32 = 1 << 8;

/// Visitor over the records of a batch, in insertion order.
///
/// Every method may fail, which aborts the iteration with that error.
pub trait Handler {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()>;

    fn single_delete_cf(&mut self, _cf: u32, _key: &[u8]) -> Result<()> {
        Err(Status::not_supported("SingleDelete not implemented by handler"))
    }

    fn merge_cf(&mut self, _cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Status::not_supported("Merge not implemented by handler"))
    }

    fn delete_range_cf(&mut self, _cf: u32, _begin: &[u8], _end: &[u8]) -> Result<()> {
        Err(Status::not_supported("DeleteRange not implemented by handler"))
    }

    fn log_data(&mut self, _blob: &[u8]) {}

    fn mark_begin_prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn mark_end_prepare(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    fn mark_commit(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    fn mark_rollback(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    fn mark_noop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Checked before every record; returning `false` ends the iteration
    /// early with `Ok(())`.
    fn should_continue(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SavePoint {
    size: usize,
    count: u32,
    content_flags: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
    content_flags: u32,
    save_points: Vec<SavePoint>,
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("sequence", &self.sequence())
            .field("count", &self.count())
            .field("data_size", &self.rep.len())
            .field("save_points", &self.save_points.len())
            .finish()
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(bytes: usize) -> Self {
        let mut rep = Vec::with_capacity(HEADER_LEN.max(bytes));
        rep.resize(HEADER_LEN, 0);
        Self {
            rep,
            content_flags: 0,
            save_points: Vec::new(),
        }
    }

    /// Rebuilds a batch from its serialized form (e.g. a WAL record).
    pub fn from_data(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Status::corruption("malformed WriteBatch (too small)"));
        }
        let mut batch = Self {
            rep: data,
            content_flags: 0,
            save_points: Vec::new(),
        };
        let mut scan = FlagScanner::default();
        batch.iterate(&mut scan)?;
        batch.content_flags = scan.flags;
        Ok(batch)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.rep
    }

    #[must_use]
    pub fn data_size(&self) -> usize {
        self.rep.len()
    }

    /// Number of sequence-consuming records.
    #[must_use]
    pub fn count(&self) -> u32 {
        LittleEndian::read_u32(&self.rep[8..12])
    }

    fn set_count(&mut self, n: u32) {
        LittleEndian::write_u32(&mut self.rep[8..12], n);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rep.len() == HEADER_LEN
    }

    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        LittleEndian::read_u64(&self.rep[0..8])
    }

    pub fn set_sequence(&mut self, seq: SequenceNumber) {
        LittleEndian::write_u64(&mut self.rep[0..8], seq);
    }

    /// Drops every record and save point.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_LEN, 0);
        self.content_flags = 0;
        self.save_points.clear();
    }

    fn put_slice(&mut self, data: &[u8]) {
        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, data.len() as u32);
        self.rep.extend_from_slice(&len);
        self.rep.extend_from_slice(data);
    }

    fn put_u32(&mut self, v: u32) {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, v);
        self.rep.extend_from_slice(&raw);
    }

    fn counted_record(&mut self, tag: u8, flag: u32, cf: u32, parts: &[&[u8]]) {
        self.rep.push(tag);
        self.put_u32(cf);
        for p in parts {
            self.put_slice(p);
        }
        let n = self.count() + 1;
        self.set_count(n);
        self.content_flags |= flag;
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    pub fn put_cf(&mut self, cf: u32, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.counted_record(TAG_PUT, HAS_PUT, cf, &[key.as_ref(), value.as_ref()]);
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    pub fn delete_cf(&mut self, cf: u32, key: impl AsRef<[u8]>) {
        self.counted_record(TAG_DELETE, HAS_DELETE, cf, &[key.as_ref()]);
    }

    /// Deletes a key that was written exactly once since the last delete.
    pub fn single_delete(&mut self, key: impl AsRef<[u8]>) {
        self.single_delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    pub fn single_delete_cf(&mut self, cf: u32, key: impl AsRef<[u8]>) {
        self.counted_record(TAG_SINGLE_DELETE, HAS_SINGLE_DELETE, cf, &[key.as_ref()]);
    }

    pub fn merge(&mut self, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, operand);
    }

    pub fn merge_cf(&mut self, cf: u32, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) {
        self.counted_record(TAG_MERGE, HAS_MERGE, cf, &[key.as_ref(), operand.as_ref()]);
    }

    /// Deletes every key in `[begin, end)`.
    pub fn delete_range(&mut self, begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) {
        self.delete_range_cf(DEFAULT_COLUMN_FAMILY_ID, begin, end);
    }

    pub fn delete_range_cf(&mut self, cf: u32, begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) {
        self.counted_record(
            TAG_DELETE_RANGE,
            HAS_DELETE_RANGE,
            cf,
            &[begin.as_ref(), end.as_ref()],
        );
    }

    /// Appends an opaque blob that is written to the WAL and replayed to
    /// handlers, but never applied to the database.
    pub fn put_log_data(&mut self, blob: impl AsRef<[u8]>) {
        self.rep.push(TAG_LOG_DATA);
        self.put_slice(blob.as_ref());
    }

    pub fn mark_begin_prepare(&mut self) {
        self.rep.push(TAG_BEGIN_PREPARE);
        self.content_flags |= HAS_BEGIN_PREPARE;
    }

    pub fn mark_end_prepare(&mut self, xid: impl AsRef<[u8]>) {
        self.rep.push(TAG_END_PREPARE);
        self.put_slice(xid.as_ref());
        self.content_flags |= HAS_END_PREPARE;
    }

    pub fn mark_commit(&mut self, xid: impl AsRef<[u8]>) {
        self.rep.push(TAG_COMMIT);
        self.put_slice(xid.as_ref());
        self.content_flags |= HAS_COMMIT;
    }

    pub fn mark_rollback(&mut self, xid: impl AsRef<[u8]>) {
        self.rep.push(TAG_ROLLBACK);
        self.put_slice(xid.as_ref());
        self.content_flags |= HAS_ROLLBACK;
    }

    pub fn mark_noop(&mut self) {
        self.rep.push(TAG_NOOP);
    }

    // -------------------- Save points --------------------

    pub fn set_save_point(&mut self) {
        self.save_points.push(SavePoint {
            size: self.rep.len(),
            count: self.count(),
            content_flags: self.content_flags,
        });
    }

    /// Removes every record added since the most recent save point and pops
    /// it. Fails with `NotFound` when no save point is set.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        let sp = self
            .save_points
            .pop()
            .ok_or_else(|| Status::not_found("no save point to roll back to"))?;
        self.rep.truncate(sp.size);
        self.set_count(sp.count);
        self.content_flags = sp.content_flags;
        Ok(())
    }

    /// Discards the most recent save point without rolling back.
    pub fn pop_save_point(&mut self) -> Result<()> {
        self.save_points
            .pop()
            .map(|_| ())
            .ok_or_else(|| Status::not_found("no save point to pop"))
    }

    // -------------------- Content flags --------------------

    #[must_use]
    pub fn has_put(&self) -> bool {
        self.content_flags & HAS_PUT != 0
    }

    #[must_use]
    pub fn has_delete(&self) -> bool {
        self.content_flags & HAS_DELETE != 0
    }

    #[must_use]
    pub fn has_single_delete(&self) -> bool {
        self.content_flags & HAS_SINGLE_DELETE != 0
    }

    #[must_use]
    pub fn has_merge(&self) -> bool {
        self.content_flags & HAS_MERGE != 0
    }

    #[must_use]
    pub fn has_delete_range(&self) -> bool {
        self.content_flags & HAS_DELETE_RANGE != 0
    }

    #[must_use]
    pub fn has_begin_prepare(&self) -> bool {
        self.content_flags & HAS_BEGIN_PREPARE != 0
    }

    #[must_use]
    pub fn has_end_prepare(&self) -> bool {
        self.content_flags & HAS_END_PREPARE != 0
    }

    #[must_use]
    pub fn has_commit(&self) -> bool {
        self.content_flags & HAS_COMMIT != 0
    }

    #[must_use]
    pub fn has_rollback(&self) -> bool {
        self.content_flags & HAS_ROLLBACK != 0
    }

    /// Appends every record of `other`. Used to merge a write group into a
    /// single WAL record; the sequence of `self` is kept.
    pub fn append(&mut self, other: &WriteBatch) {
        self.rep.extend_from_slice(&other.rep[HEADER_LEN..]);
        let n = self.count() + other.count();
        self.set_count(n);
        self.content_flags |= other.content_flags;
    }

    /// Column families referenced by counted records, deduplicated.
    pub fn column_families(&self) -> Result<Vec<u32>> {
        struct Collect(Vec<u32>);
        impl Collect {
            fn add(&mut self, cf: u32) -> Result<()> {
                if !self.0.contains(&cf) {
                    self.0.push(cf);
                }
                Ok(())
            }
        }
        impl Handler for Collect {
            fn put_cf(&mut self, cf: u32, _: &[u8], _: &[u8]) -> Result<()> {
                self.add(cf)
            }
            fn delete_cf(&mut self, cf: u32, _: &[u8]) -> Result<()> {
                self.add(cf)
            }
            fn single_delete_cf(&mut self, cf: u32, _: &[u8]) -> Result<()> {
                self.add(cf)
            }
            fn merge_cf(&mut self, cf: u32, _: &[u8], _: &[u8]) -> Result<()> {
                self.add(cf)
            }
            fn delete_range_cf(&mut self, cf: u32, _: &[u8], _: &[u8]) -> Result<()> {
                self.add(cf)
            }
        }
        let mut c = Collect(Vec::new());
        self.iterate(&mut c)?;
        Ok(c.0)
    }

    /// Replays every record into `handler` in insertion order.
    pub fn iterate(&self, handler: &mut dyn Handler) -> Result<()> {
        let mut input = &self.rep[HEADER_LEN..];
        let mut found: u32 = 0;
        while !input.is_empty() {
            if !handler.should_continue() {
                return Ok(());
            }
            let tag = input[0];
            input = &input[1..];
            match tag {
                TAG_PUT | TAG_MERGE => {
                    let cf = read_u32(&mut input)?;
                    let key = read_slice(&mut input)?;
                    let value = read_slice(&mut input)?;
                    found += 1;
                    if tag == TAG_PUT {
                        handler.put_cf(cf, key, value)?;
                    } else {
                        handler.merge_cf(cf, key, value)?;
                    }
                }
                TAG_DELETE | TAG_SINGLE_DELETE => {
                    let cf = read_u32(&mut input)?;
                    let key = read_slice(&mut input)?;
                    found += 1;
                    if tag == TAG_DELETE {
                        handler.delete_cf(cf, key)?;
                    } else {
                        handler.single_delete_cf(cf, key)?;
                    }
                }
                TAG_DELETE_RANGE => {
                    let cf = read_u32(&mut input)?;
                    let begin = read_slice(&mut input)?;
                    let end = read_slice(&mut input)?;
                    found += 1;
                    handler.delete_range_cf(cf, begin, end)?;
                }
                TAG_LOG_DATA => {
                    let blob = read_slice(&mut input)?;
                    handler.log_data(blob);
                }
                TAG_BEGIN_PREPARE => handler.mark_begin_prepare()?,
                TAG_END_PREPARE => {
                    let xid = read_slice(&mut input)?;
                    handler.mark_end_prepare(xid)?;
                }
                TAG_COMMIT => {
                    let xid = read_slice(&mut input)?;
                    handler.mark_commit(xid)?;
                }
                TAG_ROLLBACK => {
                    let xid = read_slice(&mut input)?;
                    handler.mark_rollback(xid)?;
                }
                TAG_NOOP => handler.mark_noop()?,
                other => {
                    return Err(Status::corruption(format!(
                        "unknown WriteBatch tag {other:#04x}"
                    )))
                }
            }
        }
        if found != self.count() {
            return Err(Status::corruption(format!(
                "WriteBatch has wrong count: header says {}, found {}",
                self.count(),
                found
            )));
        }
        Ok(())
    }
}

fn read_u32(input: &mut &[u8]) -> Result<u32> {
    if input.len() < 4 {
        return Err(Status::corruption("bad WriteBatch record: truncated u32"));
    }
    let v = LittleEndian::read_u32(&input[..4]);
    *input = &input[4..];
    Ok(v)
}

fn read_slice<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_u32(input)? as usize;
    if input.len() < len {
        return Err(Status::corruption("bad WriteBatch record: truncated slice"));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

#[derive(Default)]
struct FlagScanner {
    flags: u32,
}

impl Handler for FlagScanner {
    fn put_cf(&mut self, _: u32, _: &[u8], _: &[u8]) -> Result<()> {
        self.flags |= HAS_PUT;
        Ok(())
    }
    fn delete_cf(&mut self, _: u32, _: &[u8]) -> Result<()> {
        self.flags |= HAS_DELETE;
        Ok(())
    }
    fn single_delete_cf(&mut self, _: u32, _: &[u8]) -> Result<()> {
        self.flags |= HAS_SINGLE_DELETE;
        Ok(())
    }
    fn merge_cf(&mut self, _: u32, _: &[u8], _: &[u8]) -> Result<()> {
        self.flags |= HAS_MERGE;
        Ok(())
    }
    fn delete_range_cf(&mut self, _: u32, _: &[u8], _: &[u8]) -> Result<()> {
        self.flags |= HAS_DELETE_RANGE;
        Ok(())
    }
    fn mark_begin_prepare(&mut self) -> Result<()> {
        self.flags |= HAS_BEGIN_PREPARE;
        Ok(())
    }
    fn mark_end_prepare(&mut self, _: &[u8]) -> Result<()> {
        self.flags |= HAS_END_PREPARE;
        Ok(())
    }
    fn mark_commit(&mut self, _: &[u8]) -> Result<()> {
        self.flags |= HAS_COMMIT;
        Ok(())
    }
    fn mark_rollback(&mut self, _: &[u8]) -> Result<()> {
        self.flags |= HAS_ROLLBACK;
        Ok(())
    }
}
