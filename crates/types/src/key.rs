//! Internal key encoding.
//!
//! Every record stored in a memtable or table is addressed by an *internal
//! key*: the user key followed by an 8-byte little-endian trailer packing the
//! sequence number and the record type.
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────┐
//! │ user_key (n bytes)   │ (sequence << 8) | value_type (u64 LE) │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Internal keys sort by user key ascending (per the user comparator), then
//! by trailer descending, so the newest version of a key is met first.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::status::{Result, Status};

pub type SequenceNumber = u64;

/// Sequence numbers occupy the upper 56 bits of the trailer.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Trailer length appended to every user key.
pub const TRAILER_LEN: usize = 8;

/// On-disk record types. The numeric values are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
    Merge = 0x2,
    LogData = 0x3,
    SingleDeletion = 0x7,
    RangeDeletion = 0xF,
}

/// Type byte used in seek targets: larger than every real type, so a seek
/// key sorts before every record with the same user key and sequence.
pub const VALUE_TYPE_FOR_SEEK: u8 = 0xFF;

/// Type byte used in seek-for-prev targets: sorts after every real record
/// with the same user key and sequence.
pub const VALUE_TYPE_FOR_SEEK_FOR_PREV: u8 = 0x0;

impl ValueType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            0x2 => Some(ValueType::Merge),
            0x3 => Some(ValueType::LogData),
            0x7 => Some(ValueType::SingleDeletion),
            0xF => Some(ValueType::RangeDeletion),
            _ => None,
        }
    }

    /// True for point tombstones.
    #[must_use]
    pub fn is_deletion(self) -> bool {
        matches!(self, ValueType::Deletion | ValueType::SingleDeletion)
    }
}

#[must_use]
pub fn pack_trailer(seq: SequenceNumber, t: u8) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

#[must_use]
pub fn unpack_trailer(trailer: u64) -> (SequenceNumber, u8) {
    (trailer >> 8, (trailer & 0xff) as u8)
}

/// Appends `user_key ‖ trailer(seq, t)` to `buf`.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: u8) {
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_trailer(seq, t).to_le_bytes());
}

#[must_use]
pub fn make_internal_key(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + TRAILER_LEN);
    append_internal_key(&mut buf, user_key, seq, t as u8);
    buf
}

/// Returns the user-key portion of an internal key.
///
/// Callers must only pass well-formed internal keys.
#[must_use]
pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    debug_assert!(ikey.len() >= TRAILER_LEN);
    &ikey[..ikey.len().saturating_sub(TRAILER_LEN)]
}

#[must_use]
pub fn extract_trailer(ikey: &[u8]) -> u64 {
    let n = ikey.len();
    let mut raw = [0u8; TRAILER_LEN];
    raw.copy_from_slice(&ikey[n - TRAILER_LEN..]);
    u64::from_le_bytes(raw)
}

/// Borrowed, decoded view of an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        Self {
            user_key,
            sequence,
            value_type,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        make_internal_key(self.user_key, self.sequence, self.value_type)
    }
}

/// Decodes an internal key, failing with `Corruption` on a short buffer or an
/// unknown type byte.
pub fn parse_internal_key(ikey: &[u8]) -> Result<ParsedInternalKey<'_>> {
    if ikey.len() < TRAILER_LEN {
        return Err(Status::corruption(format!(
            "internal key too short: {} bytes",
            ikey.len()
        )));
    }
    let (sequence, t) = unpack_trailer(extract_trailer(ikey));
    let value_type = ValueType::from_u8(t)
        .ok_or_else(|| Status::corruption(format!("unknown value type {t:#x} in internal key")))?;
    Ok(ParsedInternalKey {
        user_key: extract_user_key(ikey),
        sequence,
        value_type,
    })
}

/// Owned internal key.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        Self {
            rep: make_internal_key(user_key, seq, t),
        }
    }

    /// Wraps an already-encoded internal key.
    pub fn from_encoded(rep: Vec<u8>) -> Self {
        Self { rep }
    }

    #[must_use]
    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    #[must_use]
    pub fn into_encoded(self) -> Vec<u8> {
        self.rep
    }

    #[must_use]
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        unpack_trailer(extract_trailer(&self.rep)).0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match parse_internal_key(&self.rep) {
            Ok(p) => write!(
                f,
                "'{}' @ {} : {:?}",
                String::from_utf8_lossy(p.user_key),
                p.sequence,
                p.value_type
            ),
            Err(_) => write!(f, "(bad){:?}", self.rep),
        }
    }
}

/// Orders internal keys: user key ascending, then trailer descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    #[must_use]
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => extract_trailer(b).cmp(&extract_trailer(a)),
            ord => ord,
        }
    }

    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }

    /// Shortens `start` towards `limit` on the user-key portion, keeping the
    /// result an internal key that still sorts in `[start, limit)`.
    pub fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start).to_vec();
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.clone();
        self.user.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len() && self.user.compare(&user_start, &tmp) == Ordering::Less {
            append_internal_key_max(&mut tmp);
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    pub fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key).to_vec();
        let mut tmp = user_key.clone();
        self.user.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len() && self.user.compare(&user_key, &tmp) == Ordering::Less {
            append_internal_key_max(&mut tmp);
            *key = tmp;
        }
    }
}

fn append_internal_key_max(user_key: &mut Vec<u8>) {
    user_key.extend_from_slice(&pack_trailer(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes());
}

/// Seek target for a point lookup of `user_key` as of `snapshot`.
#[derive(Debug, Clone)]
pub struct LookupKey {
    ikey: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8], snapshot: SequenceNumber) -> Self {
        let mut ikey = Vec::with_capacity(user_key.len() + TRAILER_LEN);
        append_internal_key(&mut ikey, user_key, snapshot, VALUE_TYPE_FOR_SEEK);
        Self { ikey }
    }

    #[must_use]
    pub fn internal_key(&self) -> &[u8] {
        &self.ikey
    }

    #[must_use]
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.ikey)
    }

    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        unpack_trailer(extract_trailer(&self.ikey)).0
    }
}
