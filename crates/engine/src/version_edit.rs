//! Deltas between versions, as persisted in the MANIFEST.
//!
//! An edit is a sequence of tagged fields. Integers are little-endian,
//! strings and keys are prefixed with their `u32` length.
//!
//! ```text
//! ┌─────┬──────────────┐┌─────┬──────────────┐
//! │ tag │ field body   ││ tag │ field body   │ ...
//! └─────┴──────────────┘└─────┴──────────────┘
//! ```
//!
//! An edit applies to one column family (tag `COLUMN_FAMILY`, default 0).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use types::{InternalKey, Result, SequenceNumber, Status};

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;
const TAG_COLUMN_FAMILY: u32 = 200;
const TAG_COLUMN_FAMILY_ADD: u32 = 201;
const TAG_COLUMN_FAMILY_DROP: u32 = 202;
const TAG_MAX_COLUMN_FAMILY: u32 = 203;

/// One table file of a version.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub num_entries: u64,
    pub num_deletions: u64,
    /// Set while a compaction has this file as an input.
    pub(crate) being_compacted: AtomicBool,
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        Self {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            smallest_seqno: self.smallest_seqno,
            largest_seqno: self.largest_seqno,
            num_entries: self.num_entries,
            num_deletions: self.num_deletions,
            being_compacted: AtomicBool::new(false),
        }
    }
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        Self {
            number,
            file_size,
            smallest,
            largest,
            smallest_seqno: 0,
            largest_seqno: 0,
            num_entries: 0,
            num_deletions: 0,
            being_compacted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_being_compacted(&self) -> bool {
        self.being_compacted.load(Ordering::Acquire)
    }

    pub(crate) fn set_being_compacted(&self, v: bool) {
        self.being_compacted.store(v, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub max_column_family: Option<u32>,
    pub column_family: u32,
    /// Set when this edit creates the column family with this name.
    pub column_family_add: Option<String>,
    pub is_column_family_drop: bool,
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_column_family(cf: u32) -> Self {
        Self {
            column_family: cf,
            ..Self::default()
        }
    }

    pub fn add_file(&mut self, level: usize, meta: FileMetaData) {
        self.new_files.push((level, meta));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    #[must_use]
    pub fn has_file_changes(&self) -> bool {
        !self.new_files.is_empty() || !self.deleted_files.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        if let Some(name) = &self.comparator {
            put_u32(&mut buf, TAG_COMPARATOR);
            put_bytes(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_u32(&mut buf, TAG_LOG_NUMBER);
            put_u64(&mut buf, n);
        }
        if let Some(n) = self.prev_log_number {
            put_u32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_u64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_u32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_u64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_u32(&mut buf, TAG_LAST_SEQUENCE);
            put_u64(&mut buf, n);
        }
        if let Some(n) = self.max_column_family {
            put_u32(&mut buf, TAG_MAX_COLUMN_FAMILY);
            put_u32(&mut buf, n);
        }
        if self.column_family != 0 {
            put_u32(&mut buf, TAG_COLUMN_FAMILY);
            put_u32(&mut buf, self.column_family);
        }
        if let Some(name) = &self.column_family_add {
            put_u32(&mut buf, TAG_COLUMN_FAMILY_ADD);
            put_bytes(&mut buf, name.as_bytes());
        }
        if self.is_column_family_drop {
            put_u32(&mut buf, TAG_COLUMN_FAMILY_DROP);
        }
        for &(level, number) in &self.deleted_files {
            put_u32(&mut buf, TAG_DELETED_FILE);
            put_u32(&mut buf, level as u32);
            put_u64(&mut buf, number);
        }
        for (level, f) in &self.new_files {
            put_u32(&mut buf, TAG_NEW_FILE);
            put_u32(&mut buf, *level as u32);
            put_u64(&mut buf, f.number);
            put_u64(&mut buf, f.file_size);
            put_bytes(&mut buf, f.smallest.encode());
            put_bytes(&mut buf, f.largest.encode());
            put_u64(&mut buf, f.smallest_seqno);
            put_u64(&mut buf, f.largest_seqno);
            put_u64(&mut buf, f.num_entries);
            put_u64(&mut buf, f.num_deletions);
        }
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut r = Reader { buf: src };
        let mut edit = VersionEdit::new();
        while !r.buf.is_empty() {
            match r.u32()? {
                TAG_COMPARATOR => edit.comparator = Some(r.string()?),
                TAG_LOG_NUMBER => edit.log_number = Some(r.u64()?),
                TAG_PREV_LOG_NUMBER => edit.prev_log_number = Some(r.u64()?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(r.u64()?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(r.u64()?),
                TAG_MAX_COLUMN_FAMILY => edit.max_column_family = Some(r.u32()?),
                TAG_COLUMN_FAMILY => edit.column_family = r.u32()?,
                TAG_COLUMN_FAMILY_ADD => edit.column_family_add = Some(r.string()?),
                TAG_COLUMN_FAMILY_DROP => edit.is_column_family_drop = true,
                TAG_DELETED_FILE => {
                    let level = r.u32()? as usize;
                    let number = r.u64()?;
                    edit.deleted_files.insert((level, number));
                }
                TAG_NEW_FILE => {
                    let level = r.u32()? as usize;
                    let number = r.u64()?;
                    let file_size = r.u64()?;
                    let smallest = InternalKey::from_encoded(r.bytes()?.to_vec());
                    let largest = InternalKey::from_encoded(r.bytes()?.to_vec());
                    let mut f = FileMetaData::new(number, file_size, smallest, largest);
                    f.smallest_seqno = r.u64()?;
                    f.largest_seqno = r.u64()?;
                    f.num_entries = r.u64()?;
                    f.num_deletions = r.u64()?;
                    edit.new_files.push((level, f));
                }
                tag => {
                    return Err(Status::corruption(format!(
                        "unknown version edit tag {tag}"
                    )))
                }
            }
        }
        Ok(edit)
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    buf.extend_from_slice(&b);
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    buf.extend_from_slice(&b);
}

fn put_bytes(buf: &mut Vec<u8>, v: &[u8]) {
    put_u32(buf, v.len() as u32);
    buf.extend_from_slice(v);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Status::corruption("version edit truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?.to_vec())
            .map_err(|_| Status::corruption("version edit string is not UTF-8"))
    }
}
