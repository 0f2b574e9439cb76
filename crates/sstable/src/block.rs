//! Block encoding shared by data, index, range-deletion and properties blocks.
//!
//! ```text
//! [entry]* [offset: u32 LE]* [num_entries: u32 LE]
//!
//! entry := [key_len: u32 LE][val_len: u32 LE][key][value]
//! ```
//!
//! The offsets array lets a reader binary-search entries without decoding
//! the whole block.

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::sync::Arc;
use types::{InternalIterator, InternalKeyComparator, Result, Status};

const ENTRY_HEADER_LEN: usize = 8;

#[derive(Debug, Default)]
pub struct BlockBuilder {
    buf: Vec<u8>,
    offsets: Vec<u32>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys must be added in the order readers will search them.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        self.offsets.push(self.buf.len() as u32);
        let mut header = [0u8; ENTRY_HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], key.len() as u32);
        LittleEndian::write_u32(&mut header[4..8], value.len() as u32);
        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(value);
    }

    /// Size of the block if it were finished now.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + 4 * self.offsets.len() + 4
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the encoded block and resets the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buf);
        out.reserve(4 * self.offsets.len() + 4);
        for off in &self.offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }
        out.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        self.offsets.clear();
        out
    }
}

/// A decoded, validated block.
pub struct Block {
    data: Vec<u8>,
    offsets_start: usize,
    num_entries: usize,
}

impl Block {
    /// Validates the layout of `data`; every entry is bounds-checked once
    /// here so later accesses cannot go out of range.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Status::corruption("block too small"));
        }
        let num_entries = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
        let offsets_len = num_entries
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| Status::corruption("bad block entry count"))?;
        if offsets_len > data.len() {
            return Err(Status::corruption("bad block entry count"));
        }
        let offsets_start = data.len() - offsets_len;
        let block = Self {
            data,
            offsets_start,
            num_entries,
        };
        for i in 0..num_entries {
            let off = block.offset(i);
            if off + ENTRY_HEADER_LEN > offsets_start {
                return Err(Status::corruption("block entry offset out of range"));
            }
            let klen = LittleEndian::read_u32(&block.data[off..off + 4]) as usize;
            let vlen = LittleEndian::read_u32(&block.data[off + 4..off + 8]) as usize;
            if off + ENTRY_HEADER_LEN + klen + vlen > offsets_start {
                return Err(Status::corruption("block entry overruns block"));
            }
        }
        Ok(block)
    }

    fn offset(&self, i: usize) -> usize {
        let at = self.offsets_start + 4 * i;
        LittleEndian::read_u32(&self.data[at..at + 4]) as usize
    }

    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// `(key, value)` of entry `i`. `i` must be below `num_entries`.
    #[must_use]
    pub fn entry(&self, i: usize) -> (&[u8], &[u8]) {
        let off = self.offset(i);
        let klen = LittleEndian::read_u32(&self.data[off..off + 4]) as usize;
        let vlen = LittleEndian::read_u32(&self.data[off + 4..off + 8]) as usize;
        let k = off + ENTRY_HEADER_LEN;
        (&self.data[k..k + klen], &self.data[k + klen..k + klen + vlen])
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        (0..self.num_entries).map(move |i| self.entry(i))
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("size", &self.data.len())
            .field("entries", &self.num_entries)
            .finish()
    }
}

/// Cursor over a block whose keys are internal keys.
pub struct BlockIter {
    block: Arc<Block>,
    icmp: InternalKeyComparator,
    /// `num_entries` when invalid.
    pos: usize,
}

impl BlockIter {
    pub fn new(block: Arc<Block>, icmp: InternalKeyComparator) -> Self {
        let pos = block.num_entries();
        Self { block, icmp, pos }
    }

    fn invalidate(&mut self) {
        self.pos = self.block.num_entries();
    }

    /// Index of the first entry `>= target`.
    fn lower_bound(&self, target: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.block.num_entries());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.icmp.compare(self.block.entry(mid).0, target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Index one past the last entry `<= target`.
    fn upper_bound(&self, target: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.block.num_entries());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.icmp.compare(self.block.entry(mid).0, target) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.pos < self.block.num_entries()
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek_to_last(&mut self) {
        match self.block.num_entries() {
            0 => self.invalidate(),
            n => self.pos = n - 1,
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self.lower_bound(target);
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        match self.upper_bound(target) {
            0 => self.invalidate(),
            n => self.pos = n - 1,
        }
    }

    fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    fn prev(&mut self) {
        if self.pos == 0 || !self.valid() {
            self.invalidate();
        } else {
            self.pos -= 1;
        }
    }

    fn key(&self) -> &[u8] {
        if self.valid() {
            self.block.entry(self.pos).0
        } else {
            &[]
        }
    }

    fn value(&self) -> &[u8] {
        if self.valid() {
            self.block.entry(self.pos).1
        } else {
            &[]
        }
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
