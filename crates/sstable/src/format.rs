//! Table file constants, block handles and the footer.
//!
//! ## Footer (72 bytes, always last)
//!
//! ```text
//! [filter: BlockHandle][range_del: BlockHandle][index: BlockHandle]
//! [properties: BlockHandle][format_version: u32 LE][magic: u32 LE = "SST4"]
//! ```
//!
//! A `BlockHandle` is `[offset: u64 LE][size: u64 LE]`. `size` counts the
//! block contents only; every block on disk is followed by a 4-byte CRC32
//! trailer over those contents. A zero-sized handle means "no such block".
//!
//! The reader checks the magic (last 4 bytes) before trusting anything else.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use types::{Result, Status};

/// Magic number identifying table files (ASCII "SST4").
pub const TABLE_MAGIC: u32 = 0x5353_5434;

pub const FORMAT_VERSION: u32 = 4;

/// Encoded size of a [`BlockHandle`].
pub const BLOCK_HANDLE_LEN: usize = 16;

/// Size of the footer in bytes: 4 handles + `format_version` + magic.
pub const FOOTER_LEN: usize = 4 * BLOCK_HANDLE_LEN + 4 + 4;

/// CRC32 trailer after each block.
pub const BLOCK_TRAILER_LEN: usize = 4;

/// Location of a block inside a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.size == 0
    }

    pub fn encode_to(&self, out: &mut Vec<u8>) {
        let mut raw = [0u8; BLOCK_HANDLE_LEN];
        LittleEndian::write_u64(&mut raw[0..8], self.offset);
        LittleEndian::write_u64(&mut raw[8..16], self.size);
        out.extend_from_slice(&raw);
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_HANDLE_LEN);
        self.encode_to(&mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HANDLE_LEN {
            return Err(Status::corruption("bad block handle"));
        }
        Ok(Self {
            offset: LittleEndian::read_u64(&data[0..8]),
            size: LittleEndian::read_u64(&data[8..16]),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub filter: BlockHandle,
    pub range_del: BlockHandle,
    pub index: BlockHandle,
    pub properties: BlockHandle,
    pub format_version: u32,
}

impl Footer {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FOOTER_LEN);
        self.filter.encode_to(&mut out);
        self.range_del.encode_to(&mut out);
        self.index.encode_to(&mut out);
        self.properties.encode_to(&mut out);
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        out
    }

    /// Decodes the last [`FOOTER_LEN`] bytes of a file and validates each
    /// handle against `file_size`.
    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        if data.len() != FOOTER_LEN {
            return Err(Status::corruption("file is too short to be a table"));
        }
        let magic = LittleEndian::read_u32(&data[FOOTER_LEN - 4..]);
        if magic != TABLE_MAGIC {
            return Err(Status::corruption(format!(
                "bad table magic number {magic:#010x}"
            )));
        }
        let handle = |i: usize| BlockHandle::decode(&data[i * BLOCK_HANDLE_LEN..]);
        let footer = Self {
            filter: handle(0)?,
            range_del: handle(1)?,
            index: handle(2)?,
            properties: handle(3)?,
            format_version: LittleEndian::read_u32(&data[4 * BLOCK_HANDLE_LEN..]),
        };
        let data_end = file_size.saturating_sub(FOOTER_LEN as u64);
        for h in [footer.filter, footer.range_del, footer.index, footer.properties] {
            if !h.is_null() && h.offset + h.size + BLOCK_TRAILER_LEN as u64 > data_end {
                return Err(Status::corruption("block handle points past end of table"));
            }
        }
        if footer.index.is_null() {
            return Err(Status::corruption("table has no index block"));
        }
        Ok(footer)
    }
}

#[must_use]
pub fn block_checksum(contents: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(contents);
    hasher.finalize()
}

/// Checks the CRC32 trailer of `raw`, which holds the block contents
/// followed by their checksum.
pub fn verify_block(raw: &[u8], handle: &BlockHandle) -> Result<()> {
    let size = handle.size as usize;
    if raw.len() != size + BLOCK_TRAILER_LEN {
        return Err(Status::corruption("truncated block read"));
    }
    let expected = LittleEndian::read_u32(&raw[size..]);
    let actual = block_checksum(&raw[..size]);
    if expected != actual {
        return Err(Status::corruption(format!(
            "block checksum mismatch at offset {}: expected {expected:#010x}, got {actual:#010x}",
            handle.offset
        )));
    }
    Ok(())
}
