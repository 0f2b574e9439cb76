//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk table files. A memtable flush or a compaction writes
//! one with [`TableBuilder`]; reads go through [`TableReader`]. Tables are
//! *write-once, read-many*: they are only ever replaced by compaction.
//!
//! ## File layout (format version 4)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS       internal key -> value, sorted               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK      bloom over user keys and/or prefixes        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ RANGE-DEL BLOCK   (start @ seq, RangeDeletion) -> end         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK       separator key -> data block handle          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ PROPERTIES BLOCK  property name -> value, sorted              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (72 bytes)                                             │
//! │ filter | range_del | index | properties handles (16 B each)   │
//! │ format_version (u32 LE) | magic (u32 LE) "SST4"               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block is followed by a CRC32 of its contents. All integers are
//! little-endian. A table is written to `<name>.tmp`, synced and renamed into
//! place, so a crash never leaves a half-written table under its final name.
//!
//! Readers share an [`LruCache`] of data blocks. Cached blocks are handed out
//! as `Arc`s, so eviction never invalidates a block still in use.

mod block;
mod cache;
mod format;
mod merge;
mod properties;
mod reader;
mod writer;

pub use block::{Block, BlockBuilder, BlockIter};
pub use cache::LruCache;
pub use format::{BlockHandle, Footer, FOOTER_LEN, FORMAT_VERSION, TABLE_MAGIC};
pub use merge::MergingIterator;
pub use properties::{decode_properties, encode_properties};
pub use reader::{BlockCache, ReadParams, TableIterator, TableReader, TableReaderOptions};
pub use writer::{
    TableBuildOutput, TableBuilder, TableBuilderOptions, DEFAULT_BLOCK_SIZE,
    DEFAULT_BLOOM_BITS_PER_KEY, FILTER_POLICY_NAME,
};

#[cfg(test)]
mod tests;
