//! # Engine - RiptideKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`], and
//! [`sstable`] crates into a column-family aware LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client threads
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────────┐
//! │                            DB                             │
//! │                                                           │
//! │ write.rs → writer queue → WAL append → memtable inserts   │
//! │              |   (leader commits the whole group)         │
//! │              |                                            │
//! │              |  (memtable full?) seal → immutable list    │
//! │              v                                            │
//! │  scheduler ── flush.rs ──→ L0 table ──→ MANIFEST edit     │
//! │      |                                                    │
//! │      └────── compaction/ ─→ level / universal / FIFO      │
//! │                                                           │
//! │ read.rs, db_iter.rs → pinned super version:               │
//! │     memtable → immutables → L0 (newest first) → L1..Ln    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module            | Purpose                                                   |
//! |-------------------|-----------------------------------------------------------|
//! | [`db`]            | `DB` handle: the public API                               |
//! | [`db_impl`]       | Shared state, background error slot, obsolete file sweep  |
//! | [`open`]          | Open/recovery, read-only and secondary modes, close, destroy |
//! | [`write`]         | Group commit, write stalls, memtable switching            |
//! | [`read`]          | `get`, `multi_get`, `key_may_exist`                       |
//! | [`db_iter`]       | User-facing iterator over all sources                     |
//! | [`flush`]         | Memtable → level-0 table jobs                             |
//! | [`compaction`]    | Picking, running and installing compactions               |
//! | [`version`]       | Immutable per-family file layout                          |
//! | [`version_edit`]  | MANIFEST records                                          |
//! | [`version_set`]   | MANIFEST writer/reader, families, live versions           |
//! | [`column_family`] | Family handles, per-family state, super versions          |
//! | [`admin`]         | Family lifecycle, dynamic options, background control    |
//! | [`properties`]    | `rocksdb.*` introspection                                 |
//! | [`metadata`]      | File-level views, live files, WAL listing and tailing     |
//! | [`ingest`]        | `SstFileWriter` and external file ingestion               |
//! | [`repair`]        | MANIFEST reconstruction                                   |
//!
//! ## Levels
//!
//! ```text
//! ┌────────────────────────────┐  ← freshest, checked first
//! │ active memtable            │
//! ├────────────────────────────┤
//! │ immutable memtables        │
//! ├────────────────────────────┤  ← from flushes (may overlap)
//! │ L0 tables                  │
//! ├────────────────────────────┤  ← from compaction (no overlap per level)
//! │ L1 .. Ln tables            │
//! └────────────────────────────┘
//! ```
//!
//! ## Crash Safety
//!
//! Every batch is appended to the WAL **before** it reaches a memtable. A
//! WAL is deleted only after every family holding its data has flushed and
//! the MANIFEST records a newer log number. Tables are complete before the
//! MANIFEST names them, and `CURRENT` is replaced by rename.

mod admin;
mod column_family;
mod compaction;
mod db;
mod db_impl;
mod db_iter;
mod filename;
mod flush;
mod ingest;
mod lock;
mod metadata;
mod open;
mod options;
mod properties;
mod read;
mod repair;
mod scheduler;
mod snapshot;
mod table_cache;
mod version;
mod version_edit;
mod version_set;
mod write;

pub use column_family::ColumnFamilyHandle;
pub use db::DB;
pub use db_iter::{DbIterator, Entries};
pub use ingest::{ExternalSstFileInfo, SstFileWriter};
pub use metadata::{
    BatchResult, ColumnFamilyMetaData, LevelMetaData, LiveFileMetaData, LiveFiles, LogFile,
    SstFileMetaData,
};
pub use options::{
    BottommostLevelCompaction, CompactRangeOptions, FlushOptions, IngestExternalFileOptions,
    ReadOptions, WriteOptions,
};
pub use properties::PROPERTY_NAMES;
pub use snapshot::Snapshot;

#[cfg(test)]
mod tests;
