//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the storage engine.
//!
//! Every [`WriteBatch`] is serialized and appended to the active log file
//! **before** it is applied to the memtables. On restart the logs are replayed
//! to rebuild whatever had not yet been flushed, so no acknowledged write is
//! lost. The same framing carries MANIFEST edits.
//!
//! ## Frame Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][payload ...]
//! ```
//!
//! `record_len` includes the 4-byte CRC but **not** itself. The CRC covers the
//! payload only.
//!
//! ## Recovery modes
//!
//! How a damaged log is treated on replay is governed by [`WalRecoveryMode`]:
//!
//! | Mode                            | torn tail | bad record mid-file       |
//! |---------------------------------|-----------|---------------------------|
//! | `TolerateCorruptedTailRecords`  | EOF       | `Corruption`              |
//! | `AbsoluteConsistency`           | `Corruption` | `Corruption`           |
//! | `PointInTimeRecovery`           | EOF       | stop here, skip later logs |
//! | `SkipAnyCorruptedRecords`       | EOF       | skip record, keep going   |
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalReader, WalRecoveryMode, WalWriter, WriteBatch};
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"hello", b"world");
//! batch.set_sequence(1);
//!
//! let mut w = WalWriter::create("000001.log", true).unwrap();
//! w.append(batch.data()).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("000001.log", WalRecoveryMode::default()).unwrap();
//! r.replay(|payload| {
//!     let batch = WriteBatch::from_data(payload.to_vec())?;
//!     println!("{:?}", batch);
//!     Ok(())
//! })
//! .unwrap();
//! ```

pub mod batch;

pub use batch::{Handler, WriteBatch, DEFAULT_COLUMN_FAMILY_ID};

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use types::{Result, Status};

/// Frame header: record length plus CRC.
pub const FRAME_HEADER_LEN: usize = 8;

/// Lengths above this are treated as a corrupted header.
pub const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

/// Policy for damaged log records found during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalRecoveryMode {
    /// A partially written final record is ignored; anything else fails.
    #[default]
    TolerateCorruptedTailRecords,
    /// Any damage, including a torn tail, fails recovery.
    AbsoluteConsistency,
    /// Replay stops at the first damaged record and later logs are skipped.
    PointInTimeRecovery,
    /// Damaged records are skipped and replay continues.
    SkipAnyCorruptedRecords,
}

impl WalRecoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalRecoveryMode::TolerateCorruptedTailRecords => "kTolerateCorruptedTailRecords",
            WalRecoveryMode::AbsoluteConsistency => "kAbsoluteConsistency",
            WalRecoveryMode::PointInTimeRecovery => "kPointInTimeRecovery",
            WalRecoveryMode::SkipAnyCorruptedRecords => "kSkipAnyCorruptedRecords",
        }
    }

    /// Accepts the `k`-prefixed names and their numeric forms `0..=3`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "kTolerateCorruptedTailRecords" | "0" => Some(Self::TolerateCorruptedTailRecords),
            "kAbsoluteConsistency" | "1" => Some(Self::AbsoluteConsistency),
            "kPointInTimeRecovery" | "2" => Some(Self::PointInTimeRecovery),
            "kSkipAnyCorruptedRecords" | "3" => Some(Self::SkipAnyCorruptedRecords),
            _ => None,
        }
    }
}

impl fmt::Display for WalRecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only log writer.
///
/// Each payload is framed, CRC-checksummed and written to the file in a
/// single `write_all` call. When `sync` is `true`, every append is followed
/// by `sync_all()` so the record is durable before the call returns.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    sync: bool,
    size: u64,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a log file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| Status::from(e).context(path.display().to_string()))?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path,
            sync,
            size,
            buf: Vec::with_capacity(256),
        })
    }

    /// Frames `payload` and appends it.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let record_len = payload.len() as u64 + 4;
        if record_len > MAX_RECORD_SIZE as u64 {
            return Err(Status::invalid_argument(format!(
                "log record too large ({} bytes)",
                payload.len()
            )));
        }

        let mut hasher = Crc32::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        self.buf.clear();
        self.buf.resize(FRAME_HEADER_LEN, 0);
        LittleEndian::write_u32(&mut self.buf[0..4], record_len as u32);
        LittleEndian::write_u32(&mut self.buf[4..8], crc);
        self.buf.extend_from_slice(payload);

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        self.size += self.buf.len() as u64;

        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Forces written records to stable storage.
    ///
    /// Useful when `sync` is `false` and the caller wants durability at a
    /// specific point, e.g. a `sync = true` write in an otherwise unsynced log.
    pub fn sync_to_disk(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Bytes in the file, including frames written before this writer opened it.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalWriter")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("size", &self.size)
            .finish()
    }
}

/// Sequential log reader.
///
/// Generic over any `Read` implementor, so it works on real files and on
/// in-memory buffers in tests.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    mode: WalRecoveryMode,
    offset: u64,
    records: u64,
    dropped_bytes: u64,
    corruption_seen: bool,
    stopped: bool,
}

impl WalReader<File> {
    /// Opens an existing log file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P, mode: WalRecoveryMode) -> Result<WalReader<File>> {
        let f = File::open(path.as_ref())
            .map_err(|e| Status::from(e).context(path.as_ref().display().to_string()))?;
        Ok(WalReader::from_reader(f, mode))
    }
}

enum Frame {
    Record(Vec<u8>),
    Eof,
    /// Ran out of bytes mid-frame.
    Truncated,
    /// Frame fully read but the CRC did not match.
    BadChecksum,
    /// Header length is impossible, so the stream cannot be resynchronized.
    BadLength(u32),
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R, mode: WalRecoveryMode) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            mode,
            offset: 0,
            records: 0,
            dropped_bytes: 0,
            corruption_seen: false,
            stopped: false,
        }
    }

    /// Number of intact records returned so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Bytes skipped or ignored because of damage.
    #[must_use]
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Whether replay stopped at or skipped over damaged data. Under
    /// `PointInTimeRecovery` the caller must not replay later logs once this
    /// is set.
    #[must_use]
    pub fn corruption_seen(&self) -> bool {
        self.corruption_seen
    }

    /// Fills `buf` as far as the stream allows; returns the byte count.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.rdr.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let n = self.read_full(&mut header)?;
        if n == 0 {
            return Ok(Frame::Eof);
        }
        if n < 4 {
            self.dropped_bytes += n as u64;
            return Ok(Frame::Truncated);
        }
        let record_len = LittleEndian::read_u32(&header[0..4]);
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            self.dropped_bytes += n as u64;
            return Ok(Frame::BadLength(record_len));
        }
        if n < FRAME_HEADER_LEN {
            self.dropped_bytes += n as u64;
            return Ok(Frame::Truncated);
        }
        let crc = LittleEndian::read_u32(&header[4..8]);

        let body_len = (record_len - 4) as usize;
        let mut body = vec![0u8; body_len];
        let got = self.read_full(&mut body)?;
        if got < body_len {
            self.dropped_bytes += (FRAME_HEADER_LEN + got) as u64;
            return Ok(Frame::Truncated);
        }

        let mut hasher = Crc32::new();
        hasher.update(&body);
        if hasher.finalize() != crc {
            self.dropped_bytes += (FRAME_HEADER_LEN + body_len) as u64;
            return Ok(Frame::BadChecksum);
        }
        Ok(Frame::Record(body))
    }

    /// Returns the next intact record, `None` at the (possibly tolerated)
    /// end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.stopped {
            return Ok(None);
        }
        loop {
            let start = self.offset;
            match self.read_frame()? {
                Frame::Record(body) => {
                    self.records += 1;
                    return Ok(Some(body));
                }
                Frame::Eof => return Ok(None),
                Frame::Truncated => {
                    if self.mode == WalRecoveryMode::AbsoluteConsistency {
                        return Err(Status::corruption(format!(
                            "truncated log record at offset {start}"
                        )));
                    }
                    warn!(offset = start, "ignoring truncated record at log tail");
                    self.stopped = true;
                    return Ok(None);
                }
                Frame::BadChecksum => match self.mode {
                    WalRecoveryMode::SkipAnyCorruptedRecords => {
                        warn!(offset = start, "skipping log record with bad checksum");
                        self.corruption_seen = true;
                        continue;
                    }
                    WalRecoveryMode::PointInTimeRecovery => {
                        warn!(offset = start, "log checksum mismatch, stopping replay");
                        self.corruption_seen = true;
                        self.stopped = true;
                        return Ok(None);
                    }
                    _ => {
                        return Err(Status::corruption(format!(
                            "log record checksum mismatch at offset {start}"
                        )))
                    }
                },
                Frame::BadLength(len) => match self.mode {
                    WalRecoveryMode::SkipAnyCorruptedRecords
                    | WalRecoveryMode::PointInTimeRecovery => {
                        warn!(offset = start, len, "bad log record length, stopping replay");
                        self.corruption_seen = true;
                        self.stopped = true;
                        return Ok(None);
                    }
                    _ => {
                        return Err(Status::corruption(format!(
                            "bad log record length {len} at offset {start}"
                        )))
                    }
                },
            }
        }
    }

    /// Replays every intact record, calling `apply` for each one. An error
    /// from `apply` aborts the replay.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        while let Some(record) = self.read_record()? {
            apply(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
