//! Bulk loading: tables built outside the database with [`SstFileWriter`]
//! and linked in by `ingest_external_file`.
//!
//! External tables carry sequence number 0. An ingested table lands at the
//! deepest level where nothing overlaps its key range. When it overlaps
//! existing data (or a snapshot must not see it) it is rewritten with a
//! fresh global sequence number so it shadows everything older.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{ColumnFamilyOptions, CompactionStyle};
use parking_lot::MutexGuard;
use sstable::{ReadParams, TableBuilder, TableReader};
use tracing::{info, warn};
use types::listener::{
    ExternalFileIngestionInfo, FlushReason, TableFileCreationInfo, TableFileCreationReason,
};
use types::{
    default_env, extract_user_key, make_internal_key, parse_internal_key, InternalIterator,
    InternalKey, InternalKeyComparator, LookupKey, RangeTombstone, Result, SequenceNumber, Status,
    TableProperties, ValueType, MAX_SEQUENCE_NUMBER,
};

use crate::column_family::{CfState, ColumnFamilyData};
use crate::compaction::job::{table_builder_options, OutputFile};
use crate::db_impl::{DbInner, DbState};
use crate::filename::{sync_dir, table_file_path};
use crate::options::{FlushOptions, IngestExternalFileOptions, WriteOptions};
use crate::version::Version;
use crate::version_edit::{FileMetaData, VersionEdit};

/// Column family id recorded in tables built by [`SstFileWriter`].
pub(crate) const UNKNOWN_COLUMN_FAMILY_ID: u32 = u32::MAX;

/// Summary of a table written by [`SstFileWriter::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSstFileInfo {
    pub file_path: PathBuf,
    /// Smallest user key, counting range deletion starts.
    pub smallest_key: Vec<u8>,
    /// Largest user key, counting range deletion ends.
    pub largest_key: Vec<u8>,
    pub sequence_number: SequenceNumber,
    pub file_size: u64,
    pub num_entries: u64,
    pub num_range_del_entries: u64,
}

/// Builds a table for `ingest_external_file`.
///
/// Point keys must be added in strictly ascending order under the
/// comparator of `options`; range deletions may come at any time.
///
/// ```no_run
/// use config::ColumnFamilyOptions;
/// use engine::SstFileWriter;
///
/// let mut writer = SstFileWriter::new(ColumnFamilyOptions::default());
/// writer.open("/tmp/bulk.sst")?;
/// writer.put(b"a", b"1")?;
/// writer.put(b"b", b"2")?;
/// let info = writer.finish()?;
/// assert_eq!(info.num_entries, 2);
/// # Ok::<(), types::Status>(())
/// ```
pub struct SstFileWriter {
    options: ColumnFamilyOptions,
    icmp: InternalKeyComparator,
    builder: Option<TableBuilder>,
    path: PathBuf,
    last_key: Option<Vec<u8>>,
    smallest: Option<Vec<u8>>,
    largest: Option<Vec<u8>>,
}

impl SstFileWriter {
    pub fn new(options: ColumnFamilyOptions) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        Self {
            options,
            icmp,
            builder: None,
            path: PathBuf::new(),
            last_key: None,
            smallest: None,
            largest: None,
        }
    }

    /// Starts a new table at `path`, discarding any unfinished one.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if let Some(old) = self.builder.take() {
            old.abandon();
        }
        self.path = path.as_ref().to_path_buf();
        let opts = table_builder_options(
            UNKNOWN_COLUMN_FAMILY_ID,
            "",
            &self.icmp,
            &self.options,
            default_env().unix_time_secs(),
            None,
        );
        self.builder = Some(TableBuilder::create(&self.path, opts)?);
        self.last_key = None;
        self.smallest = None;
        self.largest = None;
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(key, value, ValueType::Value)
    }

    pub fn merge(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(key, value, ValueType::Merge)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.add(key, &[], ValueType::Deletion)
    }

    /// Deletes `[begin, end)`. An empty range is a no-op.
    pub fn delete_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        match ucmp.compare(begin, end) {
            Ordering::Greater => {
                return Err(Status::invalid_argument("end key comes before start key"))
            }
            Ordering::Equal => return Ok(()),
            Ordering::Less => {}
        }
        let builder = self.builder_mut()?;
        builder.add_range_tombstone(RangeTombstone::new(begin, end, 0));
        self.widen(begin);
        self.widen(end);
        Ok(())
    }

    /// Writes the table out. The writer can be reopened afterwards.
    pub fn finish(&mut self) -> Result<ExternalSstFileInfo> {
        let builder = self
            .builder
            .take()
            .ok_or_else(|| Status::invalid_argument("File is not opened"))?;
        if builder.is_empty() {
            builder.abandon();
            return Err(Status::invalid_argument("Cannot create sst file with no entries"));
        }
        let out = builder.finish()?;
        Ok(ExternalSstFileInfo {
            file_path: self.path.clone(),
            smallest_key: self.smallest.take().unwrap_or_default(),
            largest_key: self.largest.take().unwrap_or_default(),
            sequence_number: 0,
            file_size: out.file_size,
            num_entries: out.properties.num_entries,
            num_range_del_entries: out.properties.num_range_deletions,
        })
    }

    /// Bytes written so far.
    pub fn file_size(&self) -> u64 {
        self.builder.as_ref().map_or(0, TableBuilder::file_size)
    }

    fn builder_mut(&mut self) -> Result<&mut TableBuilder> {
        self.builder
            .as_mut()
            .ok_or_else(|| Status::invalid_argument("File is not opened"))
    }

    fn add(&mut self, key: &[u8], value: &[u8], value_type: ValueType) -> Result<()> {
        if let Some(last) = &self.last_key {
            if self.icmp.compare_user(key, last) != Ordering::Greater {
                return Err(Status::invalid_argument(
                    "Keys must be added in strict ascending order.",
                ));
            }
        }
        let ikey = make_internal_key(key, 0, value_type);
        self.builder_mut()?.add(&ikey, value)?;
        self.last_key = Some(key.to_vec());
        self.widen(key);
        Ok(())
    }

    fn widen(&mut self, key: &[u8]) {
        let ucmp = self.icmp.user_comparator();
        if self
            .smallest
            .as_deref()
            .map_or(true, |s| ucmp.compare(key, s) == Ordering::Less)
        {
            self.smallest = Some(key.to_vec());
        }
        if self
            .largest
            .as_deref()
            .map_or(true, |l| ucmp.compare(key, l) == Ordering::Greater)
        {
            self.largest = Some(key.to_vec());
        }
    }
}

impl Drop for SstFileWriter {
    fn drop(&mut self) {
        if let Some(builder) = self.builder.take() {
            builder.abandon();
        }
    }
}

/// An external table being ingested.
struct ExternalFile {
    external_path: PathBuf,
    reader: Arc<TableReader>,
    /// Internal key bounds, range deletions included.
    smallest: Vec<u8>,
    largest: Vec<u8>,
    file_size: u64,
    /// Copy or link inside the database directory.
    number: u64,
    path: PathBuf,
}

impl ExternalFile {
    fn smallest_user_key(&self) -> &[u8] {
        extract_user_key(&self.smallest)
    }

    fn largest_user_key(&self) -> &[u8] {
        extract_user_key(&self.largest)
    }

    fn properties(&self) -> &TableProperties {
        self.reader.properties()
    }
}

/// A table installed by an ingestion, for listeners.
struct Ingested {
    external_path: PathBuf,
    path: PathBuf,
    level: usize,
    file_size: u64,
    global_seqno: SequenceNumber,
    properties: TableProperties,
}

fn inspect_external_file(path: &Path, cf: &ColumnFamilyData, options: &ColumnFamilyOptions) -> Result<ExternalFile> {
    let reader = Arc::new(TableReader::open(path, cf.icmp.clone(), cf.reader_options())?);
    let props = reader.properties();
    let comparator = options.comparator.name();
    if props.comparator_name != comparator {
        return Err(Status::invalid_argument(format!(
            "{}: comparator {} does not match column family comparator {comparator}",
            path.display(),
            props.comparator_name
        )));
    }
    if props.largest_seqno != 0 {
        return Err(Status::corruption(format!(
            "{}: external file has non zero sequence number",
            path.display()
        )));
    }

    let Some((smallest, largest)) = table_key_range(&reader, &cf.icmp, false)? else {
        return Err(Status::invalid_argument(format!(
            "{}: file has no entries",
            path.display()
        )));
    };
    let file_size = reader.file_size();
    Ok(ExternalFile {
        external_path: path.to_path_buf(),
        reader,
        smallest,
        largest,
        file_size,
        number: 0,
        path: PathBuf::new(),
    })
}

/// Smallest and largest internal keys of a table, range deletions
/// included. `full_scan` reads (and so checksums) every record instead of
/// only the first and last.
pub(crate) fn table_key_range(
    reader: &Arc<TableReader>,
    icmp: &InternalKeyComparator,
    full_scan: bool,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Option<Vec<u8>> = None;
    let mut iter = reader.new_iterator(ReadParams {
        verify_checksums: true,
        fill_cache: false,
        ignore_range_deletions: false,
    });
    iter.seek_to_first();
    if iter.valid() {
        smallest = Some(iter.key().to_vec());
        if full_scan {
            while iter.valid() {
                parse_internal_key(iter.key())?;
                largest = Some(iter.key().to_vec());
                iter.next();
            }
        } else {
            iter.seek_to_last();
            if iter.valid() {
                largest = Some(iter.key().to_vec());
            }
        }
    }
    iter.status()?;
    for t in reader.range_tombstone_list() {
        let start = make_internal_key(&t.start, t.seq, ValueType::RangeDeletion);
        if smallest.as_ref().map_or(true, |s| icmp.compare(&start, s).is_lt()) {
            smallest = Some(start);
        }
        let end = make_internal_key(&t.end, MAX_SEQUENCE_NUMBER, ValueType::RangeDeletion);
        if largest.as_ref().map_or(true, |l| icmp.compare(&end, l).is_gt()) {
            largest = Some(end);
        }
    }
    Ok(smallest.zip(largest))
}

/// Hard-links `src` to `dst` when allowed, copying otherwise.
fn link_or_copy(src: &Path, dst: &Path, try_link: bool) -> Result<()> {
    if try_link {
        match std::fs::hard_link(src, dst) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(src = %src.display(), error = %e, "hard link failed, copying instead"),
        }
    }
    std::fs::copy(src, dst).map_err(|e| Status::from(e).context(src.display()))?;
    std::fs::File::open(dst)?.sync_all()?;
    Ok(())
}

/// Copies `file` into `dst` with every record moved to sequence `seq`.
fn rewrite_with_seqno(
    file: &ExternalFile,
    dst: &Path,
    number: u64,
    cf: &ColumnFamilyData,
    options: &ColumnFamilyOptions,
    seq: SequenceNumber,
) -> Result<OutputFile> {
    let opts = table_builder_options(
        cf.id,
        &cf.name,
        &cf.icmp,
        options,
        default_env().unix_time_secs(),
        None,
    );
    let mut builder = TableBuilder::create(dst, opts)?;
    let mut iter = file.reader.new_iterator(ReadParams {
        verify_checksums: true,
        fill_cache: false,
        ignore_range_deletions: false,
    });
    let copied = (|| {
        iter.seek_to_first();
        while iter.valid() {
            let parsed = parse_internal_key(iter.key())?;
            builder.add(
                &make_internal_key(parsed.user_key, seq, parsed.value_type),
                iter.value(),
            )?;
            iter.next();
        }
        iter.status()
    })();
    if let Err(e) = copied {
        builder.abandon();
        return Err(e);
    }
    for t in file.reader.range_tombstone_list() {
        builder.add_range_tombstone(RangeTombstone::new(t.start.clone(), t.end.clone(), seq));
    }
    let out = builder.finish()?;
    Ok(OutputFile::from_build(number, dst.to_path_buf(), out))
}

/// Whether any memtable of `cf` holds a key or range deletion inside
/// `[smallest, largest]`.
fn memtables_overlap(cf: &CfState, icmp: &InternalKeyComparator, smallest: &[u8], largest: &[u8]) -> bool {
    let seek = LookupKey::new(smallest, MAX_SEQUENCE_NUMBER);
    std::iter::once(&cf.mem)
        .chain(cf.imm.iter().map(|m| &m.mem))
        .any(|mem| {
            let mut iter = mem.iter();
            iter.seek(seek.internal_key());
            if iter.valid() && icmp.compare_user(extract_user_key(iter.key()), largest) != Ordering::Greater {
                return true;
            }
            mem.range_tombstone_list().iter().any(|t| {
                icmp.compare_user(&t.start, largest) != Ordering::Greater
                    && icmp.compare_user(&t.end, smallest) == Ordering::Greater
            })
        })
}

/// Deepest level such that it and every level above it are free of
/// `[smallest, largest]`, and whether anything in the version overlaps.
fn pick_level(version: &Version, style: CompactionStyle, smallest: &[u8], largest: &[u8]) -> (usize, bool) {
    let first_overlap =
        (0..version.num_levels()).find(|&l| version.overlap_in_level(l, smallest, largest));
    let level = match (style, first_overlap) {
        (CompactionStyle::Fifo, _) => 0,
        (_, Some(l)) => l.saturating_sub(1),
        (_, None) => version.num_levels() - 1,
    };
    (level, first_overlap.is_some())
}

impl DbInner {
    pub(crate) fn ingest_external_file(
        self: &Arc<Self>,
        cf: &Arc<ColumnFamilyData>,
        paths: &[PathBuf],
        options: &IngestExternalFileOptions,
    ) -> Result<()> {
        self.check_writable()?;
        if paths.is_empty() {
            return Err(Status::invalid_argument("The list of files is empty"));
        }
        let cf_options = cf.options();
        let mut files = paths
            .iter()
            .map(|p| inspect_external_file(p, cf, &cf_options))
            .collect::<Result<Vec<_>>>()?;
        files.sort_by(|a, b| cf.icmp.compare_user(a.smallest_user_key(), b.smallest_user_key()));
        for pair in files.windows(2) {
            if cf.icmp.compare_user(pair[0].largest_user_key(), pair[1].smallest_user_key())
                != Ordering::Less
            {
                return Err(Status::not_supported("Files have overlapping ranges"));
            }
        }

        let mut reserved = Vec::with_capacity(files.len());
        {
            let mut state = self.state.lock();
            for f in &mut files {
                f.number = state.reserve_output();
                f.path = table_file_path(&self.path, f.number);
                reserved.push(f.number);
            }
        }

        let copied = files
            .iter()
            .try_for_each(|f| link_or_copy(&f.external_path, &f.path, options.move_files))
            .and_then(|()| sync_dir(&self.path));
        let result = copied.and_then(|()| self.install_external_files(cf, &cf_options, &files, options, &mut reserved));

        let mut state = self.state.lock();
        for n in reserved {
            state.release_output(n);
        }
        let job_id = self.new_job_id();
        // Copies that were rewritten, or never installed, are unreferenced now.
        self.delete_obsolete_files(&mut state, job_id);
        let ingested = match result {
            Ok(ingested) => ingested,
            Err(e) => {
                warn!(cf = %cf.name, error = %e, "external file ingestion failed");
                return Err(e);
            }
        };
        self.enqueue_compaction_if_needed(&mut state, cf.id);
        self.maybe_schedule_work(&mut state);
        drop(state);

        for f in &ingested {
            info!(
                cf = %cf.name,
                external = %f.external_path.display(),
                level = f.level,
                global_seqno = f.global_seqno,
                "external file ingested"
            );
            let created = TableFileCreationInfo {
                db_name: self.path.clone(),
                cf_name: cf.name.clone(),
                file_path: f.path.clone(),
                file_size: f.file_size,
                job_id,
                table_properties: f.properties.clone(),
                reason: TableFileCreationReason::Ingestion,
                status: Ok(()),
            };
            self.notify(|l| l.on_table_file_created(&created));
            let info = ExternalFileIngestionInfo {
                cf_name: cf.name.clone(),
                external_file_path: f.external_path.clone(),
                internal_file_path: f.path.clone(),
                global_seqno: f.global_seqno,
                table_properties: f.properties.clone(),
            };
            self.notify(|l| l.on_external_file_ingested(&info));
            if options.move_files {
                if let Err(e) = std::fs::remove_file(&f.external_path) {
                    warn!(path = %f.external_path.display(), error = %e, "removing ingested file failed");
                }
            }
        }
        Ok(())
    }

    /// Stops writes, flushes overlapping memtables if allowed, then records
    /// the files in the MANIFEST.
    fn install_external_files(
        self: &Arc<Self>,
        cf: &Arc<ColumnFamilyData>,
        cf_options: &ColumnFamilyOptions,
        files: &[ExternalFile],
        options: &IngestExternalFileOptions,
        reserved: &mut Vec<u64>,
    ) -> Result<Vec<Ingested>> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = self.join_write_queue(&mut state, None, WriteOptions::default()) {
                result?;
            }
            let overlap = match state.versions.cf_state(cf.id) {
                Ok(cf_state) => files.iter().any(|f| {
                    memtables_overlap(cf_state, &cf.icmp, f.smallest_user_key(), f.largest_user_key())
                }),
                Err(e) => {
                    self.leave_write_queue(&mut state, 1);
                    return Err(e);
                }
            };
            if !overlap {
                break;
            }
            self.leave_write_queue(&mut state, 1);
            if !options.allow_blocking_flush {
                return Err(Status::invalid_argument("External file requires flush"));
            }
            let flush = FlushOptions {
                wait: true,
                allow_write_stall: true,
            };
            MutexGuard::unlocked(&mut state, || {
                self.flush_column_families(&[cf.id], &flush, FlushReason::ExternalFileIngestion)
            })?;
        }
        let result = self.install_locked(&mut state, cf, cf_options, files, options, reserved);
        self.leave_write_queue(&mut state, 1);
        result
    }

    fn install_locked(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        cf: &Arc<ColumnFamilyData>,
        cf_options: &ColumnFamilyOptions,
        files: &[ExternalFile],
        options: &IngestExternalFileOptions,
        reserved: &mut Vec<u64>,
    ) -> Result<Vec<Ingested>> {
        let (version, busy) = {
            let cf_state = state.versions.cf_state(cf.id)?;
            (Arc::clone(&cf_state.current), cf_state.running_compactions > 0)
        };
        let last_seq = self.latest_sequence();
        let global_seq = last_seq + 1;
        let hide_from_snapshots = options.snapshot_consistency && !self.snapshots.is_empty();

        let mut placements = Vec::with_capacity(files.len());
        for f in files {
            let (level, overlaps) = pick_level(
                &version,
                cf_options.compaction_style,
                f.smallest_user_key(),
                f.largest_user_key(),
            );
            // a running compaction may write outputs spanning the range
            let level = if busy { 0 } else { level };
            let needs_seqno = overlaps || hide_from_snapshots;
            if needs_seqno && !options.allow_global_seqno {
                return Err(Status::invalid_argument(
                    "External file requires global sequence number",
                ));
            }
            placements.push((level, needs_seqno));
        }

        let mut edit = VersionEdit::for_column_family(cf.id);
        let mut ingested = Vec::with_capacity(files.len());
        for (f, &(level, needs_seqno)) in files.iter().zip(&placements) {
            let (meta, path, properties, seq) = if needs_seqno {
                let number = state.reserve_output();
                reserved.push(number);
                let dst = table_file_path(&self.path, number);
                let out = MutexGuard::unlocked(state, || {
                    rewrite_with_seqno(f, &dst, number, cf, cf_options, global_seq)
                })?;
                (out.meta, out.path, out.properties, global_seq)
            } else {
                let props = f.properties();
                let mut meta = FileMetaData::new(
                    f.number,
                    f.file_size,
                    InternalKey::from_encoded(f.smallest.clone()),
                    InternalKey::from_encoded(f.largest.clone()),
                );
                meta.num_entries = props.num_entries;
                meta.num_deletions = props.num_deletions;
                (meta, f.path.clone(), props.clone(), 0)
            };
            ingested.push(Ingested {
                external_path: f.external_path.clone(),
                path,
                level,
                file_size: meta.file_size,
                global_seqno: seq,
                properties,
            });
            edit.add_file(level, meta);
        }

        let consumed = placements.iter().any(|&(_, needs)| needs);
        let new_last = if consumed { global_seq } else { last_seq };
        state.versions.log_and_apply(vec![edit], new_last)?;
        if consumed {
            self.last_sequence
                .store(global_seq, std::sync::atomic::Ordering::Release);
        }
        if let Some(cf_state) = state.versions.cf_mut(cf.id) {
            cf_state.stats.ingested_files += files.len() as u64;
        }
        Ok(ingested)
    }
}
