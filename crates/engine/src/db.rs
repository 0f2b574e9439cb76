//! The public database handle.
//!
//! [`DB`] is a thin layer over the shared [`DbInner`]: it resolves column
//! family handles, builds single-operation batches and forwards everything
//! else. Dropping a `DB` closes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, Options, DEFAULT_COLUMN_FAMILY_NAME};
use tracing::warn;
use types::listener::FlushReason;
use types::{Result, SequenceNumber, Status};
use wal::WriteBatch;

use crate::column_family::ColumnFamilyHandle;
use crate::db_impl::DbInner;
use crate::db_iter::DbIterator;
use crate::metadata::{BatchResult, ColumnFamilyMetaData, LiveFileMetaData, LiveFiles, LogFile};
use crate::options::{
    CompactRangeOptions, FlushOptions, IngestExternalFileOptions, ReadOptions, WriteOptions,
};
use crate::snapshot::Snapshot;

/// An open database.
///
/// All methods take `&self`; a `DB` can be shared between threads behind
/// an `Arc`. Methods without a column family argument act on the default
/// family.
///
/// ```no_run
/// use config::Options;
/// use engine::DB;
///
/// let db = DB::open(&Options::new().create_if_missing(true), "/tmp/demo-db")?;
/// db.put(b"a", b"1")?;
/// assert_eq!(db.get(b"a")?, Some(b"1".to_vec()));
/// # Ok::<(), types::Status>(())
/// ```
pub struct DB {
    inner: Arc<DbInner>,
    default_cf: ColumnFamilyHandle,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .field("last_sequence", &self.inner.latest_sequence())
            .finish()
    }
}

fn default_descriptor(options: &Options) -> Vec<ColumnFamilyDescriptor> {
    vec![ColumnFamilyDescriptor::new(
        DEFAULT_COLUMN_FAMILY_NAME,
        options.map_cf_options(),
    )]
}

impl DB {
    fn from_parts(inner: Arc<DbInner>, handles: &[ColumnFamilyHandle]) -> Result<Self> {
        let default_cf = handles
            .iter()
            .find(|h| h.name() == DEFAULT_COLUMN_FAMILY_NAME)
            .cloned()
            .ok_or_else(|| Status::invalid_argument("Default column family not specified"))?;
        Ok(Self { inner, default_cf })
    }

    /// Opens the database at `path` with only the default column family.
    /// Fails if the database holds other families.
    pub fn open(options: &Options, path: impl AsRef<Path>) -> Result<Self> {
        let (db, _) = Self::open_cf(options.map_db_options(), path, default_descriptor(options))?;
        Ok(db)
    }

    /// Opens the database with every family it holds. Handles come back in
    /// the order of `descriptors`, which must name the default family.
    pub fn open_cf(
        options: DbOptions,
        path: impl AsRef<Path>,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        let (inner, handles) = DbInner::open(options, path.as_ref(), descriptors)?;
        Ok((Self::from_parts(inner, &handles)?, handles))
    }

    /// Opens without writing anything to the directory. With
    /// `error_if_wal_file_exists`, non-empty WALs make the open fail.
    pub fn open_read_only(
        options: &Options,
        path: impl AsRef<Path>,
        error_if_wal_file_exists: bool,
    ) -> Result<Self> {
        let (db, _) = Self::open_read_only_cf(
            options.map_db_options(),
            path,
            default_descriptor(options),
            error_if_wal_file_exists,
        )?;
        Ok(db)
    }

    pub fn open_read_only_cf(
        options: DbOptions,
        path: impl AsRef<Path>,
        descriptors: Vec<ColumnFamilyDescriptor>,
        error_if_wal_file_exists: bool,
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        let (inner, handles) =
            DbInner::open_read_only(options, path.as_ref(), descriptors, error_if_wal_file_exists)?;
        Ok((Self::from_parts(inner, &handles)?, handles))
    }

    /// Opens a read-only follower of the database at `primary`. Call
    /// [`try_catch_up_with_primary`](Self::try_catch_up_with_primary) to
    /// see newer writes.
    pub fn open_as_secondary(
        options: &Options,
        primary: impl AsRef<Path>,
        secondary: impl AsRef<Path>,
    ) -> Result<Self> {
        let (db, _) = Self::open_as_secondary_cf(
            options.map_db_options(),
            primary,
            secondary,
            default_descriptor(options),
        )?;
        Ok(db)
    }

    pub fn open_as_secondary_cf(
        options: DbOptions,
        primary: impl AsRef<Path>,
        secondary: impl AsRef<Path>,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        let (inner, handles) = DbInner::open_as_secondary(
            options,
            primary.as_ref(),
            secondary.as_ref(),
            descriptors,
        )?;
        Ok((Self::from_parts(inner, &handles)?, handles))
    }

    pub fn try_catch_up_with_primary(&self) -> Result<()> {
        self.inner.try_catch_up_with_primary()
    }

    /// Flushes writes that skipped the WAL, stops background work and
    /// releases the directory lock. Every later call on this handle fails
    /// or is a no-op.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Deletes the database at `path`.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        crate::open::destroy(path.as_ref())
    }

    /// Rebuilds the MANIFEST of a damaged database from its tables and WALs.
    pub fn repair(options: &Options, path: impl AsRef<Path>) -> Result<()> {
        let cf = options.map_cf_options();
        crate::repair::repair(
            &options.map_db_options(),
            path.as_ref(),
            &default_descriptor(options),
            &cf,
        )
    }

    /// Like [`repair`](Self::repair), with options for known families.
    /// Families found only in table properties get `unknown_cf_options`.
    pub fn repair_cf(
        options: &DbOptions,
        path: impl AsRef<Path>,
        descriptors: &[ColumnFamilyDescriptor],
        unknown_cf_options: &ColumnFamilyOptions,
    ) -> Result<()> {
        crate::repair::repair(options, path.as_ref(), descriptors, unknown_cf_options)
    }

    /// Names of the families recorded in the MANIFEST at `path`.
    pub fn list_column_families(path: impl AsRef<Path>) -> Result<Vec<String>> {
        crate::open::list_column_families(path.as_ref())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    // column families

    #[must_use]
    pub fn default_column_family(&self) -> &ColumnFamilyHandle {
        &self.default_cf
    }

    /// Handle of the live family called `name`.
    #[must_use]
    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        let state = self.inner.state.lock();
        state
            .versions
            .cf_by_name(name)
            .map(|cf| ColumnFamilyHandle::new(Arc::clone(&cf.data)))
    }

    pub fn create_column_family(
        &self,
        options: ColumnFamilyOptions,
        name: &str,
    ) -> Result<ColumnFamilyHandle> {
        self.inner.create_column_family(name, options)
    }

    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.inner.drop_column_family(&cf.data)
    }

    /// Releases a handle. The family itself is unaffected unless it was
    /// dropped, in which case its last files may now be deleted.
    pub fn destroy_column_family_handle(&self, cf: ColumnFamilyHandle) {
        self.inner
            .notify(|l| l.on_column_family_handle_deletion_started(cf.name()));
        drop(cf);
    }

    // writes

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.put_cf(&WriteOptions::default(), &self.default_cf, key, value)
    }

    pub fn put_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.live()?.id, key, value);
        self.write(options, batch)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.delete_cf(&WriteOptions::default(), &self.default_cf, key)
    }

    pub fn delete_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.live()?.id, key);
        self.write(options, batch)
    }

    /// Removes a key written at most once since its last deletion. Mixing
    /// it with overwrites or merges of the same key gives undefined results.
    pub fn single_delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.single_delete_cf(&WriteOptions::default(), &self.default_cf, key)
    }

    pub fn single_delete_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.single_delete_cf(cf.live()?.id, key);
        self.write(options, batch)
    }

    /// Deletes every key in `[begin, end)`.
    pub fn delete_range(&self, begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        self.delete_range_cf(&WriteOptions::default(), &self.default_cf, begin, end)
    }

    pub fn delete_range_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        begin: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<()> {
        let data = cf.live()?;
        if data.icmp.compare_user(begin.as_ref(), end.as_ref()) == std::cmp::Ordering::Greater {
            return Err(Status::invalid_argument("delete_range: begin is after end"));
        }
        let mut batch = WriteBatch::new();
        batch.delete_range_cf(data.id, begin, end);
        self.write(options, batch)
    }

    pub fn merge(&self, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) -> Result<()> {
        self.merge_cf(&WriteOptions::default(), &self.default_cf, key, operand)
    }

    pub fn merge_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
        operand: impl AsRef<[u8]>,
    ) -> Result<()> {
        let data = cf.live()?;
        if data.options().merge_operator.is_none() {
            return Err(Status::not_supported(format!(
                "merge requires a merge operator on column family {}",
                data.name
            )));
        }
        let mut batch = WriteBatch::new();
        batch.merge_cf(data.id, key, operand);
        self.write(options, batch)
    }

    /// Applies every record of `batch` atomically.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.write_impl(options, batch)
    }

    // reads

    /// Newest value of `key`; `None` if absent or deleted.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_cf(&ReadOptions::default(), &self.default_cf, key)
    }

    pub fn get_opt(&self, options: &ReadOptions<'_>, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_cf(options, &self.default_cf, key)
    }

    pub fn get_cf(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        self.inner.get(options, cf.live()?, key.as_ref())
    }

    /// Reads several keys, possibly from different families, at one
    /// sequence number.
    pub fn multi_get(
        &self,
        options: &ReadOptions<'_>,
        keys: &[(&ColumnFamilyHandle, &[u8])],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let mut resolved = Vec::with_capacity(keys.len());
        let mut failed: Vec<Option<Status>> = Vec::with_capacity(keys.len());
        for (cf, key) in keys {
            match cf.live() {
                Ok(data) => {
                    resolved.push((data, *key));
                    failed.push(None);
                }
                Err(e) => failed.push(Some(e)),
            }
        }
        let mut results = self.inner.multi_get(options, &resolved).into_iter();
        failed
            .into_iter()
            .map(|f| match f {
                Some(e) => Err(e),
                None => results
                    .next()
                    .unwrap_or_else(|| Err(Status::corruption("multi_get lost a result"))),
            })
            .collect()
    }

    /// `false` means `key` is certainly absent. The value comes back when
    /// a memtable answered the probe.
    pub fn key_may_exist(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<(bool, Option<Vec<u8>>)> {
        self.inner.key_may_exist(options, cf.live()?, key.as_ref())
    }

    /// Iterator over the default family, unpositioned.
    pub fn iterator(&self, options: &ReadOptions<'_>) -> Result<DbIterator> {
        self.new_iterator(options, &self.default_cf)
    }

    pub fn new_iterator(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
    ) -> Result<DbIterator> {
        self.inner.new_iterator(options, cf.live()?)
    }

    /// One iterator per family, all at the same sequence number.
    pub fn new_iterators(
        &self,
        options: &ReadOptions<'_>,
        cfs: &[&ColumnFamilyHandle],
    ) -> Result<Vec<DbIterator>> {
        let snapshot;
        let mut pinned: ReadOptions<'_> = options.clone();
        if options.snapshot.is_none() {
            snapshot = self.get_snapshot();
            pinned = pinned.snapshot(&snapshot);
        }
        cfs.iter().map(|cf| self.new_iterator(&pinned, cf)).collect()
    }

    // snapshots

    /// Pins the current sequence number. Dropping the snapshot releases it.
    #[must_use]
    pub fn get_snapshot(&self) -> Snapshot {
        let now = self.inner.env.unix_time_secs();
        self.inner.snapshots.acquire(self.inner.latest_sequence(), now)
    }

    #[must_use]
    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.inner.latest_sequence()
    }

    // maintenance

    /// Flushes the default family's memtables and waits for the result.
    pub fn flush(&self) -> Result<()> {
        self.flush_cf(&FlushOptions::default(), &self.default_cf)
    }

    pub fn flush_cf(&self, options: &FlushOptions, cf: &ColumnFamilyHandle) -> Result<()> {
        let id = cf.live()?.id;
        self.inner
            .flush_column_families(&[id], options, FlushReason::ManualFlush)
    }

    /// Flushes several families as one job set.
    pub fn flush_cfs(&self, options: &FlushOptions, cfs: &[&ColumnFamilyHandle]) -> Result<()> {
        let ids = cfs
            .iter()
            .map(|cf| cf.live().map(|d| d.id))
            .collect::<Result<Vec<u32>>>()?;
        self.inner
            .flush_column_families(&ids, options, FlushReason::ManualFlush)
    }

    /// Makes every WAL record written so far durable. Appends already reach
    /// the OS, so without `sync` there is nothing to do.
    pub fn flush_wal(&self, sync: bool) -> Result<()> {
        self.inner.check_writable()?;
        if !sync {
            return Ok(());
        }
        match self.inner.log.lock().as_mut() {
            Some(writer) => writer.sync_to_disk(),
            None => Ok(()),
        }
    }

    /// Compacts every file overlapping `[begin, end]` (either bound open
    /// when `None`) and waits for it.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.compact_range_cf(&CompactRangeOptions::default(), &self.default_cf, begin, end)
    }

    pub fn compact_range_cf(
        &self,
        options: &CompactRangeOptions,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.inner.compact_range(cf.live()?, options, begin, end)
    }

    pub fn pause_background_work(&self) -> Result<()> {
        self.inner.pause_background_work()
    }

    pub fn continue_background_work(&self) -> Result<()> {
        self.inner.continue_background_work()
    }

    /// Stops background work for good. With `wait`, returns only once
    /// running jobs have finished.
    pub fn cancel_all_background_work(&self, wait: bool) {
        self.inner.cancel_all_background_work(wait);
    }

    // introspection

    /// Value of a `rocksdb.*` property of the default family.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<String> {
        self.get_property_cf(&self.default_cf, name)
    }

    #[must_use]
    pub fn get_property_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<String> {
        self.inner.get_property(cf.live().ok()?, name)
    }

    #[must_use]
    pub fn get_int_property(&self, name: &str) -> Option<u64> {
        self.get_int_property_cf(&self.default_cf, name)
    }

    #[must_use]
    pub fn get_int_property_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<u64> {
        self.inner.get_int_property(cf.live().ok()?, name)
    }

    pub fn get_column_family_metadata(&self, cf: &ColumnFamilyHandle) -> Result<ColumnFamilyMetaData> {
        Ok(self.inner.column_family_metadata(cf.live()?))
    }

    #[must_use]
    pub fn get_live_files_metadata(&self) -> Vec<LiveFileMetaData> {
        self.inner.live_files_metadata()
    }

    /// Files to copy for a backup. With `flush_memtable` the WALs are not
    /// needed.
    pub fn get_live_files(&self, flush_memtable: bool) -> Result<LiveFiles> {
        self.inner.get_live_files(flush_memtable)
    }

    pub fn get_sorted_wal_files(&self) -> Result<Vec<LogFile>> {
        self.inner.get_sorted_wal_files()
    }

    /// Write batches from the WAL starting with the one that holds `seq`.
    /// Pair with [`disable_file_deletions`](Self::disable_file_deletions)
    /// to keep the logs from being removed while tailing them.
    pub fn get_updates_since(&self, seq: SequenceNumber) -> Result<Vec<BatchResult>> {
        self.inner.get_updates_since(seq)
    }

    /// Keeps obsolete files on disk until a matching
    /// [`enable_file_deletions`](Self::enable_file_deletions). Nests.
    pub fn disable_file_deletions(&self) -> Result<()> {
        self.inner.check_writable()?;
        self.inner.disable_file_deletions();
        Ok(())
    }

    /// Undoes one `disable_file_deletions`, or all of them with `force`.
    pub fn enable_file_deletions(&self, force: bool) -> Result<()> {
        self.inner.check_writable()?;
        self.inner.enable_file_deletions(force);
        Ok(())
    }

    // bulk load

    /// Adds tables built by [`SstFileWriter`](crate::SstFileWriter) to `cf`.
    pub fn ingest_external_file(
        &self,
        cf: &ColumnFamilyHandle,
        paths: &[PathBuf],
        options: &IngestExternalFileOptions,
    ) -> Result<()> {
        self.inner.ingest_external_file(cf.live()?, paths, options)
    }

    // configuration

    /// Changes mutable options of `cf`, given as `(name, value)` pairs.
    /// Unknown or immutable names fail with `InvalidArgument`.
    pub fn set_options(&self, cf: &ColumnFamilyHandle, changes: &[(&str, &str)]) -> Result<()> {
        self.inner.set_options(cf.live()?, changes)
    }

    pub fn set_db_options(&self, changes: &[(&str, &str)]) -> Result<()> {
        self.inner.set_db_options(changes)
    }

    #[must_use]
    pub fn db_options(&self) -> DbOptions {
        self.inner.db_options.read().clone()
    }

    // background errors

    /// The error that stopped background work, if any.
    pub fn background_error(&self) -> Result<()> {
        self.inner.background_error()
    }

    /// Clears the background error and restarts background work.
    pub fn resume(&self) -> Result<()> {
        self.inner.resume()
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!(path = %self.inner.path.display(), error = %e, "closing database on drop failed");
        }
    }
}
