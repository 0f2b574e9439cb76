//! Immutable snapshots of the table files of one column family.
//!
//! A [`Version`] lists the files of every level. L0 files may overlap each
//! other and are kept newest first; every deeper level is sorted by smallest
//! key with no two files overlapping. Readers hold an `Arc<Version>` so the
//! files they are reading stay listed (and are not deleted) even after a
//! flush or compaction has installed a newer version.

use std::cmp::Ordering;
use std::sync::Arc;

use sstable::{ReadParams, TableIterator, TableReader, TableReaderOptions};
use types::{
    extract_user_key, GetContext, InternalIterator, InternalKeyComparator, LookupKey,
    RangeTombstone, Result, Status,
};

use crate::table_cache::TableCache;
use crate::version_edit::{FileMetaData, VersionEdit};

pub struct Version {
    pub(crate) cf_id: u32,
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) files: Vec<Vec<Arc<FileMetaData>>>,
    pub(crate) table_cache: Arc<TableCache>,
    pub(crate) reader_opts: TableReaderOptions,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("cf_id", &self.cf_id)
            .field("files_per_level", &self.files_per_level())
            .finish()
    }
}

impl Version {
    pub(crate) fn empty(
        cf_id: u32,
        num_levels: usize,
        icmp: InternalKeyComparator,
        table_cache: Arc<TableCache>,
        reader_opts: TableReaderOptions,
    ) -> Self {
        Self {
            cf_id,
            icmp,
            files: vec![Vec::new(); num_levels.max(1)],
            table_cache,
            reader_opts,
        }
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        self.files.get(level).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn num_level_files(&self, level: usize) -> usize {
        self.files(level).len()
    }

    #[must_use]
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.file_size).sum()
    }

    #[must_use]
    pub fn total_file_size(&self) -> u64 {
        (0..self.num_levels()).map(|l| self.level_bytes(l)).sum()
    }

    #[must_use]
    pub fn num_files(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    pub(crate) fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetaData>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    pub(crate) fn files_per_level(&self) -> Vec<usize> {
        self.files.iter().map(Vec::len).collect()
    }

    /// Deepest level holding any file, or 0.
    pub(crate) fn max_non_empty_level(&self) -> usize {
        self.files.iter().rposition(|f| !f.is_empty()).unwrap_or(0)
    }

    fn ucmp_range_contains(&self, f: &FileMetaData, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
            && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
    }

    pub(crate) fn table(&self, f: &FileMetaData) -> Result<Arc<TableReader>> {
        self.table_cache
            .find_table(f.number, &self.icmp, &self.reader_opts)
    }

    /// Probes the files that may hold the lookup key, newest first, until
    /// `ctx` is settled.
    pub(crate) fn get(
        &self,
        params: &ReadParams,
        lookup: &LookupKey,
        ctx: &mut GetContext<'_>,
    ) -> Result<()> {
        let user_key = lookup.user_key();
        for f in self.files(0) {
            if !self.ucmp_range_contains(f, user_key) {
                continue;
            }
            if self.table(f)?.get(params, lookup, ctx)? {
                return Ok(());
            }
        }
        for level in 1..self.num_levels() {
            let files = self.files(level);
            let idx = files.partition_point(|f| {
                self.icmp.compare(f.largest.encode(), lookup.internal_key()) == Ordering::Less
            });
            let Some(f) = files.get(idx) else {
                continue;
            };
            if self
                .icmp
                .compare_user(user_key, f.smallest.user_key())
                == Ordering::Less
            {
                continue;
            }
            if self.table(f)?.get(params, lookup, ctx)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Whether any file at `level` overlaps the user-key range
    /// `[smallest, largest]`.
    pub(crate) fn overlap_in_level(&self, level: usize, smallest: &[u8], largest: &[u8]) -> bool {
        !self
            .overlapping_inputs(level, Some(smallest), Some(largest))
            .is_empty()
    }

    /// Files at `level` overlapping the user-key range `[begin, end]`; a
    /// missing bound is unbounded. At L0 the range grows until it covers
    /// every overlapping file transitively.
    pub(crate) fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut begin = begin.map(<[u8]>::to_vec);
        let mut end = end.map(<[u8]>::to_vec);
        let files = self.files(level);
        let mut out: Vec<Arc<FileMetaData>> = Vec::new();
        let mut i = 0;
        while i < files.len() {
            let f = &files[i];
            i += 1;
            let f_start = f.smallest.user_key();
            let f_end = f.largest.user_key();
            if begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(f_end, b) == Ordering::Less)
            {
                continue;
            }
            if end
                .as_deref()
                .is_some_and(|e| ucmp.compare(f_start, e) == Ordering::Greater)
            {
                continue;
            }
            out.push(Arc::clone(f));
            if level == 0 {
                let mut restart = false;
                if begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(f_start, b) == Ordering::Less)
                {
                    begin = Some(f_start.to_vec());
                    restart = true;
                }
                if end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(f_end, e) == Ordering::Greater)
                {
                    end = Some(f_end.to_vec());
                    restart = true;
                }
                if restart {
                    out.clear();
                    i = 0;
                }
            }
        }
        out
    }

    /// Appends one iterator per L0 file and one concatenating iterator per
    /// deeper non-empty level.
    pub(crate) fn add_iterators(
        &self,
        params: ReadParams,
        out: &mut Vec<Box<dyn InternalIterator>>,
    ) -> Result<()> {
        for f in self.files(0) {
            out.push(Box::new(self.table(f)?.new_iterator(params)));
        }
        for level in 1..self.num_levels() {
            if !self.files(level).is_empty() {
                out.push(Box::new(LevelIterator::new(
                    self.files(level).to_vec(),
                    Arc::clone(&self.table_cache),
                    self.icmp.clone(),
                    self.reader_opts.clone(),
                    params,
                )));
            }
        }
        Ok(())
    }

    /// Range tombstones of every table in the version.
    pub(crate) fn range_tombstones(&self, out: &mut Vec<RangeTombstone>) -> Result<()> {
        for (_, f) in self.all_files() {
            out.extend_from_slice(self.table(f)?.range_tombstone_list());
        }
        Ok(())
    }

    /// Applies `edit`, producing the next version.
    pub(crate) fn apply(&self, edit: &VersionEdit) -> Result<Version> {
        let mut files = self.files.clone();
        for &(level, number) in &edit.deleted_files {
            if let Some(level_files) = files.get_mut(level) {
                level_files.retain(|f| f.number != number);
            }
        }
        for (level, meta) in &edit.new_files {
            let Some(level_files) = files.get_mut(*level) else {
                return Err(Status::corruption(format!(
                    "file {} added at level {level} beyond num_levels {}",
                    meta.number,
                    self.num_levels()
                )));
            };
            level_files.retain(|f| f.number != meta.number);
            level_files.push(Arc::new(meta.clone()));
        }
        let mut next = Version {
            cf_id: self.cf_id,
            icmp: self.icmp.clone(),
            files,
            table_cache: Arc::clone(&self.table_cache),
            reader_opts: self.reader_opts.clone(),
        };
        next.sort_and_check()?;
        Ok(next)
    }

    fn sort_and_check(&mut self) -> Result<()> {
        if let Some(l0) = self.files.first_mut() {
            l0.sort_by(|a, b| {
                b.largest_seqno
                    .cmp(&a.largest_seqno)
                    .then(b.number.cmp(&a.number))
            });
        }
        let icmp = self.icmp.clone();
        for (level, files) in self.files.iter_mut().enumerate().skip(1) {
            files.sort_by(|a, b| icmp.compare(a.smallest.encode(), b.smallest.encode()));
            for pair in files.windows(2) {
                if icmp.compare(pair[0].largest.encode(), pair[1].smallest.encode())
                    != Ordering::Less
                {
                    return Err(Status::corruption(format!(
                        "overlapping files {} and {} at level {level}",
                        pair[0].number, pair[1].number
                    )));
                }
            }
        }
        Ok(())
    }

    /// One line per level: `L<n>: <files> files, <bytes> bytes`.
    pub(crate) fn level_summary(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            let bytes: u64 = files.iter().map(|f| f.file_size).sum();
            out.push_str(&format!("L{level}: {} files, {bytes} bytes\n", files.len()));
        }
        out
    }

    /// Files of every level with their key ranges, for `rocksdb.sstables`.
    pub(crate) fn debug_string(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            out.push_str(&format!("--- level {level} ---\n"));
            for f in files {
                out.push_str(&format!(
                    " {}:{}[{:?} .. {:?}]\n",
                    f.number, f.file_size, f.smallest, f.largest
                ));
            }
        }
        out
    }
}

/// Concatenates the tables of one sorted, non-overlapping level, opening
/// each table only when the cursor reaches it.
pub(crate) struct LevelIterator {
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    icmp: InternalKeyComparator,
    reader_opts: TableReaderOptions,
    params: ReadParams,
    index: usize,
    current: Option<TableIterator>,
    error: Option<Status>,
}

impl LevelIterator {
    pub(crate) fn new(
        files: Vec<Arc<FileMetaData>>,
        table_cache: Arc<TableCache>,
        icmp: InternalKeyComparator,
        reader_opts: TableReaderOptions,
        params: ReadParams,
    ) -> Self {
        Self {
            files,
            table_cache,
            icmp,
            reader_opts,
            params,
            index: 0,
            current: None,
            error: None,
        }
    }

    fn open(&mut self, index: usize) -> bool {
        self.current = None;
        self.index = index;
        let Some(f) = self.files.get(index) else {
            return false;
        };
        match self
            .table_cache
            .find_table(f.number, &self.icmp, &self.reader_opts)
        {
            Ok(reader) => {
                self.current = Some(reader.new_iterator(self.params));
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn skip_empty_forward(&mut self) {
        loop {
            match &self.current {
                Some(it) if it.valid() => return,
                Some(it) if it.status().is_err() => return,
                _ => {}
            }
            if self.error.is_some() || self.index + 1 >= self.files.len() {
                self.current = None;
                return;
            }
            if self.open(self.index + 1) {
                if let Some(it) = self.current.as_mut() {
                    it.seek_to_first();
                }
            }
        }
    }

    fn skip_empty_backward(&mut self) {
        loop {
            match &self.current {
                Some(it) if it.valid() => return,
                Some(it) if it.status().is_err() => return,
                _ => {}
            }
            if self.error.is_some() || self.index == 0 {
                self.current = None;
                return;
            }
            if self.open(self.index - 1) {
                if let Some(it) = self.current.as_mut() {
                    it.seek_to_last();
                }
            }
        }
    }

    fn find_file(&self, target: &[u8]) -> usize {
        self.files
            .partition_point(|f| self.icmp.compare(f.largest.encode(), target) == Ordering::Less)
    }
}

impl InternalIterator for LevelIterator {
    fn valid(&self) -> bool {
        self.error.is_none() && self.current.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) {
        self.error = None;
        if self.open(0) {
            if let Some(it) = self.current.as_mut() {
                it.seek_to_first();
            }
        }
        self.skip_empty_forward();
    }

    fn seek_to_last(&mut self) {
        self.error = None;
        if self.files.is_empty() {
            self.current = None;
            return;
        }
        if self.open(self.files.len() - 1) {
            if let Some(it) = self.current.as_mut() {
                it.seek_to_last();
            }
        }
        self.skip_empty_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.error = None;
        let idx = self.find_file(target);
        if self.open(idx) {
            if let Some(it) = self.current.as_mut() {
                it.seek(target);
            }
        }
        self.skip_empty_forward();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.error = None;
        if self.files.is_empty() {
            self.current = None;
            return;
        }
        let idx = self.find_file(target).min(self.files.len() - 1);
        if self.open(idx) {
            if let Some(it) = self.current.as_mut() {
                it.seek_for_prev(target);
            }
        }
        self.skip_empty_backward();
    }

    fn next(&mut self) {
        if let Some(it) = self.current.as_mut() {
            it.next();
        }
        self.skip_empty_forward();
    }

    fn prev(&mut self) {
        if let Some(it) = self.current.as_mut() {
            it.prev();
        }
        self.skip_empty_backward();
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |it| it.value())
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.current.as_ref().map_or(Ok(()), |it| it.status())
    }
}

/// User key range `[smallest, largest]` spanned by `files`.
pub(crate) fn user_key_range(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut iter = files.iter();
    let first = iter.next()?;
    let mut smallest = first.smallest.encode().to_vec();
    let mut largest = first.largest.encode().to_vec();
    for f in iter {
        if icmp.compare(f.smallest.encode(), &smallest) == Ordering::Less {
            smallest = f.smallest.encode().to_vec();
        }
        if icmp.compare(f.largest.encode(), &largest) == Ordering::Greater {
            largest = f.largest.encode().to_vec();
        }
    }
    Some((
        extract_user_key(&smallest).to_vec(),
        extract_user_key(&largest).to_vec(),
    ))
}
