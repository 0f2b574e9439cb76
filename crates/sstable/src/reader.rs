use bloom::BloomFilter;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use types::{
    parse_internal_key, FragmentedRangeTombstones, GetContext, InternalIterator,
    InternalKeyComparator, LookupKey, RangeTombstone, Result, SliceTransform, Status,
    TableProperties,
};

use crate::block::{Block, BlockIter};
use crate::cache::LruCache;
use crate::format::{verify_block, BlockHandle, Footer, BLOCK_TRAILER_LEN, FOOTER_LEN};
use crate::properties::decode_properties;

/// Data blocks keyed by `(reader cache id, block offset)`.
pub type BlockCache = LruCache<(u64, u64), Block>;

/// Every opened reader gets a distinct cache id so readers of different
/// databases can share one block cache.
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Default)]
pub struct TableReaderOptions {
    pub block_cache: Option<Arc<BlockCache>>,
    /// The column family's current extractor; the filter is only used for
    /// prefix checks if the table was built with an extractor of the same
    /// name.
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
}

/// Per-read knobs forwarded from `ReadOptions`.
#[derive(Debug, Clone, Copy)]
pub struct ReadParams {
    pub verify_checksums: bool,
    pub fill_cache: bool,
    pub ignore_range_deletions: bool,
}

impl Default for ReadParams {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
            ignore_range_deletions: false,
        }
    }
}

/// An open, immutable table file.
///
/// The index, filter, range tombstones and properties are loaded on
/// [`open`](TableReader::open); data blocks are read on demand through the
/// optional block cache. The file handle sits behind a mutex so lookups can
/// run through a shared `&self`.
pub struct TableReader {
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    cache_id: u64,
    icmp: InternalKeyComparator,
    index: Arc<Block>,
    filter: Option<BloomFilter>,
    range_dels: Arc<FragmentedRangeTombstones>,
    range_del_list: Vec<RangeTombstone>,
    properties: Arc<TableProperties>,
    block_cache: Option<Arc<BlockCache>>,
    /// Whether this table's filter holds prefixes of the current extractor.
    prefix_filtering: Option<Arc<dyn SliceTransform>>,
}

impl TableReader {
    pub fn open<P: AsRef<Path>>(
        path: P,
        icmp: InternalKeyComparator,
        opts: TableReaderOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::open_inner(&path, icmp, opts).map_err(|e| e.context(path.display()))
    }

    fn open_inner(
        path: &Path,
        icmp: InternalKeyComparator,
        opts: TableReaderOptions,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_LEN as u64 {
            return Err(Status::corruption("file is too short to be a table"));
        }

        let mut raw = vec![0u8; FOOTER_LEN];
        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        file.read_exact(&mut raw)?;
        let footer = Footer::decode(&raw, file_size)?;

        let index = Arc::new(Block::new(read_raw_block(&mut file, &footer.index, true)?)?);

        let properties = if footer.properties.is_null() {
            TableProperties::default()
        } else {
            let block = Block::new(read_raw_block(&mut file, &footer.properties, true)?)?;
            decode_properties(&block)?
        };

        let filter = if footer.filter.is_null() {
            None
        } else {
            let contents = read_raw_block(&mut file, &footer.filter, true)?;
            match BloomFilter::decode(&contents) {
                Some(f) => Some(f),
                None => {
                    warn!(path = %path.display(), "ignoring undecodable filter block");
                    None
                }
            }
        };

        let mut range_del_list = Vec::new();
        if !footer.range_del.is_null() {
            let block = Block::new(read_raw_block(&mut file, &footer.range_del, true)?)?;
            for (key, end) in block.entries() {
                let parsed = parse_internal_key(key)?;
                range_del_list.push(RangeTombstone::new(parsed.user_key, end, parsed.sequence));
            }
        }
        let range_dels = Arc::new(FragmentedRangeTombstones::new(
            &range_del_list,
            Arc::clone(icmp.user_comparator()),
        ));

        if !properties.comparator_name.is_empty()
            && properties.comparator_name != icmp.user_comparator().name()
        {
            return Err(Status::invalid_argument(format!(
                "table was built with comparator {}, opened with {}",
                properties.comparator_name,
                icmp.user_comparator().name()
            )));
        }

        let prefix_filtering = opts.prefix_extractor.filter(|p| {
            filter.is_some() && !properties.prefix_extractor_name.is_empty()
                && p.name() == properties.prefix_extractor_name
        });

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            file_size,
            cache_id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            icmp,
            index,
            filter,
            range_dels,
            range_del_list,
            properties: Arc::new(properties),
            block_cache: opts.block_cache,
            prefix_filtering,
        })
    }

    fn read_block(&self, handle: &BlockHandle, params: &ReadParams) -> Result<Arc<Block>> {
        let cache_key = (self.cache_id, handle.offset);
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(&cache_key) {
                return Ok(block);
            }
        }
        let contents = {
            let mut file = self.file.lock();
            read_raw_block(&mut *file, handle, params.verify_checksums)
        }
        .map_err(|e| e.context(self.path.display()))?;
        let block = Arc::new(Block::new(contents)?);
        match &self.block_cache {
            Some(cache) if params.fill_cache => {
                let charge = block.size();
                Ok(cache.insert(cache_key, block, charge))
            }
            _ => Ok(block),
        }
    }

    /// Whether the filter admits `user_key`. Always true without a filter.
    #[must_use]
    pub fn key_may_match(&self, user_key: &[u8]) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        if self.properties.whole_key_filtering {
            return filter.may_contain(user_key);
        }
        match &self.prefix_filtering {
            Some(extractor) if extractor.in_domain(user_key) => {
                filter.may_contain(extractor.transform(user_key))
            }
            _ => true,
        }
    }

    /// Whether any key with `prefix` may be present.
    #[must_use]
    pub fn prefix_may_match(&self, prefix: &[u8]) -> bool {
        match (&self.filter, &self.prefix_filtering) {
            (Some(filter), Some(_)) => filter.may_contain(prefix),
            _ => true,
        }
    }

    /// Feeds every record of the lookup key into `ctx`, newest first.
    /// Returns `true` when the lookup is settled.
    pub fn get(
        &self,
        params: &ReadParams,
        lookup: &LookupKey,
        ctx: &mut GetContext<'_>,
    ) -> Result<bool> {
        if !params.ignore_range_deletions && !self.range_dels.is_empty() {
            ctx.update_covering_tombstone(
                self.range_dels
                    .max_covering_seq(lookup.user_key(), lookup.sequence()),
            );
        }
        if !self.key_may_match(lookup.user_key()) {
            return Ok(ctx.is_done());
        }

        let mut index = BlockIter::new(Arc::clone(&self.index), self.icmp.clone());
        index.seek(lookup.internal_key());
        let mut first = true;
        while index.valid() {
            let handle = BlockHandle::decode(index.value())?;
            let block = self.read_block(&handle, params)?;
            let mut data = BlockIter::new(block, self.icmp.clone());
            if first {
                data.seek(lookup.internal_key());
                first = false;
            } else {
                data.seek_to_first();
            }
            while data.valid() {
                let parsed = parse_internal_key(data.key())?;
                if !self.icmp.user_comparator().equal(parsed.user_key, lookup.user_key()) {
                    return Ok(ctx.is_done());
                }
                if !ctx.save_value(&parsed, data.value()) {
                    return Ok(ctx.is_done());
                }
                data.next();
            }
            // the key's versions may continue in the next block
            index.next();
        }
        Ok(ctx.is_done())
    }

    pub fn new_iterator(self: &Arc<Self>, params: ReadParams) -> TableIterator {
        TableIterator {
            table: Arc::clone(self),
            params,
            index: BlockIter::new(Arc::clone(&self.index), self.icmp.clone()),
            data: None,
            data_handle: None,
            error: None,
        }
    }

    /// Reads every block and checks its CRC.
    pub fn verify_checksum(&self) -> Result<()> {
        let params = ReadParams {
            verify_checksums: true,
            fill_cache: false,
            ignore_range_deletions: false,
        };
        let mut index = BlockIter::new(Arc::clone(&self.index), self.icmp.clone());
        index.seek_to_first();
        while index.valid() {
            let handle = BlockHandle::decode(index.value())?;
            let mut file = self.file.lock();
            read_raw_block(&mut *file, &handle, params.verify_checksums)
                .map_err(|e| e.context(self.path.display()))?;
            index.next();
        }
        Ok(())
    }

    #[must_use]
    pub fn range_tombstones(&self) -> &Arc<FragmentedRangeTombstones> {
        &self.range_dels
    }

    #[must_use]
    pub fn range_tombstone_list(&self) -> &[RangeTombstone] {
        &self.range_del_list
    }

    #[must_use]
    pub fn properties(&self) -> &Arc<TableProperties> {
        &self.properties
    }

    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Memory held by the reader outside the block cache.
    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.index.size() + self.filter.as_ref().map_or(0, |f| f.encoded_len())
    }
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("entries", &self.properties.num_entries)
            .finish()
    }
}

fn read_raw_block(file: &mut File, handle: &BlockHandle, verify: bool) -> Result<Vec<u8>> {
    let mut raw = vec![0u8; handle.size as usize + BLOCK_TRAILER_LEN];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut raw)?;
    if verify {
        verify_block(&raw, handle)?;
    }
    raw.truncate(handle.size as usize);
    Ok(raw)
}

/// Two-level cursor: the index block picks a data block, the data block
/// yields entries.
pub struct TableIterator {
    table: Arc<TableReader>,
    params: ReadParams,
    index: BlockIter,
    data: Option<BlockIter>,
    data_handle: Option<BlockHandle>,
    error: Option<Status>,
}

impl TableIterator {
    /// Loads the data block the index currently points at.
    fn init_data_block(&mut self) {
        if !self.index.valid() {
            self.data = None;
            self.data_handle = None;
            return;
        }
        let handle = match BlockHandle::decode(self.index.value()) {
            Ok(h) => h,
            Err(e) => return self.fail(e),
        };
        if self.data.is_some() && self.data_handle == Some(handle) {
            return;
        }
        match self.table.read_block(&handle, &self.params) {
            Ok(block) => {
                self.data = Some(BlockIter::new(block, self.table.icmp.clone()));
                self.data_handle = Some(handle);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: Status) {
        if self.error.is_none() {
            self.error = Some(e);
        }
        self.data = None;
        self.data_handle = None;
    }

    fn data_valid(&self) -> bool {
        self.data.as_ref().map_or(false, |d| d.valid())
    }

    fn skip_empty_forward(&mut self) {
        while !self.data_valid() {
            if self.error.is_some() || !self.index.valid() {
                self.data = None;
                return;
            }
            self.index.next();
            self.init_data_block();
            if let Some(d) = &mut self.data {
                d.seek_to_first();
            }
        }
    }

    fn skip_empty_backward(&mut self) {
        while !self.data_valid() {
            if self.error.is_some() || !self.index.valid() {
                self.data = None;
                return;
            }
            self.index.prev();
            self.init_data_block();
            if let Some(d) = &mut self.data {
                d.seek_to_last();
            }
        }
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.error.is_none() && self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index.seek_to_first();
        self.init_data_block();
        if let Some(d) = &mut self.data {
            d.seek_to_first();
        }
        self.skip_empty_forward();
    }

    fn seek_to_last(&mut self) {
        self.index.seek_to_last();
        self.init_data_block();
        if let Some(d) = &mut self.data {
            d.seek_to_last();
        }
        self.skip_empty_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index.seek(target);
        self.init_data_block();
        if let Some(d) = &mut self.data {
            d.seek(target);
        }
        self.skip_empty_forward();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.index.seek(target);
        if !self.index.valid() {
            self.index.seek_to_last();
        }
        self.init_data_block();
        if let Some(d) = &mut self.data {
            d.seek_for_prev(target);
        }
        self.skip_empty_backward();
    }

    fn next(&mut self) {
        if let Some(d) = &mut self.data {
            d.next();
        }
        self.skip_empty_forward();
    }

    fn prev(&mut self) {
        if let Some(d) = &mut self.data {
            d.prev();
        }
        self.skip_empty_backward();
    }

    fn key(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], |d| d.key())
    }

    fn value(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], |d| d.value())
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
