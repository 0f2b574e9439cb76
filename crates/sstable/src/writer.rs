use bloom::{key_hash, BloomFilter};
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use types::{
    make_internal_key, parse_internal_key, InternalKeyComparator, RangeTombstone, RateLimiter,
    Result, SequenceNumber, SliceTransform, Status, TableProperties, ValueType,
    MAX_SEQUENCE_NUMBER,
};

use crate::block::BlockBuilder;
use crate::format::{block_checksum, BlockHandle, Footer, FOOTER_LEN, FORMAT_VERSION};
use crate::properties::encode_properties;

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;
pub const DEFAULT_BLOOM_BITS_PER_KEY: u32 = 10;
pub const FILTER_POLICY_NAME: &str = "rocksdb.BuiltinBloomFilter";

/// Settings baked into a table when it is built.
#[derive(Clone)]
pub struct TableBuilderOptions {
    pub icmp: InternalKeyComparator,
    /// Target uncompressed size of a data block.
    pub block_size: usize,
    /// 0 disables the filter block.
    pub bloom_bits_per_key: u32,
    pub whole_key_filtering: bool,
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub column_family_id: u32,
    pub column_family_name: String,
    pub merge_operator_name: String,
    pub creation_time: u64,
    /// fsync the file (and its directory) before `finish` returns.
    pub sync: bool,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl TableBuilderOptions {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self {
            icmp,
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            whole_key_filtering: true,
            prefix_extractor: None,
            column_family_id: 0,
            column_family_name: "default".to_string(),
            merge_operator_name: String::new(),
            creation_time: 0,
            sync: true,
            rate_limiter: None,
        }
    }
}

impl std::fmt::Debug for TableBuilderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBuilderOptions")
            .field("block_size", &self.block_size)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .field("whole_key_filtering", &self.whole_key_filtering)
            .field(
                "prefix_extractor",
                &self.prefix_extractor.as_ref().map(|p| p.name().to_string()),
            )
            .field("column_family", &self.column_family_name)
            .finish()
    }
}

/// What a finished table contains, for the caller's file metadata.
#[derive(Debug, Clone)]
pub struct TableBuildOutput {
    pub properties: TableProperties,
    pub file_size: u64,
    /// Smallest internal key, counting range tombstone starts.
    pub smallest: Vec<u8>,
    /// Largest internal key, counting range tombstone ends.
    pub largest: Vec<u8>,
}

/// Streams sorted internal keys into a new table file.
///
/// The table is written to `<path>.sst.tmp`; [`finish`](Self::finish)
/// fsyncs it and atomically renames it into place, so a crash mid-build
/// leaves only a temp file that recovery ignores.
pub struct TableBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    offset: u64,
    opts: TableBuilderOptions,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    /// Handle of the last flushed data block, waiting for the next key so a
    /// short separator can be chosen.
    pending_handle: Option<BlockHandle>,
    last_key: Vec<u8>,

    filter_hashes: Vec<u64>,
    last_filter_key: Option<Vec<u8>>,
    last_prefix: Option<Vec<u8>>,

    range_dels: Vec<RangeTombstone>,
    props: TableProperties,
    smallest: Option<Vec<u8>>,
    seqno_range: Option<(SequenceNumber, SequenceNumber)>,
}

impl TableBuilder {
    pub fn create<P: AsRef<Path>>(path: P, opts: TableBuilderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("sst.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| Status::from(e).context(tmp_path.display()))?;
        Ok(Self {
            path,
            tmp_path,
            file: BufWriter::new(raw_file),
            offset: 0,
            opts,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            pending_handle: None,
            last_key: Vec::new(),
            filter_hashes: Vec::new(),
            last_filter_key: None,
            last_prefix: None,
            range_dels: Vec::new(),
            props: TableProperties::default(),
            smallest: None,
            seqno_range: None,
        })
    }

    fn note_seqno(&mut self, seq: SequenceNumber) {
        self.seqno_range = Some(match self.seqno_range {
            None => (seq, seq),
            Some((lo, hi)) => (lo.min(seq), hi.max(seq)),
        });
    }

    /// Appends one record. Keys must arrive in strictly increasing internal
    /// key order.
    pub fn add(&mut self, ikey: &[u8], value: &[u8]) -> Result<()> {
        let parsed = parse_internal_key(ikey)?;
        if self.props.num_entries > 0
            && self.opts.icmp.compare(ikey, &self.last_key) != std::cmp::Ordering::Greater
        {
            return Err(Status::invalid_argument(
                "keys must be added to a table in strictly increasing order",
            ));
        }

        if let Some(handle) = self.pending_handle.take() {
            let mut separator = self.last_key.clone();
            self.opts.icmp.find_shortest_separator(&mut separator, ikey);
            self.index_block.add(&separator, &handle.encode());
        }

        if self.opts.bloom_bits_per_key > 0 {
            let user_key = parsed.user_key;
            if self.opts.whole_key_filtering
                && self.last_filter_key.as_deref() != Some(user_key)
            {
                self.filter_hashes.push(key_hash(user_key));
                self.last_filter_key = Some(user_key.to_vec());
            }
            if let Some(extractor) = &self.opts.prefix_extractor {
                if extractor.in_domain(user_key) {
                    let prefix = extractor.transform(user_key);
                    if self.last_prefix.as_deref() != Some(prefix) {
                        self.filter_hashes.push(key_hash(prefix));
                        self.last_prefix = Some(prefix.to_vec());
                    }
                }
            }
        }

        match parsed.value_type {
            ValueType::Deletion | ValueType::SingleDeletion => self.props.num_deletions += 1,
            ValueType::Merge => self.props.num_merge_operands += 1,
            _ => {}
        }
        self.note_seqno(parsed.sequence);
        self.props.num_entries += 1;
        self.props.raw_key_size += ikey.len() as u64;
        self.props.raw_value_size += value.len() as u64;

        if self.smallest.is_none() {
            self.smallest = Some(ikey.to_vec());
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(ikey);
        self.data_block.add(ikey, value);

        if self.data_block.estimated_size() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Records a range tombstone `[start, end) @ seq`.
    pub fn add_range_tombstone(&mut self, tombstone: RangeTombstone) {
        self.note_seqno(tombstone.seq);
        self.props.num_range_deletions += 1;
        self.range_dels.push(tombstone);
    }

    fn write_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        if let Some(limiter) = &self.opts.rate_limiter {
            limiter.request(contents.len() as u64 + 4);
        }
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.file.write_all(contents)?;
        self.file.write_all(&block_checksum(contents).to_le_bytes())?;
        self.offset += contents.len() as u64 + 4;
        Ok(handle)
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let contents = self.data_block.finish();
        let handle = self.write_block(&contents)?;
        self.props.num_data_blocks += 1;
        self.props.data_size += handle.size + 4;
        self.pending_handle = Some(handle);
        Ok(())
    }

    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// True when neither point records nor range tombstones were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.num_entries == 0 && self.range_dels.is_empty()
    }

    /// Bytes written so far plus the pending data block.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the remaining blocks and the footer, syncs and renames the
    /// file into place.
    pub fn finish(mut self) -> Result<TableBuildOutput> {
        if self.is_empty() {
            self.abandon();
            return Err(Status::invalid_argument("refusing to write an empty table"));
        }
        self.flush_data_block()?;
        if let Some(handle) = self.pending_handle.take() {
            let mut successor = self.last_key.clone();
            self.opts.icmp.find_short_successor(&mut successor);
            self.index_block.add(&successor, &handle.encode());
        }

        let mut footer = Footer {
            format_version: FORMAT_VERSION,
            ..Footer::default()
        };

        if self.opts.bloom_bits_per_key > 0 && !self.filter_hashes.is_empty() {
            let filter = BloomFilter::from_hashes(&self.filter_hashes, self.opts.bloom_bits_per_key);
            footer.filter = self.write_block(&filter.encode())?;
            self.props.filter_size = footer.filter.size + 4;
            self.props.filter_policy_name = FILTER_POLICY_NAME.to_string();
        }

        let mut smallest = self.smallest.take();
        let mut largest = (self.props.num_entries > 0).then(|| self.last_key.clone());
        if !self.range_dels.is_empty() {
            let ucmp = Arc::clone(self.opts.icmp.user_comparator());
            self.range_dels.sort_by(|a, b| {
                ucmp.compare(&a.start, &b.start).then_with(|| b.seq.cmp(&a.seq))
            });
            let mut block = BlockBuilder::new();
            for t in &self.range_dels {
                let start = make_internal_key(&t.start, t.seq, ValueType::RangeDeletion);
                block.add(&start, &t.end);

                if smallest
                    .as_ref()
                    .map_or(true, |s| self.opts.icmp.compare(&start, s).is_lt())
                {
                    smallest = Some(start);
                }
                let end = make_internal_key(&t.end, MAX_SEQUENCE_NUMBER, ValueType::RangeDeletion);
                if largest
                    .as_ref()
                    .map_or(true, |l| self.opts.icmp.compare(&end, l).is_gt())
                {
                    largest = Some(end);
                }
            }
            let contents = block.finish();
            footer.range_del = self.write_block(&contents)?;
        }

        let index_contents = self.index_block.finish();
        footer.index = self.write_block(&index_contents)?;
        self.props.index_size = footer.index.size + 4;

        let (lo, hi) = self.seqno_range.unwrap_or((0, 0));
        self.props.smallest_seqno = lo;
        self.props.largest_seqno = hi;
        self.props.format_version = u64::from(FORMAT_VERSION);
        self.props.creation_time = self.opts.creation_time;
        self.props.column_family_id = self.opts.column_family_id;
        self.props.column_family_name = self.opts.column_family_name.clone();
        self.props.comparator_name = self.opts.icmp.user_comparator().name().to_string();
        self.props.merge_operator_name = self.opts.merge_operator_name.clone();
        self.props.prefix_extractor_name = self
            .opts
            .prefix_extractor
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_default();
        self.props.compression_name = "NoCompression".to_string();
        self.props.whole_key_filtering = self.opts.whole_key_filtering;

        let props_contents = encode_properties(&self.props);
        footer.properties = self.write_block(&props_contents)?;

        self.file.write_all(&footer.encode())?;
        let file_size = self.offset + FOOTER_LEN as u64;

        self.file.flush()?;
        let file = self
            .file
            .into_inner()
            .map_err(|e| Status::from(e.into_error()))?;
        if self.opts.sync {
            file.sync_all()?;
        }
        drop(file);

        rename(&self.tmp_path, &self.path)?;
        if self.opts.sync {
            if let Some(parent) = self.path.parent() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }
        debug!(
            path = %self.path.display(),
            entries = self.props.num_entries,
            range_deletions = self.props.num_range_deletions,
            file_size,
            "table written"
        );

        Ok(TableBuildOutput {
            properties: self.props,
            file_size,
            smallest: smallest.unwrap_or_default(),
            largest: largest.unwrap_or_default(),
        })
    }

    /// Discards the partially written table.
    pub fn abandon(self) {
        drop(self.file);
        let _ = std::fs::remove_file(&self.tmp_path);
    }
}

impl std::fmt::Debug for TableBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBuilder")
            .field("path", &self.path)
            .field("entries", &self.props.num_entries)
            .field("offset", &self.offset)
            .finish()
    }
}
