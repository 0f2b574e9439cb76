//! Executing a [`Compaction`]: merge the inputs, keep what survives and
//! write it out as tables of bounded size.
//!
//! The key range may be split into subcompactions at input file
//! boundaries; each one runs on its own thread with its own output files,
//! and the outputs are concatenated in range order.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use config::ColumnFamilyOptions;
use sstable::{MergingIterator, ReadParams, TableBuilder, TableBuilderOptions};
use tracing::{debug, warn};
use types::key::VALUE_TYPE_FOR_SEEK;
use types::listener::CompactionJobStats;
use types::{
    extract_user_key, CompactionFilter, FragmentedRangeTombstones,
    InternalIterator, InternalKey, InternalKeyComparator, RangeTombstone, RateLimiter, Result,
    SequenceNumber, Status, TableProperties, MAX_SEQUENCE_NUMBER,
};

use crate::compaction::iterator::{CompactionIterator, CompactionIteratorOptions};
use crate::compaction::Compaction;
use crate::filename::table_file_path;
use crate::version::LevelIterator;
use crate::version_edit::FileMetaData;

/// Builder settings for a table of column family `cf_id`.
pub(crate) fn table_builder_options(
    cf_id: u32,
    cf_name: &str,
    icmp: &InternalKeyComparator,
    options: &ColumnFamilyOptions,
    creation_time: u64,
    rate_limiter: Option<Arc<RateLimiter>>,
) -> TableBuilderOptions {
    let mut opts = TableBuilderOptions::new(icmp.clone());
    opts.block_size = options.table_options.block_size;
    opts.bloom_bits_per_key = options.table_options.bloom_bits_per_key;
    opts.whole_key_filtering = options.table_options.whole_key_filtering;
    opts.prefix_extractor = options.prefix_extractor.clone();
    opts.column_family_id = cf_id;
    opts.column_family_name = cf_name.to_string();
    opts.merge_operator_name = options
        .merge_operator
        .as_ref()
        .map_or_else(|| "nullptr".to_string(), |m| m.name().to_string());
    opts.creation_time = creation_time;
    opts.rate_limiter = rate_limiter;
    opts
}

/// A table written by a flush or compaction.
#[derive(Debug, Clone)]
pub(crate) struct OutputFile {
    pub(crate) meta: FileMetaData,
    pub(crate) properties: TableProperties,
    pub(crate) path: PathBuf,
}

impl OutputFile {
    pub(crate) fn from_build(
        number: u64,
        path: PathBuf,
        out: sstable::TableBuildOutput,
    ) -> Self {
        let mut meta = FileMetaData::new(
            number,
            out.file_size,
            InternalKey::from_encoded(out.smallest),
            InternalKey::from_encoded(out.largest),
        );
        meta.smallest_seqno = out.properties.smallest_seqno;
        meta.largest_seqno = out.properties.largest_seqno;
        meta.num_entries = out.properties.num_entries;
        meta.num_deletions = out.properties.num_deletions;
        Self {
            meta,
            properties: out.properties,
            path,
        }
    }
}

/// Environment a compaction job runs in.
pub(crate) struct JobContext<'a> {
    pub(crate) dir: &'a Path,
    pub(crate) cf_name: &'a str,
    /// Live snapshots, ascending.
    pub(crate) snapshots: Vec<SequenceNumber>,
    pub(crate) new_file_number: &'a (dyn Fn() -> u64 + Sync),
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) creation_time: u64,
    pub(crate) shutting_down: &'a AtomicBool,
    pub(crate) job_id: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CompactionOutcome {
    pub(crate) outputs: Vec<OutputFile>,
    pub(crate) stats: CompactionJobStats,
}

/// Runs `c` and returns the tables it wrote. On error every output written
/// so far is removed.
pub(crate) fn run_compaction(c: &Compaction, ctx: &JobContext<'_>) -> Result<CompactionOutcome> {
    let started = Instant::now();
    let mut tombstones = Vec::new();
    for (_, f) in c.input_files() {
        tombstones.extend_from_slice(c.version.table(f)?.range_tombstone_list());
    }
    let range_dels = Arc::new(FragmentedRangeTombstones::new(
        &tombstones,
        Arc::clone(c.icmp().user_comparator()),
    ));

    let bounds = subcompaction_boundaries(c);
    let results: Vec<Result<CompactionOutcome>> = if bounds.is_empty() {
        vec![run_subcompaction(c, ctx, &range_dels, None, None)]
    } else {
        let ranges: Vec<(Option<Vec<u8>>, Option<Vec<u8>>)> = {
            let mut ranges = Vec::with_capacity(bounds.len() + 1);
            let mut lower = None;
            for b in bounds {
                ranges.push((lower.take(), Some(b.clone())));
                lower = Some(b);
            }
            ranges.push((lower, None));
            ranges
        };
        debug!(job = ctx.job_id, subcompactions = ranges.len(), "splitting compaction");
        std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|(lo, hi)| {
                    let range_dels = &range_dels;
                    scope.spawn(move || {
                        run_subcompaction(c, ctx, range_dels, lo.as_deref(), hi.as_deref())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Status::aborted("subcompaction thread panicked")))
                })
                .collect()
        })
    };

    let mut outcome = CompactionOutcome::default();
    let mut first_error = None;
    for r in results {
        match r {
            Ok(sub) => {
                outcome.stats.add(&sub.stats);
                outcome.outputs.extend(sub.outputs);
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        for out in &outcome.outputs {
            let _ = std::fs::remove_file(&out.path);
        }
        return Err(e);
    }

    let stats = &mut outcome.stats;
    stats.elapsed_micros = started.elapsed().as_micros() as u64;
    stats.num_input_files = c.num_input_files() as u64;
    stats.num_input_files_at_output_level = c.num_input_files_at_output_level() as u64;
    stats.num_output_files = outcome.outputs.len() as u64;
    stats.is_manual_compaction = c.is_manual;
    stats.total_input_bytes = c.input_bytes();
    stats.total_output_bytes = outcome.outputs.iter().map(|o| o.meta.file_size).sum();
    if let (Some(first), Some(last)) = (outcome.outputs.first(), outcome.outputs.last()) {
        stats.smallest_output_key_prefix = first.meta.smallest.user_key().to_vec();
        stats.largest_output_key_prefix = last.meta.largest.user_key().to_vec();
    }
    Ok(outcome)
}

/// Split points for subcompactions, taken from input file boundaries.
fn subcompaction_boundaries(c: &Compaction) -> Vec<Vec<u8>> {
    if c.max_subcompactions <= 1 || c.output_level == 0 {
        return Vec::new();
    }
    let ucmp = Arc::clone(c.icmp().user_comparator());
    let mut keys: Vec<Vec<u8>> = c
        .input_files()
        .map(|(_, f)| f.smallest.user_key().to_vec())
        .collect();
    keys.sort_by(|a, b| ucmp.compare(a, b));
    keys.dedup_by(|a, b| ucmp.equal(a, b));
    // the smallest key would produce an empty first range
    if !keys.is_empty() {
        keys.remove(0);
    }
    if keys.is_empty() {
        return keys;
    }
    let wanted = (c.max_subcompactions - 1).min(keys.len());
    let step = keys.len() as f64 / (wanted + 1) as f64;
    let mut out: Vec<Vec<u8>> = (1..=wanted)
        .map(|i| keys[((i as f64 * step) as usize).min(keys.len() - 1)].clone())
        .collect();
    out.dedup_by(|a, b| ucmp.equal(a, b));
    out
}

fn input_iterator<'a>(c: &'a Compaction) -> Result<Box<dyn InternalIterator + 'a>> {
    let params = ReadParams {
        verify_checksums: true,
        fill_cache: false,
        ignore_range_deletions: false,
    };
    let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
    for input in &c.inputs {
        if input.level == 0 {
            for f in &input.files {
                children.push(Box::new(c.version.table(f)?.new_iterator(params)));
            }
        } else {
            children.push(Box::new(LevelIterator::new(
                input.files.clone(),
                Arc::clone(&c.version.table_cache),
                c.icmp().clone(),
                c.version.reader_opts.clone(),
                params,
            )));
        }
    }
    Ok(Box::new(MergingIterator::new(c.icmp().clone(), children)))
}

fn compaction_filter(c: &Compaction) -> Option<Arc<dyn CompactionFilter>> {
    if let Some(filter) = &c.options.compaction_filter {
        return Some(Arc::clone(filter));
    }
    c.options
        .compaction_filter_factory
        .as_ref()
        .and_then(|factory| factory.create_compaction_filter(&c.filter_context()))
        .map(Arc::from)
}

fn run_subcompaction(
    c: &Compaction,
    ctx: &JobContext<'_>,
    range_dels: &Arc<FragmentedRangeTombstones>,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Result<CompactionOutcome> {
    let mut input = input_iterator(c)?;
    match begin {
        Some(b) => input.seek(&make_internal_key_for_seek(b)),
        None => input.seek_to_first(),
    }
    let mut iter = CompactionIterator::new(
        input,
        c.icmp().clone(),
        CompactionIteratorOptions {
            snapshots: ctx.snapshots.clone(),
            range_dels: Arc::clone(range_dels),
            merge_operator: c.options.merge_operator.clone(),
            filter: compaction_filter(c),
            level: c.start_level(),
            key_not_exists_beyond: Box::new(move |k| c.key_not_exists_beyond_output_level(k)),
            end: end.map(<[u8]>::to_vec),
        },
    );

    let mut out = OutputBuilder::new(c, ctx, range_dels, begin);
    let result = (|| {
        let mut n = 0u64;
        while let Some((key, value)) = iter.next_entry()? {
            n += 1;
            if n % 1024 == 0 && ctx.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(Status::shutdown_in_progress("database is closing"));
            }
            out.add(&key, &value)?;
        }
        out.finish(end)
    })();
    match result {
        Ok(()) => {
            let mut stats = iter.stats;
            stats.num_output_records = out.num_output_records;
            stats.num_range_del_drop_obsolete = out.dropped_tombstones;
            Ok(CompactionOutcome {
                outputs: out.outputs,
                stats,
            })
        }
        Err(e) => {
            warn!(job = ctx.job_id, error = %e, "subcompaction failed");
            out.abandon();
            Err(e)
        }
    }
}

fn make_internal_key_for_seek(user_key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(user_key.len() + 8);
    types::key::append_internal_key(&mut k, user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
    k
}

/// Cuts the survivor stream into tables of bounded size.
struct OutputBuilder<'a> {
    c: &'a Compaction,
    ctx: &'a JobContext<'a>,
    tombstones: Vec<RangeTombstone>,
    builder: Option<(u64, TableBuilder)>,
    /// Lower user-key bound of the file being built.
    lower: Option<Vec<u8>>,
    last_user_key: Option<Vec<u8>>,
    outputs: Vec<OutputFile>,
    num_output_records: u64,
    dropped_tombstones: u64,
}

impl<'a> OutputBuilder<'a> {
    fn new(
        c: &'a Compaction,
        ctx: &'a JobContext<'a>,
        range_dels: &FragmentedRangeTombstones,
        begin: Option<&[u8]>,
    ) -> Self {
        let earliest_snapshot = ctx.snapshots.first().copied();
        let mut dropped = 0;
        let tombstones = range_dels
            .to_tombstones()
            .into_iter()
            .filter(|t| {
                let obsolete = c.bottommost_level
                    && earliest_snapshot.map_or(true, |s| t.seq <= s);
                if obsolete {
                    dropped += 1;
                }
                !obsolete
            })
            .collect();
        Self {
            c,
            ctx,
            tombstones,
            builder: None,
            lower: begin.map(<[u8]>::to_vec),
            last_user_key: None,
            outputs: Vec::new(),
            num_output_records: 0,
            // every subcompaction sees the same tombstones; count them once
            dropped_tombstones: if begin.is_none() { dropped } else { 0 },
        }
    }

    fn open(&mut self) -> Result<()> {
        let number = (self.ctx.new_file_number)();
        let path = table_file_path(self.ctx.dir, number);
        let opts = table_builder_options(
            self.c.cf_id,
            self.ctx.cf_name,
            self.c.icmp(),
            &self.c.options,
            self.ctx.creation_time,
            self.ctx.rate_limiter.clone(),
        );
        self.builder = Some((number, TableBuilder::create(&path, opts)?));
        Ok(())
    }

    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let user_key = extract_user_key(key);
        let ucmp = Arc::clone(self.c.icmp().user_comparator());
        let full = self
            .builder
            .as_ref()
            .is_some_and(|(_, b)| b.file_size() >= self.c.max_output_file_size);
        let new_user_key = self
            .last_user_key
            .as_deref()
            .map_or(true, |last| !ucmp.equal(last, user_key));
        if full && new_user_key {
            self.finish(Some(user_key))?;
        }
        if self.builder.is_none() {
            self.open()?;
        }
        if let Some((_, builder)) = self.builder.as_mut() {
            builder.add(key, value)?;
        }
        self.num_output_records += 1;
        if new_user_key {
            self.last_user_key = Some(user_key.to_vec());
        }
        Ok(())
    }

    /// Range tombstones clipped to `[lower, upper)`.
    fn clipped_tombstones(&self, upper: Option<&[u8]>) -> Vec<RangeTombstone> {
        let ucmp = self.c.icmp().user_comparator();
        self.tombstones
            .iter()
            .filter_map(|t| {
                let start = match &self.lower {
                    Some(l) if ucmp.compare(&t.start, l) == Ordering::Less => l.clone(),
                    _ => t.start.clone(),
                };
                let end = match upper {
                    Some(u) if ucmp.compare(&t.end, u) == Ordering::Greater => u.to_vec(),
                    _ => t.end.clone(),
                };
                (ucmp.compare(&start, &end) == Ordering::Less)
                    .then(|| RangeTombstone::new(start, end, t.seq))
            })
            .collect()
    }

    /// Completes the current file, whose keys all sort before `upper`.
    fn finish(&mut self, upper: Option<&[u8]>) -> Result<()> {
        let tombstones = self.clipped_tombstones(upper);
        if self.builder.is_none() && !tombstones.is_empty() {
            self.open()?;
        }
        if let Some((number, mut builder)) = self.builder.take() {
            for t in tombstones {
                builder.add_range_tombstone(t);
            }
            if builder.is_empty() {
                builder.abandon();
            } else {
                let path = builder.path().to_path_buf();
                let out = builder.finish()?;
                debug!(
                    job = self.ctx.job_id,
                    file = number,
                    size = out.file_size,
                    "compaction output written"
                );
                self.outputs.push(OutputFile::from_build(number, path, out));
            }
        }
        self.lower = upper.map(<[u8]>::to_vec);
        Ok(())
    }

    fn abandon(&mut self) {
        if let Some((_, builder)) = self.builder.take() {
            builder.abandon();
        }
        for out in &self.outputs {
            let _ = std::fs::remove_file(&out.path);
        }
        self.outputs.clear();
    }
}

/// Writes the survivors of `iter` into a single level-0 table, used by
/// flushes and repair. Returns `None` when nothing survives.
pub(crate) fn build_table(
    path: &Path,
    number: u64,
    opts: TableBuilderOptions,
    iter: &mut CompactionIterator<'_>,
    tombstones: &[RangeTombstone],
) -> Result<Option<OutputFile>> {
    let mut builder = TableBuilder::create(path, opts)?;
    let result = (|| {
        while let Some((key, value)) = iter.next_entry()? {
            builder.add(&key, &value)?;
        }
        Ok(())
    })();
    if let Err(e) = result {
        builder.abandon();
        return Err(e);
    }
    for t in tombstones {
        builder.add_range_tombstone(t.clone());
    }
    if builder.is_empty() {
        builder.abandon();
        return Ok(None);
    }
    let out = builder.finish()?;
    Ok(Some(OutputFile::from_build(number, path.to_path_buf(), out)))
}
