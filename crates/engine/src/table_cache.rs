//! Open table readers shared by every column family, keyed by file number.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sstable::{LruCache, TableReader, TableReaderOptions};
use tracing::debug;
use types::{InternalKeyComparator, Result};

use crate::filename::table_file_path;

pub(crate) struct TableCache {
    dir: PathBuf,
    cache: LruCache<u64, TableReader>,
}

impl TableCache {
    /// `capacity` counts open tables.
    pub(crate) fn new(dir: &Path, capacity: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            cache: LruCache::new(capacity.max(1)),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn find_table(
        &self,
        number: u64,
        icmp: &InternalKeyComparator,
        opts: &TableReaderOptions,
    ) -> Result<Arc<TableReader>> {
        if let Some(reader) = self.cache.get(&number) {
            return Ok(reader);
        }
        let path = table_file_path(&self.dir, number);
        let reader = TableReader::open(&path, icmp.clone(), opts.clone())
            .map_err(|e| e.context(path.display()))?;
        debug!(file = number, "table opened");
        Ok(self.cache.insert(number, Arc::new(reader), 1))
    }

    pub(crate) fn evict(&self, number: u64) {
        self.cache.erase(&number);
    }

    /// Bytes held by open readers (index, filter and properties blocks).
    pub(crate) fn memory_usage(&self) -> usize {
        self.cache
            .values()
            .iter()
            .map(|r| r.approximate_memory_usage())
            .sum()
    }
}
