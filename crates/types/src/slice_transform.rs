//! Prefix extractors used for prefix bloom filters and prefix seeks.

use std::sync::Arc;

/// A pure, deterministic mapping from a key to its prefix.
pub trait SliceTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Only called for keys where [`in_domain`](Self::in_domain) holds.
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];

    fn in_domain(&self, key: &[u8]) -> bool;

    /// Whether `prefix` is itself a possible output of `transform`.
    fn in_range(&self, _prefix: &[u8]) -> bool {
        false
    }
}

/// First `len` bytes; shorter keys are out of domain.
#[derive(Debug, Clone)]
pub struct FixedPrefixTransform {
    len: usize,
    name: String,
}

impl FixedPrefixTransform {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            name: format!("rocksdb.FixedPrefix.{len}"),
        }
    }
}

impl SliceTransform for FixedPrefixTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len.min(key.len())]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }

    fn in_range(&self, prefix: &[u8]) -> bool {
        prefix.len() == self.len
    }
}

/// At most `cap` bytes; every key is in domain.
#[derive(Debug, Clone)]
pub struct CappedPrefixTransform {
    cap: usize,
    name: String,
}

impl CappedPrefixTransform {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            name: format!("rocksdb.CappedPrefix.{cap}"),
        }
    }
}

impl SliceTransform for CappedPrefixTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.cap.min(key.len())]
    }

    fn in_domain(&self, _key: &[u8]) -> bool {
        true
    }

    fn in_range(&self, prefix: &[u8]) -> bool {
        prefix.len() <= self.cap
    }
}

/// Identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransform;

impl SliceTransform for NoopTransform {
    fn name(&self) -> &str {
        "rocksdb.Noop"
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        key
    }

    fn in_domain(&self, _key: &[u8]) -> bool {
        true
    }

    fn in_range(&self, _prefix: &[u8]) -> bool {
        true
    }
}

pub fn new_fixed_prefix_transform(len: usize) -> Arc<dyn SliceTransform> {
    Arc::new(FixedPrefixTransform::new(len))
}

pub fn new_capped_prefix_transform(cap: usize) -> Arc<dyn SliceTransform> {
    Arc::new(CappedPrefixTransform::new(cap))
}

pub fn new_noop_transform() -> Arc<dyn SliceTransform> {
    Arc::new(NoopTransform)
}

/// Parses a persisted extractor name back into an instance.
pub fn builtin_slice_transform(name: &str) -> Option<Arc<dyn SliceTransform>> {
    if name == "rocksdb.Noop" {
        return Some(new_noop_transform());
    }
    if let Some(n) = name.strip_prefix("rocksdb.FixedPrefix.") {
        return n.parse().ok().map(new_fixed_prefix_transform);
    }
    if let Some(n) = name.strip_prefix("rocksdb.CappedPrefix.") {
        return n.parse().ok().map(new_capped_prefix_transform);
    }
    None
}
