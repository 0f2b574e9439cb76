//! Total orders over user keys.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

/// A total order over user keys.
///
/// The name is persisted in the MANIFEST; reopening a database with a
/// comparator of a different name fails with `InvalidArgument`.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// May shorten `start` to any key in `[start, limit)`. Used to build
    /// compact index separators. The default leaves `start` untouched.
    fn find_shortest_separator(&self, _start: &mut Vec<u8>, _limit: &[u8]) {}

    /// May change `key` to any key `>= key`. The default leaves it untouched.
    fn find_short_successor(&self, _key: &mut Vec<u8>) {}
}

/// Lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let mut diff = 0;
        while diff < min_len && start[diff] == limit[diff] {
            diff += 1;
        }
        if diff >= min_len {
            // one is a prefix of the other
            return;
        }
        let byte = start[diff];
        if byte < u8::MAX && byte + 1 < limit[diff] {
            start[diff] += 1;
            start.truncate(diff + 1);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        if let Some(pos) = key.iter().position(|&b| b != u8::MAX) {
            key[pos] += 1;
            key.truncate(pos + 1);
        }
    }
}

/// Reverse lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseBytewiseComparator;

impl Comparator for ReverseBytewiseComparator {
    fn name(&self) -> &str {
        "rocksdb.ReverseBytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}

/// Shared handle to the default [`BytewiseComparator`].
pub fn bytewise_comparator() -> Arc<dyn Comparator> {
    static CMP: OnceLock<Arc<dyn Comparator>> = OnceLock::new();
    CMP.get_or_init(|| Arc::new(BytewiseComparator)).clone()
}

/// Shared handle to the [`ReverseBytewiseComparator`].
pub fn reverse_bytewise_comparator() -> Arc<dyn Comparator> {
    static CMP: OnceLock<Arc<dyn Comparator>> = OnceLock::new();
    CMP.get_or_init(|| Arc::new(ReverseBytewiseComparator)).clone()
}

/// Resolves one of the built-in comparators by its persisted name.
pub fn builtin_comparator(name: &str) -> Option<Arc<dyn Comparator>> {
    match name {
        "leveldb.BytewiseComparator" => Some(bytewise_comparator()),
        "rocksdb.ReverseBytewiseComparator" => Some(reverse_bytewise_comparator()),
        _ => None,
    }
}
