//! Read-modify-write hooks folding merge operands into a value.

/// User-supplied combiner for merge operands.
///
/// `full_merge` receives the operands oldest-first. Returning `None` signals
/// a failed merge; reads surface it as `Corruption`, compactions abort.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    fn full_merge(
        &self,
        key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>>;

    /// Combines two adjacent operands (`left` older than `right`) into one.
    ///
    /// Only operators whose merge is associative should override this. The
    /// default declines, which keeps compaction from folding operand chains
    /// without a base value.
    fn partial_merge(&self, _key: &[u8], _left: &[u8], _right: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Simpler interface for merges that are associative: the operand and the
/// value share one type and `merge(merge(a, b), c) == merge(a, merge(b, c))`.
pub trait AssociativeMergeOperator: Send + Sync {
    fn name(&self) -> &str;

    fn merge(&self, key: &[u8], existing_value: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>>;
}

/// Adapts an [`AssociativeMergeOperator`] into a [`MergeOperator`] that
/// supports partial merges.
#[derive(Debug, Default, Clone)]
pub struct Associative<T>(pub T);

impl<T: AssociativeMergeOperator> MergeOperator for Associative<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let mut acc: Option<Vec<u8>> = existing_value.map(<[u8]>::to_vec);
        for op in operands {
            acc = Some(self.0.merge(key, acc.as_deref(), op)?);
        }
        acc
    }

    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        self.0.merge(key, Some(left), right)
    }
}

/// Appends operands to the existing value separated by `delimiter`.
#[derive(Debug, Clone)]
pub struct StringAppendOperator {
    delimiter: u8,
}

impl StringAppendOperator {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for StringAppendOperator {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl AssociativeMergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "StringAppendOperator"
    }

    fn merge(&self, _key: &[u8], existing_value: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        Some(match existing_value {
            None => value.to_vec(),
            Some(existing) => {
                let mut out = Vec::with_capacity(existing.len() + 1 + value.len());
                out.extend_from_slice(existing);
                out.push(self.delimiter);
                out.extend_from_slice(value);
                out
            }
        })
    }
}

/// Treats values and operands as little-endian `u64` counters.
/// Malformed operands are rejected, failing the merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct UInt64AddOperator;

fn decode_u64(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

impl AssociativeMergeOperator for UInt64AddOperator {
    fn name(&self) -> &str {
        "UInt64AddOperator"
    }

    fn merge(&self, _key: &[u8], existing_value: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        let base = match existing_value {
            Some(raw) => decode_u64(raw)?,
            None => 0,
        };
        let delta = decode_u64(value)?;
        Some(base.wrapping_add(delta).to_le_bytes().to_vec())
    }
}
