//! Cursor interface over internal keys.

use std::cmp::Ordering;

use crate::key::InternalKeyComparator;
use crate::status::{Result, Status};

/// Bidirectional cursor over `(internal_key, value)` pairs in
/// [`InternalKeyComparator`] order.
///
/// `key` and `value` may only be called while `valid()` is true. Errors are
/// sticky: once `status()` is an error the iterator stays invalid.
pub trait InternalIterator: Send {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Positions at the first entry `>= target`.
    fn seek(&mut self, target: &[u8]);
    /// Positions at the last entry `<= target`.
    fn seek_for_prev(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

impl<I: InternalIterator + ?Sized> InternalIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }
    fn seek_to_first(&mut self) {
        (**self).seek_to_first()
    }
    fn seek_to_last(&mut self) {
        (**self).seek_to_last()
    }
    fn seek(&mut self, target: &[u8]) {
        (**self).seek(target)
    }
    fn seek_for_prev(&mut self, target: &[u8]) {
        (**self).seek_for_prev(target)
    }
    fn next(&mut self) {
        (**self).next()
    }
    fn prev(&mut self) {
        (**self).prev()
    }
    fn key(&self) -> &[u8] {
        (**self).key()
    }
    fn value(&self) -> &[u8] {
        (**self).value()
    }
    fn status(&self) -> Result<()> {
        (**self).status()
    }
}

/// An iterator with no entries, optionally carrying an error.
#[derive(Debug, Default)]
pub struct EmptyIterator {
    error: Option<Status>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(status: Status) -> Self {
        Self {
            error: Some(status),
        }
    }
}

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn seek_for_prev(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        &[]
    }
    fn value(&self) -> &[u8] {
        &[]
    }
    fn status(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Iterator over an owned, sorted vector of entries.
pub struct VecIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    icmp: InternalKeyComparator,
    pos: Option<usize>,
}

impl VecIterator {
    /// `entries` must already be sorted by `icmp`.
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>, icmp: InternalKeyComparator) -> Self {
        Self {
            entries,
            icmp,
            pos: None,
        }
    }

    fn lower_bound(&self, target: &[u8]) -> usize {
        self.entries
            .partition_point(|(k, _)| self.icmp.compare(k, target) == Ordering::Less)
    }
}

impl InternalIterator for VecIterator {
    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn seek_to_first(&mut self) {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
    }

    fn seek_to_last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    fn seek(&mut self, target: &[u8]) {
        let i = self.lower_bound(target);
        self.pos = (i < self.entries.len()).then_some(i);
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let i = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, target) != Ordering::Greater);
        self.pos = i.checked_sub(1);
    }

    fn next(&mut self) {
        self.pos = self
            .pos
            .map(|p| p + 1)
            .filter(|&p| p < self.entries.len());
    }

    fn prev(&mut self) {
        self.pos = self.pos.and_then(|p| p.checked_sub(1));
    }

    fn key(&self) -> &[u8] {
        self.pos.map(|p| self.entries[p].0.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.pos.map(|p| self.entries[p].1.as_slice()).unwrap_or(&[])
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
