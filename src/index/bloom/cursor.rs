//! Point-search cursor that consults a bloom filter before the tree.

use std::sync::Arc;

use tracing::trace;

use crate::buffer::LatchMode;
use crate::common::{Error, Result};
use crate::index::btree::{
    CursorInitialState, OwnedTuple, RangePredicate, RangeSearchCursor, SearchCursor, TupleRef,
    TupleReference,
};

use super::filter::{BloomFilter, KeyHashes};

/// A [`RangeSearchCursor`] over a single key, guarded by the component's
/// bloom filter.
///
/// When the filter rules the key out, `has_next()` answers false and
/// releases the leaf handed over at `open()` without reading any further
/// page. The key's hashes are kept across opens and recomputed only when
/// the key changes, so probing one key through many components hashes it
/// once.
pub struct BloomFilterPointSearchCursor<'a> {
    inner: RangeSearchCursor<'a>,
    filter: Arc<BloomFilter>,
    key: Option<OwnedTuple>,
    hashes: Option<KeyHashes>,
    rejected: bool,
}

impl<'a> BloomFilterPointSearchCursor<'a> {
    pub fn new(latch_mode: LatchMode, filter: Arc<BloomFilter>) -> Self {
        Self {
            inner: RangeSearchCursor::new(latch_mode),
            filter,
            key: None,
            hashes: None,
            rejected: false,
        }
    }

    /// Point the cursor at another component's filter.
    ///
    /// Cached hashes stay valid unless the new filter hashes a different
    /// number of key fields.
    pub fn reset_bloom_filter(&mut self, filter: Arc<BloomFilter>) {
        if filter.key_field_count() != self.filter.key_field_count() {
            self.hashes = None;
        }
        self.filter = filter;
    }

    /// Whether the last `has_next()` was answered by the filter alone.
    pub fn was_rejected(&self) -> bool {
        self.rejected
    }

    fn remember_key(&mut self, key: &OwnedTuple) {
        if self.key.as_ref() != Some(key) {
            self.key = Some(key.clone());
            self.hashes = None;
        }
    }

    fn key_hashes(&mut self) -> Option<KeyHashes> {
        let key = self.key.as_ref()?;
        let key_field_count = self.filter.key_field_count();
        Some(*self.hashes.get_or_insert_with(|| BloomFilter::hash_key(key, key_field_count)))
    }
}

impl<'a> SearchCursor<'a> for BloomFilterPointSearchCursor<'a> {
    fn latch_mode(&self) -> LatchMode {
        self.inner.latch_mode()
    }

    /// # Errors
    /// `Error::PredicateMismatch` unless the low key covers exactly the
    /// fields the filter hashes.
    fn open(&mut self, initial: CursorInitialState<'a>, predicate: &RangePredicate) -> Result<()> {
        self.rejected = false;
        let key = predicate.low_key().ok_or_else(|| {
            Error::PredicateMismatch("bloom filter point search needs a low key".to_string())
        })?;
        if key.field_count() != self.filter.key_field_count() {
            return Err(Error::PredicateMismatch(format!(
                "bloom filter hashes {} key fields, search key has {}",
                self.filter.key_field_count(),
                key.field_count()
            )));
        }
        self.remember_key(key);
        self.inner.open(initial, predicate)
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.inner.is_open() {
            return Ok(false);
        }
        if let Some(hashes) = self.key_hashes() {
            if !self.filter.contains_hashes(&hashes) {
                trace!(page_id = ?self.inner.page_id(), "bloom filter ruled out key");
                self.rejected = true;
                self.inner.close();
                return Ok(false);
            }
        }
        self.inner.has_next()
    }

    fn next(&mut self) {
        self.inner.next();
    }

    fn tuple(&self) -> Option<TupleRef<'_>> {
        self.inner.tuple()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bloom::BloomFilterBuilder;
    use crate::index::btree::TupleBuilder;

    #[test]
    fn test_hashes_are_cached_per_key() {
        let mut builder = BloomFilterBuilder::new(10, 0.01, 1);
        builder.add(&TupleBuilder::new().add_i32(1).build());
        let mut cursor = BloomFilterPointSearchCursor::new(LatchMode::Shared, Arc::new(builder.build()));

        let one = TupleBuilder::new().add_i32(1).build();
        cursor.remember_key(&one);
        let first = cursor.key_hashes();
        assert!(cursor.hashes.is_some());

        // Same key again keeps the cache; a new key drops it.
        cursor.remember_key(&one);
        assert!(cursor.hashes.is_some());
        assert_eq!(cursor.key_hashes(), first);
        cursor.remember_key(&TupleBuilder::new().add_i32(2).build());
        assert!(cursor.hashes.is_none());
    }

    #[test]
    fn test_unopened_cursor_has_nothing() {
        let filter = Arc::new(BloomFilterBuilder::new(1, 0.01, 1).build());
        let mut cursor = BloomFilterPointSearchCursor::new(LatchMode::Shared, filter);
        assert!(!cursor.has_next().unwrap());
        assert!(!cursor.was_rejected());
    }
}
