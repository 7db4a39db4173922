//! Point lookups across a stack of disk components.

use std::sync::Arc;

use crate::buffer::LatchMode;
use crate::common::Result;
use crate::index::bloom::BloomFilterPointSearchCursor;
use crate::index::btree::{OwnedTuple, RangePredicate, SearchCursor, SearchOperationCallback, TupleReference};

use super::component::DiskComponent;

/// Finds the newest version of a key among `components`, which are ordered
/// newest first.
///
/// One bloom cursor is reused for every probe; only its filter is swapped
/// at each component boundary.
pub struct LsmPointSearcher<'a> {
    components: &'a [DiskComponent],
    callback: Arc<dyn SearchOperationCallback>,
    latch_mode: LatchMode,
    cursor: Option<BloomFilterPointSearchCursor<'a>>,
    probes: usize,
    rejections: usize,
}

impl<'a> LsmPointSearcher<'a> {
    pub fn new(
        components: &'a [DiskComponent],
        callback: Arc<dyn SearchOperationCallback>,
        latch_mode: LatchMode,
    ) -> Self {
        Self {
            components,
            callback,
            latch_mode,
            cursor: None,
            probes: 0,
            rejections: 0,
        }
    }

    /// Newest tuple with exactly `key`, if any component holds one.
    pub fn lookup(&mut self, key: &OwnedTuple) -> Result<Option<OwnedTuple>> {
        let predicate = RangePredicate::point(key.clone());

        let latch_mode = self.latch_mode;
        for component in self.components {
            let filter = component.bloom_filter();
            let cursor = self
                .cursor
                .get_or_insert_with(|| BloomFilterPointSearchCursor::new(latch_mode, Arc::clone(filter)));
            cursor.reset_bloom_filter(Arc::clone(filter));

            self.probes += 1;
            let found = probe(component, cursor, &predicate, Arc::clone(&self.callback));
            if cursor.was_rejected() {
                self.rejections += 1;
            }
            cursor.close();

            if let Some(tuple) = found? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    /// Components probed so far.
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Probes answered by a bloom filter without searching the tree.
    pub fn rejections(&self) -> usize {
        self.rejections
    }
}

fn probe<'a>(
    component: &'a DiskComponent,
    cursor: &mut BloomFilterPointSearchCursor<'a>,
    predicate: &RangePredicate,
    callback: Arc<dyn SearchOperationCallback>,
) -> Result<Option<OwnedTuple>> {
    component.tree().search(cursor, predicate, callback)?;
    if cursor.has_next()? {
        return Ok(cursor.tuple().map(|tuple| tuple.to_owned_tuple()));
    }
    Ok(None)
}
