//! Immutable LSM disk components: a bulk-built B-tree plus its bloom filter.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::buffer::{BufferPoolManager, LatchMode};
use crate::common::{PageId, Result, StorageConfig};
use crate::index::bloom::{BloomFilter, BloomFilterBuilder};
use crate::index::btree::{
    BTree, IndexSchema, NoOpOperationCallback, OwnedTuple, RangePredicate, RangeSearchCursor,
    SearchCursor, TupleReference,
};
use crate::storage::FreePageManager;

/// One flushed or merged component.
///
/// Never written after [`flush`](Self::flush) returns; the filter is built
/// from exactly the keys in the tree.
pub struct DiskComponent {
    id: u64,
    tree: BTree,
    filter: Arc<BloomFilter>,
}

impl DiskComponent {
    /// Write `tuples` into a new tree and build its bloom filter.
    ///
    /// Tuples may arrive in any order.
    ///
    /// # Errors
    /// `Error::DuplicateKey` if two tuples share a key.
    pub fn flush(
        bpm: Arc<BufferPoolManager>,
        free_pages: Arc<dyn FreePageManager>,
        schema: IndexSchema,
        id: u64,
        tuples: Vec<OwnedTuple>,
        config: &StorageConfig,
    ) -> Result<Self> {
        config.validate()?;
        let key_cmp = schema.key_comparator();
        let mut tuples = tuples;
        tuples.sort_by(|a, b| key_cmp.compare(a, b));

        let mut builder = BloomFilterBuilder::new(
            tuples.len(),
            config.bloom_false_positive_rate,
            schema.key_field_count(),
        );
        let tree = BTree::create_with_free_pages(bpm, schema, free_pages)?;
        for tuple in &tuples {
            tree.insert(tuple)?;
            builder.add(tuple);
        }
        let filter = builder.build();

        info!(
            component = id,
            tuples = tuples.len(),
            bloom_bits = filter.num_bits(),
            bloom_hashes = filter.num_hashes(),
            "flushed LSM disk component"
        );
        Ok(Self {
            id,
            tree,
            filter: Arc::new(filter),
        })
    }

    /// Reopen a component from its tree's meta page.
    ///
    /// The bloom filter lives in memory only, so it is rebuilt by scanning
    /// the tree.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        free_pages: Arc<dyn FreePageManager>,
        schema: IndexSchema,
        id: u64,
        meta_page: PageId,
        config: &StorageConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tree = BTree::open_with_free_pages(bpm, meta_page, schema, free_pages)?;
        let tuples = scan_all(&tree)?;

        let mut builder = BloomFilterBuilder::new(
            tuples.len(),
            config.bloom_false_positive_rate,
            tree.schema().key_field_count(),
        );
        for tuple in &tuples {
            builder.add(tuple);
        }
        Ok(Self {
            id,
            tree,
            filter: Arc::new(builder.build()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    pub fn bloom_filter(&self) -> &Arc<BloomFilter> {
        &self.filter
    }

    /// Every tuple, in key order.
    pub fn tuples(&self) -> Result<Vec<OwnedTuple>> {
        scan_all(&self.tree)
    }

    /// Return the component's pages to the free list.
    pub fn destroy(self) -> Result<()> {
        self.tree.destroy()
    }
}

/// Merge `components` (newest first) into one new component.
///
/// Where several components hold the same key the newest version wins. The
/// merged components are destroyed, so their pages are reused by later
/// flushes.
pub fn merge(
    bpm: Arc<BufferPoolManager>,
    free_pages: Arc<dyn FreePageManager>,
    schema: IndexSchema,
    id: u64,
    components: Vec<DiskComponent>,
    config: &StorageConfig,
) -> Result<DiskComponent> {
    let key_cmp = schema.key_comparator();

    let mut versions: Vec<(usize, OwnedTuple)> = Vec::new();
    for (age, component) in components.iter().enumerate() {
        versions.extend(component.tuples()?.into_iter().map(|tuple| (age, tuple)));
    }
    versions.sort_by(|(a_age, a), (b_age, b)| match key_cmp.compare(a, b) {
        Ordering::Equal => a_age.cmp(b_age),
        other => other,
    });
    // Keeps the first, i.e. newest, of each run of equal keys.
    versions.dedup_by(|(_, later), (_, first)| key_cmp.compare(&*later, &*first).is_eq());

    let merged_ids: Vec<u64> = components.iter().map(DiskComponent::id).collect();
    let tuples: Vec<OwnedTuple> = versions.into_iter().map(|(_, tuple)| tuple).collect();
    let merged = DiskComponent::flush(bpm, free_pages, schema, id, tuples, config)?;

    for component in components {
        component.destroy()?;
    }
    info!(component = id, merged = ?merged_ids, "merged LSM disk components");
    Ok(merged)
}

fn scan_all(tree: &BTree) -> Result<Vec<OwnedTuple>> {
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
    tree.search(&mut cursor, &RangePredicate::unbounded(), Arc::new(NoOpOperationCallback))?;

    let mut tuples = Vec::new();
    let result: Result<()> = (|| {
        while cursor.has_next()? {
            if let Some(tuple) = cursor.tuple() {
                tuples.push(tuple.to_owned_tuple());
            }
            cursor.next();
        }
        Ok(())
    })();
    cursor.close();
    result.map(|()| tuples)
}
