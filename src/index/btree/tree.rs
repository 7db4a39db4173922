//! The B-tree index: root pointer, descent and structural modification.
//!
//! # Latching
//! The root pointer doubles as the tree's structure latch:
//! - searches and optimistic writes hold it shared while they descend
//!   (and, for writes, until the leaf change is done)
//! - splits hold it exclusively for the whole modification
//!
//! Interiors are crabbed with shared latches; only the leaf is taken in
//! the mode the operation asks for. Cursors never hold the structure
//! latch, so a split can run while a scan is parked on a leaf. Left halves
//! of a split stay in place and the new right half is linked in before the
//! left page is released, so anything a split moves is found by walking
//! right along the leaf chain.
//!
//! # Meta page
//! ```text
//! Offset  Size  Field
//! 0       13    PageHeader (type = IndexMeta)
//! 13      4     magic
//! 17      4     root page id
//! 21      4     free-list head page id
//! 25      2     field count
//! 27      2     key field count
//! 29      n     field type codes, one byte each
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::buffer::{BufferPoolManager, LatchMode, LatchedPage, PageWriteGuard};
use crate::common::config::MAX_TUPLE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader, PageType};
use crate::storage::{FreePageManager, LinkedListFreePageManager};

use super::accessor::BTreeAccessor;
use super::callback::SearchOperationCallback;
use super::comparator::{FieldType, MultiComparator};
use super::cursor::{CursorInitialState, SearchCursor};
use super::frame::{interior_entry, FindMode, NoMatchPolicy, SlotSearch, SlottedFrame};
use super::predicate::RangePredicate;
use super::schema::IndexSchema;
use super::stats::TreeIndexStats;
use super::tuple::{OwnedTuple, TupleReference};

const MAGIC: u32 = 0x4352_4254;
const MAGIC_OFFSET: usize = PageHeader::SIZE;
const ROOT_OFFSET: usize = MAGIC_OFFSET + 4;
const FREE_LIST_OFFSET: usize = ROOT_OFFSET + 4;
const FIELD_COUNT_OFFSET: usize = FREE_LIST_OFFSET + 4;
const KEY_FIELD_COUNT_OFFSET: usize = FIELD_COUNT_OFFSET + 2;
const FIELD_TYPES_OFFSET: usize = KEY_FIELD_COUNT_OFFSET + 2;

/// Search key for a descent: key, comparator, inclusive.
type DescentKey<'k> = (&'k dyn TupleReference, &'k MultiComparator, bool);

/// A B-tree over one buffer pool.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use crabtree::index::btree::{BTree, FieldType, IndexSchema, TupleBuilder};
/// use crabtree::{BufferPoolManager, DiskManager};
///
/// let dir = tempfile::tempdir().unwrap();
/// let dm = DiskManager::create(dir.path().join("index.db")).unwrap();
/// let bpm = Arc::new(BufferPoolManager::new(32, dm));
///
/// let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Utf8], 1).unwrap();
/// let tree = BTree::create(bpm, schema).unwrap();
/// tree.insert(&TupleBuilder::new().add_i32(7).add_str("seven").build()).unwrap();
///
/// let found = tree.lookup(&TupleBuilder::new().add_i32(7).build()).unwrap();
/// assert!(found.is_some());
/// ```
pub struct BTree {
    bpm: Arc<BufferPoolManager>,
    meta_page: PageId,
    /// Root page id; also the structure latch.
    root: RwLock<PageId>,
    schema: IndexSchema,
    key_cmp: MultiComparator,
    free_pages: Arc<dyn FreePageManager>,
}

impl BTree {
    /// Create an empty tree with its own free page manager.
    pub fn create(bpm: Arc<BufferPoolManager>, schema: IndexSchema) -> Result<Self> {
        let free_pages = Arc::new(LinkedListFreePageManager::create(Arc::clone(&bpm))?);
        Self::create_with_free_pages(bpm, schema, free_pages)
    }

    /// Create an empty tree that allocates from a shared free page manager.
    pub fn create_with_free_pages(
        bpm: Arc<BufferPoolManager>,
        schema: IndexSchema,
        free_pages: Arc<dyn FreePageManager>,
    ) -> Result<Self> {
        let meta_page = free_pages.allocate_page()?;
        let root = free_pages.allocate_page()?;

        {
            let mut guard = bpm.fetch_page_write(root)?;
            SlottedFrame::init_leaf(&mut *guard, schema.field_count(), None);
        }
        {
            let mut guard = bpm.fetch_page_write(meta_page)?;
            write_meta(&mut guard, root, free_pages.head_page(), &schema);
        }

        debug!(%meta_page, %root, fields = schema.field_count(), "created B-tree");
        Ok(Self {
            key_cmp: schema.key_comparator(),
            bpm,
            meta_page,
            root: RwLock::new(root),
            schema,
            free_pages,
        })
    }

    /// Open a tree from its meta page, reopening the free list it recorded.
    ///
    /// # Errors
    /// `Error::CorruptPage` if the meta page is not a B-tree meta page or
    /// was written for a different schema.
    pub fn open(bpm: Arc<BufferPoolManager>, meta_page: PageId, schema: IndexSchema) -> Result<Self> {
        let (_, head) = read_meta(&bpm, meta_page, &schema)?;
        let free_pages = Arc::new(LinkedListFreePageManager::open(Arc::clone(&bpm), head)?);
        Self::open_with_free_pages(bpm, meta_page, schema, free_pages)
    }

    /// Open a tree that shares an already open free page manager.
    pub fn open_with_free_pages(
        bpm: Arc<BufferPoolManager>,
        meta_page: PageId,
        schema: IndexSchema,
        free_pages: Arc<dyn FreePageManager>,
    ) -> Result<Self> {
        let (root, head) = read_meta(&bpm, meta_page, &schema)?;
        if head != free_pages.head_page() {
            return Err(Error::CorruptPage {
                page_id: meta_page.0,
                reason: "tree belongs to a different free list",
            });
        }

        debug!(%meta_page, %root, "opened B-tree");
        Ok(Self {
            key_cmp: schema.key_comparator(),
            bpm,
            meta_page,
            root: RwLock::new(root),
            schema,
            free_pages,
        })
    }

    pub fn meta_page(&self) -> PageId {
        self.meta_page
    }

    pub fn root_page(&self) -> PageId {
        *self.root.read()
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Comparator over the full key; the "original" comparator cursors use
    /// to relocate a reconciled tuple.
    pub fn key_comparator(&self) -> &MultiComparator {
        &self.key_cmp
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn free_pages(&self) -> &Arc<dyn FreePageManager> {
        &self.free_pages
    }

    /// Bundle this tree with a search operation callback.
    pub fn create_accessor(&self, callback: Arc<dyn SearchOperationCallback>) -> BTreeAccessor<'_> {
        BTreeAccessor::new(self, callback)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Open `cursor` on the first leaf that can hold a tuple in range.
    ///
    /// Any page the cursor still holds is released before the descent.
    ///
    /// # Errors
    /// `Error::PredicateMismatch` if a bound does not fit the index key.
    pub fn search<'a, C>(
        &'a self,
        cursor: &mut C,
        predicate: &RangePredicate,
        callback: Arc<dyn SearchOperationCallback>,
    ) -> Result<()>
    where
        C: SearchCursor<'a> + ?Sized,
    {
        cursor.close();
        for key in [predicate.low_key(), predicate.high_key()].into_iter().flatten() {
            self.schema
                .validate_key(key)
                .map_err(|e| Error::PredicateMismatch(e.to_string()))?;
        }

        let (low, _) = predicate.resolve(&self.key_cmp)?;
        let descent_key = low
            .as_ref()
            .map(|bound| (&bound.key as &dyn TupleReference, &bound.cmp, bound.inclusive));

        let leaf = {
            let root = self.root.read();
            self.descend(*root, descent_key, cursor.latch_mode())?
        };
        let initial = CursorInitialState::new(&self.bpm, leaf, callback, self.key_cmp.clone());
        cursor.open(initial, predicate)
    }

    /// Find the tuple with exactly this key.
    pub fn lookup<K: TupleReference>(&self, key: &K) -> Result<Option<OwnedTuple>> {
        self.check_full_key(key)?;

        let root = self.root.read();
        let leaf = self.descend(*root, Some((key as &dyn TupleReference, &self.key_cmp, true)), LatchMode::Shared)?;
        drop(root);

        let frame = SlottedFrame::new(leaf.page());
        Ok(match frame.find_tuple_index(key, &self.key_cmp, FindMode::Exact, NoMatchPolicy::HigherKey) {
            SlotSearch::ExactMatch(index) => Some(frame.tuple(index).to_owned_tuple()),
            _ => None,
        })
    }

    /// Walk from `root` to the leaf that `key` routes to, or to the
    /// leftmost leaf without a key.
    ///
    /// The caller holds the structure latch. The returned leaf is latched
    /// in `mode`; interiors are released as soon as the child is latched.
    fn descend(&self, root: PageId, key: Option<DescentKey<'_>>, mode: LatchMode) -> Result<LatchedPage<'_>> {
        let mut current = self.bpm.fetch_page_read(root)?;
        loop {
            let page_id = current.page_id();
            let frame = SlottedFrame::new(&*current);
            frame.verify(page_id)?;

            if frame.is_leaf() {
                // Only a root can be reached as a leaf here, and it stays a
                // leaf while the structure latch is held.
                if mode == LatchMode::Shared {
                    return Ok(LatchedPage::Shared(current));
                }
                drop(current);
                return self.bpm.fetch_page_latched(page_id, mode);
            }

            let index = match key {
                Some((key, cmp, inclusive)) => frame.lower_bound(key, cmp, inclusive),
                None => 0,
            };
            let child = frame.child_for(index).ok_or_else(|| missing_child(page_id))?;

            if frame.level() == 1 {
                return self.bpm.fetch_page_latched(child, mode);
            }
            let next = self.bpm.fetch_page_read(child)?;
            current = next;
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a tuple.
    ///
    /// # Errors
    /// - `Error::InvalidTuple` if it does not match the schema
    /// - `Error::TupleTooLarge` above `MAX_TUPLE_SIZE` encoded bytes
    /// - `Error::DuplicateKey` if the key is already present
    pub fn insert(&self, tuple: &OwnedTuple) -> Result<()> {
        self.check_tuple(tuple)?;
        if self.insert_optimistic(tuple)? {
            return Ok(());
        }
        let mut root = self.root.write();
        self.insert_locked(&mut root, tuple)
    }

    /// Remove the tuple with this key and return it.
    pub fn delete<K: TupleReference>(&self, key: &K) -> Result<OwnedTuple> {
        self.check_full_key(key)?;

        let root = self.root.read();
        self.delete_under(*root, key)
    }

    /// Replace the tuple whose key matches `tuple`'s.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if no tuple has that key.
    pub fn update(&self, tuple: &OwnedTuple) -> Result<()> {
        self.check_tuple(tuple)?;

        {
            let root = self.root.read();
            let mut leaf = self.descend_exclusive(*root, tuple)?;
            let index = match SlottedFrame::new(&*leaf).find_tuple_index(
                tuple,
                &self.key_cmp,
                FindMode::Exact,
                NoMatchPolicy::HigherKey,
            ) {
                SlotSearch::ExactMatch(index) => index,
                _ => return Err(Error::KeyNotFound),
            };
            let mut frame = SlottedFrame::new(&mut *leaf);
            match frame.replace(index, tuple.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(Error::TupleTooLarge { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // The new version does not fit next to its neighbours.
        let mut root = self.root.write();
        self.delete_under(*root, tuple)?;
        self.insert_locked(&mut root, tuple)
    }

    /// Update if the key exists, insert otherwise.
    pub fn upsert(&self, tuple: &OwnedTuple) -> Result<()> {
        loop {
            match self.update(tuple) {
                Err(Error::KeyNotFound) => {}
                other => return other,
            }
            match self.insert(tuple) {
                // Lost a race with a concurrent insert of the same key.
                Err(Error::DuplicateKey) => {}
                other => return other,
            }
        }
    }

    /// Insert into the leaf if it has room. Returns false if a split is
    /// needed.
    fn insert_optimistic(&self, tuple: &OwnedTuple) -> Result<bool> {
        let root = self.root.read();
        let mut leaf = self.descend_exclusive(*root, tuple)?;

        let index = insert_position(&SlottedFrame::new(&*leaf), tuple, &self.key_cmp)?;
        let mut frame = SlottedFrame::new(&mut *leaf);
        if !frame.has_space(tuple.len()) {
            return Ok(false);
        }
        frame.insert(index, tuple.as_bytes())?;
        Ok(true)
    }

    fn descend_exclusive<K: TupleReference>(&self, root: PageId, key: &K) -> Result<PageWriteGuard<'_>> {
        self.descend(root, Some((key as &dyn TupleReference, &self.key_cmp, true)), LatchMode::Exclusive)?
            .into_exclusive()
            .map_err(|page| Error::NotExclusivelyLatched(page.page_id().0))
    }

    fn delete_under<K: TupleReference>(&self, root: PageId, key: &K) -> Result<OwnedTuple> {
        let mut leaf = self.descend_exclusive(root, key)?;
        let mut frame = SlottedFrame::new(&mut *leaf);
        match frame.find_tuple_index(key, &self.key_cmp, FindMode::Exact, NoMatchPolicy::HigherKey) {
            SlotSearch::ExactMatch(index) => {
                let removed = frame.tuple(index).to_owned_tuple();
                frame.delete(index);
                Ok(removed)
            }
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Insert with the structure latch held exclusively, splitting as far
    /// up as needed.
    fn insert_locked(&self, root: &mut PageId, tuple: &OwnedTuple) -> Result<()> {
        let key_fields = self.schema.key_field_count();

        // Nothing but cursors runs beside us, and they only touch leaves,
        // so the path can be recorded now and re-latched on the way up.
        let mut path: Vec<(PageId, usize)> = Vec::new();
        let mut page_id = *root;
        loop {
            let guard = self.bpm.fetch_page_read(page_id)?;
            let frame = SlottedFrame::new(&*guard);
            frame.verify(page_id)?;
            if frame.is_leaf() {
                break;
            }
            let index = frame.lower_bound(tuple, &self.key_cmp, true);
            let child = frame.child_for(index).ok_or_else(|| missing_child(page_id))?;
            path.push((page_id, index));
            page_id = child;
        }

        let mut leaf = self.bpm.fetch_page_write(page_id)?;
        let index = insert_position(&SlottedFrame::new(&*leaf), tuple, &self.key_cmp)?;
        if SlottedFrame::new(&*leaf).has_space(tuple.len()) {
            return SlottedFrame::new(&mut *leaf).insert(index, tuple.as_bytes());
        }

        // Leaf split: the right half moves to a new page linked after the
        // left, which is rebuilt in place.
        let mut entries = SlottedFrame::new(&*leaf).owned_tuples();
        entries.insert(index, tuple.clone());
        let split = split_point(&entries);
        let old_next = SlottedFrame::new(&*leaf).next_leaf();

        let right_id = self.free_pages.allocate_page()?;
        {
            let mut right = self.bpm.fetch_page_write(right_id)?;
            let mut frame = SlottedFrame::init_leaf(&mut *right, self.schema.field_count(), old_next);
            fill(&mut frame, &entries[split..])?;
        }
        {
            let mut frame = SlottedFrame::init_leaf(&mut *leaf, self.schema.field_count(), Some(right_id));
            fill(&mut frame, &entries[..split])?;
        }
        debug!(left = %page_id, right = %right_id, left_tuples = split, right_tuples = entries.len() - split, "split leaf");

        let separator = entries[split - 1].project(key_fields);
        drop(leaf);
        self.insert_separator(root, path, separator, page_id, right_id, 0)
    }

    /// Route keys `<= separator` to `left` and the rest to `right`, whose
    /// parent is the last entry of `path`.
    fn insert_separator(
        &self,
        root: &mut PageId,
        mut path: Vec<(PageId, usize)>,
        mut separator: OwnedTuple,
        mut left: PageId,
        mut right: PageId,
        mut child_level: u8,
    ) -> Result<()> {
        let key_fields = self.schema.key_field_count();

        while let Some((parent_id, index)) = path.pop() {
            let mut parent = self.bpm.fetch_page_write(parent_id)?;
            let entry = interior_entry(&separator, key_fields, left);

            let mut frame = SlottedFrame::new(&mut *parent);
            if frame.has_space(entry.len()) {
                frame.insert(index, entry.as_bytes())?;
                frame.set_child_for(index + 1, right);
                return Ok(());
            }

            // Interior split: entries[middle] moves up, its child becomes
            // the left half's rightmost child.
            let level = frame.level();
            let mut rightmost = frame.rightmost_child();
            let mut entries = frame.owned_tuples();
            entries.insert(index, entry);
            if index + 1 < entries.len() {
                let retargeted = interior_entry(&entries[index + 1], key_fields, right);
                entries[index + 1] = retargeted;
            } else {
                rightmost = Some(right);
            }

            if entries.len() < 3 {
                return Err(Error::CorruptPage {
                    page_id: parent_id.0,
                    reason: "interior frame too small to split",
                });
            }
            let middle = (entries.len() / 2).clamp(1, entries.len() - 2);
            let pushed = &entries[middle];
            let pushed_child = entry_child(pushed, key_fields, parent_id)?;

            let new_right = self.free_pages.allocate_page()?;
            {
                let mut guard = self.bpm.fetch_page_write(new_right)?;
                let mut right_frame = SlottedFrame::init_interior(&mut *guard, key_fields, level);
                fill(&mut right_frame, &entries[middle + 1..])?;
                right_frame.set_rightmost_child(rightmost);
            }
            {
                let mut left_frame = SlottedFrame::init_interior(&mut *parent, key_fields, level);
                fill(&mut left_frame, &entries[..middle])?;
                left_frame.set_rightmost_child(Some(pushed_child));
            }
            debug!(left = %parent_id, right = %new_right, level, "split interior frame");

            separator = pushed.project(key_fields);
            left = parent_id;
            right = new_right;
            child_level = level;
        }

        // The root itself split.
        let new_root = self.free_pages.allocate_page()?;
        {
            let mut guard = self.bpm.fetch_page_write(new_root)?;
            let mut frame = SlottedFrame::init_interior(&mut *guard, key_fields, child_level + 1);
            frame.insert(0, interior_entry(&separator, key_fields, left).as_bytes())?;
            frame.set_rightmost_child(Some(right));
        }
        {
            let mut meta = self.bpm.fetch_page_write(self.meta_page)?;
            meta.write_u32(ROOT_OFFSET, new_root.0);
        }
        *root = new_root;
        info!(%new_root, levels = child_level + 2, "B-tree grew a level");
        Ok(())
    }

    // ========================================================================
    // Whole-tree operations
    // ========================================================================

    /// Every page of the tree, level by level from the root.
    fn collect_levels(&self, root: PageId) -> Result<Vec<Vec<PageId>>> {
        let mut levels = vec![vec![root]];
        loop {
            let mut children = Vec::new();
            let Some(current) = levels.last() else {
                break;
            };
            for &page_id in current {
                let guard = self.bpm.fetch_page_read(page_id)?;
                let frame = SlottedFrame::new(&*guard);
                frame.verify(page_id)?;
                if frame.is_leaf() {
                    return Ok(levels);
                }
                for index in 0..=frame.tuple_count() {
                    children.push(frame.child_for(index).ok_or_else(|| missing_child(page_id))?);
                }
            }
            levels.push(children);
        }
        Ok(levels)
    }

    /// Walk the tree and gather its shape.
    pub fn stats(&self) -> Result<TreeIndexStats> {
        let root = self.root.read();
        let levels = self.collect_levels(*root)?;

        let mut stats = TreeIndexStats::new(levels.len());
        for (depth, pages) in levels.iter().enumerate() {
            let is_leaf_level = depth + 1 == levels.len();
            for &page_id in pages {
                let guard = self.bpm.fetch_page_read(page_id)?;
                let frame = SlottedFrame::new(&*guard);
                if is_leaf_level {
                    stats.add_leaf(frame.tuple_count(), frame.fill_factor());
                } else {
                    stats.add_interior(frame.fill_factor());
                }
            }
        }
        stats.set_free_pages(self.free_pages.free_page_count()?);
        Ok(stats)
    }

    /// Return every page of the tree, meta page included, to the free list.
    pub fn destroy(self) -> Result<()> {
        let root = self.root.write();
        let levels = self.collect_levels(*root)?;

        let mut freed = 0;
        for page_id in levels.into_iter().flatten().chain(std::iter::once(self.meta_page)) {
            self.free_pages.deallocate_page(page_id)?;
            freed += 1;
        }
        debug!(meta_page = %self.meta_page, freed, "destroyed B-tree");
        Ok(())
    }

    // ========================================================================
    // Validation
    // ========================================================================

    fn check_tuple(&self, tuple: &OwnedTuple) -> Result<()> {
        self.schema.validate(tuple)?;
        if tuple.len() > MAX_TUPLE_SIZE {
            return Err(Error::TupleTooLarge {
                size: tuple.len(),
                max: MAX_TUPLE_SIZE,
            });
        }
        Ok(())
    }

    /// A key for exact-match operations: the whole key, or a full tuple.
    fn check_full_key<K: TupleReference>(&self, key: &K) -> Result<()> {
        if key.field_count() == self.schema.field_count() {
            return self.schema.validate(key);
        }
        self.schema.validate_key(key)?;
        if key.field_count() != self.schema.key_field_count() {
            return Err(Error::InvalidTuple(format!(
                "exact match needs all {} key fields, got {}",
                self.schema.key_field_count(),
                key.field_count()
            )));
        }
        Ok(())
    }
}

/// Slot a new tuple goes into.
fn insert_position<K>(frame: &SlottedFrame<&Page>, tuple: &K, cmp: &MultiComparator) -> Result<usize>
where
    K: TupleReference + ?Sized,
{
    let index = frame.lower_bound(tuple, cmp, true);
    if index < frame.tuple_count() && cmp.compare(tuple, &frame.tuple(index)).is_eq() {
        return Err(Error::DuplicateKey);
    }
    Ok(index)
}

/// First index of the right half: splits by bytes so both halves fit.
fn split_point(entries: &[OwnedTuple]) -> usize {
    let total: usize = entries.iter().map(OwnedTuple::len).sum();
    let mut left = 0;
    for (index, entry) in entries.iter().enumerate() {
        left += entry.len();
        if left * 2 >= total {
            return (index + 1).clamp(1, entries.len() - 1);
        }
    }
    entries.len() / 2
}

fn fill(frame: &mut SlottedFrame<&mut Page>, entries: &[OwnedTuple]) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        frame.insert(index, entry.as_bytes())?;
    }
    Ok(())
}

fn entry_child(entry: &OwnedTuple, key_fields: usize, page_id: PageId) -> Result<PageId> {
    entry
        .field(key_fields)
        .try_into()
        .map(|bytes| PageId::new(u32::from_le_bytes(bytes)))
        .map_err(|_| Error::CorruptPage {
            page_id: page_id.0,
            reason: "malformed child pointer",
        })
}

fn missing_child(page_id: PageId) -> Error {
    Error::CorruptPage {
        page_id: page_id.0,
        reason: "interior frame without rightmost child",
    }
}

fn write_meta(page: &mut Page, root: PageId, free_list_head: PageId, schema: &IndexSchema) {
    page.reset();
    page.set_header(&PageHeader::new(PageType::IndexMeta));
    page.write_u32(MAGIC_OFFSET, MAGIC);
    page.write_u32(ROOT_OFFSET, root.0);
    page.write_u32(FREE_LIST_OFFSET, free_list_head.0);
    page.write_u16(FIELD_COUNT_OFFSET, schema.field_count() as u16);
    page.write_u16(KEY_FIELD_COUNT_OFFSET, schema.key_field_count() as u16);
    for (index, field_type) in schema.field_types().iter().enumerate() {
        page.write_u8(FIELD_TYPES_OFFSET + index, field_type.code());
    }
}

/// Root and free-list head recorded on the meta page.
fn read_meta(bpm: &BufferPoolManager, meta_page: PageId, schema: &IndexSchema) -> Result<(PageId, PageId)> {
    let corrupt = |reason| Error::CorruptPage {
        page_id: meta_page.0,
        reason,
    };

    let page = bpm.fetch_page_read(meta_page)?;
    if page.page_type() != PageType::IndexMeta || page.read_u32(MAGIC_OFFSET) != MAGIC {
        return Err(corrupt("not a B-tree meta page"));
    }

    let field_count = page.read_u16(FIELD_COUNT_OFFSET) as usize;
    let key_field_count = page.read_u16(KEY_FIELD_COUNT_OFFSET) as usize;
    let stored: Option<Vec<FieldType>> = (0..field_count)
        .map(|index| FieldType::from_code(page.read_u8(FIELD_TYPES_OFFSET + index)))
        .collect();
    if key_field_count != schema.key_field_count() || stored.as_deref() != Some(schema.field_types()) {
        return Err(corrupt("schema does not match the stored tree"));
    }

    Ok((
        PageId::new(page.read_u32(ROOT_OFFSET)),
        PageId::new(page.read_u32(FREE_LIST_OFFSET)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::{NoOpOperationCallback, RangeSearchCursor, TupleBuilder};
    use crate::storage::DiskManager;
    use tempfile::TempDir;

    fn setup(pool_size: usize) -> (BTree, TempDir) {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::create(dir.path().join("tree.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(pool_size, dm));
        let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Utf8], 1).unwrap();
        (BTree::create(bpm, schema).unwrap(), dir)
    }

    fn row(k: i32) -> OwnedTuple {
        TupleBuilder::new().add_i32(k).add_str(&format!("value-{k}")).build()
    }

    fn key(k: i32) -> OwnedTuple {
        TupleBuilder::new().add_i32(k).build()
    }

    fn scan_all(tree: &BTree) -> Vec<i32> {
        let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
        tree.search(&mut cursor, &RangePredicate::unbounded(), Arc::new(NoOpOperationCallback))
            .unwrap();
        let mut keys = Vec::new();
        while cursor.has_next().unwrap() {
            keys.push(cursor.tuple().unwrap().int32_field(0).unwrap());
            cursor.next();
        }
        cursor.close();
        keys
    }

    #[test]
    fn test_insert_and_lookup() {
        let (tree, _dir) = setup(16);
        tree.insert(&row(5)).unwrap();
        tree.insert(&row(3)).unwrap();

        let found = tree.lookup(&key(5)).unwrap().unwrap();
        assert_eq!(found.str_field(1), Some("value-5"));
        assert!(tree.lookup(&key(4)).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (tree, _dir) = setup(16);
        tree.insert(&row(1)).unwrap();
        assert!(matches!(tree.insert(&row(1)), Err(Error::DuplicateKey)));
    }

    #[test]
    fn test_invalid_tuples_rejected() {
        let (tree, _dir) = setup(16);
        assert!(matches!(tree.insert(&key(1)), Err(Error::InvalidTuple(_))));

        let huge = TupleBuilder::new().add_i32(1).add_str(&"x".repeat(MAX_TUPLE_SIZE)).build();
        assert!(matches!(tree.insert(&huge), Err(Error::TupleTooLarge { .. })));
    }

    #[test]
    fn test_splits_keep_order_and_grow_root() {
        let (tree, _dir) = setup(64);
        let first_root = tree.root_page();

        // Interleave so splits happen in the middle of leaves too.
        for k in (0..2000).step_by(2).chain((1..2000).step_by(2)) {
            tree.insert(&row(k)).unwrap();
        }

        assert_ne!(tree.root_page(), first_root);
        assert_eq!(scan_all(&tree), (0..2000).collect::<Vec<_>>());
        for k in [0, 999, 1999] {
            assert!(tree.lookup(&key(k)).unwrap().is_some());
        }

        let stats = tree.stats().unwrap();
        assert!(stats.levels() >= 2);
        assert_eq!(stats.tuple_count(), 2000);
    }

    #[test]
    fn test_three_levels_with_wide_keys() {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::create(dir.path().join("wide.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(64, dm));
        let schema = IndexSchema::new(vec![FieldType::Utf8], 1).unwrap();
        let tree = BTree::create(bpm, schema).unwrap();

        // 300-byte keys: a dozen per page, so interiors split quickly.
        for k in 0..400 {
            let s = format!("{k:05}{}", "p".repeat(300));
            tree.insert(&TupleBuilder::new().add_str(&s).build()).unwrap();
        }

        let stats = tree.stats().unwrap();
        assert!(stats.levels() >= 3, "{stats}");
        assert_eq!(stats.tuple_count(), 400);
    }

    #[test]
    fn test_delete_update_upsert() {
        let (tree, _dir) = setup(16);
        for k in 0..10 {
            tree.insert(&row(k)).unwrap();
        }

        let removed = tree.delete(&key(4)).unwrap();
        assert_eq!(removed.int32_field(0), Some(4));
        assert!(matches!(tree.delete(&key(4)), Err(Error::KeyNotFound)));

        let bigger = TupleBuilder::new().add_i32(5).add_str("a longer replacement value").build();
        tree.update(&bigger).unwrap();
        assert_eq!(
            tree.lookup(&key(5)).unwrap().unwrap().str_field(1),
            Some("a longer replacement value")
        );
        assert!(matches!(tree.update(&row(42)), Err(Error::KeyNotFound)));

        tree.upsert(&row(42)).unwrap();
        tree.upsert(&row(42)).unwrap();
        assert_eq!(scan_all(&tree), vec![0, 1, 2, 3, 5, 6, 7, 8, 9, 42]);
    }

    #[test]
    fn test_update_that_forces_a_split() {
        let (tree, _dir) = setup(32);
        for k in 0..150 {
            tree.insert(&row(k)).unwrap();
        }
        let fat = TupleBuilder::new().add_i32(75).add_str(&"f".repeat(900)).build();
        tree.update(&fat).unwrap();

        assert_eq!(tree.lookup(&key(75)).unwrap().unwrap().str_field(1).map(str::len), Some(900));
        assert_eq!(scan_all(&tree), (0..150).collect::<Vec<_>>());
    }

    #[test]
    fn test_reopen_checks_schema() {
        let (tree, _dir) = setup(16);
        tree.insert(&row(1)).unwrap();
        let bpm = Arc::clone(tree.buffer_pool());
        let meta = tree.meta_page();
        drop(tree);

        let other = IndexSchema::new(vec![FieldType::Int64, FieldType::Utf8], 1).unwrap();
        assert!(matches!(
            BTree::open(Arc::clone(&bpm), meta, other),
            Err(Error::CorruptPage { .. })
        ));

        let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Utf8], 1).unwrap();
        let reopened = BTree::open(bpm, meta, schema).unwrap();
        assert!(reopened.lookup(&key(1)).unwrap().is_some());
    }

    #[test]
    fn test_destroy_returns_pages() {
        let (tree, _dir) = setup(32);
        for k in 0..500 {
            tree.insert(&row(k)).unwrap();
        }
        let free_pages = Arc::clone(tree.free_pages());
        let pages = {
            let stats = tree.stats().unwrap();
            stats.leaf_pages() + stats.interior_pages() + 1
        };
        tree.destroy().unwrap();
        assert_eq!(free_pages.free_page_count().unwrap(), pages);
    }
}
