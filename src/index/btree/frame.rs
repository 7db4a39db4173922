//! Slotted frame - the in-page layout of B-tree leaves and interiors.
//!
//! ```text
//! Offset        Size  Field
//! ------        ----  -----
//! 0             13    PageHeader (type = BTreeLeaf | BTreeInternal)
//! 13            2     tuple count
//! 15            2     free space offset (tuple data grows up from here)
//! 17            2     fragmented bytes (dead tuple data)
//! 19            4     link: next leaf (leaf) / rightmost child (interior)
//! 23            1     level (0 = leaf)
//! 24            2     field count of every tuple in this frame
//! 26            ...   tuple data ──▶
//!               ...   ◀── slot directory (u16 tuple offsets)
//! PAGE_SIZE-2   2     slot 0
//! ```
//!
//! Slot `i` lives at `PAGE_SIZE - 2 * (i + 1)`, so the directory grows down
//! from the end of the page while tuple data grows up. Slots are kept in
//! ascending key order; tuple data is in arrival order.
//!
//! Interior tuples are the key fields followed by a 4-byte child page id.
//! The child of entry `i` holds keys `<= key(i)`; the rightmost child holds
//! everything greater than the last key.

use std::borrow::{Borrow, BorrowMut};
use std::cmp::Ordering;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader, PageType};

use super::comparator::MultiComparator;
use super::tuple::{encoded_len, OwnedTuple, TupleBuilder, TupleRef, TupleReference};

const TUPLE_COUNT_OFFSET: usize = PageHeader::SIZE;
const FREE_SPACE_OFFSET: usize = TUPLE_COUNT_OFFSET + 2;
const FRAGMENTED_OFFSET: usize = FREE_SPACE_OFFSET + 2;
const LINK_OFFSET: usize = FRAGMENTED_OFFSET + 2;
const LEVEL_OFFSET: usize = LINK_OFFSET + 4;
const FIELD_COUNT_OFFSET: usize = LEVEL_OFFSET + 1;

/// First byte of tuple data.
pub const DATA_START: usize = FIELD_COUNT_OFFSET + 2;

/// Bytes per slot directory entry.
pub const SLOT_SIZE: usize = 2;

/// Bytes available for tuples and slots in an empty frame.
pub const USABLE_SPACE: usize = PAGE_SIZE - DATA_START;

/// How [`SlottedFrame::find_tuple_index`] treats a key equal to a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// Only an exact match counts.
    Exact,
    /// An exact match is returned as such; otherwise fall back to the policy.
    Inclusive,
    /// Equal tuples are stepped over in the direction of the policy, so the
    /// result is a position to offset from, never the key itself.
    Exclusive,
}

/// Which neighbour to report when there is no exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchPolicy {
    /// The greatest tuple below the key.
    LowerKey,
    /// The smallest tuple above the key.
    HigherKey,
}

/// Outcome of a slot search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSearch {
    /// A tuple equal to the key.
    ExactMatch(usize),
    /// The neighbour chosen by the [`NoMatchPolicy`].
    Nearest(usize),
    /// No tuple satisfies the search (the key is beyond every tuple in the
    /// policy's direction, or `FindMode::Exact` found nothing).
    None,
}

impl SlotSearch {
    /// The slot index, if there is one.
    pub fn index(self) -> Option<usize> {
        match self {
            SlotSearch::ExactMatch(i) | SlotSearch::Nearest(i) => Some(i),
            SlotSearch::None => None,
        }
    }
}

/// View of a B-tree page as a slotted frame.
///
/// `P` is `&Page` for reading or `&mut Page` for writing; the view never
/// outlives the page latch it was built under.
pub struct SlottedFrame<P> {
    page: P,
}

impl<P: Borrow<Page>> SlottedFrame<P> {
    pub fn new(page: P) -> Self {
        Self { page }
    }

    #[inline]
    fn page(&self) -> &Page {
        self.page.borrow()
    }

    /// Check that the page really is a B-tree frame.
    pub fn verify(&self, page_id: PageId) -> Result<()> {
        if self.page().page_type().is_btree_frame() {
            Ok(())
        } else {
            Err(Error::CorruptPage {
                page_id: page_id.0,
                reason: "not a B-tree frame",
            })
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.page().page_type() == PageType::BTreeLeaf
    }

    /// Height above the leaves; 1 means the children are leaves.
    pub fn level(&self) -> u8 {
        self.page().read_u8(LEVEL_OFFSET)
    }

    pub fn tuple_count(&self) -> usize {
        self.page().read_u16(TUPLE_COUNT_OFFSET) as usize
    }

    pub fn field_count(&self) -> usize {
        self.page().read_u16(FIELD_COUNT_OFFSET) as usize
    }

    fn link(&self) -> Option<PageId> {
        PageId::from_link(self.page().read_u32(LINK_OFFSET))
    }

    /// Next leaf in key order, `None` at the rightmost leaf.
    pub fn next_leaf(&self) -> Option<PageId> {
        debug_assert!(self.is_leaf());
        self.link()
    }

    /// Child holding keys above the last routing key.
    pub fn rightmost_child(&self) -> Option<PageId> {
        debug_assert!(!self.is_leaf());
        self.link()
    }

    #[inline]
    fn slot_position(index: usize) -> usize {
        PAGE_SIZE - SLOT_SIZE * (index + 1)
    }

    fn tuple_offset(&self, index: usize) -> usize {
        self.page().read_u16(Self::slot_position(index)) as usize
    }

    /// The tuple in slot `index`.
    pub fn tuple(&self, index: usize) -> TupleRef<'_> {
        TupleRef::new(&self.page().as_slice()[self.tuple_offset(index)..], self.field_count())
    }

    fn tuple_len(&self, index: usize) -> usize {
        encoded_len(&self.page().as_slice()[self.tuple_offset(index)..], self.field_count())
    }

    /// Child page of interior entry `index`.
    pub fn child_at(&self, index: usize) -> PageId {
        let offset = self.tuple_offset(index) + self.tuple_len(index) - 4;
        PageId::new(self.page().read_u32(offset))
    }

    /// Child of entry `index`, or the rightmost child when `index` is the
    /// tuple count.
    pub fn child_for(&self, index: usize) -> Option<PageId> {
        if index < self.tuple_count() {
            Some(self.child_at(index))
        } else {
            self.rightmost_child()
        }
    }

    fn free_space_offset(&self) -> usize {
        self.page().read_u16(FREE_SPACE_OFFSET) as usize
    }

    fn fragmented(&self) -> usize {
        self.page().read_u16(FRAGMENTED_OFFSET) as usize
    }

    fn contiguous_free(&self) -> usize {
        Self::slot_position(self.tuple_count()) + SLOT_SIZE - self.free_space_offset()
    }

    /// Bytes reusable for tuples and slots, counting fragmented space.
    pub fn free_space(&self) -> usize {
        self.contiguous_free() + self.fragmented()
    }

    /// Fraction of the usable space in use.
    pub fn fill_factor(&self) -> f64 {
        (USABLE_SPACE - self.free_space()) as f64 / USABLE_SPACE as f64
    }

    /// Whether a tuple of `len` encoded bytes fits, compacting if needed.
    pub fn has_space(&self, len: usize) -> bool {
        len + SLOT_SIZE <= self.free_space()
    }

    /// Find where `key` sits among the tuples of this frame.
    pub fn find_tuple_index<K>(
        &self,
        key: &K,
        cmp: &MultiComparator,
        mode: FindMode,
        policy: NoMatchPolicy,
    ) -> SlotSearch
    where
        K: TupleReference + ?Sized,
    {
        let count = self.tuple_count();
        let mut begin: isize = 0;
        let mut end: isize = count as isize - 1;

        while begin <= end {
            let mid = (begin + end) / 2;
            match cmp.compare(key, &self.tuple(mid as usize)) {
                Ordering::Less => end = mid - 1,
                Ordering::Greater => begin = mid + 1,
                Ordering::Equal => match (mode, policy) {
                    (FindMode::Exclusive, NoMatchPolicy::HigherKey) => begin = mid + 1,
                    (FindMode::Exclusive, NoMatchPolicy::LowerKey) => end = mid - 1,
                    _ => return SlotSearch::ExactMatch(mid as usize),
                },
            }
        }

        if mode == FindMode::Exact {
            return SlotSearch::None;
        }
        match policy {
            NoMatchPolicy::HigherKey if (begin as usize) < count => {
                SlotSearch::Nearest(begin as usize)
            }
            NoMatchPolicy::LowerKey if end >= 0 => SlotSearch::Nearest(end as usize),
            _ => SlotSearch::None,
        }
    }

    /// First slot at or after `key` (`inclusive`) or strictly after it.
    ///
    /// Returns the tuple count when every tuple sorts before the bound. For
    /// an interior frame the result selects the child to descend into.
    pub fn lower_bound<K>(&self, key: &K, cmp: &MultiComparator, inclusive: bool) -> usize
    where
        K: TupleReference + ?Sized,
    {
        if inclusive {
            match self.find_tuple_index(key, cmp, FindMode::Exclusive, NoMatchPolicy::LowerKey) {
                SlotSearch::None => 0,
                found => found.index().map_or(0, |i| i + 1),
            }
        } else {
            self.find_tuple_index(key, cmp, FindMode::Exclusive, NoMatchPolicy::HigherKey)
                .index()
                .unwrap_or_else(|| self.tuple_count())
        }
    }

    /// Copy every tuple out, in key order.
    pub fn owned_tuples(&self) -> Vec<OwnedTuple> {
        (0..self.tuple_count())
            .map(|i| self.tuple(i).to_owned_tuple())
            .collect()
    }
}

impl<'a> SlottedFrame<&'a Page> {
    /// Like [`tuple`](Self::tuple), but borrowing the page rather than the view.
    pub fn tuple_in_page(&self, index: usize) -> TupleRef<'a> {
        let page: &'a Page = self.page;
        TupleRef::new(&page.as_slice()[self.tuple_offset(index)..], self.field_count())
    }
}

impl<P: BorrowMut<Page>> SlottedFrame<P> {
    #[inline]
    fn page_mut(&mut self) -> &mut Page {
        self.page.borrow_mut()
    }

    /// Format the page as an empty leaf.
    pub fn init_leaf(page: P, field_count: usize, next_leaf: Option<PageId>) -> Self {
        let mut frame = Self { page };
        frame.format(PageType::BTreeLeaf, field_count, 0);
        frame.set_next_leaf(next_leaf);
        frame
    }

    /// Format the page as an empty interior frame at `level >= 1`.
    pub fn init_interior(page: P, key_field_count: usize, level: u8) -> Self {
        let mut frame = Self { page };
        frame.format(PageType::BTreeInternal, key_field_count + 1, level);
        frame
    }

    fn format(&mut self, page_type: PageType, field_count: usize, level: u8) {
        let page = self.page_mut();
        page.reset();
        page.set_header(&PageHeader::new(page_type));
        page.write_u16(TUPLE_COUNT_OFFSET, 0);
        page.write_u16(FREE_SPACE_OFFSET, DATA_START as u16);
        page.write_u16(FRAGMENTED_OFFSET, 0);
        page.write_u32(LINK_OFFSET, PageId::to_link(None));
        page.write_u8(LEVEL_OFFSET, level);
        page.write_u16(FIELD_COUNT_OFFSET, field_count as u16);
    }

    fn set_tuple_count(&mut self, count: usize) {
        self.page_mut().write_u16(TUPLE_COUNT_OFFSET, count as u16);
    }

    pub fn set_next_leaf(&mut self, next: Option<PageId>) {
        self.page_mut().write_u32(LINK_OFFSET, PageId::to_link(next));
    }

    pub fn set_rightmost_child(&mut self, child: Option<PageId>) {
        self.page_mut().write_u32(LINK_OFFSET, PageId::to_link(child));
    }

    /// Re-point interior entry `index` at `child`.
    pub fn set_child_at(&mut self, index: usize, child: PageId) {
        let offset = self.tuple_offset(index) + self.tuple_len(index) - 4;
        self.page_mut().write_u32(offset, child.0);
    }

    /// Re-point the child selected by [`SlottedFrame::child_for`].
    pub fn set_child_for(&mut self, index: usize, child: PageId) {
        if index < self.tuple_count() {
            self.set_child_at(index, child);
        } else {
            self.set_rightmost_child(Some(child));
        }
    }

    /// Insert an encoded tuple so that it becomes slot `index`.
    ///
    /// # Errors
    /// `Error::TupleTooLarge` if it does not fit even after compaction.
    pub fn insert(&mut self, index: usize, tuple: &[u8]) -> Result<()> {
        let count = self.tuple_count();
        debug_assert!(index <= count);

        if !self.has_space(tuple.len()) {
            return Err(Error::TupleTooLarge {
                size: tuple.len(),
                max: self.free_space().saturating_sub(SLOT_SIZE),
            });
        }
        if tuple.len() + SLOT_SIZE > self.contiguous_free() {
            self.compact();
        }

        let offset = self.free_space_offset();
        let directory = Self::slot_position(count) + SLOT_SIZE;
        let data = self.page_mut().as_mut_slice();
        data[offset..offset + tuple.len()].copy_from_slice(tuple);
        // Shift slots index..count one position down the page.
        let shifted = directory..Self::slot_position(index) + SLOT_SIZE;
        data.copy_within(shifted, directory - SLOT_SIZE);

        let page = self.page_mut();
        page.write_u16(Self::slot_position(index), offset as u16);
        page.write_u16(FREE_SPACE_OFFSET, (offset + tuple.len()) as u16);
        self.set_tuple_count(count + 1);
        Ok(())
    }

    /// Remove slot `index`. Its bytes become fragmented space.
    pub fn delete(&mut self, index: usize) {
        let count = self.tuple_count();
        debug_assert!(index < count);

        let fragmented = self.fragmented() + self.tuple_len(index);
        let directory = Self::slot_position(count - 1);
        let data = self.page_mut().as_mut_slice();
        let shifted = directory..Self::slot_position(index);
        data.copy_within(shifted, directory + SLOT_SIZE);

        self.page_mut().write_u16(FRAGMENTED_OFFSET, fragmented as u16);
        self.set_tuple_count(count - 1);
    }

    /// Replace slot `index` with a tuple that sorts the same.
    pub fn replace(&mut self, index: usize, tuple: &[u8]) -> Result<()> {
        // The slot is reused, so only the tuple bytes matter.
        let available = self.free_space() + self.tuple_len(index);
        if tuple.len() > available {
            return Err(Error::TupleTooLarge {
                size: tuple.len(),
                max: available,
            });
        }
        self.delete(index);
        self.insert(index, tuple)
    }

    /// Rewrite tuple data contiguously in slot order.
    pub fn compact(&mut self) {
        let count = self.tuple_count();
        let end = self.free_space_offset();
        let snapshot = self.page().as_slice()[DATA_START..end].to_vec();
        let field_count = self.field_count();

        let mut write_at = DATA_START;
        for index in 0..count {
            let old = self.tuple_offset(index) - DATA_START;
            let len = encoded_len(&snapshot[old..], field_count);
            let page = self.page_mut();
            page.as_mut_slice()[write_at..write_at + len].copy_from_slice(&snapshot[old..old + len]);
            page.write_u16(Self::slot_position(index), write_at as u16);
            write_at += len;
        }

        let page = self.page_mut();
        page.write_u16(FREE_SPACE_OFFSET, write_at as u16);
        page.write_u16(FRAGMENTED_OFFSET, 0);
    }
}

/// Interior entry routing keys `<= key` to `child`.
pub fn interior_entry<K>(key: &K, key_field_count: usize, child: PageId) -> OwnedTuple
where
    K: TupleReference + ?Sized,
{
    let mut builder = TupleBuilder::new();
    for index in 0..key_field_count {
        builder.add_bytes(key.field(index));
    }
    builder.add_bytes(&child.0.to_le_bytes());
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::FieldType;

    fn key(k: i32) -> OwnedTuple {
        TupleBuilder::new().add_i32(k).build()
    }

    fn leaf_with(page: &mut Page, keys: &[i32]) {
        let mut frame = SlottedFrame::init_leaf(page, 1, None);
        for (i, &k) in keys.iter().enumerate() {
            frame.insert(i, key(k).as_bytes()).unwrap();
        }
    }

    fn keys_of(page: &Page) -> Vec<i32> {
        let frame = SlottedFrame::new(page);
        (0..frame.tuple_count())
            .map(|i| frame.tuple(i).int32_field(0).unwrap())
            .collect()
    }

    fn cmp() -> MultiComparator {
        MultiComparator::from_types(&[FieldType::Int32])
    }

    #[test]
    fn test_insert_keeps_slot_order() {
        let mut page = Page::new();
        let mut frame = SlottedFrame::init_leaf(&mut page, 1, Some(PageId::new(9)));
        frame.insert(0, key(20).as_bytes()).unwrap();
        frame.insert(0, key(10).as_bytes()).unwrap();
        frame.insert(2, key(30).as_bytes()).unwrap();
        frame.insert(1, key(15).as_bytes()).unwrap();

        assert_eq!(frame.next_leaf(), Some(PageId::new(9)));
        assert!(frame.is_leaf());
        assert_eq!(keys_of(&page), vec![10, 15, 20, 30]);
    }

    #[test]
    fn test_find_tuple_index_modes() {
        let mut page = Page::new();
        leaf_with(&mut page, &[10, 20, 30]);
        let frame = SlottedFrame::new(&page);
        let cmp = cmp();
        use FindMode::*;
        use NoMatchPolicy::*;

        assert_eq!(frame.find_tuple_index(&key(20), &cmp, Exact, HigherKey), SlotSearch::ExactMatch(1));
        assert_eq!(frame.find_tuple_index(&key(25), &cmp, Exact, HigherKey), SlotSearch::None);

        assert_eq!(frame.find_tuple_index(&key(20), &cmp, Inclusive, HigherKey), SlotSearch::ExactMatch(1));
        assert_eq!(frame.find_tuple_index(&key(25), &cmp, Inclusive, HigherKey), SlotSearch::Nearest(2));
        assert_eq!(frame.find_tuple_index(&key(35), &cmp, Inclusive, HigherKey), SlotSearch::None);

        assert_eq!(frame.find_tuple_index(&key(20), &cmp, Exclusive, HigherKey), SlotSearch::Nearest(2));
        assert_eq!(frame.find_tuple_index(&key(20), &cmp, Exclusive, LowerKey), SlotSearch::Nearest(0));
        assert_eq!(frame.find_tuple_index(&key(10), &cmp, Exclusive, LowerKey), SlotSearch::None);
        assert_eq!(frame.find_tuple_index(&key(30), &cmp, Exclusive, HigherKey), SlotSearch::None);
    }

    #[test]
    fn test_lower_bound() {
        let mut page = Page::new();
        leaf_with(&mut page, &[10, 20, 30]);
        let frame = SlottedFrame::new(&page);
        let cmp = cmp();

        assert_eq!(frame.lower_bound(&key(5), &cmp, true), 0);
        assert_eq!(frame.lower_bound(&key(20), &cmp, true), 1);
        assert_eq!(frame.lower_bound(&key(20), &cmp, false), 2);
        assert_eq!(frame.lower_bound(&key(30), &cmp, false), 3);
        assert_eq!(frame.lower_bound(&key(99), &cmp, true), 3);
    }

    #[test]
    fn test_delete_and_compact_reclaim_space() {
        let mut page = Page::new();
        leaf_with(&mut page, &[1, 2, 3, 4]);
        let before = SlottedFrame::new(&page).free_space();

        let mut frame = SlottedFrame::new(&mut page);
        frame.delete(1);
        frame.delete(0);
        assert_eq!(frame.tuple_count(), 2);
        let after_delete = frame.free_space();
        frame.compact();
        assert_eq!(frame.free_space(), after_delete);
        assert!(after_delete > before);

        assert_eq!(keys_of(&page), vec![3, 4]);
    }

    #[test]
    fn test_fill_until_full_then_compacting_insert() {
        let mut page = Page::new();
        let mut frame = SlottedFrame::init_leaf(&mut page, 1, None);
        let mut k = 0;
        while frame.has_space(key(k).len()) {
            frame.insert(k as usize, key(k).as_bytes()).unwrap();
            k += 1;
        }
        assert!(matches!(
            frame.insert(0, key(-1).as_bytes()),
            Err(Error::TupleTooLarge { .. })
        ));

        // Free the middle; the next insert needs compaction to fit.
        frame.delete(5);
        frame.insert(0, key(-1).as_bytes()).unwrap();
        assert_eq!(frame.tuple(0).int32_field(0), Some(-1));
        assert_eq!(frame.tuple(6).int32_field(0), Some(6));
    }

    #[test]
    fn test_interior_children() {
        let mut page = Page::new();
        let mut frame = SlottedFrame::init_interior(&mut page, 1, 1);
        frame.insert(0, interior_entry(&key(10), 1, PageId::new(3)).as_bytes()).unwrap();
        frame.insert(1, interior_entry(&key(20), 1, PageId::new(4)).as_bytes()).unwrap();
        frame.set_rightmost_child(Some(PageId::new(5)));

        assert!(!frame.is_leaf());
        assert_eq!(frame.level(), 1);
        assert_eq!(frame.child_for(0), Some(PageId::new(3)));
        assert_eq!(frame.child_for(2), Some(PageId::new(5)));

        frame.set_child_for(1, PageId::new(7));
        frame.set_child_for(2, PageId::new(8));
        assert_eq!(frame.child_at(1), PageId::new(7));
        assert_eq!(frame.rightmost_child(), Some(PageId::new(8)));

        // Routing: 15 goes to the child of key 20.
        let cmp = cmp();
        assert_eq!(frame.lower_bound(&key(15), &cmp, true), 1);
    }

    #[test]
    fn test_verify_rejects_other_page_types() {
        let page = Page::new();
        assert!(matches!(
            SlottedFrame::new(&page).verify(PageId::new(1)),
            Err(Error::CorruptPage { .. })
        ));
    }
}
