//! Range search cursor.
//!
//! A cursor walks the leaf chain of one B-tree between the bounds of a
//! [`RangePredicate`], holding at most one leaf latched at a time:
//!
//! ```text
//!            open()                     has_next() == false / close()
//!  CLOSED ───────────▶ POSITIONED ──────────────────────────────────▶ CLOSED
//!                       │   ▲
//!          proceed()=false   │ resume(): re-latch, relocate, re-check
//!                       ▼   │
//!                   RECONCILING (no page held, callback.reconcile())
//! ```
//!
//! Crossing to the next leaf latches the next page before the current one is
//! released, so the forward chain is never lost. `reconcile()` always runs
//! with no latch held.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{BufferPoolManager, LatchMode, LatchedPage};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

use super::callback::SearchOperationCallback;
use super::comparator::MultiComparator;
use super::frame::{FindMode, NoMatchPolicy, SlotSearch, SlottedFrame};
use super::predicate::{Bound, RangePredicate};
use super::tuple::{OwnedTuple, TupleRef, TupleReference};

/// Everything a cursor needs from the descent that found its first leaf.
pub struct CursorInitialState<'a> {
    bpm: &'a BufferPoolManager,
    page: LatchedPage<'a>,
    callback: Arc<dyn SearchOperationCallback>,
    original_key_cmp: MultiComparator,
}

impl<'a> CursorInitialState<'a> {
    /// `page` must be a leaf, pinned and latched in the cursor's mode.
    pub fn new(
        bpm: &'a BufferPoolManager,
        page: LatchedPage<'a>,
        callback: Arc<dyn SearchOperationCallback>,
        original_key_cmp: MultiComparator,
    ) -> Self {
        Self {
            bpm,
            page,
            callback,
            original_key_cmp,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }
}

/// Common interface of the search cursors.
pub trait SearchCursor<'a> {
    /// Latch mode this cursor takes on leaves.
    fn latch_mode(&self) -> LatchMode;

    /// Position on the first leaf. Releases any page still held from a
    /// previous open.
    fn open(&mut self, initial: CursorInitialState<'a>, predicate: &RangePredicate) -> Result<()>;

    /// Whether another tuple is in range. Idempotent until [`next`](Self::next).
    ///
    /// On error the cursor may still hold a page; call [`close`](Self::close).
    fn has_next(&mut self) -> Result<bool>;

    /// Step past the current tuple. Never touches the buffer pool.
    fn next(&mut self);

    /// The current tuple, while positioned on one.
    fn tuple(&self) -> Option<TupleRef<'_>>;

    /// Release the held page, if any. Safe to call repeatedly.
    fn close(&mut self);

    fn reset(&mut self) {
        self.close();
    }
}

/// Result of one step of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    /// Positioned on a visible tuple inside the range.
    Ready,
    /// The callback refused the copied tuple. No page is held; reconcile it
    /// and pass it to [`RangeSearchCursor::resume`].
    NeedsReconciliation(OwnedTuple),
    /// Nothing left in range.
    Exhausted,
}

/// Cursor over one open range of a B-tree.
pub struct RangeSearchCursor<'a> {
    latch_mode: LatchMode,
    scan: Option<Scan<'a>>,
}

impl<'a> RangeSearchCursor<'a> {
    pub fn new(latch_mode: LatchMode) -> Self {
        Self {
            latch_mode,
            scan: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.scan.is_some()
    }

    /// Leaf currently pinned and latched.
    pub fn page_id(&self) -> Option<PageId> {
        self.scan
            .as_ref()
            .and_then(|scan| scan.page.as_ref().map(LatchedPage::page_id))
    }

    /// Slot of the current tuple in the current leaf.
    pub fn tuple_index(&self) -> usize {
        self.scan.as_ref().map_or(0, |scan| scan.tuple_index)
    }

    /// Last in-range slot of the current leaf (`-1` when none is).
    pub fn stop_index(&self) -> isize {
        self.scan.as_ref().map_or(-1, |scan| scan.stop_index)
    }

    /// Evaluate the current position without blocking.
    ///
    /// Crosses leaves as needed and asks the callback about the tuple found.
    pub fn advance(&mut self) -> Result<CursorStep> {
        match &mut self.scan {
            Some(scan) => scan.advance(),
            None => Ok(CursorStep::Exhausted),
        }
    }

    /// Continue after the caller reconciled `reconciled`.
    pub fn resume(&mut self, reconciled: OwnedTuple) -> Result<CursorStep> {
        match &mut self.scan {
            Some(scan) => scan.resume(reconciled),
            None => Ok(CursorStep::Exhausted),
        }
    }
}

impl<'a> SearchCursor<'a> for RangeSearchCursor<'a> {
    fn latch_mode(&self) -> LatchMode {
        self.latch_mode
    }

    fn open(&mut self, initial: CursorInitialState<'a>, predicate: &RangePredicate) -> Result<()> {
        self.close();

        let page_id = initial.page.page_id();
        if self.latch_mode == LatchMode::Exclusive && initial.page.mode() != LatchMode::Exclusive {
            return Err(Error::NotExclusivelyLatched(page_id.0));
        }
        verify_leaf(page_id, initial.page.page())?;
        let (low, high) = predicate.resolve(&initial.original_key_cmp)?;

        let (tuple_index, stop_index) = {
            let frame = SlottedFrame::new(initial.page.page());
            (low_index(low.as_ref(), &frame), high_index(high.as_ref(), &frame))
        };
        trace!(%page_id, tuple_index, stop_index, "opened range cursor");

        self.scan = Some(Scan {
            bpm: initial.bpm,
            callback: initial.callback,
            key_cmp: initial.original_key_cmp,
            high,
            latch_mode: self.latch_mode,
            page: Some(initial.page),
            page_id,
            tuple_index,
            stop_index,
            peeked: false,
            exhausted: false,
        });
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        match &mut self.scan {
            Some(scan) => scan.has_next(),
            None => Ok(false),
        }
    }

    fn next(&mut self) {
        if let Some(scan) = &mut self.scan {
            scan.tuple_index += 1;
            scan.peeked = false;
        }
    }

    fn tuple(&self) -> Option<TupleRef<'_>> {
        self.scan.as_ref()?.tuple()
    }

    fn close(&mut self) {
        // Dropping the scan releases its page in the mode it was latched.
        self.scan = None;
    }
}

/// State of an open scan.
struct Scan<'a> {
    bpm: &'a BufferPoolManager,
    callback: Arc<dyn SearchOperationCallback>,
    key_cmp: MultiComparator,
    high: Option<Bound>,
    latch_mode: LatchMode,
    /// `None` while reconciling and once exhausted.
    page: Option<LatchedPage<'a>>,
    /// Last leaf held; re-latched after reconciliation.
    page_id: PageId,
    tuple_index: usize,
    stop_index: isize,
    peeked: bool,
    exhausted: bool,
}

impl<'a> Scan<'a> {
    fn frame(&self) -> Option<SlottedFrame<&Page>> {
        self.page.as_ref().map(|page| SlottedFrame::new(page.page()))
    }

    fn tuple(&self) -> Option<TupleRef<'_>> {
        let page = self.page.as_ref()?;
        let frame = SlottedFrame::new(page.page());
        (self.tuple_index < frame.tuple_count()).then(|| tuple_at(page.page(), self.tuple_index))
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.peeked {
            return Ok(true);
        }

        let mut step = self.advance()?;
        loop {
            step = match step {
                CursorStep::Ready => {
                    self.peeked = true;
                    return Ok(true);
                }
                CursorStep::Exhausted => {
                    self.finish();
                    return Ok(false);
                }
                CursorStep::NeedsReconciliation(tuple) => {
                    debug!(page_id = %self.page_id, "reconciling tuple with no latch held");
                    self.callback.reconcile(&tuple)?;
                    self.resume(tuple)?
                }
            };
        }
    }

    fn advance(&mut self) -> Result<CursorStep> {
        if self.exhausted || !self.position()? {
            return Ok(CursorStep::Exhausted);
        }
        Ok(self.evaluate())
    }

    /// Move onto a slot holding a tuple, crossing leaves as needed.
    ///
    /// Returns false when the leaf chain or the range runs out.
    fn position(&mut self) -> Result<bool> {
        let mut crossed = false;
        loop {
            let Some(frame) = self.frame() else {
                return Ok(false);
            };
            if self.tuple_index < frame.tuple_count() {
                break;
            }
            match frame.next_leaf() {
                Some(next) => {
                    self.cross_to(next)?;
                    crossed = true;
                }
                None => return Ok(false),
            }
        }

        if crossed {
            self.recompute_stop();
            if self.stop_index < 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Ask the callback about the current tuple.
    fn evaluate(&mut self) -> CursorStep {
        let Some(page) = self.page.as_ref() else {
            return CursorStep::Exhausted;
        };
        let tuple = tuple_at(page.page(), self.tuple_index);
        if self.callback.proceed(&tuple) {
            return if self.within_high_bound() {
                CursorStep::Ready
            } else {
                CursorStep::Exhausted
            };
        }

        let copy = tuple.to_owned_tuple();
        self.page = None;
        CursorStep::NeedsReconciliation(copy)
    }

    fn resume(&mut self, reconciled: OwnedTuple) -> Result<CursorStep> {
        if self.exhausted {
            return Ok(CursorStep::Exhausted);
        }

        if self.page.is_none() {
            let page = self.bpm.fetch_page_latched(self.page_id, self.latch_mode)?;
            verify_leaf(self.page_id, page.page())?;
            self.page = Some(page);
        }

        // A split only ever moves tuples right, so walk right until a leaf
        // holds something at or after the reconciled tuple.
        loop {
            let Some(frame) = self.frame() else {
                return Ok(CursorStep::Exhausted);
            };
            let found = frame.find_tuple_index(
                &reconciled,
                &self.key_cmp,
                FindMode::Inclusive,
                NoMatchPolicy::HigherKey,
            );
            match (found, frame.next_leaf()) {
                (SlotSearch::ExactMatch(i) | SlotSearch::Nearest(i), _) => {
                    self.tuple_index = i;
                    break;
                }
                (SlotSearch::None, Some(next)) => self.cross_to(next)?,
                (SlotSearch::None, None) => return Ok(CursorStep::Exhausted),
            }
        }

        self.recompute_stop();
        if self.stop_index < 0 {
            return Ok(CursorStep::Exhausted);
        }

        let still_there = match self.page.as_ref() {
            Some(page) => {
                let tuple = tuple_at(page.page(), self.tuple_index);
                self.key_cmp.compare(&reconciled, &tuple) == Ordering::Equal
            }
            None => return Ok(CursorStep::Exhausted),
        };

        if still_there {
            Ok(if self.within_high_bound() {
                CursorStep::Ready
            } else {
                CursorStep::Exhausted
            })
        } else {
            // The reconciled tuple is gone; vet its successor from scratch.
            trace!(page_id = %self.page_id, index = self.tuple_index, "reconciled tuple was removed");
            Ok(self.evaluate())
        }
    }

    /// Latch `next`, then release the current leaf.
    fn cross_to(&mut self, next: PageId) -> Result<()> {
        let page = self.bpm.fetch_page_latched(next, self.latch_mode)?;
        verify_leaf(next, page.page())?;
        trace!(from = %self.page_id, to = %next, "cursor crossed to next leaf");

        let previous = self.page.replace(page);
        drop(previous);
        self.page_id = next;
        self.tuple_index = 0;
        Ok(())
    }

    fn recompute_stop(&mut self) {
        if let Some(frame) = self.frame() {
            self.stop_index = high_index(self.high.as_ref(), &frame);
        }
    }

    fn within_high_bound(&self) -> bool {
        self.high.is_none() || self.tuple_index as isize <= self.stop_index
    }

    fn finish(&mut self) {
        self.page = None;
        self.peeked = false;
        self.exhausted = true;
    }
}

fn tuple_at(page: &Page, index: usize) -> TupleRef<'_> {
    SlottedFrame::new(page).tuple_in_page(index)
}

fn verify_leaf(page_id: PageId, page: &Page) -> Result<()> {
    let frame = SlottedFrame::new(page);
    frame.verify(page_id)?;
    if !frame.is_leaf() {
        return Err(Error::CorruptPage {
            page_id: page_id.0,
            reason: "cursor expected a leaf",
        });
    }
    Ok(())
}

/// First slot in range on the first leaf.
fn low_index(low: Option<&Bound>, frame: &SlottedFrame<&Page>) -> usize {
    match low {
        None => 0,
        Some(bound) => frame.lower_bound(&bound.key, &bound.cmp, bound.inclusive),
    }
}

/// Last slot in range on this leaf, or -1 if none is.
fn high_index(high: Option<&Bound>, frame: &SlottedFrame<&Page>) -> isize {
    let last = frame.tuple_count() as isize - 1;
    let Some(bound) = high else {
        return last;
    };

    if bound.inclusive {
        match frame.find_tuple_index(&bound.key, &bound.cmp, FindMode::Exclusive, NoMatchPolicy::HigherKey) {
            SlotSearch::None => last,
            found => found.index().map_or(last, |i| i as isize - 1),
        }
    } else {
        match frame.find_tuple_index(&bound.key, &bound.cmp, FindMode::Exclusive, NoMatchPolicy::LowerKey) {
            SlotSearch::None => -1,
            found => found.index().map_or(-1, |i| i as isize),
        }
    }
}
