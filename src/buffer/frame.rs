//! One buffer pool slot: a page image, its latch, and its pin count.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// A slot in the buffer pool.
///
/// The `RwLock` around the page is the page latch. Cursors couple along the
/// leaf chain by taking the next leaf's latch before dropping this one, and
/// a `LatchedPage` remembers which side of it was taken.
///
/// A pin keeps the page resident. Every guard holds exactly one pin, so a
/// cursor parked on a leaf pins it until it moves on, closes, or releases it
/// for reconciliation. Only frames with zero pins are handed to the replacer.
///
/// The dirty flag is raised when a write guard drops and cleared once the
/// image is on disk (or the page is deleted).
pub struct Frame {
    page: RwLock<Page>,
    resident: Mutex<Option<PageId>>,
    pins: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            resident: Mutex::new(None),
            pins: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Page resident in this slot, if any.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.resident.lock()
    }

    /// Make `page_id` resident, clean, and pinned once for the caller's
    /// guard. The caller has already filled the image.
    pub fn occupy(&self, page_id: PageId) {
        *self.resident.lock() = Some(page_id);
        self.dirty.store(false, Ordering::Release);
        self.pin();
    }

    /// Forget the resident page without writing it back.
    pub fn vacate(&self) {
        *self.resident.lock() = None;
        self.dirty.store(false, Ordering::Release);
    }

    /// Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pins.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new pin count. Zero means the replacer may take the
    /// frame.
    ///
    /// # Panics
    /// On a frame with no pins: a guard was released twice.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let before = self.pins.fetch_sub(1, Ordering::AcqRel);
        assert!(before > 0, "pin count underflow");
        before - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() != 0
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
