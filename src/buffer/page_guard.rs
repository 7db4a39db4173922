//! RAII guards for page access.
//!
//! Holding a guard means the page is pinned *and* latched:
//! - [`PageReadGuard`] - shared latch (multiple allowed)
//! - [`PageWriteGuard`] - exclusive latch (auto-marks dirty)
//! - [`LatchedPage`] - either of the two, tagged with its [`LatchMode`]
//!
//! Dropping a guard releases the latch in the mode it was acquired under
//! and then unpins the page. Latch coupling is therefore expressed by
//! acquiring the next guard before dropping the current one.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Mode a page latch is acquired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatchMode {
    /// Shared (read) latch: pure scans.
    #[default]
    Shared,
    /// Exclusive (write) latch: cursors feeding mutating operators.
    Exclusive,
}

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
/// The page is automatically unpinned when the guard is dropped.
///
/// # Example
/// ```ignore
/// let guard = bpm.fetch_page_read(page_id)?;
/// let data = guard.as_slice();  // Deref to &Page
/// // guard drops here: latch released, page unpinned
/// ```
pub struct PageReadGuard<'a> {
    /// Lock guard providing access to page data.
    ///
    /// Declared first so the latch is released before the unpin in `Drop`.
    lock: Option<RwLockReadGuard<'a, Page>>,
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            lock: Some(lock),
            bpm,
            frame_id,
            page_id,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        // The lock is only taken out in `drop`.
        self.lock.as_deref().unwrap_or_else(|| unreachable!("read guard used after release"))
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        // Unlatch, then unpin. A read never dirties the page.
        drop(self.lock.take());
        self.bpm.unpin_page_internal(self.frame_id, false);
    }
}

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time.
/// The page is automatically marked dirty and unpinned when the guard is dropped.
pub struct PageWriteGuard<'a> {
    lock: Option<RwLockWriteGuard<'a, Page>>,
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            lock: Some(lock),
            bpm,
            frame_id,
            page_id,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.lock.as_deref().unwrap_or_else(|| unreachable!("write guard used after release"))
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.lock
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("write guard used after release"))
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        // Write guard: always dirty
        drop(self.lock.take());
        self.bpm.unpin_page_internal(self.frame_id, true);
    }
}

/// A pinned page latched in either mode.
///
/// Cursors hold their current leaf as a `LatchedPage` so that releasing it
/// always matches the mode it was acquired under.
pub enum LatchedPage<'a> {
    Shared(PageReadGuard<'a>),
    Exclusive(PageWriteGuard<'a>),
}

impl<'a> LatchedPage<'a> {
    /// Mode this page is latched in.
    #[inline]
    pub fn mode(&self) -> LatchMode {
        match self {
            LatchedPage::Shared(_) => LatchMode::Shared,
            LatchedPage::Exclusive(_) => LatchMode::Exclusive,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        match self {
            LatchedPage::Shared(guard) => guard.page_id(),
            LatchedPage::Exclusive(guard) => guard.page_id(),
        }
    }

    /// The latched page contents.
    #[inline]
    pub fn page(&self) -> &Page {
        match self {
            LatchedPage::Shared(guard) => guard,
            LatchedPage::Exclusive(guard) => guard,
        }
    }

    /// Convert into the exclusive guard, or hand the page back if it is
    /// only latched shared.
    pub fn into_exclusive(self) -> std::result::Result<PageWriteGuard<'a>, Self> {
        match self {
            LatchedPage::Exclusive(guard) => Ok(guard),
            shared => Err(shared),
        }
    }
}

impl Deref for LatchedPage<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.page()
    }
}
