//! Free page manager - recycling page ids within one database file.
//!
//! Freed pages are tracked in a chain of free-list meta pages rooted at a
//! fixed head page. Each meta page holds a LIFO stack of free page ids and a
//! link to the next meta page:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       13    PageHeader (type = FreeListMeta)
//! 13      4     next meta page (u32, INVALID = end of chain)
//! 17      4     entry count
//! 21      4*N   free page ids
//! ```
//!
//! The head page never moves, so its id can be stored once in an index
//! meta page. When the head fills up, the page being freed is turned into a
//! meta page that takes over the head's entries and is linked in right
//! behind it. When the head runs dry, the next meta page's entries move into
//! the head and the emptied meta page itself is handed out.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::{BufferPoolManager, PageWriteGuard};
use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader, PageType};

const NEXT_OFFSET: usize = PageHeader::SIZE;
const COUNT_OFFSET: usize = NEXT_OFFSET + 4;
const ENTRIES_OFFSET: usize = COUNT_OFFSET + 4;

/// Free page ids one meta page can hold.
pub const META_PAGE_CAPACITY: usize = (PAGE_SIZE - ENTRIES_OFFSET) / 4;

/// Allocates and recycles page ids in the page-id space of a buffer pool.
///
/// Structural mutation of an index goes through this; cursors never do.
pub trait FreePageManager: Send + Sync {
    /// Hand out a page id, recycling a freed one if any exists.
    ///
    /// The page's previous contents are unspecified; the caller formats it.
    fn allocate_page(&self) -> Result<PageId>;

    /// Return a page id for reuse.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Number of page ids currently waiting for reuse.
    fn free_page_count(&self) -> Result<usize>;

    /// The fixed head meta page of this manager.
    fn head_page(&self) -> PageId;
}

/// [`FreePageManager`] over a linked chain of free-list meta pages.
pub struct LinkedListFreePageManager {
    bpm: Arc<BufferPoolManager>,
    head: PageId,
    /// Serializes allocate/deallocate; the head page latch alone would not
    /// cover the second meta page they touch.
    latch: Mutex<()>,
}

impl LinkedListFreePageManager {
    /// Allocate and format a fresh head meta page.
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let head = {
            let mut guard = bpm.new_page()?;
            format_meta_page(&mut guard, None);
            guard.page_id()
        };
        trace!(head = %head, "created free page list");

        Ok(Self {
            bpm,
            head,
            latch: Mutex::new(()),
        })
    }

    /// Attach to an existing head meta page.
    pub fn open(bpm: Arc<BufferPoolManager>, head: PageId) -> Result<Self> {
        {
            let guard = bpm.fetch_page_read(head)?;
            if guard.page_type() != PageType::FreeListMeta {
                return Err(Error::CorruptPage {
                    page_id: head.0,
                    reason: "not a free-list meta page",
                });
            }
        }

        Ok(Self {
            bpm,
            head,
            latch: Mutex::new(()),
        })
    }
}

impl FreePageManager for LinkedListFreePageManager {
    fn allocate_page(&self) -> Result<PageId> {
        let _latch = self.latch.lock();
        let mut head = self.bpm.fetch_page_write(self.head)?;

        if let Some(page_id) = pop_entry(&mut head) {
            trace!(%page_id, "recycled free page");
            return Ok(page_id);
        }

        if let Some(next_id) = next_meta(&head) {
            // Absorb the next meta page and hand it out.
            let next = self.bpm.fetch_page_read(next_id)?;
            let count = entry_count(&next);
            let entries = ENTRIES_OFFSET..ENTRIES_OFFSET + count * 4;
            head.as_mut_slice()[entries.clone()].copy_from_slice(&next.as_slice()[entries]);
            head.write_u32(COUNT_OFFSET, count as u32);
            head.write_u32(NEXT_OFFSET, next.read_u32(NEXT_OFFSET));
            drop(next);

            trace!(page_id = %next_id, "recycled free-list meta page");
            return Ok(next_id);
        }
        drop(head);

        let page_id = self.bpm.allocate_page_id()?;
        trace!(%page_id, "extended file for new page");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == self.head || !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        let _latch = self.latch.lock();
        let mut head = self.bpm.fetch_page_write(self.head)?;

        let count = entry_count(&head);
        if count < META_PAGE_CAPACITY {
            head.write_u32(ENTRIES_OFFSET + count * 4, page_id.0);
            head.write_u32(COUNT_OFFSET, (count + 1) as u32);
            trace!(%page_id, "freed page");
            return Ok(());
        }

        // Head is full: the freed page becomes a meta page holding the
        // head's entries, linked right behind the head.
        let mut spill = self.bpm.fetch_page_write(page_id)?;
        spill.copy_from(&head);
        head.write_u32(COUNT_OFFSET, 0);
        head.write_u32(NEXT_OFFSET, page_id.0);
        trace!(%page_id, "freed page became free-list meta page");
        Ok(())
    }

    fn free_page_count(&self) -> Result<usize> {
        let _latch = self.latch.lock();

        let mut total = 0;
        let mut current = Some(self.head);
        while let Some(page_id) = current {
            let guard = self.bpm.fetch_page_read(page_id)?;
            if guard.page_type() != PageType::FreeListMeta {
                return Err(Error::CorruptPage {
                    page_id: page_id.0,
                    reason: "broken free-list chain",
                });
            }
            // Every meta page past the head is itself reusable.
            total += entry_count(&guard) + usize::from(page_id != self.head);
            current = next_meta(&guard);
        }
        Ok(total)
    }

    fn head_page(&self) -> PageId {
        self.head
    }
}

fn format_meta_page(page: &mut PageWriteGuard<'_>, next: Option<PageId>) {
    page.reset();
    page.set_header(&PageHeader::new(PageType::FreeListMeta));
    page.write_u32(NEXT_OFFSET, PageId::to_link(next));
    page.write_u32(COUNT_OFFSET, 0);
}

fn entry_count(page: &Page) -> usize {
    page.read_u32(COUNT_OFFSET) as usize
}

fn next_meta(page: &Page) -> Option<PageId> {
    PageId::from_link(page.read_u32(NEXT_OFFSET))
}

fn pop_entry(page: &mut Page) -> Option<PageId> {
    let count = entry_count(page);
    if count == 0 {
        return None;
    }
    let page_id = PageId::new(page.read_u32(ENTRIES_OFFSET + (count - 1) * 4));
    page.write_u32(COUNT_OFFSET, (count - 1) as u32);
    Some(page_id)
}
