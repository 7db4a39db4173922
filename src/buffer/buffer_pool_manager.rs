//! Buffer Pool Manager - the page cache every index runs on.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Shared/exclusive page latches handed out as RAII guards
//! - Automatic dirty page write-back

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{BufferPoolStats, Frame, LatchMode, LatchedPage, PageReadGuard, PageWriteGuard};
use crate::common::{Error, FrameId, PageId, Result, StorageConfig};
use crate::storage::DiskManager;

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │        frames: Vec<Frame>         │   │
/// │  │PageId → Fid  │─▶│  [Frame0] [Frame1] [Frame2] ...   │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │  free_list   │  │   replacer   │  │disk_manager  │      │
/// │  │ Vec<FrameId> │  │ LruReplacer  │  │   Mutex      │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `page_table`: `RwLock`: many readers, few writers
/// - `free_list`: `Mutex`: always modified
/// - `replacer`: `Mutex`: internal state changes on access
/// - `disk_manager`: `Mutex`: single-threaded I/O
/// - `load_latch`: `Mutex`: serializes cache misses, evictions and page
///   creation, so a page is never loaded into two frames and an evicted
///   dirty page is on disk before anyone can read it back
/// - `frames`: No lock: fixed size, each Frame has internal locks
/// - `stats`: No lock: all atomic counters
///
/// Cache hits pin their frame while holding the page table read lock; an
/// eviction re-checks the pin count under the write lock before it unmaps
/// the victim, so a frame being pinned is never reassigned.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Mutex<Vec<FrameId>>,
    replacer: Mutex<LruReplacer>,
    disk_manager: Mutex<DiskManager>,
    load_latch: Mutex<()>,
    stats: BufferPoolStats,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<FrameId> = (0..pool_size).rev().map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(LruReplacer::new()),
            disk_manager: Mutex::new(disk_manager),
            load_latch: Mutex::new(()),
            stats: BufferPoolStats::new(),
        }
    }

    /// Create a buffer pool sized by a validated [`StorageConfig`].
    pub fn with_config(config: &StorageConfig, disk_manager: DiskManager) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.pool_size, disk_manager))
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page for reading (shared latch).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::NoFreeFrames` if all frames are pinned
    /// - `Error::Io` / `Error::CorruptPage` if the page cannot be read
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive latch).
    ///
    /// Same as `fetch_page_read`, but returns an exclusive guard.
    /// The page is automatically marked dirty when the guard drops.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page latched in the requested mode.
    pub fn fetch_page_latched(&self, page_id: PageId, mode: LatchMode) -> Result<LatchedPage<'_>> {
        Ok(match mode {
            LatchMode::Shared => LatchedPage::Shared(self.fetch_page_read(page_id)?),
            LatchMode::Exclusive => LatchedPage::Exclusive(self.fetch_page_write(page_id)?),
        })
    }

    // ========================================================================
    // Public API: Create and delete pages
    // ========================================================================

    /// Allocate a new zeroed page on disk without bringing it into the pool.
    pub fn allocate_page_id(&self) -> Result<PageId> {
        let page_id = self.disk_manager.lock().allocate_page()?;
        trace!(%page_id, "allocated page on disk");
        Ok(page_id)
    }

    /// Allocate a new page on disk and load it into the buffer pool.
    ///
    /// Returns a write guard for the new page.
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if all frames are pinned
    /// - I/O errors from disk allocation
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let load = self.load_latch.lock();

        let frame_id = self.get_free_frame()?;

        let page_id = match self.disk_manager.lock().allocate_page() {
            Ok(page_id) => page_id,
            Err(err) => {
                self.free_list.lock().push(frame_id);
                return Err(err);
            }
        };

        let frame = &self.frames[frame_id.0];
        frame.page_mut().reset();
        frame.occupy(page_id);

        self.page_table.write().insert(page_id, frame_id);
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }
        drop(load);

        let lock = frame.page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Delete a page from the buffer pool.
    ///
    /// The page must not be pinned. This removes the page from the buffer pool
    /// but does NOT deallocate it on disk; that is the free page manager's job.
    ///
    /// # Errors
    /// - `Error::PagePinned` if the page is still pinned
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let _load = self.load_latch.lock();
        let mut pt = self.page_table.write();

        let frame_id = match pt.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()), // Page not in pool, nothing to do
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::PagePinned(page_id.0));
        }

        pt.remove(&page_id);
        drop(pt);

        // A deleted page is not written back.
        frame.vacate();

        self.replacer.lock().remove(frame_id);
        self.free_list.lock().push(frame_id);

        Ok(())
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Flush a specific page to disk if it's dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()), // Page not in pool
        };

        self.flush_frame(frame_id, page_id)
    }

    /// Flush all dirty pages to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };

        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Get the number of pages in the buffer pool.
    pub fn page_count(&self) -> usize {
        self.page_table.read().len()
    }

    /// Pin count of a resident page, or `None` if the page is not in the pool.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let pt = self.page_table.read();
        pt.get(&page_id).map(|fid| self.frames[fid.0].pin_count())
    }

    /// Total number of pinned frames across the pool.
    pub fn pinned_frame_count(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_pinned()).count()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Unpin a page. Called by the page guards on drop.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        if frame.unpin() == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Fetch a page into the buffer pool, returning its pinned frame ID.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        if let Some(frame_id) = self.try_pin_resident(page_id) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }

        let _load = self.load_latch.lock();

        // Someone else may have loaded it while we waited.
        if let Some(frame_id) = self.try_pin_resident(page_id) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }

        self.handle_cache_miss(page_id)
    }

    /// Pin the frame holding `page_id` if the page is resident.
    ///
    /// The pin happens under the page table read lock; see the eviction
    /// re-check in [`Self::evict_page`].
    fn try_pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let pt = self.page_table.read();
        let frame_id = *pt.get(&page_id)?;
        self.frames[frame_id.0].pin();
        drop(pt);

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
        Some(frame_id)
    }

    /// Load a page from disk into a fresh frame. Caller holds `load_latch`.
    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = self.get_free_frame()?;

        let page_data = match self.disk_manager.lock().read_page(page_id) {
            Ok(page) => page,
            Err(err) => {
                self.free_list.lock().push(frame_id);
                return Err(err);
            }
        };
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        frame.page_mut().copy_from(&page_data);
        frame.occupy(page_id);

        self.page_table.write().insert(page_id, frame_id);
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get a free frame, evicting if necessary. Caller holds `load_latch`.
    fn get_free_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        self.evict_page()
    }

    /// Evict a page and return its frame. Caller holds `load_latch`.
    fn evict_page(&self) -> Result<FrameId> {
        loop {
            let frame_id = self.replacer.lock().evict().ok_or(Error::NoFreeFrames)?;
            let frame = &self.frames[frame_id.0];

            let old_page_id = {
                let mut pt = self.page_table.write();
                if frame.is_pinned() {
                    // Pinned by a cache hit after the replacer chose it.
                    drop(pt);
                    let mut replacer = self.replacer.lock();
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, false);
                    continue;
                }
                let old = frame.page_id();
                if let Some(pid) = old {
                    pt.remove(&pid);
                }
                old
            };

            self.stats.evictions.fetch_add(1, Ordering::Relaxed);

            if let Some(pid) = old_page_id {
                trace!(page_id = %pid, frame_id = %frame_id, "evicting page");
                if let Err(err) = self.flush_frame(frame_id, pid) {
                    // Put the page back so its contents are not lost.
                    self.page_table.write().insert(pid, frame_id);
                    let mut replacer = self.replacer.lock();
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, true);
                    return Err(err);
                }
            }

            frame.vacate();
            return Ok(frame_id);
        }
    }

    /// Flush a frame to disk if dirty.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        if frame.is_dirty() {
            // Hold the shared latch while writing so the image is consistent.
            let page = frame.page();
            if frame.page_id() != Some(page_id) {
                // Reassigned since the caller looked it up.
                return Ok(());
            }
            self.disk_manager.lock().write_page(page_id, &page)?;
            drop(page);

            frame.clear_dirty();
            self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}
