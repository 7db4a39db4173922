//! Disk Manager - page-granular I/O on one index file.
//!
//! Every tree, free list and LSM component sharing a buffer pool lives in
//! the same file. The [`DiskManager`] only knows about fixed-size pages:
//! - reading a page (verifying its checksum)
//! - writing a page (stamping its checksum)
//! - growing the file by one zeroed page

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageType};

/// Page-granular access to a single database file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │  ...    │ Page N  │
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0     4096            N×4096
/// ```
///
/// There is no file header: what a page holds is recorded in its own
/// [`PageHeader`](crate::storage::page::PageHeader), and the trees find
/// their meta pages through ids the caller keeps.
///
/// # Thread Safety
/// Not synchronized. The `BufferPoolManager` owns the only instance behind a
/// mutex.
///
/// # Integrity and Durability
/// Pages are checksummed on the way out and verified on the way in, unless
/// they were never initialized (`PageType::Invalid`, e.g. freshly allocated
/// zero pages). Every write and every file extension is followed by
/// `fsync()`.
pub struct DiskManager {
    file: File,
    page_count: u32,
}

impl DiskManager {
    /// Create a new, empty database file.
    ///
    /// # Errors
    /// Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        debug!(path = %path.as_ref().display(), "created database file");
        Ok(Self { file, page_count: 0 })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// - I/O errors if the file is missing or unreadable
    /// - `Error::CorruptPage` if the file ends in a partial page
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let len = file.metadata()?.len();
        let page_count = (len / PAGE_SIZE as u64) as u32;
        if len % PAGE_SIZE as u64 != 0 {
            return Err(Error::CorruptPage {
                page_id: page_count,
                reason: "file ends in a partial page",
            });
        }

        debug!(path = %path.as_ref().display(), pages = page_count, "opened database file");
        Ok(Self { file, page_count })
    }

    /// Open the file if it exists, create it otherwise.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page.
    ///
    /// # Errors
    /// - `Error::PageNotFound` beyond the end of the file
    /// - `Error::CorruptPage` if an initialized page fails its checksum
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        self.seek_to(page_id)?;

        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        if page.page_type() != PageType::Invalid && !page.verify_checksum() {
            return Err(Error::CorruptPage {
                page_id: page_id.0,
                reason: "checksum mismatch",
            });
        }
        Ok(page)
    }

    /// Write a page that [`allocate_page`](Self::allocate_page) handed out.
    ///
    /// The checksum is stamped on a copy; `page` itself may be latched shared
    /// by readers and is left untouched.
    ///
    /// # Errors
    /// `Error::PageNotFound` beyond the end of the file.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let mut stamped = Page::new();
        stamped.copy_from(page);
        stamped.update_checksum();

        self.seek_to(page_id)?;
        self.file.write_all(stamped.as_slice())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Grow the file by one zeroed page and return its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId::new(self.page_count);
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        self.file.set_len(Self::offset_of(page_id) + PAGE_SIZE as u64)?;
        self.file.sync_all()?;
        self.page_count += 1;

        trace!(%page_id, "extended database file");
        Ok(page_id)
    }

    /// Number of pages in the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Size of the file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.page_count as u64 * PAGE_SIZE as u64
    }

    #[inline]
    fn offset_of(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }

    fn seek_to(&mut self, page_id: PageId) -> Result<()> {
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }
        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageHeader;
    use tempfile::tempdir;

    fn leaf_page(marker: u32) -> Page {
        let mut page = Page::new();
        page.set_header(&PageHeader::new(PageType::BTreeLeaf));
        page.write_u32(64, marker);
        page
    }

    #[test]
    fn test_file_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");

        assert!(DiskManager::open(&path).is_err());
        {
            let mut dm = DiskManager::open_or_create(&path).unwrap();
            assert_eq!(dm.file_size(), 0);
            for expected in 0..3 {
                assert_eq!(dm.allocate_page().unwrap(), PageId::new(expected));
            }
        }
        assert!(DiskManager::create(&path).is_err());

        let dm = DiskManager::open_or_create(&path).unwrap();
        assert_eq!(dm.page_count(), 3);
        assert_eq!(dm.file_size(), 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_pages_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            for marker in 0..8 {
                let page_id = dm.allocate_page().unwrap();
                dm.write_page(page_id, &leaf_page(marker * 1000)).unwrap();
            }
            // A page allocated but never written reads back as zeros.
            dm.allocate_page().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        for marker in 0..8 {
            let page = dm.read_page(PageId::new(marker)).unwrap();
            assert_eq!(page.page_type(), PageType::BTreeLeaf);
            assert!(page.verify_checksum());
            assert_eq!(page.read_u32(64), marker * 1000);
        }
        let blank = dm.read_page(PageId::new(8)).unwrap();
        assert_eq!(blank.page_type(), PageType::Invalid);
        assert!(blank.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_leaves_caller_page_unstamped() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("index.db")).unwrap();
        let page_id = dm.allocate_page().unwrap();

        let page = leaf_page(7);
        let before = page.header().checksum;
        dm.write_page(page_id, &page).unwrap();
        assert_eq!(page.header().checksum, before);
        assert_ne!(dm.read_page(page_id).unwrap().header().checksum, before);
    }

    #[test]
    fn test_flipped_byte_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let mut dm = DiskManager::create(&path).unwrap();
            dm.allocate_page().unwrap();
            let page_id = dm.allocate_page().unwrap();
            dm.write_page(page_id, &leaf_page(0xC0FFEE)).unwrap();
        }

        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(PAGE_SIZE as u64 + 64)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        assert!(matches!(
            dm.read_page(PageId::new(1)),
            Err(Error::CorruptPage { page_id: 1, .. })
        ));
        // Its neighbour was never initialized and is not checked.
        assert!(dm.read_page(PageId::new(0)).is_ok());
    }

    #[test]
    fn test_out_of_range_pages() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("index.db")).unwrap();

        assert!(matches!(
            dm.write_page(PageId::new(0), &Page::new()),
            Err(Error::PageNotFound(0))
        ));
        dm.allocate_page().unwrap();
        assert!(matches!(dm.read_page(PageId::new(1)), Err(Error::PageNotFound(1))));
    }

    #[test]
    fn test_partial_trailing_page_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let mut dm = DiskManager::create(&path).unwrap();
            dm.allocate_page().unwrap();
        }
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(PAGE_SIZE as u64 + 100)
            .unwrap();

        assert!(matches!(
            DiskManager::open(&path),
            Err(Error::CorruptPage { page_id: 1, .. })
        ));
    }
}
