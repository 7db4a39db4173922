//! Page identifier type.

use std::fmt;

/// Identifies a page on disk.
///
/// Using `u32` allows for 4 billion pages:
/// - 4,294,967,296 pages × 4KB = 16TB maximum database size
///
/// On disk, page links (next leaf, child pointers, free-list chains) are
/// stored as raw `u32` values with [`PageId::INVALID`] meaning "no page".
/// [`PageId::from_link`] and [`PageId::to_link`] convert between the raw
/// form and `Option<PageId>`.
///
/// # Example
/// ```
/// use crabtree::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.0, 42);
/// assert_eq!(PageId::from_link(u32::MAX), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page": an empty link or an unset root.
    pub const INVALID: PageId = PageId(u32::MAX);

    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Decode an on-disk page link.
    #[inline]
    pub fn from_link(raw: u32) -> Option<PageId> {
        let page_id = PageId(raw);
        page_id.is_valid().then_some(page_id)
    }

    /// Encode an optional page as an on-disk page link.
    #[inline]
    pub fn to_link(page_id: Option<PageId>) -> u32 {
        page_id.unwrap_or(Self::INVALID).0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
