//! The 13-byte header every crabtree page starts with.

/// What a page holds. Stored as the first byte of the page.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Zeroed page: allocated but never written. Not checksummed.
    #[default]
    Invalid = 0,
    Data = 1,
    BTreeInternal = 2,
    BTreeLeaf = 3,
    /// Page parked on a free list, waiting for reuse.
    Free = 4,
    /// Root pointer and schema shape of one tree.
    IndexMeta = 5,
    /// Head of a free list.
    FreeListMeta = 6,
}

impl PageType {
    /// Decode a type byte. Unknown bytes decode as `Invalid`.
    pub fn from_u8(value: u8) -> Self {
        const TYPES: [PageType; 7] = [
            PageType::Invalid,
            PageType::Data,
            PageType::BTreeInternal,
            PageType::BTreeLeaf,
            PageType::Free,
            PageType::IndexMeta,
            PageType::FreeListMeta,
        ];
        TYPES
            .get(value as usize)
            .copied()
            .unwrap_or(PageType::Invalid)
    }

    /// True for the two slotted frame kinds.
    pub fn is_btree_frame(self) -> bool {
        matches!(self, PageType::BTreeInternal | PageType::BTreeLeaf)
    }
}

/// Decoded page header.
///
/// ```text
/// byte 0      page type
/// bytes 1..5  CRC32 of the whole page, computed with these 4 bytes zeroed
/// bytes 5..13 LSN (little-endian, unused until there is a log)
/// ```
///
/// Slotted frames, meta pages and free-list pages all lay their own fields
/// out starting at [`PageHeader::SIZE`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub checksum: u32,
    pub lsn: u64,
}

impl PageHeader {
    pub const SIZE: usize = 13;

    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 1;
    pub const OFFSET_LSN: usize = 5;

    const CHECKSUM_RANGE: std::ops::Range<usize> = Self::OFFSET_CHECKSUM..Self::OFFSET_LSN;
    const LSN_RANGE: std::ops::Range<usize> = Self::OFFSET_LSN..Self::SIZE;

    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            ..Self::default()
        }
    }

    /// Decode the header at the start of `data`.
    ///
    /// # Panics
    /// If `data` is shorter than [`PageHeader::SIZE`].
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[Self::CHECKSUM_RANGE]);
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&data[Self::LSN_RANGE]);

        Self {
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            checksum: u32::from_le_bytes(checksum),
            lsn: u64::from_le_bytes(lsn),
        }
    }

    /// Encode into the start of `data`; the rest of `data` is untouched.
    ///
    /// # Panics
    /// If `data` is shorter than [`PageHeader::SIZE`].
    pub fn write_to(&self, data: &mut [u8]) {
        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        data[Self::CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::LSN_RANGE].copy_from_slice(&self.lsn.to_le_bytes());
    }

    /// CRC32 of a full page, with the stored checksum treated as zero.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_LSN..]);
        hasher.finalize()
    }

    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    #[test]
    fn test_type_byte_decoding() {
        for ty in [
            PageType::Invalid,
            PageType::Data,
            PageType::BTreeInternal,
            PageType::BTreeLeaf,
            PageType::Free,
            PageType::IndexMeta,
            PageType::FreeListMeta,
        ] {
            assert_eq!(PageType::from_u8(ty as u8), ty);
        }
        assert_eq!(PageType::from_u8(7), PageType::Invalid);
        assert_eq!(PageType::from_u8(u8::MAX), PageType::Invalid);

        assert!(PageType::BTreeLeaf.is_btree_frame());
        assert!(!PageType::IndexMeta.is_btree_frame());
    }

    #[test]
    fn test_header_leaves_body_alone() {
        let mut page = [0xAAu8; PAGE_SIZE];
        let header = PageHeader {
            page_type: PageType::IndexMeta,
            checksum: 0x0102_0304,
            lsn: 99,
        };
        header.write_to(&mut page);

        assert_eq!(PageHeader::from_bytes(&page), header);
        assert_eq!(page[PageHeader::OFFSET_CHECKSUM], 0x04);
        assert!(page[PageHeader::SIZE..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_checksum_covers_body_and_lsn_only() {
        let mut page = [0u8; PAGE_SIZE];
        PageHeader::new(PageType::BTreeLeaf).write_to(&mut page);
        let base = PageHeader::compute_checksum(&page);

        page[PageHeader::CHECKSUM_RANGE].copy_from_slice(&base.to_le_bytes());
        assert_eq!(PageHeader::compute_checksum(&page), base);
        assert!(PageHeader::from_bytes(&page).verify_checksum(&page));

        page[PageHeader::OFFSET_LSN] = 1;
        assert!(!PageHeader::from_bytes(&page).verify_checksum(&page));

        page[PageHeader::OFFSET_LSN] = 0;
        page[PAGE_SIZE - 1] = 1;
        assert!(!PageHeader::from_bytes(&page).verify_checksum(&page));
    }
}
