//! Bloom filters for LSM disk components.

mod cursor;
mod filter;

pub use cursor::BloomFilterPointSearchCursor;
pub use filter::{BloomFilter, BloomFilterBuilder, KeyHashes};
