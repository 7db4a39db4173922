//! Immutable LSM disk components and point search across them.
//!
//! Components are produced by [`DiskComponent::flush`] and [`merge`]; each
//! carries a bloom filter so [`LsmPointSearcher`] can skip the ones that
//! cannot hold a key.

mod component;
mod search;

pub use component::{merge, DiskComponent};
pub use search::LsmPointSearcher;
