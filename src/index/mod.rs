//! Index structures.
//!
//! - [`btree`] - the B-tree, its slotted frames and range search cursors
//! - [`bloom`] - bloom filters and the bloom-aware point-search cursor
//! - [`lsm`] - immutable LSM disk components built from B-trees

pub mod bloom;
pub mod btree;
pub mod lsm;
