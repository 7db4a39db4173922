//! crabtree - a latch-coupled B-tree storage core.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           crabtree                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              LSM components (index::lsm)                 │   │
//! │  │   DiskComponent + BloomFilter → LsmPointSearcher         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               B-tree (index::btree)                      │   │
//! │  │  BTree / BTreeAccessor → RangeSearchCursor               │   │
//! │  │  SlottedFrame · MultiComparator · RangePredicate         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Buffer Pool (buffer/)                     │   │
//! │  │  BufferPoolManager + Frame + LRU replacer + Statistics   │   │
//! │  │  PageReadGuard / PageWriteGuard / LatchedPage            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Storage Layer (storage/)                  │   │
//! │  │   DiskManager + Page + PageHeader + FreePageManager      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, config)
//! - [`storage`] - Disk I/O, page formats and page allocation
//! - [`buffer`] - Buffer pool, page latches and guards
//! - [`index`] - B-tree, bloom filters and LSM disk components
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use crabtree::index::btree::{
//!     BTree, FieldType, IndexSchema, NoOpOperationCallback, RangePredicate, RangeSearchCursor,
//!     SearchCursor, TupleBuilder, TupleReference,
//! };
//! use crabtree::{BufferPoolManager, DiskManager, LatchMode};
//!
//! let dm = DiskManager::create("my_index.db").unwrap();
//! let bpm = Arc::new(BufferPoolManager::new(64, dm));
//! let schema = IndexSchema::new(vec![FieldType::Int32], 1).unwrap();
//! let tree = BTree::create(bpm, schema).unwrap();
//!
//! for k in 1..=1000 {
//!     tree.insert(&TupleBuilder::new().add_i32(k).build()).unwrap();
//! }
//!
//! // 100 <= k < 200
//! let predicate = RangePredicate::new(
//!     Some(TupleBuilder::new().add_i32(100).build()),
//!     Some(TupleBuilder::new().add_i32(200).build()),
//!     true,
//!     false,
//! );
//! let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
//! tree.search(&mut cursor, &predicate, Arc::new(NoOpOperationCallback)).unwrap();
//! while cursor.has_next().unwrap() {
//!     println!("{:?}", cursor.tuple().and_then(|t| t.int32_field(0)));
//!     cursor.next();
//! }
//! cursor.close();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, Result, StorageConfig};

pub use buffer::{BufferPoolManager, BufferPoolStats, Frame, LatchMode, LatchedPage, StatsSnapshot};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{DiskManager, FreePageManager, LinkedListFreePageManager};
