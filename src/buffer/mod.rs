//! Buffer pool management.
//!
//! The buffer pool is the page cache every tree in a file shares. It
//! manages a fixed set of frames, each holding one page, and hands pages
//! out as pinned, latched guards.
//!
//! # Components
//! - [`BufferPoolManager`] - The page cache
//! - [`Frame`] - A slot in the pool holding a page + metadata
//! - [`PageReadGuard`] / [`PageWriteGuard`] / [`LatchedPage`] - RAII guards
//! - [`BufferPoolStats`] - Page traffic counters
//! - [`replacer`] - Eviction policy

mod buffer_pool_manager;
mod frame;
mod page_guard;
pub mod replacer;
mod stats;

pub use buffer_pool_manager::BufferPoolManager;
pub use frame::Frame;
pub use page_guard::{LatchMode, LatchedPage, PageReadGuard, PageWriteGuard};
pub use stats::{BufferPoolStats, StatsSnapshot};
