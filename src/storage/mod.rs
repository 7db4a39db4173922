//! Storage layer - disk I/O, page formats and page allocation.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level file I/O
//! - [`page`] - Page types and layouts
//! - [`free_page_manager`] - Recycling of page ids through a chain of
//!   free-list meta pages

mod disk_manager;
pub mod free_page_manager;
pub mod page;

pub use disk_manager::DiskManager;
pub use free_page_manager::{FreePageManager, LinkedListFreePageManager};
