//! Eviction policy for the buffer pool.
//!
//! [`LruReplacer`] tracks when each frame was last handed out and picks the
//! least recently used unpinned frame as the victim.

mod lru;

pub use lru::LruReplacer;
