//! Error types for crabtree.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in crabtree.
///
/// Buffer pool, free page manager, B-tree, cursor and LSM layers all report
/// through this one enum. Nothing is retried inside the crate; an error ends
/// the current operation and the caller decides what to do next.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    ///
    /// This is the "disk error" kind: a page read or write fault surfaced by
    /// the buffer pool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk.
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("No free frames available in buffer pool")]
    NoFreeFrames,

    /// The provided page ID is invalid (e.g., the sentinel id).
    #[error("Invalid page ID: {0}")]
    InvalidPageId(u32),

    /// Attempted to delete a page that is still pinned.
    #[error("Page {0} is still pinned")]
    PagePinned(u32),

    /// A page failed its checksum or does not hold what its reader expects.
    #[error("Page {page_id} is corrupt: {reason}")]
    CorruptPage { page_id: u32, reason: &'static str },

    /// Insert of a key that is already present.
    #[error("Duplicate key")]
    DuplicateKey,

    /// Delete or update of a key that is not present.
    #[error("Key not found")]
    KeyNotFound,

    /// A tuple too large to share a page with its siblings.
    #[error("Tuple of {size} bytes exceeds the maximum of {max} bytes")]
    TupleTooLarge { size: usize, max: usize },

    /// A tuple whose shape does not match the index schema.
    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    /// A range predicate that cannot be evaluated against the index.
    ///
    /// This is a programming error and is reported at `open()`.
    #[error("Predicate mismatch: {0}")]
    PredicateMismatch(String),

    /// A mutation path expected an exclusive latch but holds a shared one.
    #[error("Page {0} is not latched exclusively")]
    NotExclusivelyLatched(u32),

    /// The search operation callback failed while reconciling a tuple.
    #[error("Search callback failed: {0}")]
    Callback(String),

    /// Invalid runtime configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
