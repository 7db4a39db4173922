//! Frame identifier type.

use std::fmt;

/// Index of a frame in the buffer pool's frame table.
///
/// Frames live in a fixed `Vec<Frame>`, so the id is a plain `usize` usable
/// directly as `frames[frame_id.0]`. Unlike [`PageId`](crate::PageId), a
/// frame id never reaches disk.
///
/// # Example
/// ```
/// use crabtree::FrameId;
///
/// let frame_id = FrameId::new(5);
/// assert_eq!(frame_id.to_string(), "Frame(5)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl FrameId {
    #[inline]
    pub fn new(id: usize) -> Self {
        FrameId(id)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_ordering_and_display() {
        assert!(FrameId::new(1) < FrameId::new(2));
        assert_eq!(FrameId::new(5), FrameId(5));
        assert_eq!(format!("{}", FrameId::new(42)), "Frame(42)");
    }
}
