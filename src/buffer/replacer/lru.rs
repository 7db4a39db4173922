//! Least-recently-used replacement policy.

use std::collections::HashMap;

use crate::common::FrameId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_access: u64,
    evictable: bool,
}

/// LRU eviction over the frames the pool has handed out.
///
/// Every access stamps the frame with a logical clock. A frame only becomes
/// a candidate once its pin count drops to zero and the pool marks it
/// evictable. Cursor scans touch each leaf once and move on, so under LRU
/// the hot upper levels of a tree outlive the leaves a scan walked past.
#[derive(Debug, Default)]
pub struct LruReplacer {
    entries: HashMap<FrameId, Entry>,
    clock: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an access to a frame, making it the most recently used.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.clock += 1;
        let clock = self.clock;
        self.entries
            .entry(frame_id)
            .and_modify(|entry| entry.last_access = clock)
            .or_insert(Entry {
                last_access: clock,
                evictable: false,
            });
    }

    /// Mark whether a tracked frame may be chosen as a victim.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(entry) = self.entries.get_mut(&frame_id) {
            entry.evictable = evictable;
        }
    }

    /// Pick and forget the least recently used evictable frame.
    pub fn evict(&mut self) -> Option<FrameId> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.evictable)
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(&frame_id, _)| frame_id)?;
        self.entries.remove(&victim);
        Some(victim)
    }

    /// Stop tracking a frame (its page was deleted).
    pub fn remove(&mut self, frame_id: FrameId) {
        self.entries.remove(&frame_id);
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.entries.values().filter(|entry| entry.evictable).count()
    }
}
