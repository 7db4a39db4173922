//! Buffer pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the buffer pool.
///
/// All fields are atomic and updated with `Ordering::Relaxed`: each counter
/// is independent, and readers only need an eventually consistent view.
///
/// Tests also use these counters to observe page traffic, e.g. that a
/// bloom-filter rejection never fetches a page.
///
/// # Example
/// ```
/// use crabtree::BufferPoolStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = BufferPoolStats::new();
/// stats.cache_hits.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().page_fetches(), 1);
/// ```
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Fetches served from a resident frame.
    pub cache_hits: AtomicU64,
    /// Fetches that had to load the page from disk.
    pub cache_misses: AtomicU64,
    pub evictions: AtomicU64,
    pub pages_read: AtomicU64,
    pub pages_written: AtomicU64,
}

impl BufferPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters out for display or comparison.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.evictions,
            &self.pages_read,
            &self.pages_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`BufferPoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
}

impl StatsSnapshot {
    /// Total page fetches, hit or miss.
    pub fn page_fetches(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        match self.page_fetches() {
            0 => 0.0,
            total => self.cache_hits as f64 / total as f64,
        }
    }

    /// Counter deltas since an earlier snapshot.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits - earlier.cache_hits,
            cache_misses: self.cache_misses - earlier.cache_misses,
            evictions: self.evictions - earlier.evictions,
            pages_read: self.pages_read - earlier.pages_read,
            pages_written: self.pages_written - earlier.pages_written,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ fetches: {}, hits: {}, misses: {}, evictions: {}, hit_rate: {:.2}% }}",
            self.page_fetches(),
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_hit_rate() {
        let stats = BufferPoolStats::new();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);

        stats.cache_hits.fetch_add(7, Ordering::Relaxed);
        stats.cache_misses.fetch_add(3, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.page_fetches(), 10);
        assert_eq!(snapshot.hit_rate(), 0.7);
    }

    #[test]
    fn test_since() {
        let stats = BufferPoolStats::new();
        stats.cache_hits.fetch_add(4, Ordering::Relaxed);
        let before = stats.snapshot();
        stats.cache_hits.fetch_add(2, Ordering::Relaxed);
        stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.page_fetches(), 3);
    }

    #[test]
    fn test_reset() {
        let stats = BufferPoolStats::new();
        stats.evictions.fetch_add(100, Ordering::Relaxed);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_display() {
        let stats = BufferPoolStats::new();
        stats.cache_hits.fetch_add(80, Ordering::Relaxed);
        stats.cache_misses.fetch_add(20, Ordering::Relaxed);

        let display = stats.snapshot().to_string();
        assert!(display.contains("fetches: 100"));
        assert!(display.contains("80.00%"));
    }
}
