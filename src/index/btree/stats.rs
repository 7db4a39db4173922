//! Shape statistics gathered by walking a tree.

use std::fmt;

/// Page counts and fill of one B-tree.
///
/// Built by [`BTree::stats`](super::BTree::stats); a snapshot, not kept up
/// to date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeIndexStats {
    levels: usize,
    leaf_pages: usize,
    interior_pages: usize,
    tuple_count: usize,
    empty_leaves: usize,
    leaf_fill_total: f64,
    interior_fill_total: f64,
    free_pages: usize,
}

impl TreeIndexStats {
    pub(crate) fn new(levels: usize) -> Self {
        Self {
            levels,
            ..Self::default()
        }
    }

    pub(crate) fn add_leaf(&mut self, tuples: usize, fill: f64) {
        self.leaf_pages += 1;
        self.tuple_count += tuples;
        if tuples == 0 {
            self.empty_leaves += 1;
        }
        self.leaf_fill_total += fill;
    }

    pub(crate) fn add_interior(&mut self, fill: f64) {
        self.interior_pages += 1;
        self.interior_fill_total += fill;
    }

    pub(crate) fn set_free_pages(&mut self, free_pages: usize) {
        self.free_pages = free_pages;
    }

    /// Height of the tree; 1 for a lone root leaf.
    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn leaf_pages(&self) -> usize {
        self.leaf_pages
    }

    pub fn interior_pages(&self) -> usize {
        self.interior_pages
    }

    pub fn tuple_count(&self) -> usize {
        self.tuple_count
    }

    /// Leaves left with no tuples by deletes.
    pub fn empty_leaves(&self) -> usize {
        self.empty_leaves
    }

    /// Pages waiting in the tree's free list.
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    pub fn avg_leaf_fill(&self) -> f64 {
        average(self.leaf_fill_total, self.leaf_pages)
    }

    pub fn avg_interior_fill(&self) -> f64 {
        average(self.interior_fill_total, self.interior_pages)
    }
}

fn average(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

impl fmt::Display for TreeIndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "levels: {}, leaves: {} ({} empty, {:.1}% full), interiors: {} ({:.1}% full), tuples: {}, free pages: {}",
            self.levels,
            self.leaf_pages,
            self.empty_leaves,
            self.avg_leaf_fill() * 100.0,
            self.interior_pages,
            self.avg_interior_fill() * 100.0,
            self.tuple_count,
            self.free_pages
        )
    }
}
