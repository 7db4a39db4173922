//! Per-operation handle on a B-tree.

use std::sync::Arc;

use crate::buffer::LatchMode;
use crate::common::Result;

use super::callback::SearchOperationCallback;
use super::cursor::{RangeSearchCursor, SearchCursor};
use super::predicate::RangePredicate;
use super::tree::BTree;
use super::tuple::{OwnedTuple, TupleReference};

/// A tree plus the search operation callback of the transaction using it.
///
/// Every search started through the accessor consults the same callback.
pub struct BTreeAccessor<'a> {
    tree: &'a BTree,
    callback: Arc<dyn SearchOperationCallback>,
}

impl<'a> BTreeAccessor<'a> {
    pub fn new(tree: &'a BTree, callback: Arc<dyn SearchOperationCallback>) -> Self {
        Self { tree, callback }
    }

    pub fn tree(&self) -> &'a BTree {
        self.tree
    }

    /// A fresh cursor latching leaves in `mode`.
    pub fn create_search_cursor(&self, mode: LatchMode) -> RangeSearchCursor<'a> {
        RangeSearchCursor::new(mode)
    }

    /// Open `cursor` over `predicate`.
    pub fn search<C>(&self, cursor: &mut C, predicate: &RangePredicate) -> Result<()>
    where
        C: SearchCursor<'a> + ?Sized,
    {
        self.tree.search(cursor, predicate, Arc::clone(&self.callback))
    }

    /// Open `cursor` on exactly `key`.
    pub fn point_search<C>(&self, cursor: &mut C, key: OwnedTuple) -> Result<()>
    where
        C: SearchCursor<'a> + ?Sized,
    {
        self.search(cursor, &RangePredicate::point(key))
    }

    pub fn insert(&self, tuple: &OwnedTuple) -> Result<()> {
        self.tree.insert(tuple)
    }

    pub fn delete<K: TupleReference>(&self, key: &K) -> Result<OwnedTuple> {
        self.tree.delete(key)
    }

    pub fn update(&self, tuple: &OwnedTuple) -> Result<()> {
        self.tree.update(tuple)
    }

    pub fn upsert(&self, tuple: &OwnedTuple) -> Result<()> {
        self.tree.upsert(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::index::btree::{FieldType, IndexSchema, NoOpOperationCallback, TupleBuilder};
    use crate::storage::DiskManager;
    use tempfile::TempDir;

    #[test]
    fn test_accessor_round_trip() {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::create(dir.path().join("accessor.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(16, dm));
        let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Int64], 1).unwrap();
        let tree = BTree::create(bpm, schema).unwrap();

        let accessor = tree.create_accessor(Arc::new(NoOpOperationCallback));
        for k in 0..50 {
            accessor
                .insert(&TupleBuilder::new().add_i32(k).add_i64(k as i64 * 100).build())
                .unwrap();
        }
        accessor
            .upsert(&TupleBuilder::new().add_i32(7).add_i64(-1).build())
            .unwrap();
        accessor.delete(&TupleBuilder::new().add_i32(8).build()).unwrap();

        let mut cursor = accessor.create_search_cursor(LatchMode::Exclusive);
        accessor
            .point_search(&mut cursor, TupleBuilder::new().add_i32(7).build())
            .unwrap();
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.tuple().unwrap().int64_field(1), Some(-1));
        cursor.next();
        assert!(!cursor.has_next().unwrap());

        accessor
            .point_search(&mut cursor, TupleBuilder::new().add_i32(8).build())
            .unwrap();
        assert!(!cursor.has_next().unwrap());
        cursor.close();
    }
}
