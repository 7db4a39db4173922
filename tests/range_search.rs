//! Range search over a real tree: bounds, peeking, empty leaves.

use std::sync::Arc;

use crabtree::index::btree::{
    BTree, FieldType, IndexSchema, MultiComparator, NoOpOperationCallback, OwnedTuple,
    RangePredicate, RangeSearchCursor, SearchCursor, TupleBuilder, TupleReference,
};
use crabtree::{BufferPoolManager, DiskManager, Error, LatchMode, PageId};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use tempfile::TempDir;

fn create_tree(pool_size: usize, keys: impl IntoIterator<Item = i32>) -> (BTree, TempDir) {
    let dir = TempDir::new().unwrap();
    let dm = DiskManager::create(dir.path().join("range.db")).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(pool_size, dm));
    let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Utf8], 1).unwrap();
    let tree = BTree::create(bpm, schema).unwrap();
    for k in keys {
        tree.insert(&row(k)).unwrap();
    }
    (tree, dir)
}

fn row(k: i32) -> OwnedTuple {
    TupleBuilder::new().add_i32(k).add_str(&format!("row-{k}")).build()
}

fn key(k: i32) -> OwnedTuple {
    TupleBuilder::new().add_i32(k).build()
}

fn predicate(lo: Option<i32>, hi: Option<i32>, lo_incl: bool, hi_incl: bool) -> RangePredicate {
    RangePredicate::new(lo.map(key), hi.map(key), lo_incl, hi_incl)
}

/// Drain a search into its keys.
fn scan(tree: &BTree, predicate: &RangePredicate) -> Vec<i32> {
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
    tree.search(&mut cursor, predicate, Arc::new(NoOpOperationCallback)).unwrap();
    let mut keys = Vec::new();
    while cursor.has_next().unwrap() {
        keys.push(cursor.tuple().unwrap().int32_field(0).unwrap());
        cursor.next();
    }
    cursor.close();
    keys
}

/// Keys grouped by the leaf they were read from.
fn keys_by_leaf(tree: &BTree) -> Vec<(PageId, Vec<i32>)> {
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
    tree.search(&mut cursor, &RangePredicate::unbounded(), Arc::new(NoOpOperationCallback))
        .unwrap();
    let mut leaves: Vec<(PageId, Vec<i32>)> = Vec::new();
    while cursor.has_next().unwrap() {
        let page_id = cursor.page_id().unwrap();
        let k = cursor.tuple().unwrap().int32_field(0).unwrap();
        match leaves.last_mut() {
            Some((last, keys)) if *last == page_id => keys.push(k),
            _ => leaves.push((page_id, vec![k])),
        }
        cursor.next();
    }
    leaves
}

#[test]
fn test_half_open_range_over_thousand_keys() {
    let (tree, _dir) = create_tree(64, 1..=1000);

    let keys = scan(&tree, &predicate(Some(100), Some(200), true, false));
    assert_eq!(keys.len(), 100);
    assert_eq!(keys, (100..200).collect::<Vec<_>>());
}

#[test]
fn test_range_correctness_property() {
    const N: i32 = 600;
    let (tree, _dir) = create_tree(64, 1..=N);

    let bound = prop::option::of(-10..N + 10);
    let strategy = (bound.clone(), bound, any::<bool>(), any::<bool>());

    let mut runner = TestRunner::new(Config::with_cases(200));
    runner
        .run(&strategy, |(lo, hi, lo_incl, hi_incl)| {
            let expected: Vec<i32> = (1..=N)
                .filter(|&k| match lo {
                    None => true,
                    Some(lo) if lo_incl => k >= lo,
                    Some(lo) => k > lo,
                })
                .filter(|&k| match hi {
                    None => true,
                    Some(hi) if hi_incl => k <= hi,
                    Some(hi) => k < hi,
                })
                .collect();
            let actual = scan(&tree, &predicate(lo, hi, lo_incl, hi_incl));
            prop_assert_eq!(actual, expected);
            Ok(())
        })
        .unwrap();

    // Nothing stays pinned once every cursor is closed.
    assert_eq!(tree.buffer_pool().pinned_frame_count(), 0);
}

#[test]
fn test_has_next_is_idempotent() {
    let (tree, _dir) = create_tree(64, 1..=500);
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
    tree.search(&mut cursor, &predicate(Some(150), None, false, true), Arc::new(NoOpOperationCallback))
        .unwrap();

    let mut seen = 0;
    while cursor.has_next().unwrap() {
        let first = cursor.tuple().unwrap().to_owned_tuple();
        assert!(cursor.has_next().unwrap());
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.tuple().unwrap().to_owned_tuple(), first);
        assert_eq!(first.int32_field(0), Some(151 + seen));
        seen += 1;
        cursor.next();
    }
    assert_eq!(seen, 350);

    // Exhausted stays exhausted.
    assert!(!cursor.has_next().unwrap());
    assert!(cursor.tuple().is_none());
    cursor.close();
    cursor.close();
}

#[test]
fn test_empty_leaves_are_skipped() {
    let (tree, _dir) = create_tree(64, 1..=1000);
    let leaves = keys_by_leaf(&tree);
    assert!(leaves.len() >= 4, "need several leaves, got {}", leaves.len());

    // Empty two neighbouring leaves in the middle of the chain.
    let emptied: Vec<i32> = leaves[1..3].iter().flat_map(|(_, keys)| keys.clone()).collect();
    for &k in &emptied {
        tree.delete(&key(k)).unwrap();
    }
    assert_eq!(tree.stats().unwrap().empty_leaves(), 2);

    let expected: Vec<i32> = (1..=1000).filter(|k| !emptied.contains(k)).collect();
    assert_eq!(scan(&tree, &RangePredicate::unbounded()), expected);

    // A range that starts inside the emptied stretch.
    let lo = emptied[emptied.len() / 2];
    let hi = emptied[emptied.len() - 1] + 5;
    let in_range: Vec<i32> = expected.iter().copied().filter(|&k| k >= lo && k <= hi).collect();
    assert_eq!(in_range.len(), 5);
    assert_eq!(scan(&tree, &predicate(Some(lo), Some(hi), true, true)), in_range);

    // A range entirely inside the emptied stretch.
    assert!(scan(&tree, &predicate(Some(emptied[0]), Some(lo), true, true)).is_empty());
}

#[test]
fn test_boundary_equivalence() {
    let (tree, _dir) = create_tree(32, (0..100).map(|k| k * 2));

    assert_eq!(scan(&tree, &RangePredicate::point(key(40))), vec![40]);
    assert!(scan(&tree, &RangePredicate::point(key(41))).is_empty());
    assert!(scan(&tree, &predicate(Some(40), Some(40), false, false)).is_empty());
    assert!(scan(&tree, &predicate(Some(40), Some(40), true, false)).is_empty());
    // Singleton range (40, 42) holds nothing; [40, 42) holds only 40.
    assert!(scan(&tree, &predicate(Some(40), Some(42), false, false)).is_empty());
    assert_eq!(scan(&tree, &predicate(Some(40), Some(42), true, false)), vec![40]);
    // Inverted bounds.
    assert!(scan(&tree, &predicate(Some(50), Some(10), true, true)).is_empty());
}

#[test]
fn test_empty_tree() {
    let (tree, _dir) = create_tree(8, std::iter::empty());
    assert!(scan(&tree, &RangePredicate::unbounded()).is_empty());
    assert!(scan(&tree, &RangePredicate::point(key(1))).is_empty());
}

#[test]
fn test_prefix_search_on_composite_key() {
    let dir = TempDir::new().unwrap();
    let dm = DiskManager::create(dir.path().join("composite.db")).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(32, dm));
    let schema = IndexSchema::new(vec![FieldType::Int32, FieldType::Int32], 2).unwrap();
    let tree = BTree::create(bpm, schema).unwrap();

    for a in 0..20 {
        for b in 0..30 {
            tree.insert(&TupleBuilder::new().add_i32(a).add_i32(b).build()).unwrap();
        }
    }

    let prefix = TupleBuilder::new().add_i32(7).build();
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);
    tree.search(
        &mut cursor,
        &RangePredicate::new(Some(prefix.clone()), Some(prefix), true, true),
        Arc::new(NoOpOperationCallback),
    )
    .unwrap();

    let mut pairs = Vec::new();
    while cursor.has_next().unwrap() {
        let t = cursor.tuple().unwrap();
        pairs.push((t.int32_field(0).unwrap(), t.int32_field(1).unwrap()));
        cursor.next();
    }
    assert_eq!(pairs, (0..30).map(|b| (7, b)).collect::<Vec<_>>());

    // Low bound on the full key, high bound on the prefix: (7, 25) < k <= (8, *).
    let low = TupleBuilder::new().add_i32(7).add_i32(25).build();
    let high = TupleBuilder::new().add_i32(8).build();
    tree.search(
        &mut cursor,
        &RangePredicate::new(Some(low), Some(high), false, true).with_comparators(
            Some(MultiComparator::from_types(&[FieldType::Int32, FieldType::Int32])),
            Some(MultiComparator::from_types(&[FieldType::Int32])),
        ),
        Arc::new(NoOpOperationCallback),
    )
    .unwrap();
    let mut count = 0;
    while cursor.has_next().unwrap() {
        count += 1;
        cursor.next();
    }
    assert_eq!(count, 4 + 30);
}

#[test]
fn test_mismatched_predicates_fail_at_open() {
    let (tree, _dir) = create_tree(16, 0..10);
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);

    let wide = TupleBuilder::new().add_i32(1).add_str("x").build();
    let result = tree.search(
        &mut cursor,
        &RangePredicate::new(Some(wide), None, true, true),
        Arc::new(NoOpOperationCallback),
    );
    assert!(matches!(result, Err(Error::PredicateMismatch(_))));

    let wrong_type = TupleBuilder::new().add_i64(1).build();
    let result = tree.search(
        &mut cursor,
        &RangePredicate::new(None, Some(wrong_type), true, true),
        Arc::new(NoOpOperationCallback),
    );
    assert!(matches!(result, Err(Error::PredicateMismatch(_))));
    assert_eq!(tree.buffer_pool().pinned_frame_count(), 0);
}

#[test]
fn test_cursor_pins_one_leaf_and_releases_it() {
    let (tree, _dir) = create_tree(64, 1..=1000);
    let bpm = Arc::clone(tree.buffer_pool());

    let mut cursor = RangeSearchCursor::new(LatchMode::Exclusive);
    tree.search(&mut cursor, &RangePredicate::unbounded(), Arc::new(NoOpOperationCallback))
        .unwrap();

    let mut leaves = 0;
    let mut last_page = None;
    while cursor.has_next().unwrap() {
        assert_eq!(bpm.pinned_frame_count(), 1);
        let page_id = cursor.page_id();
        assert_eq!(bpm.get_pin_count(page_id.unwrap()), Some(1));
        if page_id != last_page {
            leaves += 1;
            last_page = page_id;
        }
        cursor.next();
    }
    assert!(leaves > 1);

    // Exhaustion already released the last leaf.
    assert_eq!(bpm.pinned_frame_count(), 0);
    cursor.close();
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_reopen_without_close_releases_previous_leaf() {
    let (tree, _dir) = create_tree(64, 1..=1000);
    let bpm = Arc::clone(tree.buffer_pool());
    let mut cursor = RangeSearchCursor::new(LatchMode::Shared);

    tree.search(&mut cursor, &predicate(Some(10), None, true, true), Arc::new(NoOpOperationCallback))
        .unwrap();
    assert!(cursor.has_next().unwrap());
    assert_eq!(bpm.pinned_frame_count(), 1);

    tree.search(&mut cursor, &predicate(Some(900), None, true, true), Arc::new(NoOpOperationCallback))
        .unwrap();
    assert_eq!(bpm.pinned_frame_count(), 1);
    assert!(cursor.has_next().unwrap());
    assert_eq!(cursor.tuple().unwrap().int32_field(0), Some(900));
    cursor.reset();
    assert_eq!(bpm.pinned_frame_count(), 0);
}
