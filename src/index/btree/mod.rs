//! B-tree index.
//!
//! - [`tuple`] / [`comparator`] / [`schema`] - what is stored and how it sorts
//! - [`frame`] - slotted page layout of leaves and interiors
//! - [`predicate`] / [`callback`] / [`cursor`] - range search
//! - [`BTree`] / [`BTreeAccessor`] - descent and structural modification

mod accessor;
pub mod callback;
pub mod comparator;
pub mod cursor;
pub mod frame;
pub mod predicate;
pub mod schema;
mod stats;
mod tree;
pub mod tuple;

pub use accessor::BTreeAccessor;
pub use callback::{NoOpOperationCallback, SearchOperationCallback};
pub use comparator::{FieldComparator, FieldType, MultiComparator};
pub use cursor::{CursorInitialState, CursorStep, RangeSearchCursor, SearchCursor};
pub use frame::{FindMode, NoMatchPolicy, SlotSearch, SlottedFrame};
pub use predicate::RangePredicate;
pub use schema::IndexSchema;
pub use stats::TreeIndexStats;
pub use tree::BTree;
pub use tuple::{OwnedTuple, TupleBuilder, TupleRef, TupleReference};
