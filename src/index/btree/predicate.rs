//! Range predicate: the bounds of one scan.

use crate::common::{Error, Result};

use super::comparator::MultiComparator;
use super::tuple::{OwnedTuple, TupleReference};

/// Low/high key bounds with per-bound inclusivity and comparators.
///
/// A missing low key starts the scan at the first tuple of the index; a
/// missing high key scans to the end. A bound without an explicit
/// comparator is compared on as many leading key fields as it carries, so a
/// one-field key against a two-field index is a prefix search.
///
/// # Example
/// ```
/// use crabtree::index::btree::{RangePredicate, TupleBuilder};
///
/// // 100 <= k < 200
/// let predicate = RangePredicate::new(
///     Some(TupleBuilder::new().add_i32(100).build()),
///     Some(TupleBuilder::new().add_i32(200).build()),
///     true,
///     false,
/// );
/// assert!(predicate.low_inclusive());
/// assert!(!predicate.is_point());
/// ```
#[derive(Debug, Clone)]
pub struct RangePredicate {
    low_key: Option<OwnedTuple>,
    high_key: Option<OwnedTuple>,
    low_inclusive: bool,
    high_inclusive: bool,
    low_cmp: Option<MultiComparator>,
    high_cmp: Option<MultiComparator>,
}

impl RangePredicate {
    pub fn new(
        low_key: Option<OwnedTuple>,
        high_key: Option<OwnedTuple>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Self {
        Self {
            low_key,
            high_key,
            low_inclusive,
            high_inclusive,
            low_cmp: None,
            high_cmp: None,
        }
    }

    /// Scan the whole index.
    pub fn unbounded() -> Self {
        Self::new(None, None, true, true)
    }

    /// Exactly one key, both bounds inclusive.
    pub fn point(key: OwnedTuple) -> Self {
        Self::new(Some(key.clone()), Some(key), true, true)
    }

    /// Use explicit comparators for the bounds.
    pub fn with_comparators(
        mut self,
        low_cmp: Option<MultiComparator>,
        high_cmp: Option<MultiComparator>,
    ) -> Self {
        self.low_cmp = low_cmp;
        self.high_cmp = high_cmp;
        self
    }

    pub fn low_key(&self) -> Option<&OwnedTuple> {
        self.low_key.as_ref()
    }

    pub fn high_key(&self) -> Option<&OwnedTuple> {
        self.high_key.as_ref()
    }

    pub fn low_inclusive(&self) -> bool {
        self.low_inclusive
    }

    pub fn high_inclusive(&self) -> bool {
        self.high_inclusive
    }

    /// Whether both bounds are the same inclusive key.
    pub fn is_point(&self) -> bool {
        match (&self.low_key, &self.high_key) {
            (Some(low), Some(high)) => self.low_inclusive && self.high_inclusive && low == high,
            _ => false,
        }
    }

    /// Resolve both bounds against the index key comparator.
    ///
    /// # Errors
    /// `Error::PredicateMismatch` if a bound is wider than the index key or
    /// its comparator does not match the bound's arity.
    pub(crate) fn resolve(&self, key_cmp: &MultiComparator) -> Result<(Option<Bound>, Option<Bound>)> {
        let low = resolve_bound("low", &self.low_key, &self.low_cmp, self.low_inclusive, key_cmp)?;
        let high = resolve_bound("high", &self.high_key, &self.high_cmp, self.high_inclusive, key_cmp)?;
        Ok((low, high))
    }
}

/// One resolved scan bound.
#[derive(Debug, Clone)]
pub(crate) struct Bound {
    pub key: OwnedTuple,
    pub cmp: MultiComparator,
    pub inclusive: bool,
}

fn resolve_bound(
    which: &str,
    key: &Option<OwnedTuple>,
    cmp: &Option<MultiComparator>,
    inclusive: bool,
    key_cmp: &MultiComparator,
) -> Result<Option<Bound>> {
    let Some(key) = key else {
        return Ok(None);
    };

    let arity = key.field_count();
    if arity == 0 || arity > key_cmp.key_field_count() {
        return Err(Error::PredicateMismatch(format!(
            "{which} key has {arity} fields, index key has {}",
            key_cmp.key_field_count()
        )));
    }

    let cmp = match cmp {
        Some(cmp) if cmp.key_field_count() != arity => {
            return Err(Error::PredicateMismatch(format!(
                "{which} comparator covers {} fields, key has {arity}",
                cmp.key_field_count()
            )));
        }
        Some(cmp) => cmp.clone(),
        None => key_cmp.prefix(arity),
    };

    Ok(Some(Bound {
        key: key.clone(),
        cmp,
        inclusive,
    }))
}
