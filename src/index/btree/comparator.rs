//! Field comparators and the multi-field key comparator.
//!
//! [`FieldType`] is the comparator factory: each type knows how its bytes
//! are ordered. [`MultiComparator`] orders tuples field by field over the
//! first `key_field_count()` fields.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::tuple::TupleReference;

/// Total order over the raw bytes of one field.
pub trait FieldComparator: Send + Sync + fmt::Debug {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

#[derive(Debug)]
struct Int32Comparator;

impl FieldComparator for Int32Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        decode_i32(a).cmp(&decode_i32(b))
    }
}

#[derive(Debug)]
struct Int64Comparator;

impl FieldComparator for Int64Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        decode_i64(a).cmp(&decode_i64(b))
    }
}

/// UTF-8 byte order is code point order.
#[derive(Debug)]
struct Utf8Comparator;

impl FieldComparator for Utf8Comparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

// Malformed widths never reach a comparator through a validated schema;
// they sort first rather than panic.
fn decode_i32(bytes: &[u8]) -> Option<i32> {
    bytes.try_into().ok().map(i32::from_le_bytes)
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_le_bytes)
}

/// Type of one tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 4-byte little-endian signed integer.
    Int32,
    /// 8-byte little-endian signed integer.
    Int64,
    /// Variable-length UTF-8 string.
    Utf8,
}

impl FieldType {
    /// Comparator for fields of this type.
    pub fn comparator(self) -> Arc<dyn FieldComparator> {
        match self {
            FieldType::Int32 => Arc::new(Int32Comparator),
            FieldType::Int64 => Arc::new(Int64Comparator),
            FieldType::Utf8 => Arc::new(Utf8Comparator),
        }
    }

    /// On-disk type code.
    pub fn code(self) -> u8 {
        match self {
            FieldType::Int32 => 1,
            FieldType::Int64 => 2,
            FieldType::Utf8 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FieldType::Int32),
            2 => Some(FieldType::Int64),
            3 => Some(FieldType::Utf8),
            _ => None,
        }
    }

    /// Encoded width, or `None` for variable-length types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Int32 => Some(4),
            FieldType::Int64 => Some(8),
            FieldType::Utf8 => None,
        }
    }
}

/// Lexicographic comparator over the leading key fields of two tuples.
///
/// Cheap to clone: the field comparators are shared.
#[derive(Clone)]
pub struct MultiComparator {
    fields: Arc<[Arc<dyn FieldComparator>]>,
}

impl MultiComparator {
    pub fn new(fields: Vec<Arc<dyn FieldComparator>>) -> Self {
        Self {
            fields: fields.into(),
        }
    }

    /// Comparator over the given key field types.
    pub fn from_types(types: &[FieldType]) -> Self {
        Self::new(types.iter().map(|t| t.comparator()).collect())
    }

    /// Number of leading fields this comparator looks at.
    pub fn key_field_count(&self) -> usize {
        self.fields.len()
    }

    /// Comparator over the first `n` fields only, for prefix search.
    pub fn prefix(&self, n: usize) -> Self {
        let n = n.min(self.fields.len());
        Self {
            fields: self.fields[..n].to_vec().into(),
        }
    }

    /// Compare two tuples on the key fields both of them carry.
    pub fn compare<A, B>(&self, a: &A, b: &B) -> Ordering
    where
        A: TupleReference + ?Sized,
        B: TupleReference + ?Sized,
    {
        let n = self.fields.len().min(a.field_count()).min(b.field_count());
        for (index, cmp) in self.fields[..n].iter().enumerate() {
            match cmp.compare(a.field(index), b.field(index)) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Debug for MultiComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::TupleBuilder;

    #[test]
    fn test_int32_orders_numerically() {
        let cmp = FieldType::Int32.comparator();
        // Little-endian bytes would misorder these lexicographically.
        assert_eq!(cmp.compare(&256i32.to_le_bytes(), &1i32.to_le_bytes()), Ordering::Greater);
        assert_eq!(cmp.compare(&(-1i32).to_le_bytes(), &0i32.to_le_bytes()), Ordering::Less);
    }

    #[test]
    fn test_multi_field_is_lexicographic() {
        let cmp = MultiComparator::from_types(&[FieldType::Int32, FieldType::Utf8]);
        let a = TupleBuilder::new().add_i32(1).add_str("b").build();
        let b = TupleBuilder::new().add_i32(1).add_str("c").build();
        let c = TupleBuilder::new().add_i32(2).add_str("a").build();

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&c, &b), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_prefix_ignores_trailing_fields() {
        let cmp = MultiComparator::from_types(&[FieldType::Int32, FieldType::Int32]);
        let prefix = cmp.prefix(1);
        assert_eq!(prefix.key_field_count(), 1);

        let a = TupleBuilder::new().add_i32(5).add_i32(1).build();
        let b = TupleBuilder::new().add_i32(5).add_i32(9).build();
        assert_eq!(prefix.compare(&a, &b), Ordering::Equal);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_shorter_tuple_compares_on_shared_fields() {
        let cmp = MultiComparator::from_types(&[FieldType::Int64, FieldType::Int64]);
        let key = TupleBuilder::new().add_i64(3).build();
        let full = TupleBuilder::new().add_i64(3).add_i64(4).build();
        assert_eq!(cmp.compare(&key, &full), Ordering::Equal);
    }
}
