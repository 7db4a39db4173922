//! Index schema: field types and how many of them form the key.

use crate::common::{Error, Result};

use super::comparator::{FieldType, MultiComparator};
use super::tuple::TupleReference;

/// Shape of the tuples stored in one index.
///
/// The first `key_field_count` fields are the key; the rest are payload
/// carried in the leaves only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    field_types: Vec<FieldType>,
    key_field_count: usize,
}

impl IndexSchema {
    /// # Errors
    /// `Error::InvalidTuple` if the key is empty or wider than the tuple.
    pub fn new(field_types: Vec<FieldType>, key_field_count: usize) -> Result<Self> {
        if key_field_count == 0 || key_field_count > field_types.len() {
            return Err(Error::InvalidTuple(format!(
                "key of {key_field_count} fields over {} fields",
                field_types.len()
            )));
        }
        Ok(Self {
            field_types,
            key_field_count,
        })
    }

    pub fn field_types(&self) -> &[FieldType] {
        &self.field_types
    }

    pub fn field_count(&self) -> usize {
        self.field_types.len()
    }

    pub fn key_field_count(&self) -> usize {
        self.key_field_count
    }

    /// Comparator over the key fields.
    pub fn key_comparator(&self) -> MultiComparator {
        MultiComparator::from_types(&self.field_types[..self.key_field_count])
    }

    /// Check a full tuple against the schema.
    pub fn validate<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<()> {
        if tuple.field_count() != self.field_count() {
            return Err(Error::InvalidTuple(format!(
                "expected {} fields, got {}",
                self.field_count(),
                tuple.field_count()
            )));
        }
        self.validate_fields(tuple)
    }

    /// Check a search key (at most the key fields) against the schema.
    pub fn validate_key<T: TupleReference + ?Sized>(&self, key: &T) -> Result<()> {
        if key.field_count() == 0 || key.field_count() > self.key_field_count {
            return Err(Error::InvalidTuple(format!(
                "key with {} fields for a {}-field key",
                key.field_count(),
                self.key_field_count
            )));
        }
        self.validate_fields(key)
    }

    fn validate_fields<T: TupleReference + ?Sized>(&self, tuple: &T) -> Result<()> {
        for (index, field_type) in self.field_types[..tuple.field_count()].iter().enumerate() {
            let bytes = tuple.field(index);
            let ok = match field_type.fixed_width() {
                Some(width) => bytes.len() == width,
                None => std::str::from_utf8(bytes).is_ok(),
            };
            if !ok {
                return Err(Error::InvalidTuple(format!(
                    "field {index} is not a valid {field_type:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::TupleBuilder;

    fn schema() -> IndexSchema {
        IndexSchema::new(vec![FieldType::Int32, FieldType::Utf8], 1).unwrap()
    }

    #[test]
    fn test_rejects_bad_key_width() {
        assert!(IndexSchema::new(vec![FieldType::Int32], 0).is_err());
        assert!(IndexSchema::new(vec![FieldType::Int32], 2).is_err());
    }

    #[test]
    fn test_validate_tuple() {
        let schema = schema();
        assert!(schema
            .validate(&TupleBuilder::new().add_i32(1).add_str("v").build())
            .is_ok());
        assert!(schema.validate(&TupleBuilder::new().add_i32(1).build()).is_err());
        assert!(schema
            .validate(&TupleBuilder::new().add_i64(1).add_str("v").build())
            .is_err());
        assert!(schema
            .validate(&TupleBuilder::new().add_i32(1).add_bytes(&[0xFF]).build())
            .is_err());
    }

    #[test]
    fn test_validate_key() {
        let schema = schema();
        assert!(schema.validate_key(&TupleBuilder::new().add_i32(4).build()).is_ok());
        assert!(schema
            .validate_key(&TupleBuilder::new().add_i32(4).add_str("x").build())
            .is_err());
        assert_eq!(schema.key_comparator().key_field_count(), 1);
    }
}
