//! Tuple encoding and tuple references.
//!
//! A tuple with `n` fields is stored as `n` little-endian `u16` field end
//! offsets followed by the field payload:
//!
//! ```text
//! ┌────────┬────────┬─────┬──────────┬──────────┬─────┐
//! │ end[0] │ end[1] │ ... │ field 0  │ field 1  │ ... │
//! └────────┴────────┴─────┴──────────┴──────────┴─────┘
//!   2 bytes each           payload[0..end[0]], payload[end[0]..end[1]], ...
//! ```
//!
//! The field count itself is not part of the encoding; the frame a tuple
//! lives in records it.

use std::fmt;

use crate::common::{Error, Result};

/// Read access to an encoded tuple.
pub trait TupleReference {
    /// Number of fields.
    fn field_count(&self) -> usize;

    /// The full encoding (offset table + payload).
    fn as_bytes(&self) -> &[u8];

    /// Raw bytes of field `index`.
    ///
    /// # Panics
    /// Panics if `index >= field_count()`.
    fn field(&self, index: usize) -> &[u8] {
        field_slice(self.as_bytes(), self.field_count(), index)
    }

    /// Field decoded as an `i32`, if it is four bytes wide.
    fn int32_field(&self, index: usize) -> Option<i32> {
        self.field(index).try_into().ok().map(i32::from_le_bytes)
    }

    /// Field decoded as an `i64`, if it is eight bytes wide.
    fn int64_field(&self, index: usize) -> Option<i64> {
        self.field(index).try_into().ok().map(i64::from_le_bytes)
    }

    /// Field decoded as UTF-8.
    fn str_field(&self, index: usize) -> Option<&str> {
        std::str::from_utf8(self.field(index)).ok()
    }

    /// Copy the bytes out so they survive the page latch.
    fn to_owned_tuple(&self) -> OwnedTuple {
        OwnedTuple {
            data: self.as_bytes().to_vec(),
            field_count: self.field_count(),
        }
    }

    /// A new tuple made of the first `n` fields.
    fn project(&self, n: usize) -> OwnedTuple {
        let mut builder = TupleBuilder::new();
        for index in 0..n.min(self.field_count()) {
            builder.add_bytes(self.field(index));
        }
        builder.build()
    }
}

fn field_end(data: &[u8], index: usize) -> usize {
    u16::from_le_bytes([data[index * 2], data[index * 2 + 1]]) as usize
}

fn field_slice(data: &[u8], field_count: usize, index: usize) -> &[u8] {
    assert!(index < field_count, "field {index} out of {field_count}");
    let payload = &data[field_count * 2..];
    let start = if index == 0 { 0 } else { field_end(data, index - 1) };
    &payload[start..field_end(data, index)]
}

/// Encoded length of the tuple starting at `data`.
pub(crate) fn encoded_len(data: &[u8], field_count: usize) -> usize {
    match field_count {
        0 => 0,
        n => n * 2 + field_end(data, n - 1),
    }
}

/// A tuple borrowed from a latched page.
///
/// Only valid while the page latch is held, which the borrow enforces.
#[derive(Clone, Copy)]
pub struct TupleRef<'a> {
    data: &'a [u8],
    field_count: usize,
}

impl<'a> TupleRef<'a> {
    /// View the tuple at the start of `data`.
    pub(crate) fn new(data: &'a [u8], field_count: usize) -> Self {
        let len = encoded_len(data, field_count);
        Self {
            data: &data[..len],
            field_count,
        }
    }

    /// Field bytes with the page's lifetime rather than the view's.
    pub fn field_bytes(&self, index: usize) -> &'a [u8] {
        field_slice(self.data, self.field_count, index)
    }
}

impl TupleReference for TupleRef<'_> {
    fn field_count(&self) -> usize {
        self.field_count
    }

    fn as_bytes(&self) -> &[u8] {
        self.data
    }
}

impl fmt::Debug for TupleRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_fields(self, f)
    }
}

/// A tuple that owns its bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OwnedTuple {
    data: Vec<u8>,
    field_count: usize,
}

impl OwnedTuple {
    /// Build a tuple from raw field values.
    pub fn from_fields<F: AsRef<[u8]>>(fields: &[F]) -> Self {
        let mut builder = TupleBuilder::new();
        for field in fields {
            builder.add_bytes(field.as_ref());
        }
        builder.build()
    }

    /// Decode and check an encoded tuple.
    pub fn from_bytes(data: Vec<u8>, field_count: usize) -> Result<Self> {
        if data.len() < field_count * 2 {
            return Err(Error::InvalidTuple("offset table truncated".into()));
        }
        let mut previous = 0;
        for index in 0..field_count {
            let end = field_end(&data, index);
            if end < previous {
                return Err(Error::InvalidTuple(format!("field {index} ends before it starts")));
            }
            previous = end;
        }
        if field_count * 2 + previous != data.len() {
            return Err(Error::InvalidTuple(format!(
                "expected {} bytes, got {}",
                field_count * 2 + previous,
                data.len()
            )));
        }
        Ok(Self { data, field_count })
    }

    /// Borrow as a [`TupleRef`].
    pub fn as_tuple_ref(&self) -> TupleRef<'_> {
        TupleRef {
            data: &self.data,
            field_count: self.field_count,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl TupleReference for OwnedTuple {
    fn field_count(&self) -> usize {
        self.field_count
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for OwnedTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_fields(self, f)
    }
}

fn debug_fields<T: TupleReference + ?Sized>(tuple: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut list = f.debug_list();
    for index in 0..tuple.field_count() {
        let field = tuple.field(index);
        match field.len() {
            4 => list.entry(&tuple.int32_field(index)),
            8 => list.entry(&tuple.int64_field(index)),
            _ => match tuple.str_field(index) {
                Some(s) => list.entry(&s),
                None => list.entry(&field),
            },
        };
    }
    list.finish()
}

/// Assembles an [`OwnedTuple`] field by field.
///
/// # Example
/// ```
/// use crabtree::index::btree::{TupleBuilder, TupleReference};
///
/// let tuple = TupleBuilder::new().add_i32(7).add_str("seven").build();
/// assert_eq!(tuple.int32_field(0), Some(7));
/// assert_eq!(tuple.str_field(1), Some("seven"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct TupleBuilder {
    ends: Vec<u16>,
    payload: Vec<u8>,
}

impl TupleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(bytes);
        // Anything longer than a page is rejected when it is inserted.
        self.ends.push(self.payload.len().min(u16::MAX as usize) as u16);
        self
    }

    pub fn add_i32(&mut self, value: i32) -> &mut Self {
        self.add_bytes(&value.to_le_bytes())
    }

    pub fn add_i64(&mut self, value: i64) -> &mut Self {
        self.add_bytes(&value.to_le_bytes())
    }

    pub fn add_str(&mut self, value: &str) -> &mut Self {
        self.add_bytes(value.as_bytes())
    }

    /// Finish the tuple. The builder can be reused afterwards.
    pub fn build(&mut self) -> OwnedTuple {
        let mut data = Vec::with_capacity(self.ends.len() * 2 + self.payload.len());
        for end in &self.ends {
            data.extend_from_slice(&end.to_le_bytes());
        }
        data.extend_from_slice(&self.payload);
        let field_count = self.ends.len();
        self.ends.clear();
        self.payload.clear();
        OwnedTuple { data, field_count }
    }
}
