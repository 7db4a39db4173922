//! In-memory bloom filter over index keys.
//!
//! Keys are hashed with four seeded CRC32 passes into two 64-bit values,
//! and probe `i` sets bit `(h1 + i * h2) mod m` (double hashing). The two
//! values are exposed so a cursor probing the same key repeatedly can
//! hash it once.

use crc32fast::Hasher;

use crate::index::btree::TupleReference;

const SEEDS: [u32; 4] = [0x9E37_79B9, 0x85EB_CA6B, 0xC2B2_AE35, 0x27D4_EB2F];
const MAX_HASHES: usize = 16;
const MIN_BITS: usize = 64;

/// The two base hashes of one key.
pub type KeyHashes = [u64; 2];

/// Accumulates keys, then freezes into a [`BloomFilter`].
pub struct BloomFilterBuilder {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
    key_field_count: usize,
}

impl BloomFilterBuilder {
    /// Size a filter for `expected_entries` keys at `false_positive_rate`.
    ///
    /// Only the first `key_field_count` fields of a tuple are hashed.
    pub fn new(expected_entries: usize, false_positive_rate: f64, key_field_count: usize) -> Self {
        let n = expected_entries.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let ideal_bits = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil() as usize;
        let num_bits = ideal_bits.max(MIN_BITS).div_ceil(64) * 64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round() as usize;

        Self {
            bits: vec![0; num_bits / 64],
            num_bits,
            num_hashes: num_hashes.clamp(1, MAX_HASHES),
            key_field_count,
        }
    }

    pub fn add<T: TupleReference + ?Sized>(&mut self, tuple: &T) {
        let hashes = BloomFilter::hash_key(tuple, self.key_field_count);
        for bit in probes(&hashes, self.num_hashes, self.num_bits) {
            self.bits[bit / 64] |= 1 << (bit % 64);
        }
    }

    pub fn build(self) -> BloomFilter {
        BloomFilter {
            bits: self.bits.into_boxed_slice(),
            num_bits: self.num_bits,
            num_hashes: self.num_hashes,
            key_field_count: self.key_field_count,
        }
    }
}

/// Immutable membership summary of one LSM component's keys.
///
/// No false negatives: a key that was added is always reported present.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Box<[u64]>,
    num_bits: usize,
    num_hashes: usize,
    key_field_count: usize,
}

impl BloomFilter {
    /// Hash the first `key_field_count` fields of `key`.
    ///
    /// # Panics
    /// Panics if `key` has fewer fields than that.
    pub fn hash_key<T: TupleReference + ?Sized>(key: &T, key_field_count: usize) -> KeyHashes {
        let mut hashers = SEEDS.map(Hasher::new_with_initial);
        for index in 0..key_field_count {
            let field = key.field(index);
            for hasher in &mut hashers {
                // Length prefix keeps ("ab", "c") apart from ("a", "bc").
                hasher.update(&(field.len() as u32).to_le_bytes());
                hasher.update(field);
            }
        }
        let [a, b, c, d] = hashers.map(|h| u64::from(h.finalize()));
        [(a << 32) | b, ((c << 32) | d) | 1]
    }

    /// Whether `key` may have been added.
    pub fn contains<T: TupleReference + ?Sized>(&self, key: &T) -> bool {
        self.contains_hashes(&Self::hash_key(key, self.key_field_count))
    }

    /// Like [`contains`](Self::contains) with the key already hashed.
    pub fn contains_hashes(&self, hashes: &KeyHashes) -> bool {
        probes(hashes, self.num_hashes, self.num_bits).all(|bit| self.bits[bit / 64] & (1 << (bit % 64)) != 0)
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Number of leading fields that form the hashed key.
    pub fn key_field_count(&self) -> usize {
        self.key_field_count
    }

    /// Heap bytes held by the bit array.
    pub fn size_in_bytes(&self) -> usize {
        self.bits.len() * 8
    }
}

fn probes(hashes: &KeyHashes, num_hashes: usize, num_bits: usize) -> impl Iterator<Item = usize> {
    let [h1, h2] = *hashes;
    (0..num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::TupleBuilder;

    fn key(k: i32) -> crate::index::btree::OwnedTuple {
        TupleBuilder::new().add_i32(k).add_str("payload").build()
    }

    #[test]
    fn test_no_false_negatives() {
        let mut builder = BloomFilterBuilder::new(1000, 0.01, 1);
        for k in 0..1000 {
            builder.add(&key(k));
        }
        let filter = builder.build();
        assert!((0..1000).all(|k| filter.contains(&key(k))));
    }

    #[test]
    fn test_false_positive_rate_is_roughly_honoured() {
        let mut builder = BloomFilterBuilder::new(1000, 0.01, 1);
        for k in 0..1000 {
            builder.add(&key(k));
        }
        let filter = builder.build();
        let false_positives = (1000..11_000).filter(|&k| filter.contains(&key(k))).count();
        // 1% of 10k, with generous slack.
        assert!(false_positives < 300, "{false_positives} false positives");
    }

    #[test]
    fn test_only_key_fields_are_hashed() {
        let mut builder = BloomFilterBuilder::new(10, 0.01, 1);
        builder.add(&key(7));
        let filter = builder.build();

        let bare_key = TupleBuilder::new().add_i32(7).build();
        assert!(filter.contains(&bare_key));
        assert_eq!(
            BloomFilter::hash_key(&bare_key, 1),
            BloomFilter::hash_key(&key(7), 1)
        );
    }

    #[test]
    fn test_sizing() {
        let filter = BloomFilterBuilder::new(0, 0.5, 1).build();
        assert_eq!(filter.num_bits(), MIN_BITS);
        assert!(filter.num_hashes() >= 1);

        let filter = BloomFilterBuilder::new(10_000, 0.001, 1).build();
        assert_eq!(filter.num_bits() % 64, 0);
        assert!(filter.num_hashes() <= MAX_HASHES);
        assert_eq!(filter.size_in_bytes(), filter.num_bits() / 8);
    }
}
