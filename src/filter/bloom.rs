//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.
//!
//! Table builders only keep a 32-bit hash per key while a table is being
//! written and build the filter from those hashes once the key count is known.

use crate::error::{Error, Result};
use crate::filter::Filter;

/// Size of the encoded header (num_hashes + num_bits).
const HEADER_SIZE: usize = 12;

/// FNV-1a hash of a key, the only hash the filter ever sees.
pub fn bloom_hash(key: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut state = FNV_OFFSET_BASIS;
    for &byte in key {
        state ^= u32::from(byte);
        state = state.wrapping_mul(FNV_PRIME);
    }
    // Final avalanche so nearby keys spread across the bit array.
    state ^= state >> 16;
    state = state.wrapping_mul(0x85eb_ca6b);
    state ^= state >> 13;
    state
}

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use sepkv::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1000, 0.01); // 1000 keys, 1% false positive rate
/// filter.add(b"key1");
/// filter.add(b"key2");
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array for the bloom filter
    bits: Vec<u8>,
    /// Number of probes per key
    num_hashes: u32,
    /// Number of bits in the filter
    num_bits: usize,
}

impl BloomFilter {
    /// Create a new BloomFilter sized for `expected_keys` at `false_positive_rate`.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let bits_per_key = Self::bits_per_key(expected_keys, false_positive_rate);
        let num_bits = (expected_keys * bits_per_key).max(64);
        // k = (m/n) * ln(2)
        let num_hashes = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        Self {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_hashes: num_hashes.clamp(1, 30),
            num_bits,
        }
    }

    /// Builds a filter from precomputed [`bloom_hash`] values.
    pub fn from_hashes(hashes: &[u32], false_positive_rate: f64) -> Self {
        let mut filter = Self::new(hashes.len(), false_positive_rate);
        for &h in hashes {
            filter.add_hash(h);
        }
        filter
    }

    /// Bits per key needed for a target false positive rate:
    /// m/n = -ln(p) / ln(2)^2
    pub fn bits_per_key(num_keys: usize, false_positive_rate: f64) -> usize {
        if num_keys == 0 {
            return 1;
        }
        let p = false_positive_rate.clamp(0.0001, 0.9999);
        let per_key = -p.ln() / std::f64::consts::LN_2.powi(2);
        (per_key.ceil() as usize).max(1)
    }

    /// Probe positions via double hashing: h_i = h + i * delta.
    fn probes(&self, hash: u32) -> impl Iterator<Item = usize> + '_ {
        let delta = hash.rotate_right(17);
        (0..self.num_hashes)
            .map(move |i| (hash.wrapping_add(i.wrapping_mul(delta)) as usize) % self.num_bits)
    }

    /// Adds a precomputed hash.
    pub fn add_hash(&mut self, hash: u32) {
        let positions: Vec<usize> = self.probes(hash).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Checks a precomputed hash.
    pub fn may_contain_hash(&self, hash: u32) -> bool {
        self.probes(hash).all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    /// Get the size of the filter in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }
}

impl Filter for BloomFilter {
    fn may_contain(&self, key: &[u8]) -> bool {
        self.may_contain_hash(bloom_hash(key))
    }

    fn add(&mut self, key: &[u8]) {
        self.add_hash(bloom_hash(key));
    }

    /// Format:
    /// [num_hashes: 4 bytes][num_bits: 8 bytes][bits: variable]
    fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(HEADER_SIZE + self.bits.len());
        encoded.extend_from_slice(&self.num_hashes.to_le_bytes());
        encoded.extend_from_slice(&(self.num_bits as u64).to_le_bytes());
        encoded.extend_from_slice(&self.bits);
        encoded
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption("Bloom filter data too short"));
        }
        let num_hashes = crate::codec::read_u32(data, 0)?;
        let num_bits = crate::codec::read_u64(data, 4)? as usize;
        if num_bits == 0 || data.len() != HEADER_SIZE + num_bits.div_ceil(8) {
            return Err(Error::corruption("Bloom filter size mismatch"));
        }
        Ok(Self { bits: data[HEADER_SIZE..].to_vec(), num_hashes, num_bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_filter_no_false_negatives() {
        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key{}", i).into_bytes()).collect();
        let mut filter = BloomFilter::new(keys.len(), 0.01);
        for key in &keys {
            filter.add(key);
        }
        for key in &keys {
            assert!(filter.may_contain(key));
        }
    }

    #[test]
    fn test_bloom_filter_false_positive_rate() {
        let hashes: Vec<u32> = (0..10_000).map(|i| bloom_hash(format!("in{}", i).as_bytes())).collect();
        let filter = BloomFilter::from_hashes(&hashes, 0.01);

        let false_positives = (0..10_000)
            .filter(|i| filter.may_contain(format!("out{}", i).as_bytes()))
            .count();
        // Generous bound: 1% target, allow up to 3%.
        assert!(false_positives < 300, "false positives: {}", false_positives);
    }

    #[test]
    fn test_bloom_filter_encode_decode() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.add(b"alpha");
        filter.add(b"beta");

        let decoded = BloomFilter::decode(&filter.encode()).unwrap();
        assert_eq!(decoded.num_hashes(), filter.num_hashes());
        assert_eq!(decoded.num_bits(), filter.num_bits());
        assert!(decoded.may_contain(b"alpha"));
        assert!(decoded.may_contain(b"beta"));
    }

    #[test]
    fn test_bloom_filter_decode_invalid() {
        assert!(BloomFilter::decode(&[1, 2, 3]).is_err());
        let mut encoded = BloomFilter::new(10, 0.01).encode();
        encoded.pop();
        assert!(BloomFilter::decode(&encoded).is_err());
    }

    #[test]
    fn test_empty_filter() {
        let filter = BloomFilter::new(0, 0.01);
        assert!(filter.num_bits() >= 64);
        assert!(!filter.may_contain(b"anything"));
    }
}
