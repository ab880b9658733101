//! BIP37 bloom filter offered to peers, so that they relay transactions
//! touching the genesis points of the followed colors.

use std::f64::consts::LN_2;
use std::io::Cursor;

/// Maximum filter size in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions.
pub const MAX_HASH_FUNCS: u32 = 50;

const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// Peers don't update the filter on matches.
pub const BLOOM_UPDATE_NONE: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: u8,
}

impl BloomFilter {
    /// Create filter sized for `elements` insertions with the given false
    /// positive rate.
    pub fn new(elements: usize, false_positive_rate: f64, tweak: u32, flags: u8) -> Self {
        let elements = elements.max(1) as f64;

        let bits = (-1.0 / (LN_2 * LN_2) * elements * false_positive_rate.ln())
            .min((MAX_BLOOM_FILTER_SIZE * 8) as f64);
        let size = ((bits as usize) / 8).clamp(1, MAX_BLOOM_FILTER_SIZE);

        let hash_funcs = ((size * 8) as f64 / elements * LN_2) as u32;

        Self {
            data: vec![0u8; size],
            hash_funcs: hash_funcs.clamp(1, MAX_HASH_FUNCS),
            tweak,
            flags,
        }
    }

    fn bit_index(&self, hash_num: u32, element: &[u8]) -> usize {
        let seed = hash_num.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        // Reading from memory doesn't fail.
        let hash = murmur3::murmur3_32(&mut Cursor::new(element), seed).unwrap_or(0);

        hash as usize % (self.data.len() * 8)
    }

    pub fn insert(&mut self, element: &[u8]) {
        for hash_num in 0..self.hash_funcs {
            let index = self.bit_index(hash_num, element);
            self.data[index >> 3] |= 1 << (index & 7);
        }
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        (0..self.hash_funcs).all(|hash_num| {
            let index = self.bit_index(hash_num, element);
            self.data[index >> 3] & (1 << (index & 7)) != 0
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Payload of the `filterload` message.
    pub fn to_filterload_bytes(&self) -> Vec<u8> {
        let mut bytes = bitcoin::consensus::encode::serialize(&self.data);
        bytes.extend_from_slice(&self.hash_funcs.to_le_bytes());
        bytes.extend_from_slice(&self.tweak.to_le_bytes());
        bytes.push(self.flags);

        bytes
    }
}
