//! # Bloom Filter
//!
//! Space-efficient set membership test embedded in every table's filter
//! block. A negative answer is exact; a positive answer may be a false
//! positive, at a rate governed by `bits_per_key`.
//!
//! Keys are first reduced to a 64-bit hash ([`key_hash`]) so a table builder
//! only has to remember eight bytes per key until the filter is built. Probe
//! positions are derived by double hashing the two 32-bit halves:
//! `h(i) = lo + i * hi`.
//!
//! ## Encoding
//!
//! ```text
//! [bits ...][num_probes: u8][num_bits: u32 LE]
//! ```
//!
//! The filter is self-describing, so it can be decoded from a block without
//! any side information.
//!
//! ## Example
//!
//! ```rust
//! use bloom::{key_hash, BloomFilter};
//!
//! let hashes: Vec<u64> = [&b"apple"[..], b"pear"].iter().map(|k| key_hash(k)).collect();
//! let bf = BloomFilter::from_hashes(&hashes, 10);
//! assert!(bf.may_contain(b"apple"));
//!
//! let decoded = BloomFilter::decode(&bf.encode()).unwrap();
//! assert!(decoded.may_contain(b"pear"));
//! ```

/// Probe counts are clamped to this range.
const MAX_PROBES: u32 = 30;

/// Filters smaller than this are padded to limit false positives for tiny
/// key sets.
const MIN_BITS: u32 = 64;

/// Trailer bytes after the bit array.
const TRAILER_LEN: usize = 5;

/// 64-bit FNV-1a.
#[must_use]
pub fn key_hash(key: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for &b in key {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    // final avalanche so the two halves are independent enough for probing
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash
}

/// An immutable bloom filter.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u32,
    num_probes: u32,
}

impl BloomFilter {
    /// Builds a filter over pre-hashed keys.
    ///
    /// `bits_per_key` trades space for accuracy: 10 gives roughly a 1% false
    /// positive rate.
    #[must_use]
    pub fn from_hashes(hashes: &[u64], bits_per_key: u32) -> Self {
        let bits_per_key = bits_per_key.max(1);
        // k = bits_per_key * ln(2), rounded down
        let num_probes = ((bits_per_key as f64) * 0.69) as u32;
        let num_probes = num_probes.clamp(1, MAX_PROBES);

        let wanted = (hashes.len() as u64).saturating_mul(bits_per_key as u64);
        let num_bits = wanted.clamp(MIN_BITS as u64, u32::MAX as u64 - 7) as u32;
        let num_bits = (num_bits + 7) / 8 * 8;

        let mut filter = Self {
            bits: vec![0u8; (num_bits / 8) as usize],
            num_bits,
            num_probes,
        };
        for &h in hashes {
            filter.add_hash(h);
        }
        filter
    }

    /// Convenience constructor hashing raw keys.
    #[must_use]
    pub fn from_keys<K: AsRef<[u8]>>(keys: &[K], bits_per_key: u32) -> Self {
        let hashes: Vec<u64> = keys.iter().map(|k| key_hash(k.as_ref())).collect();
        Self::from_hashes(&hashes, bits_per_key)
    }

    fn probes(&self, hash: u64) -> impl Iterator<Item = u32> + '_ {
        let lo = hash as u32;
        let hi = (hash >> 32) as u32 | 1;
        (0..self.num_probes).map(move |i| lo.wrapping_add(i.wrapping_mul(hi)) % self.num_bits)
    }

    fn add_hash(&mut self, hash: u64) {
        let positions: Vec<u32> = self.probes(hash).collect();
        for bit in positions {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// `false` means the hash was definitely never added.
    #[must_use]
    pub fn may_contain_hash(&self, hash: u64) -> bool {
        self.probes(hash)
            .all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.may_contain_hash(key_hash(key))
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    #[must_use]
    pub fn num_probes(&self) -> u32 {
        self.num_probes
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.bits.len() + TRAILER_LEN
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.bits);
        out.push(self.num_probes as u8);
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out
    }

    /// Decodes a filter produced by [`encode`](Self::encode). Returns `None`
    /// if the buffer is inconsistent.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < TRAILER_LEN {
            return None;
        }
        let body_len = data.len() - TRAILER_LEN;
        let num_probes = data[body_len] as u32;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&data[body_len + 1..]);
        let num_bits = u32::from_le_bytes(raw);
        if num_bits == 0
            || num_bits % 8 != 0
            || (num_bits / 8) as usize != body_len
            || num_probes == 0
            || num_probes > MAX_PROBES
        {
            return None;
        }
        Some(Self {
            bits: data[..body_len].to_vec(),
            num_bits,
            num_probes,
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_probes", &self.num_probes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
