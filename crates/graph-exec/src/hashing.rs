use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Accumulates a 64-bit fingerprint over hashable schema parts.
pub struct FingerprintHasher {
    inner: DefaultHasher,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self {
            inner: DefaultHasher::new(),
        }
    }

    pub fn write<T: Hash>(&mut self, value: &T) {
        value.hash(&mut self.inner);
    }

    pub fn finish(self) -> u64 {
        self.inner.finish()
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = FingerprintHasher::new();
    hasher.write(value);
    hasher.finish()
}

/// Hash over opaque artifact bytes, stable across processes.
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a_hash(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
        assert_ne!(fnv1a_hash(b"x\nweight"), fnv1a_hash(b"weight\nx"));
    }

    #[test]
    fn hash_value_is_deterministic_within_a_process() {
        assert_eq!(hash_value(&("x", 3usize)), hash_value(&("x", 3usize)));
        assert_ne!(hash_value(&("x", 3usize)), hash_value(&("x", 4usize)));
    }
}
