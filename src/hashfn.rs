// hashfn.rs — Key hashing.
//
// Thin wrapper around the `xxhash-rust` crate.  XXH64 with a fixed seed is
// the single hash used by the keyspace map and by every sorted set's by-name
// index; slots cache the full 64-bit value so probe-distance math and
// rehashing never touch key bytes.

/// One-shot XXH64 over a key.
#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(key, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(key_hash(b"foo"), key_hash(b"foo"));
        assert_ne!(key_hash(b"foo"), key_hash(b"bar"));
    }

    #[test]
    fn empty_key_hashes() {
        // The empty key is legal on the wire; it must hash like any other.
        let h = key_hash(b"");
        assert_eq!(h, key_hash(b""));
    }
}
