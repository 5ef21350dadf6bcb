//! Per-frame content hashing.
//!
//! Every indexed frame carries a 128-bit hash of its decoded content. The
//! hash is used to resolve a decoder's true position after a seek: the
//! first frame decoded at an unknown container position is hashed and
//! matched against the index.
//!
//! The input is a stable prefix of each plane (or channel buffer) in
//! declaration order, so hashing cost is bounded for large frames while
//! remaining sensitive to real content differences. Changing the prefix
//! length or the algorithm invalidates persisted indexes, which is why the
//! cache format version covers it.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// How many leading bytes of each plane participate in the hash.
pub const HASH_PREFIX_LEN: usize = 4096;

/// 128-bit content hash of a decoded frame.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 16]);

impl ContentHash {
    pub const ZERO: Self = Self([0; 16]);

    /// Hash the leading `HASH_PREFIX_LEN` bytes of each buffer, in order,
    /// through a single streaming digest.
    pub fn compute<'a>(buffers: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Xxh3::new();
        for buf in buffers {
            let take = buf.len().min(HASH_PREFIX_LEN);
            hasher.update(&buf[..take]);
        }
        Self(hasher.digest128().to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = ContentHash::compute([&[1u8, 2, 3][..]]);
        let b = ContentHash::compute([&[1u8, 2, 3][..]]);
        assert_eq!(a, b);
    }

    #[test]
    fn distinguishes_content() {
        let a = ContentHash::compute([&[1u8, 2, 3][..]]);
        let b = ContentHash::compute([&[1u8, 2, 4][..]]);
        assert_ne!(a, b);
    }

    #[test]
    fn multiple_planes_differ_from_concatenation_split() {
        // Same bytes split differently across planes still hash the same,
        // since the digest is streamed. Plane boundaries are not part of
        // the input.
        let whole = ContentHash::compute([&[1u8, 2, 3, 4][..]]);
        let split = ContentHash::compute([&[1u8, 2][..], &[3u8, 4][..]]);
        assert_eq!(whole, split);
    }

    #[test]
    fn only_prefix_participates() {
        let mut long_a = vec![7u8; HASH_PREFIX_LEN + 100];
        let mut long_b = long_a.clone();
        long_a[HASH_PREFIX_LEN + 50] = 1;
        long_b[HASH_PREFIX_LEN + 50] = 2;
        let a = ContentHash::compute([long_a.as_slice()]);
        let b = ContentHash::compute([long_b.as_slice()]);
        assert_eq!(a, b, "bytes past the prefix must not matter");

        long_b[0] = 99;
        let c = ContentHash::compute([long_b.as_slice()]);
        assert_ne!(a, c, "bytes inside the prefix must matter");
    }

    #[test]
    fn debug_is_hex() {
        let h = ContentHash::ZERO;
        let s = format!("{h:?}");
        assert!(s.starts_with("ContentHash(0000"));
    }
}
