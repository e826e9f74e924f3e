// src/key.rs
//
// 160-bit Kademlia identifier and XOR distance.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

pub const KEY_BYTES: usize = 20;
pub const KEY_BITS: u32 = (KEY_BYTES as u32) * 8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub [u8; KEY_BYTES]);

impl Key {
    pub const ZERO: Key = Key([0u8; KEY_BYTES]);

    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Key(bytes)
    }

    /// `key = SHA1(data)`, used both for node-id derivation and content addressing.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&digest);
        Key(bytes)
    }

    /// Random key, used for bucket-refresh targets before prefix-fixing.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        crate::rng::fill_bytes(&mut bytes);
        Key(bytes)
    }

    pub fn xor(&self, other: &Key) -> Distance {
        let mut out = [0u8; KEY_BYTES];
        for i in 0..KEY_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Length in bits of the shared prefix between `self` and `other`, in
    /// `[0, KEY_BITS]`. `KEY_BITS` means the keys are identical.
    pub fn longest_matching_prefix(&self, other: &Key) -> u32 {
        for i in 0..KEY_BYTES {
            let diff = self.0[i] ^ other.0[i];
            if diff != 0 {
                return (i as u32) * 8 + diff.leading_zeros();
            }
        }
        KEY_BITS
    }

    /// A random key sharing the first `prefix_bits` bits with `self`,
    /// with the remaining suffix randomized. Used by bucket refresh to
    /// target a specific, currently-quiet bucket.
    pub fn random_with_shared_prefix(&self, prefix_bits: u32) -> Key {
        let mut out = Key::random();
        let full_bytes = (prefix_bits / 8) as usize;
        out.0[..full_bytes].copy_from_slice(&self.0[..full_bytes]);
        let rem_bits = prefix_bits % 8;
        if rem_bits > 0 {
            let mask = 0xFFu8 << (8 - rem_bits);
            out.0[full_bytes] = (self.0[full_bytes] & mask) | (out.0[full_bytes] & !mask);
        }
        out
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex_string(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_string(&self.0[..4]))
    }
}

/// XOR distance between two keys, ordered as a big-endian unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; KEY_BYTES]);

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let a = Key::random();
        assert_eq!(a.xor(&a).0, [0u8; KEY_BYTES]);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Key::random();
        let b = Key::random();
        assert!(a.xor(&b) == b.xor(&a));
    }

    #[test]
    fn distance_triangle_inequality_xor_bound() {
        // d(a,c) <= d(a,b) XOR d(b,c) bitwise, i.e. the XOR-combination
        // byte-wise covers every bit set in d(a,c).
        let a = Key::random();
        let b = Key::random();
        let c = Key::random();
        let d_ac = a.xor(&c);
        let d_ab = a.xor(&b);
        let d_bc = b.xor(&c);
        for i in 0..KEY_BYTES {
            let bound = d_ab.0[i] | d_bc.0[i];
            assert_eq!(d_ac.0[i] & !bound, 0);
        }
    }

    #[test]
    fn prefix_length_identical_keys() {
        let a = Key::random();
        assert_eq!(a.longest_matching_prefix(&a), KEY_BITS);
    }

    #[test]
    fn prefix_length_differs_in_first_byte() {
        let mut bytes = [0u8; KEY_BYTES];
        let a = Key(bytes);
        bytes[0] = 0b0100_0000;
        let b = Key(bytes);
        assert_eq!(a.longest_matching_prefix(&b), 1);
    }

    #[test]
    fn random_with_shared_prefix_matches() {
        let a = Key::random();
        for prefix in [0u32, 1, 7, 8, 9, 33, 159, 160] {
            let r = a.random_with_shared_prefix(prefix);
            assert!(a.longest_matching_prefix(&r) >= prefix);
        }
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Key::hash(b"hello"), Key::hash(b"hello"));
        assert_ne!(Key::hash(b"hello"), Key::hash(b"world"));
    }
}
