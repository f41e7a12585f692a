use core::fmt;
use core::str::FromStr;

use digest::Digest;
use sha2::{Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::error::Error;

/// Message digest underlying every tree node, one-time key and PRNG step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum DigestAlgorithm {
    /// SHA-256 (32 byte output).
    Sha256,
    /// SHA-512 (64 byte output).
    Sha512,
    /// SHA3-256 (32 byte output).
    Sha3_256,
    /// SHA3-512 (64 byte output).
    Sha3_512,
}

fn digest_with<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

impl DigestAlgorithm {
    /// Output length in bytes, the `n` of every size formula in this crate.
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Sha3_256 => 32,
            Self::Sha512 | Self::Sha3_512 => 64,
        }
    }

    /// Hashes `input`.
    pub fn digest(self, input: &[u8]) -> Vec<u8> {
        self.digest_parts(&[input])
    }

    /// Hashes the concatenation of `parts` without materializing it.
    pub(crate) fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha256 => digest_with::<Sha256>(parts),
            Self::Sha512 => digest_with::<Sha512>(parts),
            Self::Sha3_256 => digest_with::<Sha3_256>(parts),
            Self::Sha3_512 => digest_with::<Sha3_512>(parts),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
            Self::Sha3_256 => "SHA3_256",
            Self::Sha3_512 => "SHA3_512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            "SHA3_256" => Ok(Self::Sha3_256),
            "SHA3_512" => Ok(Self::Sha3_512),
            _ => Err(Error::InvalidParameterSet(s.into())),
        }
    }
}

/// Seed-chaining pseudorandom generator.
///
/// Each step outputs `H(seed)` and moves the seed to `seed + H(seed) + 1`
/// (little-endian, wrapping). The output serves as the seed of one one-time
/// key; the advanced seed is the state for the next leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Prng {
    digest: DigestAlgorithm,
}

impl Prng {
    pub(crate) const fn new(digest: DigestAlgorithm) -> Self {
        Self { digest }
    }

    /// Returns the next derived seed and advances `seed` in place.
    pub(crate) fn next_seed(&self, seed: &mut [u8]) -> Vec<u8> {
        let rand = self.digest.digest(seed);
        add_le(seed, &rand);
        add_le(seed, &[1]);
        rand
    }
}

/// `a += b` over little-endian byte strings, carries past the end of `a` are dropped.
fn add_le(a: &mut [u8], b: &[u8]) {
    let mut carry = 0u16;
    for (i, byte) in a.iter_mut().enumerate() {
        let sum = u16::from(*byte) + u16::from(b.get(i).copied().unwrap_or(0)) + carry;
        *byte = sum.to_le_bytes()[0];
        carry = sum >> 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_len_matches_digest() {
        for alg in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha512,
            DigestAlgorithm::Sha3_256,
            DigestAlgorithm::Sha3_512,
        ] {
            assert_eq!(alg.digest(b"abc").len(), alg.output_len());
            assert_eq!(alg.to_string().parse::<DigestAlgorithm>().ok(), Some(alg));
        }
    }

    #[test]
    fn test_digest_parts_is_concatenation() {
        let alg = DigestAlgorithm::Sha256;
        assert_eq!(alg.digest_parts(&[b"ab", b"c"]), alg.digest(b"abc"));
    }

    #[test]
    fn test_sha256_known_answer() {
        let out = DigestAlgorithm::Sha256.digest(b"abc");
        assert_eq!(
            out[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") prefix mismatch"
        );
    }

    #[test]
    fn test_prng_is_deterministic_and_advances() {
        let prng = Prng::new(DigestAlgorithm::Sha256);
        let mut a = vec![1u8; 32];
        let mut b = vec![1u8; 32];

        let out_a = prng.next_seed(&mut a);
        let out_b = prng.next_seed(&mut b);
        assert_eq!(out_a, out_b);
        assert_eq!(a, b);
        assert_ne!(a, vec![1u8; 32]);

        let second = prng.next_seed(&mut a);
        assert_ne!(out_a, second);
    }

    #[test]
    fn test_add_le_carries_and_wraps() {
        let mut a = [0xff, 0xff, 0x00];
        add_le(&mut a, &[1]);
        assert_eq!(a, [0x00, 0x00, 0x01]);

        let mut b = [0xff, 0xff];
        add_le(&mut b, &[1]);
        assert_eq!(b, [0x00, 0x00]);
    }
}
