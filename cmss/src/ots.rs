//! One-time signature schemes signing the leaves of every tree.

mod lamport;
mod winternitz;

use core::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CmssResult, Error};
use crate::hash::{DigestAlgorithm, Prng};

/// One-time signature scheme behind every leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OtsAlgorithm {
    /// Winternitz chains processing `log_w` message bits per chain
    /// (1, 2, 4 or 8). The verification key is recomputed from a signature.
    Winternitz {
        /// Bits per chain.
        log_w: u8,
    },
    /// Lamport's scheme. The verification key cannot be recomputed from a
    /// signature and travels inside every signature.
    Lamport,
}

impl OtsAlgorithm {
    pub(crate) fn validate(self) -> CmssResult<()> {
        match self {
            Self::Winternitz { log_w: 1 | 2 | 4 | 8 } | Self::Lamport => Ok(()),
            Self::Winternitz { log_w } => Err(Error::InvalidParameterSet(format!(
                "unsupported Winternitz parameter {log_w}"
            ))),
        }
    }

    /// Whether signatures have to carry the verification key.
    pub fn embeds_verification_key(self) -> bool {
        matches!(self, Self::Lamport)
    }
}

impl fmt::Display for OtsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Winternitz { log_w } => write!(f, "W{log_w}"),
            Self::Lamport => f.write_str("LAMPORT"),
        }
    }
}

/// An OTS algorithm bound to the digest it hashes with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OtsScheme {
    algorithm: OtsAlgorithm,
    digest: DigestAlgorithm,
}

impl OtsScheme {
    pub(crate) fn new(algorithm: OtsAlgorithm, digest: DigestAlgorithm) -> Self {
        Self { algorithm, digest }
    }

    fn secret_count(self) -> usize {
        match self.algorithm {
            OtsAlgorithm::Winternitz { log_w } => {
                winternitz::Layout::new(self.digest, u32::from(log_w)).chains()
            }
            OtsAlgorithm::Lamport => lamport::secret_count(self.digest),
        }
    }

    pub(crate) fn signature_len(self) -> usize {
        let n = self.digest.output_len();
        match self.algorithm {
            OtsAlgorithm::Winternitz { .. } => self.secret_count() * n,
            OtsAlgorithm::Lamport => self.secret_count() / 2 * n,
        }
    }

    pub(crate) fn verification_key_len(self) -> usize {
        let n = self.digest.output_len();
        match self.algorithm {
            OtsAlgorithm::Winternitz { .. } => n,
            OtsAlgorithm::Lamport => self.secret_count() * n,
        }
    }

    pub(crate) fn embeds_verification_key(self) -> bool {
        self.algorithm.embeds_verification_key()
    }

    /// Expands a one-time seed into a signing key.
    pub(crate) fn keygen(self, seed: &[u8]) -> OtsSigningKey {
        let prng = Prng::new(self.digest);
        let mut state = seed.to_vec();
        let secrets = (0..self.secret_count())
            .map(|_| prng.next_seed(&mut state))
            .collect();
        state.zeroize();
        OtsSigningKey {
            scheme: self,
            secrets,
        }
    }

    /// Recomputes the verification key from a signature, if the scheme allows it.
    pub(crate) fn verification_key_from_signature(self, msg: &[u8], sig: &[u8]) -> Option<Vec<u8>> {
        match self.algorithm {
            OtsAlgorithm::Winternitz { log_w } => {
                let layout = winternitz::Layout::new(self.digest, u32::from(log_w));
                winternitz::public_key_from_signature(self.digest, layout, msg, sig)
            }
            OtsAlgorithm::Lamport => None,
        }
    }

    pub(crate) fn verify(self, msg: &[u8], sig: &[u8], verification_key: &[u8]) -> bool {
        match self.algorithm {
            OtsAlgorithm::Winternitz { .. } => self
                .verification_key_from_signature(msg, sig)
                .is_some_and(|vk| vk.ct_eq(verification_key).into()),
            OtsAlgorithm::Lamport => lamport::verify(self.digest, msg, sig, verification_key),
        }
    }
}

/// Secret chains of one leaf.
pub(crate) struct OtsSigningKey {
    scheme: OtsScheme,
    secrets: Vec<Vec<u8>>,
}

impl fmt::Debug for OtsSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtsSigningKey")
            .field("scheme", &self.scheme)
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

impl OtsSigningKey {
    pub(crate) fn verification_key(&self) -> Vec<u8> {
        let digest = self.scheme.digest;
        match self.scheme.algorithm {
            OtsAlgorithm::Winternitz { log_w } => {
                let layout = winternitz::Layout::new(digest, u32::from(log_w));
                winternitz::public_key(digest, layout, &self.secrets)
            }
            OtsAlgorithm::Lamport => lamport::public_key(digest, &self.secrets),
        }
    }

    pub(crate) fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let digest = self.scheme.digest;
        match self.scheme.algorithm {
            OtsAlgorithm::Winternitz { log_w } => {
                let layout = winternitz::Layout::new(digest, u32::from(log_w));
                winternitz::sign(digest, layout, &self.secrets, msg)
            }
            OtsAlgorithm::Lamport => lamport::sign(digest, &self.secrets, msg),
        }
    }
}

impl Drop for OtsSigningKey {
    fn drop(&mut self) {
        self.secrets.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMES: [OtsAlgorithm; 5] = [
        OtsAlgorithm::Winternitz { log_w: 1 },
        OtsAlgorithm::Winternitz { log_w: 2 },
        OtsAlgorithm::Winternitz { log_w: 4 },
        OtsAlgorithm::Winternitz { log_w: 8 },
        OtsAlgorithm::Lamport,
    ];

    #[test]
    fn test_sign_verify_all_schemes() {
        for algorithm in SCHEMES {
            let scheme = OtsScheme::new(algorithm, DigestAlgorithm::Sha256);
            let key = scheme.keygen(&[0x42; 32]);
            let vk = key.verification_key();
            assert_eq!(vk.len(), scheme.verification_key_len());

            let sig = key.sign(b"one time");
            assert_eq!(sig.len(), scheme.signature_len());
            assert!(scheme.verify(b"one time", &sig, &vk), "{algorithm}");
            assert!(!scheme.verify(b"two time", &sig, &vk), "{algorithm}");
        }
    }

    #[test]
    fn test_verification_key_recovery() {
        let winternitz =
            OtsScheme::new(OtsAlgorithm::Winternitz { log_w: 4 }, DigestAlgorithm::Sha512);
        let key = winternitz.keygen(&[7; 64]);
        let sig = key.sign(b"msg");
        assert_eq!(
            winternitz.verification_key_from_signature(b"msg", &sig),
            Some(key.verification_key())
        );
        assert!(!winternitz.embeds_verification_key());

        let lamport = OtsScheme::new(OtsAlgorithm::Lamport, DigestAlgorithm::Sha256);
        let sig = lamport.keygen(&[7; 32]).sign(b"msg");
        assert_eq!(lamport.verification_key_from_signature(b"msg", &sig), None);
        assert!(lamport.embeds_verification_key());
    }

    #[test]
    fn test_keygen_is_deterministic() {
        let scheme =
            OtsScheme::new(OtsAlgorithm::Winternitz { log_w: 2 }, DigestAlgorithm::Sha3_256);
        assert_eq!(
            scheme.keygen(&[1; 32]).verification_key(),
            scheme.keygen(&[1; 32]).verification_key()
        );
        assert_ne!(
            scheme.keygen(&[1; 32]).verification_key(),
            scheme.keygen(&[2; 32]).verification_key()
        );
    }

    #[test]
    fn test_validate() {
        assert!(OtsAlgorithm::Winternitz { log_w: 3 }.validate().is_err());
        assert!(OtsAlgorithm::Winternitz { log_w: 4 }.validate().is_ok());
        assert!(OtsAlgorithm::Lamport.validate().is_ok());
    }
}
