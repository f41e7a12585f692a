//! CMSS two-level Merkle signature scheme implementation in Rust.
//!
//! A stateful hash-based signature scheme built from two levels of Merkle
//! trees of equal height `H`: the leaves of the main tree sign the roots of
//! subtrees, and the leaves of each subtree sign messages, for `2^(2H)`
//! signatures per key pair. Authentication paths are maintained with the BDS
//! traversal algorithm, so signing costs a bounded number of hash
//! evaluations and the signing state stays logarithmic in the number of
//! leaves.
//!
//! One-time signatures are Winternitz (`w = 2, 4, 16, 256`) or Lamport. The
//! `*Spr` parameter sets hash tree nodes with public masks drawn from the key
//! seed.
//!
//! Every signature advances the [`SigningKey`]. Its encoding must be stored
//! durably after each signature, or one-time keys will be reused; see
//! [`SigningKey::sign_and_persist`].
//!
//! ```
//! use cmss::{CmssOid, CmssParams, KeyPair};
//!
//! let params = CmssParams::new(CmssOid::CmssSha256W4, 4).unwrap();
//! let mut kp = KeyPair::generate(params, &mut rand::rng()).unwrap();
//!
//! let sig = kp.signing_key().sign(b"hello").unwrap();
//! assert!(kp.verifying_key().verify(b"hello", &sig));
//! ```

mod bds;
mod cmss;
mod cmss_core;
mod encoding;
mod error;
mod hash;
mod node;
mod ots;
mod params;
mod stack;
mod treehash;

pub use error::{CmssResult, Error};
pub use hash::DigestAlgorithm;
pub use ots::OtsAlgorithm;
pub use params::{CmssOid, CmssParams, DEFAULT_RETAIN, MAX_HEIGHT, MIN_HEIGHT};

pub use cmss::{KeyPair, Signature, SigningKey, VerifyingKey};

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair(oid: CmssOid, height: u32) -> KeyPair {
        KeyPair::generate(CmssParams::new(oid, height).unwrap(), &mut rand::rng()).unwrap()
    }

    #[test]
    fn test_cmss_sha256_w4_sign_verify() {
        let mut kp = key_pair(CmssOid::CmssSha256W4, 4);

        let message = b"test message";
        let sig = kp.signing_key().sign(message).unwrap();

        assert!(kp.verifying_key().verify(message, &sig));
    }

    #[test]
    fn test_cmss_bad_signature() {
        let mut kp = key_pair(CmssOid::CmssSha256W4, 4);

        let message = b"test message";
        let sig = kp.signing_key().sign(message).unwrap();

        // Corrupt the signature
        let mut sig_bytes = sig.as_ref().to_vec();
        sig_bytes[10] ^= 0xFF;
        let bad_sig = Signature::try_from(sig_bytes).unwrap();

        assert!(!kp.verifying_key().verify(message, &bad_sig));
    }

    #[test]
    fn test_every_parameter_set_signs() {
        for &oid in CmssOid::ALL {
            let mut kp = key_pair(oid, 2);
            for i in 0..5u32 {
                let msg = format!("{oid} message {i}");
                let sig = kp.signing_key().sign(msg.as_bytes()).unwrap();
                assert_eq!(sig.as_ref().len(), kp.verifying_key().params().signature_len());
                assert!(kp.verifying_key().verify(msg.as_bytes(), &sig), "{oid} #{i}");
            }
        }
    }

    #[test]
    fn test_larger_retain_parameter() {
        let params = CmssParams::new(CmssOid::CmssSha256W4, 6)
            .unwrap()
            .with_retain(4)
            .unwrap();
        let mut kp = KeyPair::generate(params, &mut rand::rng()).unwrap();
        for i in 0..70u32 {
            let msg = i.to_le_bytes();
            let sig = kp.signing_key().sign(&msg).unwrap();
            assert!(kp.verifying_key().verify(&msg, &sig));
        }
        assert_eq!(kp.signing_key().index_main(), 1);
        assert_eq!(kp.signing_key().index_sub(), 6);
    }

    #[test]
    fn test_verify_truncated_signature() {
        let mut kp = key_pair(CmssOid::CmssSha256W4, 3);

        let sig = kp.signing_key().sign(b"test message").unwrap();

        // Truncate the signature to its subtree half
        let short_bytes = &sig.as_ref()[..sig.as_ref().len() / 2];
        let short_sig = Signature::try_from(short_bytes).unwrap();

        assert!(!kp.verifying_key().verify(b"test message", &short_sig));
    }

    #[test]
    fn test_deterministic_keygen() {
        // main seed || subtree seed || mask seed
        let seed: Vec<u8> = (0u8..96).collect();
        let params = CmssParams::new(CmssOid::CmssSha256W2, 3).unwrap();

        let kp1 = KeyPair::from_seed(params, &seed).unwrap();
        let mut kp2 = KeyPair::from_seed(params, &seed).unwrap();

        assert_eq!(kp1.verifying_key(), kp2.verifying_key());

        let sig = kp2.signing_key().sign(b"deterministic test").unwrap();
        assert!(kp1.verifying_key().verify(b"deterministic test", &sig));
    }

    #[test]
    fn test_verifying_key_from_signing_key() {
        let kp = key_pair(CmssOid::CmssSha512W4Spr, 2);

        let derived = VerifyingKey::from(kp.signing_key_ref());
        assert_eq!(kp.verifying_key(), &derived);
    }

    #[test]
    fn test_unsupported_parameters() {
        assert!(matches!(
            CmssParams::new(CmssOid::CmssSha256W4, MIN_HEIGHT - 1),
            Err(Error::InvalidParams { .. })
        ));
        assert!(matches!(
            CmssParams::new(CmssOid::CmssSha256W4, MAX_HEIGHT + 1),
            Err(Error::InvalidParams { .. })
        ));
        assert!(matches!(
            CmssParams::new(CmssOid::CmssSha256W4, 4).unwrap().with_retain(1),
            Err(Error::InvalidParams { .. })
        ));
        assert_eq!(
            CmssParams::new(CmssOid::CmssSha256W4, 4).unwrap().retain(),
            DEFAULT_RETAIN
        );
    }

    #[test]
    fn test_parameter_set_names() {
        let oid: CmssOid = "CMSS-SHA256-W4-SPR".parse().unwrap();
        assert_eq!(oid, CmssOid::CmssSha256W4Spr);
        assert_eq!(oid.digest(), DigestAlgorithm::Sha256);
        assert_eq!(oid.ots(), OtsAlgorithm::Winternitz { log_w: 4 });
        assert!(oid.spr());
        assert!(matches!(
            "CMSS-MD5-W4".parse::<CmssOid>(),
            Err(Error::InvalidParameterSet(_))
        ));
    }
}
