use core::fmt;
use core::str::FromStr;

use crate::error::{CmssResult, Error};
use crate::hash::DigestAlgorithm;
use crate::node::fold_levels;
use crate::ots::{OtsAlgorithm, OtsScheme};

/// Length of every index field in encodings and signatures, in bytes.
pub(crate) const INDEX_LEN: usize = 4;

/// Lowest supported tree height.
pub const MIN_HEIGHT: u32 = 2;
/// Highest supported tree height.
pub const MAX_HEIGHT: u32 = 24;
/// Retain parameter used by [`CmssParams::new`].
pub const DEFAULT_RETAIN: u32 = 2;

/// Flag set in the raw OID of every preset hashing with masked nodes.
const SPR_OID_FLAG: u32 = 0x0001_0000;

macro_rules! define_cmss_oids {
    ($($variant:ident = $raw:expr, $name:expr, $digest:expr, $ots:expr, $spr:expr;)+) => {
        /// Named algorithm presets binding a digest, a one-time signature
        /// scheme and the node calculation to one OID.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        #[allow(non_camel_case_types)]
        pub enum CmssOid {
            $(
                #[doc = concat!("`", $name, "`.")]
                $variant = $raw,
            )+
        }

        impl CmssOid {
            /// Every supported preset.
            pub const ALL: &'static [CmssOid] = &[$(Self::$variant),+];

            /// Preset name, e.g. `CMSS-SHA256-W4`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Digest used by every tree node, OTS chain and PRNG step.
            pub const fn digest(self) -> DigestAlgorithm {
                match self {
                    $(Self::$variant => $digest,)+
                }
            }

            /// One-time signature scheme at the leaves.
            pub const fn ots(self) -> OtsAlgorithm {
                match self {
                    $(Self::$variant => $ots,)+
                }
            }

            /// Whether nodes are hashed with public masks.
            pub const fn spr(self) -> bool {
                match self {
                    $(Self::$variant => $spr,)+
                }
            }
        }
    };
}

define_cmss_oids! {
    CmssSha256W1 = 0x0000_0001, "CMSS-SHA256-W1",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 1 }, false;
    CmssSha256W2 = 0x0000_0002, "CMSS-SHA256-W2",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 2 }, false;
    CmssSha256W4 = 0x0000_0003, "CMSS-SHA256-W4",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 4 }, false;
    CmssSha256W8 = 0x0000_0004, "CMSS-SHA256-W8",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 8 }, false;
    CmssSha512W2 = 0x0000_0005, "CMSS-SHA512-W2",
        DigestAlgorithm::Sha512, OtsAlgorithm::Winternitz { log_w: 2 }, false;
    CmssSha512W4 = 0x0000_0006, "CMSS-SHA512-W4",
        DigestAlgorithm::Sha512, OtsAlgorithm::Winternitz { log_w: 4 }, false;
    CmssSha3_256W2 = 0x0000_0007, "CMSS-SHA3_256-W2",
        DigestAlgorithm::Sha3_256, OtsAlgorithm::Winternitz { log_w: 2 }, false;
    CmssSha3_256W4 = 0x0000_0008, "CMSS-SHA3_256-W4",
        DigestAlgorithm::Sha3_256, OtsAlgorithm::Winternitz { log_w: 4 }, false;
    CmssSha3_512W4 = 0x0000_0009, "CMSS-SHA3_512-W4",
        DigestAlgorithm::Sha3_512, OtsAlgorithm::Winternitz { log_w: 4 }, false;
    CmssSha256Lamport = 0x0000_000a, "CMSS-SHA256-LAMPORT",
        DigestAlgorithm::Sha256, OtsAlgorithm::Lamport, false;
    CmssSha3_256Lamport = 0x0000_000b, "CMSS-SHA3_256-LAMPORT",
        DigestAlgorithm::Sha3_256, OtsAlgorithm::Lamport, false;
    CmssSha256W2Spr = SPR_OID_FLAG | 0x02, "CMSS-SHA256-W2-SPR",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 2 }, true;
    CmssSha256W4Spr = SPR_OID_FLAG | 0x03, "CMSS-SHA256-W4-SPR",
        DigestAlgorithm::Sha256, OtsAlgorithm::Winternitz { log_w: 4 }, true;
    CmssSha512W4Spr = SPR_OID_FLAG | 0x06, "CMSS-SHA512-W4-SPR",
        DigestAlgorithm::Sha512, OtsAlgorithm::Winternitz { log_w: 4 }, true;
    CmssSha3_256W4Spr = SPR_OID_FLAG | 0x08, "CMSS-SHA3_256-W4-SPR",
        DigestAlgorithm::Sha3_256, OtsAlgorithm::Winternitz { log_w: 4 }, true;
    CmssSha256LamportSpr = SPR_OID_FLAG | 0x0a, "CMSS-SHA256-LAMPORT-SPR",
        DigestAlgorithm::Sha256, OtsAlgorithm::Lamport, true;
}

impl CmssOid {
    /// Raw OID value as used in key encodings.
    pub fn raw_oid(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CmssOid {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|oid| oid.raw_oid() == value)
            .ok_or(Error::InvalidOid(value))
    }
}

impl FromStr for CmssOid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|oid| oid.name() == s)
            .ok_or_else(|| Error::InvalidParameterSet(s.into()))
    }
}

impl fmt::Display for CmssOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A preset together with the tree shape.
///
/// The main tree and every subtree share the height `H`, so a key issues
/// `2^(2H)` signatures. `K` is the number of top levels whose right nodes are
/// retained from key generation instead of being recomputed; `H - K` is
/// always even.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CmssParams {
    oid: CmssOid,
    height: u32,
    k: u32,
}

impl CmssParams {
    /// Parameters with the default retain parameter.
    pub fn new(oid: CmssOid, height: u32) -> CmssResult<Self> {
        let params = Self {
            oid,
            height,
            k: DEFAULT_RETAIN,
        };
        params.with_retain(DEFAULT_RETAIN)
    }

    /// Overrides the retain parameter. An odd `H - K` is bumped to `K + 1`.
    pub fn with_retain(self, k: u32) -> CmssResult<Self> {
        let height = self.height;
        if !(MIN_HEIGHT..=MAX_HEIGHT).contains(&height) || k < 2 || k > height {
            return Err(Error::InvalidParams { height, k });
        }
        let k = if (height - k) % 2 == 1 {
            log::debug!(
                "retain parameter {k} leaves an odd number of treehash levels, using {}",
                k + 1
            );
            k + 1
        } else {
            k
        };
        self.oid.ots().validate()?;
        Ok(Self { k, ..self })
    }

    /// Rebuilds parameters from encoded fields, rejecting anything
    /// [`CmssParams::with_retain`] would have adjusted.
    pub(crate) fn from_encoded(raw_oid: u32, height: u32, k: u32) -> CmssResult<Self> {
        let oid = CmssOid::try_from(raw_oid)?;
        let params = Self { oid, height, k }.with_retain(k)?;
        if params.k != k {
            return Err(Error::InvalidParams { height, k });
        }
        Ok(params)
    }

    /// The algorithm preset.
    pub fn oid(&self) -> CmssOid {
        self.oid
    }

    /// Height `H` of the main tree and of every subtree.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Retain parameter `K`.
    pub fn retain(&self) -> u32 {
        self.k
    }

    /// Number of signatures a key can issue.
    pub fn signatures_total(&self) -> u64 {
        1u64 << (2 * self.height)
    }

    /// Leaves per tree.
    pub(crate) fn leaves(&self) -> u64 {
        1u64 << self.height
    }

    /// Digest length `n`.
    pub(crate) fn n(&self) -> usize {
        self.oid.digest().output_len()
    }

    /// Length of the seed taken by key generation: main, subtree and mask seeds.
    pub fn seed_len(&self) -> usize {
        3 * self.n()
    }

    pub(crate) fn ots_scheme(&self) -> OtsScheme {
        OtsScheme::new(self.oid.ots(), self.oid.digest())
    }

    /// Mask pairs used to compress a verification key into a leaf.
    pub(crate) fn leaf_mask_levels(&self) -> u32 {
        let chunks = self.ots_scheme().verification_key_len().div_ceil(self.n());
        fold_levels(chunks)
    }

    /// Mask pairs a masked key carries.
    pub(crate) fn mask_count(&self) -> usize {
        if self.oid.spr() {
            (self.leaf_mask_levels() + self.height) as usize
        } else {
            0
        }
    }

    /// Signature plus, if the scheme needs it, the verification key.
    fn ots_part_len(&self) -> usize {
        let ots = self.ots_scheme();
        let vk_len = if ots.embeds_verification_key() {
            ots.verification_key_len()
        } else {
            0
        };
        ots.signature_len() + vk_len
    }

    /// Length of a wire signature.
    pub fn signature_len(&self) -> usize {
        2 * (INDEX_LEN + self.ots_part_len() + self.height as usize * self.n())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_table_is_consistent() {
        for &oid in CmssOid::ALL {
            assert_eq!(CmssOid::try_from(oid.raw_oid()).unwrap(), oid);
            assert_eq!(oid.to_string().parse::<CmssOid>().unwrap(), oid);
            assert!(oid.ots().validate().is_ok());
            assert_eq!(oid.spr(), oid.name().ends_with("-SPR"));
        }
        assert!(matches!(
            CmssOid::try_from(0xdead_beef),
            Err(Error::InvalidOid(0xdead_beef))
        ));
        assert!("CMSS-MD5-W4".parse::<CmssOid>().is_err());
    }

    #[test]
    fn test_retain_normalisation() {
        let params = CmssParams::new(CmssOid::CmssSha256W4, 10).unwrap();
        assert_eq!(params.retain(), 2);

        let params = CmssParams::new(CmssOid::CmssSha256W4, 9).unwrap();
        assert_eq!(params.retain(), 3);

        let params = params.with_retain(6).unwrap();
        assert_eq!(params.retain(), 7);

        assert!(params.with_retain(1).is_err());
        assert!(params.with_retain(10).is_err());
        assert!(CmssParams::new(CmssOid::CmssSha256W4, 1).is_err());
        assert!(CmssParams::new(CmssOid::CmssSha256W4, 25).is_err());
    }

    #[test]
    fn test_from_encoded_rejects_adjusted_retain() {
        assert!(CmssParams::from_encoded(0x03, 9, 3).is_ok());
        assert!(matches!(
            CmssParams::from_encoded(0x03, 9, 2),
            Err(Error::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_derived_sizes() {
        let params = CmssParams::new(CmssOid::CmssSha256W4, 4).unwrap();
        assert_eq!(params.seed_len(), 96);
        assert_eq!(params.signatures_total(), 256);
        assert_eq!(params.mask_count(), 0);
        assert_eq!(params.signature_len(), 2 * (4 + 67 * 32 + 4 * 32));

        let spr = CmssParams::new(CmssOid::CmssSha256W4Spr, 4).unwrap();
        assert_eq!(spr.leaf_mask_levels(), 0);
        assert_eq!(spr.mask_count(), 4);

        let lamport = CmssParams::new(CmssOid::CmssSha256Lamport, 4).unwrap();
        assert_eq!(
            lamport.signature_len(),
            2 * (4 + 256 * 32 + 512 * 32 + 4 * 32)
        );
    }
}
