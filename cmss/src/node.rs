use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::hash::{DigestAlgorithm, Prng};

/// A node of a perfect binary hash tree.
///
/// `height` is the level the node sits at, leaves have height 0.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    value: Vec<u8>,
    height: u32,
}

impl Node {
    /// Creates a node from its digest value and tree level.
    pub fn new(value: Vec<u8>, height: u32) -> Self {
        Self { value, height }
    }

    /// Digest value of the node.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Tree level of the node, 0 for leaves.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.bytes(&self.value);
        enc.u32(self.height);
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>, n: usize) -> CmssResult<Self> {
        let value = dec.bytes_exact(n)?;
        let height = dec.u32()?;
        Ok(Self { value, height })
    }
}

/// Per-height XOR masks `(left, right)` of the masked node calculation.
pub(crate) type MaskPair = [Vec<u8>; 2];

/// Turns one-time verification keys into leaves and sibling pairs into parents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeCalc {
    /// `leaf = H(vk)`, `parent = H(left || right)`. Needs a collision
    /// resistant digest.
    Classic { digest: DigestAlgorithm },
    /// XOR both children with public per-height masks before hashing. Sound
    /// with a merely second-preimage resistant digest.
    ///
    /// The first `leaf_levels` mask pairs compress a verification key that
    /// spans several digest-sized chunks into one leaf, tree height `h` uses
    /// mask pair `leaf_levels + h`.
    Masked {
        digest: DigestAlgorithm,
        masks: Vec<MaskPair>,
        leaf_levels: u32,
    },
}

/// Number of pairwise folding rounds needed to reduce `chunks` values to one.
pub(crate) fn fold_levels(chunks: usize) -> u32 {
    let mut remaining = chunks;
    let mut levels = 0;
    while remaining > 1 {
        remaining = remaining.div_ceil(2);
        levels += 1;
    }
    levels
}

impl NodeCalc {
    /// Builds the masked variant, deriving all mask pairs from `mask_seed`.
    pub(crate) fn masked_from_seed(
        digest: DigestAlgorithm,
        vk_len: usize,
        height: u32,
        mask_seed: &[u8],
    ) -> Self {
        let prng = Prng::new(digest);
        let leaf_levels = fold_levels(vk_len.div_ceil(digest.output_len()));
        let mut seed = mask_seed.to_vec();
        let masks = (0..leaf_levels + height)
            .map(|_| [prng.next_seed(&mut seed), prng.next_seed(&mut seed)])
            .collect();
        Self::Masked {
            digest,
            masks,
            leaf_levels,
        }
    }

    /// Builds the masked variant from an explicit mask table.
    pub(crate) fn masked(
        digest: DigestAlgorithm,
        vk_len: usize,
        height: u32,
        masks: Vec<MaskPair>,
    ) -> CmssResult<Self> {
        let n = digest.output_len();
        let leaf_levels = fold_levels(vk_len.div_ceil(n));
        if masks.len() != (leaf_levels + height) as usize {
            return Err(Error::Malformed("mask table does not match tree height"));
        }
        if masks.iter().flatten().any(|mask| mask.len() != n) {
            return Err(Error::Malformed("mask length differs from digest length"));
        }
        Ok(Self::Masked {
            digest,
            masks,
            leaf_levels,
        })
    }

    pub(crate) fn masks(&self) -> Option<&[MaskPair]> {
        match self {
            Self::Classic { .. } => None,
            Self::Masked { masks, .. } => Some(masks),
        }
    }

    fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::Classic { digest } | Self::Masked { digest, .. } => *digest,
        }
    }

    fn masked_hash(digest: DigestAlgorithm, left: &[u8], right: &[u8], mask: &MaskPair) -> Vec<u8> {
        let l: Vec<u8> = left.iter().zip(&mask[0]).map(|(a, b)| a ^ b).collect();
        let r: Vec<u8> = right.iter().zip(&mask[1]).map(|(a, b)| a ^ b).collect();
        digest.digest_parts(&[&l, &r])
    }

    /// Computes the height-0 leaf for a one-time verification key.
    pub(crate) fn leaf(&self, verification_key: &[u8]) -> Node {
        match self {
            Self::Classic { digest } => Node::new(digest.digest(verification_key), 0),
            Self::Masked { digest, masks, .. } => {
                let n = digest.output_len();
                let mut level: Vec<Vec<u8>> = verification_key
                    .chunks(n)
                    .map(|chunk| {
                        let mut padded = chunk.to_vec();
                        padded.resize(n, 0);
                        padded
                    })
                    .collect();
                let mut round = 0usize;
                while level.len() > 1 {
                    level = level
                        .chunks(2)
                        .map(|pair| match pair {
                            [left, right] => Self::masked_hash(*digest, left, right, &masks[round]),
                            [single] => single.clone(),
                            _ => unreachable!("chunks(2) yields one or two values"),
                        })
                        .collect();
                    round += 1;
                }
                let value = level.pop().unwrap_or_else(|| vec![0u8; n]);
                Node::new(value, 0)
            }
        }
    }

    /// Computes the parent of two siblings of equal height.
    ///
    /// # Panics
    /// Panics if the siblings differ in height or value length; either means
    /// the caller's traversal state is corrupt.
    pub(crate) fn parent(&self, left: &Node, right: &Node) -> Node {
        assert_eq!(left.height, right.height, "sibling heights differ");
        assert_eq!(
            left.value.len(),
            right.value.len(),
            "sibling value lengths differ"
        );
        let height = left.height;
        let value = match self {
            Self::Classic { digest } => digest.digest_parts(&[&left.value, &right.value]),
            Self::Masked {
                digest,
                masks,
                leaf_levels,
            } => {
                let mask = &masks[(leaf_levels + height) as usize];
                Self::masked_hash(*digest, &left.value, &right.value, mask)
            }
        };
        Node::new(value, height + 1)
    }

    /// Length in bytes of every node value.
    pub(crate) fn node_len(&self) -> usize {
        self.digest().output_len()
    }
}
