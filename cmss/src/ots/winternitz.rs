use crate::hash::DigestAlgorithm;

/// Chain layout for a digest length and Winternitz parameter.
#[derive(Clone, Copy, Debug)]
pub(super) struct Layout {
    log_w: u32,
    len1: usize,
    len2: usize,
}

impl Layout {
    pub(super) fn new(digest: DigestAlgorithm, log_w: u32) -> Self {
        let w = 1u32 << log_w;
        let len1 = (8 * digest.output_len()).div_ceil(log_w as usize);
        let max_checksum = len1 as u32 * (w - 1);
        let len2 = (max_checksum.ilog2() / log_w + 1) as usize;
        Self { log_w, len1, len2 }
    }

    pub(super) fn chains(self) -> usize {
        self.len1 + self.len2
    }

    fn max_steps(self) -> u32 {
        (1u32 << self.log_w) - 1
    }

    /// Interprets `input` as base-w digits, most significant first.
    fn base_w(self, input: &[u8], out_len: usize) -> Vec<u32> {
        let per_byte = 8 / self.log_w;
        input
            .iter()
            .flat_map(|&byte| {
                (1..=per_byte).map(move |k| {
                    u32::from(byte >> (8 - k * self.log_w)) & self.max_steps()
                })
            })
            .take(out_len)
            .collect()
    }

    /// Chain lengths of a signature: message digits, then checksum digits.
    fn chain_lengths(self, digest: DigestAlgorithm, msg: &[u8]) -> Vec<u32> {
        let mut lengths = self.base_w(&digest.digest(msg), self.len1);
        let mut checksum: u32 = lengths.iter().map(|d| self.max_steps() - d).sum();
        let mut csum_digits = vec![0u32; self.len2];
        for digit in csum_digits.iter_mut().rev() {
            *digit = checksum & self.max_steps();
            checksum >>= self.log_w;
        }
        lengths.extend(csum_digits);
        lengths
    }
}

/// Applies the chain function `steps` times.
fn chain(digest: DigestAlgorithm, input: &[u8], steps: u32) -> Vec<u8> {
    let mut out = input.to_vec();
    for _ in 0..steps {
        out = digest.digest(&out);
    }
    out
}

pub(super) fn public_key(digest: DigestAlgorithm, layout: Layout, secrets: &[Vec<u8>]) -> Vec<u8> {
    let ends: Vec<Vec<u8>> = secrets
        .iter()
        .map(|secret| chain(digest, secret, layout.max_steps()))
        .collect();
    let parts: Vec<&[u8]> = ends.iter().map(Vec::as_slice).collect();
    digest.digest_parts(&parts)
}

pub(super) fn sign(
    digest: DigestAlgorithm,
    layout: Layout,
    secrets: &[Vec<u8>],
    msg: &[u8],
) -> Vec<u8> {
    layout
        .chain_lengths(digest, msg)
        .into_iter()
        .zip(secrets)
        .flat_map(|(steps, secret)| chain(digest, secret, steps))
        .collect()
}

/// Completes every chain of `sig` and hashes the ends.
pub(super) fn public_key_from_signature(
    digest: DigestAlgorithm,
    layout: Layout,
    msg: &[u8],
    sig: &[u8],
) -> Option<Vec<u8>> {
    let n = digest.output_len();
    if sig.len() != layout.chains() * n {
        return None;
    }
    let ends: Vec<Vec<u8>> = layout
        .chain_lengths(digest, msg)
        .into_iter()
        .zip(sig.chunks(n))
        .map(|(steps, part)| chain(digest, part, layout.max_steps() - steps))
        .collect();
    let parts: Vec<&[u8]> = ends.iter().map(Vec::as_slice).collect();
    Some(digest.digest_parts(&parts))
}
