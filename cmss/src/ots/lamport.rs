use subtle::ConstantTimeEq;

use crate::hash::DigestAlgorithm;

/// Two secrets per message digest bit.
pub(super) fn secret_count(digest: DigestAlgorithm) -> usize {
    2 * 8 * digest.output_len()
}

fn message_bits(digest: DigestAlgorithm, msg: &[u8]) -> impl Iterator<Item = usize> {
    digest
        .digest(msg)
        .into_iter()
        .flat_map(|byte| (0..8).rev().map(move |bit| usize::from((byte >> bit) & 1)))
}

/// Concatenated digests of every secret.
pub(super) fn public_key(digest: DigestAlgorithm, secrets: &[Vec<u8>]) -> Vec<u8> {
    secrets
        .iter()
        .flat_map(|secret| digest.digest(secret))
        .collect()
}

/// Reveals one secret of each pair, chosen by the message digest bit.
pub(super) fn sign(digest: DigestAlgorithm, secrets: &[Vec<u8>], msg: &[u8]) -> Vec<u8> {
    message_bits(digest, msg)
        .enumerate()
        .flat_map(|(i, bit)| secrets[2 * i + bit].iter().copied())
        .collect()
}

pub(super) fn verify(digest: DigestAlgorithm, msg: &[u8], sig: &[u8], public_key: &[u8]) -> bool {
    let n = digest.output_len();
    if sig.len() != 8 * n * n || public_key.len() != secret_count(digest) * n {
        return false;
    }
    let mut valid = subtle::Choice::from(1);
    for ((i, bit), revealed) in message_bits(digest, msg).enumerate().zip(sig.chunks(n)) {
        let offset = (2 * i + bit) * n;
        valid &= digest
            .digest(revealed)
            .ct_eq(&public_key[offset..offset + n]);
    }
    valid.into()
}
