/// Errors used throughout this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OID value is not recognized.
    #[error("Invalid OID: 0x{0:08x}")]
    InvalidOid(u32),
    /// The parameter set name is not recognized.
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),
    /// The tree height / retain parameter combination is not supported.
    #[error("Invalid parameters: unsupported tree height {height} with retain parameter {k}")]
    InvalidParams {
        /// Height of the main tree and of every subtree.
        height: u32,
        /// Number of top levels served from retain stacks.
        k: u32,
    },
    /// All one-time signatures of the main tree have been used.
    #[error("Key exhausted: all one-time signatures have been used")]
    KeyExhausted,
    /// The provided seed has an incorrect length.
    #[error("Invalid seed length: expected {expected}, got {got}")]
    InvalidSeedLength {
        /// Expected seed length in bytes.
        expected: usize,
        /// Actual seed length in bytes.
        got: usize,
    },
    /// The provided key has an incorrect length.
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength {
        /// Expected key length in bytes.
        expected: usize,
        /// Actual key length in bytes.
        got: usize,
    },
    /// The provided signature has an incorrect length.
    #[error("Invalid signature length: expected {expected}, got {got}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes.
        expected: usize,
        /// Actual signature length in bytes.
        got: usize,
    },
    /// The encoded input ended before all fields were read.
    #[error("Encoding truncated")]
    Truncated,
    /// The encoded input continues after the last field.
    #[error("Encoding has {0} trailing bytes")]
    TrailingBytes(usize),
    /// A field of the encoded input is not well formed.
    #[error("Malformed encoding: {0}")]
    Malformed(&'static str),
    /// A decoded signing state disagrees with its own parameters.
    #[error("Signing state mismatch: {0}")]
    StateMismatch(&'static str),
    /// The caller-supplied persistence step failed; the signing state was not advanced.
    #[error("Persisting the signing state failed: {0}")]
    Persistence(String),
}

/// Result type used by this crate.
pub type CmssResult<T> = Result<T, Error>;
