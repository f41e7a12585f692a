use core::fmt;

use zeroize::Zeroize;

use crate::cmss_core::{self, CmssState, LeafCalc};
use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::node::Node;
use crate::params::{CmssParams, INDEX_LEN};

// ---------------------------------------------------------------------------
// SigningKey
// ---------------------------------------------------------------------------

/// A CMSS signing key: the complete, stateful signing state.
///
/// Every call to [`SigningKey::sign`] consumes a one-time key. The encoding
/// returned by [`SigningKey::to_bytes`] must be stored durably after every
/// signature; reloading an older encoding reuses one-time keys. See
/// [`SigningKey::sign_and_persist`].
#[derive(Clone)]
pub struct SigningKey {
    state: CmssState,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("parameter_set", &self.state.params().oid())
            .field("height", &self.state.params().height())
            .field("index_main", &self.state.index_main())
            .field("index_sub", &self.state.index_sub())
            .field("state", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Zeroize for SigningKey {
    fn zeroize(&mut self) {
        self.state.zeroize();
    }
}

impl TryFrom<&[u8]> for SigningKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self {
            state: CmssState::decode(value)?,
        })
    }
}

impl TryFrom<Vec<u8>> for SigningKey {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        SigningKey::try_from(value.as_slice())
    }
}

impl TryFrom<&Vec<u8>> for SigningKey {
    type Error = Error;

    fn try_from(value: &Vec<u8>) -> Result<Self, Self::Error> {
        SigningKey::try_from(value.as_slice())
    }
}

impl TryFrom<Box<[u8]>> for SigningKey {
    type Error = Error;

    fn try_from(value: Box<[u8]>) -> Result<Self, Self::Error> {
        SigningKey::try_from(value.as_ref())
    }
}

#[cfg(test)]
impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

#[cfg(test)]
impl Eq for SigningKey {}

#[cfg(feature = "serde")]
impl serdect::serde::Serialize for SigningKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serdect::serde::Serializer,
    {
        let mut bytes = self.to_bytes();
        let result = serdect::slice::serialize_hex_lower_or_bin(&bytes, serializer);
        bytes.zeroize();
        result
    }
}

#[cfg(feature = "serde")]
impl<'de> serdect::serde::Deserialize<'de> for SigningKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serdect::serde::Deserializer<'de>,
    {
        let bytes = serdect::slice::deserialize_hex_or_bin_vec(deserializer)?;
        Self::try_from(bytes).map_err(serdect::serde::de::Error::custom)
    }
}

impl SigningKey {
    /// Signs a message and advances to the next one-time key.
    ///
    /// Returns [`Error::KeyExhausted`] once all `2^(2H)` signatures have been
    /// issued; the state is left untouched in that case.
    pub fn sign(&mut self, msg: &[u8]) -> CmssResult<Signature> {
        self.state.sign(msg).map(|bytes| Signature { bytes })
    }

    /// Signs a message and hands the advanced state to `persist` before
    /// committing it.
    ///
    /// The in-memory key only moves forward, and the signature is only
    /// released, if `persist` succeeds. A failed `persist` leaves the key as
    /// it was and returns [`Error::Persistence`].
    pub fn sign_and_persist<F, E>(&mut self, msg: &[u8], persist: F) -> CmssResult<Signature>
    where
        F: FnOnce(&[u8]) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut advanced = self.state.clone();
        let bytes = match advanced.sign(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                advanced.zeroize();
                return Err(err);
            }
        };
        let mut encoded = advanced.encode();
        let persisted = persist(&encoded);
        encoded.zeroize();
        if let Err(err) = persisted {
            advanced.zeroize();
            log::warn!("signing state not persisted, discarding signature: {err}");
            return Err(Error::Persistence(err.to_string()));
        }
        let mut previous = core::mem::replace(&mut self.state, advanced);
        previous.zeroize();
        Ok(Signature { bytes })
    }

    /// Parameters of this key.
    pub fn params(&self) -> &CmssParams {
        self.state.params()
    }

    /// Index of the subtree currently signing messages.
    pub fn index_main(&self) -> u32 {
        self.state.index_main()
    }

    /// Index of the next leaf within the current subtree.
    pub fn index_sub(&self) -> u32 {
        self.state.index_sub()
    }

    /// Number of signatures this key can still issue.
    pub fn signatures_remaining(&self) -> u64 {
        self.state.params().signatures_total() - self.state.signatures_used()
    }

    /// Whether every one-time key has been used.
    pub fn is_exhausted(&self) -> bool {
        self.state.is_exhausted()
    }

    /// Encodes the complete signing state.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.state.encode()
    }

    /// Returns the matching verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(self)
    }
}

impl signature::SignerMut<Signature> for SigningKey {
    fn try_sign(&mut self, msg: &[u8]) -> Result<Signature, signature::Error> {
        self.sign(msg).map_err(|_| signature::Error::new())
    }
}

impl signature::Keypair for SigningKey {
    type VerifyingKey = VerifyingKey;

    fn verifying_key(&self) -> Self::VerifyingKey {
        VerifyingKey::from(self)
    }
}

// ---------------------------------------------------------------------------
// VerifyingKey
// ---------------------------------------------------------------------------

/// A CMSS verifying key: the main tree root, plus the public masks of
/// masked parameter sets.
#[derive(Clone, Debug)]
pub struct VerifyingKey {
    bytes: Vec<u8>,
    params: CmssParams,
    root: Node,
    leaf_calc: LeafCalc,
}

impl AsRef<[u8]> for VerifyingKey {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl TryFrom<&[u8]> for VerifyingKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let mut dec = Decoder::new(value);
        let raw_oid = dec.u32()?;
        let height = dec.u32()?;
        let k = dec.u32()?;
        let params = CmssParams::from_encoded(raw_oid, height, k)?;
        let root = dec.bytes()?;
        if root.len() != params.n() {
            return Err(Error::InvalidKeyLength {
                expected: params.n(),
                got: root.len(),
            });
        }
        let root = Node::new(root, height);
        let masks = cmss_core::decode_masks(&mut dec, &params)?;
        dec.finish()?;
        let leaf_calc = LeafCalc::new(&params, LeafCalc::node_calc(&params, masks)?);
        Ok(Self {
            bytes: value.to_vec(),
            params,
            root,
            leaf_calc,
        })
    }
}

impl TryFrom<Vec<u8>> for VerifyingKey {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        VerifyingKey::try_from(value.as_slice())
    }
}

impl TryFrom<&Vec<u8>> for VerifyingKey {
    type Error = Error;

    fn try_from(value: &Vec<u8>) -> Result<Self, Self::Error> {
        VerifyingKey::try_from(value.as_slice())
    }
}

impl TryFrom<Box<[u8]>> for VerifyingKey {
    type Error = Error;

    fn try_from(value: Box<[u8]>) -> Result<Self, Self::Error> {
        VerifyingKey::try_from(value.as_ref())
    }
}

impl PartialEq for VerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for VerifyingKey {}

impl core::hash::Hash for VerifyingKey {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

#[cfg(feature = "serde")]
impl serdect::serde::Serialize for VerifyingKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serdect::serde::Serializer,
    {
        serdect::slice::serialize_hex_lower_or_bin(&self.bytes, serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serdect::serde::Deserialize<'de> for VerifyingKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serdect::serde::Deserializer<'de>,
    {
        let bytes = serdect::slice::deserialize_hex_or_bin_vec(deserializer)?;
        Self::try_from(bytes).map_err(serdect::serde::de::Error::custom)
    }
}

impl VerifyingKey {
    /// Checks `signature` over `msg`. Malformed signatures are simply invalid.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        cmss_core::verify(&self.params, &self.leaf_calc, &self.root, msg, &signature.bytes)
    }

    /// Parameters of this key.
    pub fn params(&self) -> &CmssParams {
        &self.params
    }

    /// Main tree root.
    pub fn root(&self) -> &[u8] {
        self.root.value()
    }

    /// Encodes the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl From<&SigningKey> for VerifyingKey {
    fn from(sk: &SigningKey) -> Self {
        let params = *sk.state.params();
        let root = sk.state.root().clone();
        let masks = sk.state.masks();

        let mut enc = Encoder::new();
        enc.u32(params.oid().raw_oid());
        enc.u32(params.height());
        enc.u32(params.retain());
        enc.bytes(root.value());
        cmss_core::encode_masks(&mut enc, masks);

        VerifyingKey {
            bytes: enc.finish(),
            params,
            root,
            leaf_calc: sk.state.leaf_calc().clone(),
        }
    }
}

impl signature::Verifier<Signature> for VerifyingKey {
    fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), signature::Error> {
        if VerifyingKey::verify(self, msg, signature) {
            Ok(())
        } else {
            Err(signature::Error::new())
        }
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A CMSS signature: the subtree half followed by the main tree half.
///
/// Each half is `index (4 bytes) || OTS signature || [OTS verification key] ||
/// authentication path`; both halves have the same length.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Signature {
    fn index_at(&self, offset: usize) -> u32 {
        let mut raw = [0u8; INDEX_LEN];
        raw.copy_from_slice(&self.bytes[offset..offset + INDEX_LEN]);
        u32::from_be_bytes(raw)
    }

    /// Leaf index within the subtree that signed the message.
    pub fn index_sub(&self) -> u32 {
        self.index_at(0)
    }

    /// Index of the subtree within the main tree.
    pub fn index_main(&self) -> u32 {
        self.index_at(self.bytes.len() / 2)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Signature::try_from(value.to_vec())
    }
}

impl TryFrom<Vec<u8>> for Signature {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() < 2 * INDEX_LEN || value.len() % 2 != 0 {
            return Err(Error::InvalidSignatureLength {
                expected: (value.len() & !1).max(2 * INDEX_LEN),
                got: value.len(),
            });
        }
        Ok(Signature { bytes: value })
    }
}

impl TryFrom<&Vec<u8>> for Signature {
    type Error = Error;

    fn try_from(value: &Vec<u8>) -> Result<Self, Self::Error> {
        Signature::try_from(value.as_slice())
    }
}

impl TryFrom<Box<[u8]>> for Signature {
    type Error = Error;

    fn try_from(value: Box<[u8]>) -> Result<Self, Self::Error> {
        Signature::try_from(value.into_vec())
    }
}

impl From<Signature> for Vec<u8> {
    fn from(sig: Signature) -> Vec<u8> {
        sig.bytes
    }
}

#[cfg(feature = "serde")]
impl serdect::serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serdect::serde::Serializer,
    {
        serdect::slice::serialize_hex_lower_or_bin(&self.bytes, serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serdect::serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serdect::serde::Deserializer<'de>,
    {
        let bytes = serdect::slice::deserialize_hex_or_bin_vec(deserializer)?;
        Self::try_from(bytes).map_err(serdect::serde::de::Error::custom)
    }
}

impl signature::SignatureEncoding for Signature {
    type Repr = Vec<u8>;
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A CMSS key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generates a random key pair.
    pub fn generate<R: rand::CryptoRng>(params: CmssParams, rng: &mut R) -> CmssResult<Self> {
        let mut seed = vec![0u8; params.seed_len()];
        rng.fill_bytes(&mut seed);
        let result = Self::from_seed(params, &seed);
        seed.zeroize();
        result
    }

    /// Generates a key pair from a deterministic seed of
    /// [`CmssParams::seed_len`] bytes (main, subtree and mask seeds).
    pub fn from_seed(params: CmssParams, seed: &[u8]) -> CmssResult<Self> {
        let signing_key = SigningKey {
            state: CmssState::generate(params, seed)?,
        };
        Ok(Self {
            verifying_key: VerifyingKey::from(&signing_key),
            signing_key,
        })
    }

    /// Returns a mutable reference to the signing key.
    pub fn signing_key(&mut self) -> &mut SigningKey {
        &mut self.signing_key
    }

    /// Returns a reference to the signing key.
    pub fn signing_key_ref(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Returns a reference to the verifying key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Splits the pair into its keys.
    pub fn into_parts(self) -> (SigningKey, VerifyingKey) {
        (self.signing_key, self.verifying_key)
    }
}
