//! Two-level signing state: one main tree whose leaves sign subtree roots and
//! two subtrees whose leaves sign messages. One subtree is active, the other
//! is built one leaf per signature so that it is ready when the active one
//! runs out.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::bds::BdsAuthPath;
use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::hash::Prng;
use crate::node::{MaskPair, Node, NodeCalc};
use crate::ots::OtsScheme;
use crate::params::{CmssParams, INDEX_LEN};
use crate::treehash::LeafSource;

/// Computes leaves from one-time keys and inner nodes from siblings.
#[derive(Clone, Debug)]
pub(crate) struct LeafCalc {
    prng: Prng,
    ots: OtsScheme,
    calc: NodeCalc,
}

impl LeafCalc {
    pub(crate) fn new(params: &CmssParams, calc: NodeCalc) -> Self {
        Self {
            prng: Prng::new(params.oid().digest()),
            ots: params.ots_scheme(),
            calc,
        }
    }

    /// Node calculation for `params`, masked ones reading `masks`.
    pub(crate) fn node_calc(
        params: &CmssParams,
        masks: Option<Vec<MaskPair>>,
    ) -> CmssResult<NodeCalc> {
        let digest = params.oid().digest();
        match (params.oid().spr(), masks) {
            (false, None) => Ok(NodeCalc::Classic { digest }),
            (true, Some(masks)) => NodeCalc::masked(
                digest,
                params.ots_scheme().verification_key_len(),
                params.height(),
                masks,
            ),
            (false, Some(_)) => Err(Error::Malformed("masks given for an unmasked parameter set")),
            (true, None) => Err(Error::Malformed("masks missing")),
        }
    }

    pub(crate) fn leaf(&self, verification_key: &[u8]) -> Node {
        self.calc.leaf(verification_key)
    }

    /// Signs `msg` with the one-time key derived from the next seed in
    /// `seed`'s chain. Returns the signature and the verification key.
    fn sign_with_next(&self, seed: &mut [u8], msg: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut ots_seed = self.prng.next_seed(seed);
        let key = self.ots.keygen(&ots_seed);
        ots_seed.zeroize();
        (key.sign(msg), key.verification_key())
    }

    /// Recovers the leaf one OTS signature part belongs to, `None` if the
    /// part does not verify.
    fn leaf_from_signature(&self, msg: &[u8], ots_sig: &[u8], embedded_vk: &[u8]) -> Option<Node> {
        let vk = if self.ots.embeds_verification_key() {
            self.ots
                .verify(msg, ots_sig, embedded_vk)
                .then(|| embedded_vk.to_vec())?
        } else {
            self.ots.verification_key_from_signature(msg, ots_sig)?
        };
        Some(self.calc.leaf(&vk))
    }
}

impl LeafSource for LeafCalc {
    fn next_leaf(&self, seed: &mut [u8]) -> Node {
        let mut ots_seed = self.prng.next_seed(seed);
        let vk = self.ots.keygen(&ots_seed).verification_key();
        ots_seed.zeroize();
        self.calc.leaf(&vk)
    }

    fn skip_leaf(&self, seed: &mut [u8]) {
        self.prng.next_seed(seed).zeroize();
    }

    fn parent(&self, left: &Node, right: &Node) -> Node {
        self.calc.parent(left, right)
    }

    fn node_len(&self) -> usize {
        self.calc.node_len()
    }
}

/// Mutable signing state of one key pair.
#[derive(Clone)]
pub(crate) struct CmssState {
    params: CmssParams,
    leaf_calc: LeafCalc,
    index_main: u32,
    index_sub: u32,
    /// Main tree, active subtree and next subtree seed chains.
    seeds: [Vec<u8>; 3],
    main: BdsAuthPath,
    subtrees: [BdsAuthPath; 2],
    active: usize,
    subtree_root_sig: Vec<u8>,
    main_verification_key: Option<Vec<u8>>,
    root: Node,
}

impl CmssState {
    /// Builds the main tree and the first subtree from `seed`
    /// (`main || subtree || mask`, `n` bytes each).
    pub(crate) fn generate(params: CmssParams, seed: &[u8]) -> CmssResult<Self> {
        let n = params.n();
        if seed.len() != params.seed_len() {
            return Err(Error::InvalidSeedLength {
                expected: params.seed_len(),
                got: seed.len(),
            });
        }
        let (main_seed, rest) = seed.split_at(n);
        let (sub_seed, mask_seed) = rest.split_at(n);

        let digest = params.oid().digest();
        let calc = if params.oid().spr() {
            NodeCalc::masked_from_seed(
                digest,
                params.ots_scheme().verification_key_len(),
                params.height(),
                mask_seed,
            )
        } else {
            NodeCalc::Classic { digest }
        };
        let leaf_calc = LeafCalc::new(&params, calc);

        let (height, k) = (params.height(), params.retain());
        let (mut main, root, _) =
            BdsAuthPath::initialize(height, k, main_seed.to_vec(), &leaf_calc);
        let (first, first_root, next_seed) =
            BdsAuthPath::initialize(height, k, sub_seed.to_vec(), &leaf_calc);

        let mut seeds = [main_seed.to_vec(), sub_seed.to_vec(), next_seed.clone()];
        let (subtree_root_sig, main_vk) =
            leaf_calc.sign_with_next(&mut seeds[0], first_root.value());
        main.set_left_leaf(leaf_calc.leaf(&main_vk));
        let main_verification_key = params
            .ots_scheme()
            .embeds_verification_key()
            .then_some(main_vk);

        log::info!(
            "generated {} key pair: height {height}, {} signatures",
            params.oid(),
            params.signatures_total()
        );
        Ok(Self {
            params,
            leaf_calc,
            index_main: 0,
            index_sub: 0,
            seeds,
            main,
            subtrees: [first, BdsAuthPath::initialization_setup(height, k, next_seed)],
            active: 0,
            subtree_root_sig,
            main_verification_key,
            root,
        })
    }

    pub(crate) fn params(&self) -> &CmssParams {
        &self.params
    }

    pub(crate) fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn leaf_calc(&self) -> &LeafCalc {
        &self.leaf_calc
    }

    pub(crate) fn masks(&self) -> Option<&[MaskPair]> {
        self.leaf_calc.calc.masks()
    }

    pub(crate) fn index_main(&self) -> u32 {
        self.index_main
    }

    pub(crate) fn index_sub(&self) -> u32 {
        self.index_sub
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        u64::from(self.index_main) >= self.params.leaves()
    }

    /// Signatures issued so far.
    pub(crate) fn signatures_used(&self) -> u64 {
        if self.is_exhausted() {
            self.params.signatures_total()
        } else {
            u64::from(self.index_main) * self.params.leaves() + u64::from(self.index_sub)
        }
    }

    /// Signs `msg` and advances to the next one-time key.
    ///
    /// Fails without touching the state once every key has been used.
    pub(crate) fn sign(&mut self, msg: &[u8]) -> CmssResult<Vec<u8>> {
        if self.is_exhausted() {
            log::warn!(
                "refusing to sign: every one-time key of this {} key has been used",
                self.params.oid()
            );
            return Err(Error::KeyExhausted);
        }
        let leaves = self.params.leaves();
        let embeds_vk = self.params.ots_scheme().embeds_verification_key();

        let (ots_sig, vk) = self.leaf_calc.sign_with_next(&mut self.seeds[1], msg);

        let mut out = Vec::with_capacity(self.params.signature_len());
        out.extend_from_slice(&self.index_sub.to_be_bytes());
        out.extend_from_slice(&ots_sig);
        if embeds_vk {
            out.extend_from_slice(&vk);
        }
        for node in self.subtrees[self.active].auth_path() {
            out.extend_from_slice(node.value());
        }
        out.extend_from_slice(&self.index_main.to_be_bytes());
        out.extend_from_slice(&self.subtree_root_sig);
        if let Some(main_vk) = &self.main_verification_key {
            out.extend_from_slice(main_vk);
        }
        for node in self.main.auth_path() {
            out.extend_from_slice(node.value());
        }

        if self.index_sub % 2 == 0 {
            let leaf = self.leaf_calc.leaf(&vk);
            self.subtrees[self.active].set_left_leaf(leaf);
        }
        if u64::from(self.index_main) + 1 < leaves {
            self.subtrees[1 - self.active].initialization_update(&self.leaf_calc);
        }
        if u64::from(self.index_sub) + 1 < leaves {
            self.subtrees[self.active].update(self.index_sub, &self.leaf_calc);
            self.index_sub += 1;
        } else {
            self.next_tree();
        }
        Ok(out)
    }

    /// Retires the used up subtree and activates the prebuilt one.
    fn next_tree(&mut self) {
        if u64::from(self.index_main) + 1 == self.params.leaves() {
            self.index_main += 1;
            for seed in &mut self.seeds {
                seed.as_mut_slice().zeroize();
            }
            log::warn!(
                "{} key exhausted after {} signatures",
                self.params.oid(),
                self.params.signatures_total()
            );
            return;
        }

        self.main.update(self.index_main, &self.leaf_calc);
        self.index_main += 1;

        let next = 1 - self.active;
        let (root, next_seed) = self.subtrees[next].initialization_finalize();
        let (sig, vk) = self.leaf_calc.sign_with_next(&mut self.seeds[0], root.value());
        if self.index_main % 2 == 0 {
            self.main.set_left_leaf(self.leaf_calc.leaf(&vk));
        }
        self.subtree_root_sig = sig;
        self.main_verification_key = self
            .params
            .ots_scheme()
            .embeds_verification_key()
            .then_some(vk);

        self.index_sub = 0;
        self.seeds[1].zeroize();
        self.seeds[1] = core::mem::replace(&mut self.seeds[2], next_seed.clone());
        self.subtrees[self.active].zeroize();
        self.subtrees[self.active] = BdsAuthPath::initialization_setup(
            self.params.height(),
            self.params.retain(),
            next_seed,
        );
        self.active = next;
        log::info!("switched to subtree {} of {}", self.index_main, self.params.oid());
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.u32(self.params.oid().raw_oid());
        enc.u32(self.index_main);
        enc.u32(self.index_sub);
        enc.u32(self.params.height());
        enc.u32(self.params.retain());
        for seed in &self.seeds {
            enc.bytes(seed);
        }
        self.main.encode(&mut enc);
        for subtree in &self.subtrees {
            subtree.encode(&mut enc);
        }
        enc.u32(self.active as u32);
        enc.bytes(&self.subtree_root_sig);
        enc.option(self.main_verification_key.as_ref(), |e, vk| e.bytes(vk));
        encode_masks(&mut enc, self.masks());
        self.root.encode(&mut enc);
        enc.finish()
    }

    /// Restores a state, refusing anything that disagrees with its own
    /// parameters.
    pub(crate) fn decode(bytes: &[u8]) -> CmssResult<Self> {
        let mut dec = Decoder::new(bytes);
        let raw_oid = dec.u32()?;
        let index_main = dec.u32()?;
        let index_sub = dec.u32()?;
        let height = dec.u32()?;
        let k = dec.u32()?;
        let params = CmssParams::from_encoded(raw_oid, height, k)?;
        let n = params.n();
        let ots = params.ots_scheme();

        let leaves = params.leaves();
        if u64::from(index_main) > leaves || u64::from(index_sub) >= leaves {
            return Err(Error::StateMismatch("leaf index out of range"));
        }

        let seeds = [dec.bytes_exact(n)?, dec.bytes_exact(n)?, dec.bytes_exact(n)?];
        // Paths are decoded before the masks are known; only their node lengths are checked.
        let shape = LeafCalc::new(&params, NodeCalc::Classic { digest: params.oid().digest() });
        let main = BdsAuthPath::decode(&mut dec, height, k, &shape)?;
        let subtrees = [
            BdsAuthPath::decode(&mut dec, height, k, &shape)?,
            BdsAuthPath::decode(&mut dec, height, k, &shape)?,
        ];
        let active = match dec.u32()? {
            0 => 0,
            1 => 1,
            _ => return Err(Error::StateMismatch("active subtree out of range")),
        };
        let subtree_root_sig = dec.bytes_exact(ots.signature_len())?;
        let main_verification_key =
            dec.option(|d| d.bytes_exact(ots.verification_key_len()))?;
        if main_verification_key.is_some() != ots.embeds_verification_key() {
            return Err(Error::StateMismatch("main tree verification key"));
        }
        let masks = decode_masks(&mut dec, &params)?;
        let root = Node::decode(&mut dec, n)?;
        dec.finish()?;

        if root.height() != height {
            return Err(Error::StateMismatch("root height"));
        }
        if main.leaves_built().is_some() || subtrees[active].leaves_built().is_some() {
            return Err(Error::StateMismatch("tree construction unfinished"));
        }
        // The main path stops at the last leaf once the key is exhausted.
        if u64::from(main.next_index()) != u64::from(index_main).min(leaves - 1)
            || subtrees[active].next_index() != index_sub
        {
            return Err(Error::StateMismatch("authentication path out of step with the key"));
        }
        let building = subtrees[1 - active].leaves_built();
        if u64::from(index_main) + 1 < leaves && building != Some(index_sub) {
            return Err(Error::StateMismatch("next subtree out of step with the active one"));
        }

        let calc = LeafCalc::node_calc(&params, masks)?;
        Ok(Self {
            params,
            leaf_calc: LeafCalc::new(&params, calc),
            index_main,
            index_sub,
            seeds,
            main,
            subtrees,
            active,
            subtree_root_sig,
            main_verification_key,
            root,
        })
    }
}

impl Zeroize for CmssState {
    fn zeroize(&mut self) {
        for seed in &mut self.seeds {
            seed.zeroize();
        }
        self.main.zeroize();
        for subtree in &mut self.subtrees {
            subtree.zeroize();
        }
    }
}

pub(crate) fn encode_masks(enc: &mut Encoder, masks: Option<&[MaskPair]>) {
    enc.option(masks.as_ref(), |e, masks| {
        e.u32(masks.len() as u32);
        for [left, right] in masks.iter() {
            e.bytes(left);
            e.bytes(right);
        }
    });
}

pub(crate) fn decode_masks(
    dec: &mut Decoder<'_>,
    params: &CmssParams,
) -> CmssResult<Option<Vec<MaskPair>>> {
    let n = params.n();
    let expected = params.mask_count();
    dec.option(|d| {
        if d.u32()? as usize != expected {
            return Err(Error::StateMismatch("mask count"));
        }
        (0..expected)
            .map(|_| -> CmssResult<MaskPair> { Ok([d.bytes_exact(n)?, d.bytes_exact(n)?]) })
            .collect()
    })
}

/// Recomputes a root from a leaf and its authentication path, taking the
/// side at each height from the bits of `index`.
fn fold_path(leaf_calc: &LeafCalc, leaf: Node, index: u32, path: &[u8]) -> Node {
    let n = leaf_calc.node_len();
    path.chunks(n)
        .zip(0u32..)
        .fold(leaf, |node, (sibling, height)| {
            let sibling = Node::new(sibling.to_vec(), height);
            if (index >> height) & 1 == 0 {
                leaf_calc.parent(&node, &sibling)
            } else {
                leaf_calc.parent(&sibling, &node)
            }
        })
}

/// One tree level of a wire signature.
struct SignaturePart<'a> {
    index: u32,
    ots_sig: &'a [u8],
    verification_key: &'a [u8],
    auth_path: &'a [u8],
}

impl<'a> SignaturePart<'a> {
    fn parse(params: &CmssParams, bytes: &'a [u8]) -> Option<Self> {
        let ots = params.ots_scheme();
        let (index, rest) = bytes.split_first_chunk::<INDEX_LEN>()?;
        let (ots_sig, rest) = rest.split_at_checked(ots.signature_len())?;
        let vk_len = if ots.embeds_verification_key() {
            ots.verification_key_len()
        } else {
            0
        };
        let (verification_key, auth_path) = rest.split_at_checked(vk_len)?;
        let index = u32::from_be_bytes(*index);
        if auth_path.len() != params.height() as usize * params.n()
            || u64::from(index) >= params.leaves()
        {
            return None;
        }
        Some(Self {
            index,
            ots_sig,
            verification_key,
            auth_path,
        })
    }

    fn root(&self, leaf_calc: &LeafCalc, msg: &[u8]) -> Option<Node> {
        let leaf = leaf_calc.leaf_from_signature(msg, self.ots_sig, self.verification_key)?;
        Some(fold_path(leaf_calc, leaf, self.index, self.auth_path))
    }
}

/// Checks a wire signature against a main tree root.
pub(crate) fn verify(
    params: &CmssParams,
    leaf_calc: &LeafCalc,
    root: &Node,
    msg: &[u8],
    sig: &[u8],
) -> bool {
    if sig.len() != params.signature_len() {
        return false;
    }
    let (sub_bytes, main_bytes) = sig.split_at(sig.len() / 2);
    let (Some(sub), Some(main)) = (
        SignaturePart::parse(params, sub_bytes),
        SignaturePart::parse(params, main_bytes),
    ) else {
        return false;
    };
    let Some(subtree_root) = sub.root(leaf_calc, msg) else {
        return false;
    };
    main.root(leaf_calc, subtree_root.value())
        .is_some_and(|candidate| candidate.value().ct_eq(root.value()).into())
}
