//! Authentication path traversal for one Merkle tree.
//!
//! The tree is walked once up front to compute the root, the first
//! authentication path and a few nodes that later steps need. Afterwards
//! every step costs at most `(H - K) / 2` treehash updates plus one parent
//! computation: nodes below height `H - K` are rebuilt by treehash instances
//! scheduled lowest-first, nodes above it come out of retain stacks filled
//! during the initial walk, and left nodes are rebuilt from a cached `keep`
//! node.

use zeroize::Zeroize;

use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::node::Node;
use crate::stack::NodeStack;
use crate::treehash::{LeafSource, Treehash};

/// State of the initial walk over all leaves.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Construction {
    seed: Vec<u8>,
    next_leaf: u32,
    stack: NodeStack,
}

/// Authentication path of one tree of height `H` with retain parameter `K`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BdsAuthPath {
    height: u32,
    k: u32,
    auth: Vec<Option<Node>>,
    keep: Vec<Option<Node>>,
    seeds: Vec<Option<Vec<u8>>>,
    treehash: Vec<Treehash>,
    stack: NodeStack,
    retain: Vec<NodeStack>,
    left_leaf: Option<Node>,
    /// Leaf index the next `update` call must advance from.
    next_index: u32,
    construction: Option<Construction>,
}

impl BdsAuthPath {
    /// Empty state for a tree of the given shape.
    fn with_shape(height: u32, k: u32) -> Self {
        assert!(
            k >= 2 && k <= height && (height - k) % 2 == 0,
            "unsupported retain parameter"
        );
        let levels = height - k;
        Self {
            height,
            k,
            auth: vec![None; height as usize],
            keep: vec![None; height as usize - 1],
            seeds: vec![None; levels as usize],
            treehash: (0..levels).map(Treehash::new).collect(),
            stack: NodeStack::with_capacity(levels.saturating_sub(2) as usize),
            retain: (levels..height - 1)
                .map(|h| NodeStack::with_capacity(retain_capacity(height, h)))
                .collect(),
            left_leaf: None,
            next_index: 0,
            construction: None,
        }
    }

    /// Prepares the walk over all leaves, the first of which `seed` yields.
    pub(crate) fn initialization_setup(height: u32, k: u32, seed: Vec<u8>) -> Self {
        log::debug!("starting authentication path setup: height {height}, retain {k}");
        let mut path = Self::with_shape(height, k);
        path.construction = Some(Construction {
            seed,
            next_leaf: 0,
            stack: NodeStack::with_capacity(height as usize + 1),
        });
        path
    }

    /// Runs the whole walk at once and returns the root together with the
    /// seed following the last leaf.
    pub(crate) fn initialize(
        height: u32,
        k: u32,
        seed: Vec<u8>,
        source: &impl LeafSource,
    ) -> (Self, Node, Vec<u8>) {
        let mut path = Self::initialization_setup(height, k, seed);
        for _ in 0..1u64 << height {
            path.initialization_update(source);
        }
        let (root, next_seed) = path.initialization_finalize();
        (path, root, next_seed)
    }

    pub(crate) fn leaves_built(&self) -> Option<u32> {
        self.construction.as_ref().map(|c| c.next_leaf)
    }

    /// Consumes the next leaf of the initial walk.
    pub(crate) fn initialization_update(&mut self, source: &impl LeafSource) {
        let mut construction = self
            .construction
            .take()
            .expect("authentication path already constructed");
        let index = construction.next_leaf;
        assert!(
            u64::from(index) < 1u64 << self.height,
            "every leaf already consumed"
        );

        for (h, seed) in self.seeds.iter_mut().enumerate() {
            if u64::from(index) == 3u64 << h {
                *seed = Some(construction.seed.clone());
            }
        }

        let mut node = source.next_leaf(&mut construction.seed);
        let mut position = index;
        loop {
            self.place_right_node(&node, position);
            if construction.stack.top_height() != Some(node.height()) {
                break;
            }
            let left = construction.stack.pop();
            node = source.parent(&left, &node);
            position >>= 1;
        }
        construction.stack.push(node);
        construction.next_leaf += 1;
        self.construction = Some(construction);
    }

    /// Files a right node met during the initial walk: the first one per
    /// height is the initial authentication node, later ones are needed by
    /// treehash instances or retain stacks.
    fn place_right_node(&mut self, node: &Node, position: u32) {
        if position % 2 == 0 {
            return;
        }
        let h = node.height();
        let levels = self.height - self.k;
        if position == 1 {
            self.auth[h as usize] = Some(node.clone());
        } else if h < levels {
            if position == 3 {
                self.treehash[h as usize].store_node(node.clone());
            }
        } else if h < self.height - 1 {
            self.retain[(h - levels) as usize].push_at_back(node.clone());
        }
    }

    /// Ends the initial walk and returns the root together with the seed
    /// following the last leaf.
    pub(crate) fn initialization_finalize(&mut self) -> (Node, Vec<u8>) {
        let mut construction = self
            .construction
            .take()
            .expect("authentication path already constructed");
        assert_eq!(
            u64::from(construction.next_leaf),
            1u64 << self.height,
            "initial walk incomplete"
        );
        let root = construction.stack.pop();
        assert!(construction.stack.is_empty() && root.height() == self.height);
        log::debug!("authentication path ready: height {}", self.height);
        (root, construction.seed)
    }

    /// Current authentication path, lowest node first.
    pub(crate) fn auth_path(&self) -> impl Iterator<Item = &Node> {
        self.auth
            .iter()
            .map(|node| node.as_ref().expect("authentication path incomplete"))
    }

    /// Supplies the leaf that the next step after an even index needs.
    pub(crate) fn set_left_leaf(&mut self, leaf: Node) {
        self.left_leaf = Some(leaf);
    }

    /// Leaf index whose authentication path [`BdsAuthPath::auth_path`] holds.
    pub(crate) fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Advances from leaf `s` to leaf `s + 1`.
    ///
    /// # Panics
    /// Panics unless called exactly once per leaf, in order.
    pub(crate) fn update(&mut self, s: u32, source: &impl LeafSource) {
        assert!(self.construction.is_none(), "initial walk still running");
        assert_eq!(s, self.next_index, "leaf index out of order");
        assert!(
            u64::from(s) + 1 < 1u64 << self.height,
            "leaf index past the last leaf"
        );
        let levels = self.height - self.k;

        for seed in self.seeds.iter_mut() {
            let seed = seed.as_mut().expect("treehash seed missing");
            source.skip_leaf(seed);
        }

        let tau = s.trailing_ones();
        if tau < self.height - 1 && (s >> (tau + 1)) & 1 == 0 {
            self.keep[tau as usize] = self.auth[tau as usize].clone();
        }

        if tau == 0 {
            let leaf = self.left_leaf.take().expect("left leaf not supplied");
            self.auth[0] = Some(leaf);
        } else {
            let t = tau as usize;
            let right = self.keep[t - 1].take().expect("keep node missing");
            let left = self.auth[t - 1].as_ref().expect("authentication path incomplete");
            let node = source.parent(left, &right);
            self.auth[t] = Some(node);

            for h in 0..tau {
                self.auth[h as usize] = Some(if h < levels {
                    self.treehash[h as usize].node()
                } else {
                    self.retain[(h - levels) as usize].pop()
                });
            }

            for h in 0..tau.min(levels) {
                if u64::from(s) + 1 + (3u64 << h) < 1u64 << self.height {
                    let seed = self.seeds[h as usize]
                        .clone()
                        .expect("treehash seed missing");
                    self.treehash[h as usize].initialize(seed);
                }
            }
        }

        for _ in 0..levels / 2 {
            let Some(index) = self.lowest_treehash() else {
                break;
            };
            self.treehash[index].update(&mut self.stack, source);
        }
        self.next_index += 1;
    }

    /// Index of the unfinished treehash instance with the lowest node,
    /// preferring the lowest index on ties.
    fn lowest_treehash(&self) -> Option<usize> {
        self.treehash
            .iter()
            .enumerate()
            .filter_map(|(i, th)| th.current_height().map(|height| (height, i)))
            .min()
            .map(|(_, i)| i)
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.u32(self.height);
        enc.u32(self.k);
        for node in self.auth.iter().chain(&self.keep) {
            enc.option(node.as_ref(), |e, node| node.encode(e));
        }
        for seed in &self.seeds {
            enc.option(seed.as_ref(), |e, seed| e.bytes(seed));
        }
        for th in &self.treehash {
            th.encode(enc);
        }
        self.stack.encode(enc);
        for retain in &self.retain {
            retain.encode(enc);
        }
        enc.option(self.left_leaf.as_ref(), |e, node| node.encode(e));
        enc.u32(self.next_index);
        enc.option(self.construction.as_ref(), |e, c| {
            e.bytes(&c.seed);
            e.u32(c.next_leaf);
            c.stack.encode(e);
        });
    }

    /// Reads a path and checks it against the expected tree shape.
    pub(crate) fn decode(
        dec: &mut Decoder<'_>,
        height: u32,
        k: u32,
        source: &impl LeafSource,
    ) -> CmssResult<Self> {
        if dec.u32()? != height {
            return Err(Error::StateMismatch("authentication path height"));
        }
        if dec.u32()? != k {
            return Err(Error::StateMismatch("authentication path retain parameter"));
        }
        let n = source.node_len();
        let mut path = Self::with_shape(height, k);

        for h in 0..height {
            path.auth[h as usize] = decode_level_node(dec, h, n)?;
        }
        for h in 0..height - 1 {
            path.keep[h as usize] = decode_level_node(dec, h, n)?;
        }
        for seed in path.seeds.iter_mut() {
            *seed = dec.option(|d| d.bytes_exact(n))?;
        }
        for (target, th) in path.treehash.iter_mut().enumerate() {
            *th = Treehash::decode(dec, target as u32, n)?;
        }
        path.stack = NodeStack::decode(dec, path.stack.capacity(), n)?;
        let tails: usize = path.treehash.iter().map(Treehash::tail_len).sum();
        if tails != path.stack.len() {
            return Err(Error::StateMismatch("treehash tails disagree with the stack"));
        }
        for retain in path.retain.iter_mut() {
            *retain = NodeStack::decode(dec, retain.capacity(), n)?;
        }
        path.left_leaf = decode_level_node(dec, 0, n)?;
        path.next_index = dec.u32()?;
        if u64::from(path.next_index) >= 1u64 << height {
            return Err(Error::StateMismatch("leaf index past the last leaf"));
        }
        path.construction = dec.option(|d| {
            let seed = d.bytes_exact(n)?;
            let next_leaf = d.u32()?;
            if u64::from(next_leaf) > 1u64 << height {
                return Err(Error::StateMismatch("construction past the last leaf"));
            }
            let stack = NodeStack::decode(d, height as usize + 1, n)?;
            Ok(Construction {
                seed,
                next_leaf,
                stack,
            })
        })?;
        Ok(path)
    }
}

fn decode_level_node(dec: &mut Decoder<'_>, height: u32, n: usize) -> CmssResult<Option<Node>> {
    let node = dec.option(|d| Node::decode(d, n))?;
    if node.as_ref().is_some_and(|node| node.height() != height) {
        return Err(Error::StateMismatch("node stored at the wrong level"));
    }
    Ok(node)
}

/// Right nodes at height `h` other than the first one.
fn retain_capacity(height: u32, h: u32) -> usize {
    (1usize << (height - h - 1)) - 1
}

impl Zeroize for BdsAuthPath {
    fn zeroize(&mut self) {
        self.seeds.zeroize();
        self.treehash.iter_mut().for_each(Zeroize::zeroize);
        if let Some(construction) = self.construction.as_mut() {
            construction.seed.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{DigestAlgorithm, Prng};
    use crate::node::NodeCalc;

    struct HashLeaves {
        prng: Prng,
        calc: NodeCalc,
    }

    impl LeafSource for HashLeaves {
        fn next_leaf(&self, seed: &mut [u8]) -> Node {
            self.calc.leaf(&self.prng.next_seed(seed))
        }

        fn skip_leaf(&self, seed: &mut [u8]) {
            self.prng.next_seed(seed);
        }

        fn parent(&self, left: &Node, right: &Node) -> Node {
            self.calc.parent(left, right)
        }

        fn node_len(&self) -> usize {
            self.calc.node_len()
        }
    }

    fn source() -> HashLeaves {
        HashLeaves {
            prng: Prng::new(DigestAlgorithm::Sha256),
            calc: NodeCalc::Classic {
                digest: DigestAlgorithm::Sha256,
            },
        }
    }

    fn all_leaves(source: &HashLeaves, seed: &[u8], height: u32) -> Vec<Node> {
        let mut seed = seed.to_vec();
        (0..1u32 << height)
            .map(|_| source.next_leaf(&mut seed))
            .collect()
    }

    fn fold(source: &HashLeaves, leaf: &Node, index: u32, path: &[Node]) -> Node {
        let mut node = leaf.clone();
        for (h, sibling) in path.iter().enumerate() {
            node = if (index >> h) & 1 == 0 {
                source.parent(&node, sibling)
            } else {
                source.parent(sibling, &node)
            };
        }
        node
    }

    /// Walks every leaf and checks each path against the root.
    fn check_full_cycle(height: u32, k: u32) {
        let source = source();
        let seed = vec![0x01u8; 32];
        let leaves = all_leaves(&source, &seed, height);
        let (mut path, root, _) = BdsAuthPath::initialize(height, k, seed, &source);

        let mut current: Vec<Node> = path.auth_path().cloned().collect();
        for s in 0..1u32 << height {
            assert_eq!(
                fold(&source, &leaves[s as usize], s, &current),
                root,
                "path for leaf {s} of height {height}, retain {k}"
            );
            if s + 1 < 1 << height {
                if s % 2 == 0 {
                    path.set_left_leaf(leaves[s as usize].clone());
                }
                path.update(s, &source);
                assert_eq!(path.next_index(), s + 1);
                current = path.auth_path().cloned().collect();
            }
        }
    }

    #[test]
    fn test_full_cycle_height_4() {
        check_full_cycle(4, 2);
        check_full_cycle(4, 4);
    }

    #[test]
    fn test_full_cycle_other_shapes() {
        for (height, k) in [(2, 2), (3, 3), (5, 3), (6, 2), (8, 4)] {
            check_full_cycle(height, k);
        }
    }

    #[test]
    fn test_height_2_initial_path() {
        let source = source();
        let seed = vec![0x01u8; 32];
        let leaves = all_leaves(&source, &seed, 2);
        let (path, root, _) = BdsAuthPath::initialize(2, 2, seed, &source);

        let auth: Vec<Node> = path.auth_path().cloned().collect();
        assert_eq!(auth[0], leaves[1]);
        assert_eq!(auth[1], source.parent(&leaves[2], &leaves[3]));
        assert_eq!(fold(&source, &leaves[0], 0, &auth), root);
    }

    #[test]
    fn test_next_seed_continues_chain() {
        let source = source();
        let seed = vec![5u8; 32];
        let (_, _, next_seed) = BdsAuthPath::initialize(3, 3, seed.clone(), &source);

        let mut expected = seed;
        for _ in 0..8 {
            source.skip_leaf(&mut expected);
        }
        assert_eq!(next_seed, expected);
    }

    #[test]
    fn test_incremental_walk_matches_initialize() {
        let source = source();
        let seed = vec![2u8; 32];
        let (full, root, next_seed) = BdsAuthPath::initialize(4, 2, seed.clone(), &source);

        let mut stepwise = BdsAuthPath::initialization_setup(4, 2, seed);
        for i in 0..16 {
            assert_eq!(stepwise.leaves_built(), Some(i));
            stepwise.initialization_update(&source);
        }
        assert_eq!(stepwise.initialization_finalize(), (root, next_seed));
        assert_eq!(stepwise, full);
        assert_eq!(stepwise.leaves_built(), None);
    }

    #[test]
    fn test_encoding_resumes_identically() {
        let source = source();
        let seed = vec![4u8; 32];
        let height = 6;
        let leaves = all_leaves(&source, &seed, height);
        let (mut path, _, _) = BdsAuthPath::initialize(height, 2, seed, &source);

        for s in 0..21u32 {
            if s % 2 == 0 {
                path.set_left_leaf(leaves[s as usize].clone());
            }
            path.update(s, &source);
        }

        let mut enc = Encoder::new();
        path.encode(&mut enc);
        let bytes = enc.finish();
        let mut dec = Decoder::new(&bytes);
        let mut restored = BdsAuthPath::decode(&mut dec, height, 2, &source).unwrap();
        dec.finish().unwrap();
        assert_eq!(restored, path);

        for s in 21..63u32 {
            if s % 2 == 0 {
                path.set_left_leaf(leaves[s as usize].clone());
                restored.set_left_leaf(leaves[s as usize].clone());
            }
            path.update(s, &source);
            restored.update(s, &source);
            assert!(restored.auth_path().eq(path.auth_path()), "path after leaf {s}");
        }
    }

    #[test]
    fn test_encoding_mid_construction() {
        let source = source();
        let mut path = BdsAuthPath::initialization_setup(4, 2, vec![6u8; 32]);
        for _ in 0..7 {
            path.initialization_update(&source);
        }
        let mut enc = Encoder::new();
        path.encode(&mut enc);
        let bytes = enc.finish();

        let restored = BdsAuthPath::decode(&mut Decoder::new(&bytes), 4, 2, &source).unwrap();
        assert_eq!(restored, path);
    }

    #[test]
    fn test_decode_rejects_other_shape() {
        let source = source();
        let (path, _, _) = BdsAuthPath::initialize(4, 2, vec![6u8; 32], &source);
        let mut enc = Encoder::new();
        path.encode(&mut enc);
        let bytes = enc.finish();

        assert!(matches!(
            BdsAuthPath::decode(&mut Decoder::new(&bytes), 4, 4, &source),
            Err(Error::StateMismatch(_))
        ));
        assert!(matches!(
            BdsAuthPath::decode(&mut Decoder::new(&bytes), 5, 2, &source),
            Err(Error::StateMismatch(_))
        ));
        assert!(
            BdsAuthPath::decode(&mut Decoder::new(&bytes[..bytes.len() - 1]), 4, 2, &source)
                .is_err()
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let source = source();
        let seed = vec![8u8; 32];
        let leaves = all_leaves(&source, &seed, 4);
        let (mut path, _, _) = BdsAuthPath::initialize(4, 2, seed, &source);
        let snapshot = path.clone();

        path.set_left_leaf(leaves[0].clone());
        path.update(0, &source);
        assert_ne!(snapshot, path);
        assert_eq!(snapshot.auth_path().next(), Some(&leaves[1]));
    }

    #[test]
    #[should_panic(expected = "left leaf not supplied")]
    fn test_missing_left_leaf_panics() {
        let source = source();
        let (mut path, _, _) = BdsAuthPath::initialize(3, 3, vec![1u8; 32], &source);
        path.update(0, &source);
    }

    #[test]
    #[should_panic(expected = "leaf index out of order")]
    fn test_skipped_leaf_panics() {
        let source = source();
        let seed = vec![3u8; 32];
        let leaves = all_leaves(&source, &seed, 4);
        let (mut path, _, _) = BdsAuthPath::initialize(4, 2, seed, &source);

        path.set_left_leaf(leaves[0].clone());
        path.update(0, &source);
        path.set_left_leaf(leaves[2].clone());
        path.update(2, &source);
    }

    #[test]
    fn test_decode_rejects_index_past_last_leaf() {
        let source = source();
        let (path, _, _) = BdsAuthPath::initialize(2, 2, vec![7u8; 32], &source);
        let mut enc = Encoder::new();
        path.encode(&mut enc);
        let mut bytes = enc.finish();

        // The construction tag closes the encoding, the leaf index precedes it.
        let at = bytes.len() - 5;
        assert_eq!(bytes[at..at + 4], 0u32.to_be_bytes());
        bytes[at..at + 4].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(
            BdsAuthPath::decode(&mut Decoder::new(&bytes), 2, 2, &source),
            Err(Error::StateMismatch(_))
        ));
    }
}
