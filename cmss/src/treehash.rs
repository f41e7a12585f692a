use zeroize::Zeroize;

use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::node::Node;
use crate::stack::NodeStack;

/// Computes the leaves and inner nodes of one tree.
///
/// Leaves are produced from a running seed, which every call advances by
/// exactly one leaf position.
pub(crate) trait LeafSource {
    /// Returns the leaf at the seed's position and advances the seed.
    fn next_leaf(&self, seed: &mut [u8]) -> Node;

    /// Advances the seed by one leaf position without computing the leaf.
    fn skip_leaf(&self, seed: &mut [u8]);

    /// Combines two siblings into their parent.
    fn parent(&self, left: &Node, right: &Node) -> Node;

    /// Length of every node value.
    fn node_len(&self) -> usize;
}

/// Incremental builder of a single future authentication node.
///
/// The first completed node is held as `pending`, later nodes of lower height
/// wait on the stack shared by all instances of one tree. `tail` records the
/// heights of this instance's nodes on that stack, in push order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Treehash {
    target: u32,
    seed: Option<Vec<u8>>,
    pending: Option<Node>,
    tail: Vec<u32>,
}

impl Treehash {
    pub(crate) fn new(target: u32) -> Self {
        Self {
            target,
            seed: None,
            pending: None,
            tail: Vec::new(),
        }
    }

    /// Restarts the instance on the subtree whose first leaf `seed` yields.
    pub(crate) fn initialize(&mut self, seed: Vec<u8>) {
        assert!(self.tail.is_empty(), "treehash restarted with nodes on the stack");
        self.seed.zeroize();
        self.seed = Some(seed);
        self.pending = None;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|node| node.height() == self.target)
    }

    /// Scheduling priority: the height of the lowest node this instance still
    /// has to merge. `None` if idle or finished.
    pub(crate) fn current_height(&self) -> Option<u32> {
        if self.seed.is_none() || self.is_finished() {
            return None;
        }
        match (&self.pending, self.tail.last()) {
            (None, _) => Some(self.target),
            (Some(_), Some(&lowest)) => Some(lowest),
            (Some(pending), None) => Some(pending.height()),
        }
    }

    /// Consumes one leaf and merges as far as possible.
    pub(crate) fn update(&mut self, stack: &mut NodeStack, source: &impl LeafSource) {
        assert!(!self.is_finished(), "treehash already finished");
        let seed = self.seed.as_mut().expect("treehash updated before initialize");
        let mut node = source.next_leaf(seed);

        while self.tail.last() == Some(&node.height()) {
            let left = stack.pop();
            debug_assert_eq!(left.height(), node.height());
            node = source.parent(&left, &node);
            self.tail.pop();
        }

        self.pending = Some(match self.pending.take() {
            None => node,
            Some(pending) if self.tail.is_empty() && pending.height() == node.height() => {
                source.parent(&pending, &node)
            }
            Some(pending) => {
                self.tail.push(node.height());
                stack.push(node);
                pending
            }
        });
    }

    /// Hands a node computed elsewhere to this instance, finishing it.
    pub(crate) fn store_node(&mut self, node: Node) {
        assert_eq!(node.height(), self.target, "stored node has the wrong height");
        self.pending = Some(node);
    }

    /// Copies out the finished node.
    pub(crate) fn node(&self) -> Node {
        assert!(self.is_finished(), "treehash harvested before it finished");
        self.pending.clone().expect("finished treehash holds a node")
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.u32(self.target);
        enc.option(self.seed.as_ref(), |e, seed| e.bytes(seed));
        enc.option(self.pending.as_ref(), |e, node| node.encode(e));
        enc.u32(self.tail.len() as u32);
        for height in &self.tail {
            enc.u32(*height);
        }
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>, target: u32, n: usize) -> CmssResult<Self> {
        if dec.u32()? != target {
            return Err(Error::StateMismatch("treehash target height"));
        }
        let seed = dec.option(|d| d.bytes_exact(n))?;
        let pending = dec.option(|d| Node::decode(d, n))?;
        if pending.as_ref().is_some_and(|node| node.height() > target) {
            return Err(Error::StateMismatch("treehash node above its target"));
        }
        let tail_len = dec.u32()?;
        if tail_len > target {
            return Err(Error::StateMismatch("treehash tail longer than its target"));
        }
        let tail = (0..tail_len)
            .map(|_| dec.u32())
            .collect::<CmssResult<Vec<_>>>()?;
        if tail.iter().any(|&height| height >= target) {
            return Err(Error::StateMismatch("treehash tail node above its target"));
        }
        Ok(Self {
            target,
            seed,
            pending,
            tail,
        })
    }

    pub(crate) fn tail_len(&self) -> usize {
        self.tail.len()
    }
}

impl Zeroize for Treehash {
    fn zeroize(&mut self) {
        self.seed.zeroize();
    }
}
