use crate::encoding::{Decoder, Encoder};
use crate::error::{CmssResult, Error};
use crate::node::Node;

/// Bounded LIFO of tree nodes.
///
/// Overflow and underflow are traversal bugs, not input errors, and panic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NodeStack {
    nodes: Vec<Node>,
    capacity: usize,
}

impl NodeStack {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn push(&mut self, node: Node) {
        assert!(self.nodes.len() < self.capacity, "node stack overflow");
        self.nodes.push(node);
    }

    /// Inserts below every node already stored, so it is popped last.
    pub(crate) fn push_at_back(&mut self, node: Node) {
        assert!(self.nodes.len() < self.capacity, "node stack overflow");
        self.nodes.insert(0, node);
    }

    pub(crate) fn pop(&mut self) -> Node {
        self.nodes.pop().expect("node stack underflow")
    }

    pub(crate) fn top_height(&self) -> Option<u32> {
        self.nodes.last().map(Node::height)
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.u32(self.capacity as u32);
        enc.u32(self.nodes.len() as u32);
        for node in &self.nodes {
            node.encode(enc);
        }
    }

    /// Reads a stack and checks it against the capacity the parameters imply.
    pub(crate) fn decode(dec: &mut Decoder<'_>, capacity: usize, n: usize) -> CmssResult<Self> {
        if dec.u32()? as usize != capacity {
            return Err(Error::StateMismatch("stack capacity"));
        }
        let len = dec.u32()? as usize;
        if len > capacity {
            return Err(Error::StateMismatch("stack holds more nodes than its capacity"));
        }
        let mut nodes = Vec::with_capacity(len);
        for _ in 0..len {
            nodes.push(Node::decode(dec, n)?);
        }
        Ok(Self { nodes, capacity })
    }
}
