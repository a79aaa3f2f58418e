mod node;
mod printing;

pub use node::{ChildSource, Node4, Node4Mb};

use index_vec::IndexVec;
use thiserror::Error;

use crate::traversal::MAX_DEPTH;

/// Packed reference to a tree node: arena index in the high bits, node kind
/// in the low bits. Two encodings are reserved: `EMPTY` marks an absent child
/// slot, `SENTINEL` is the traversal stack bottom.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct NodeRef(u32);

/// Decoded view of a [`NodeRef`], for validation and printing. The traversal
/// hot path uses the tag predicates instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Empty,
    Sentinel,
    Node { index: NodeIdx },
    NodeMb { index: NodeMbIdx },
    Leaf { prims: PrimIdxRange },
}

impl NodeRef {
    const TAG_BITS: u32 = 4;
    const TAG_MASK: u32 = (1 << Self::TAG_BITS) - 1;
    const TAG_NODE: u32 = 0;
    const TAG_NODE_MB: u32 = 1;
    const LEAF_TAG_BASE: u32 = 2;

    const EMPTY_VALUE: u32 = u32::MAX;
    const SENTINEL_VALUE: u32 = u32::MAX - 1;

    pub const MAX_INDEX: u32 = (u32::MAX >> Self::TAG_BITS) - 1;
    pub const MAX_LEAF_ITEMS: u32 = Self::TAG_MASK - Self::LEAF_TAG_BASE + 1;

    /// Marks an absent child slot.
    pub const EMPTY: Self = Self(Self::EMPTY_VALUE);
    /// Stack bottom marker, popping it terminates a traversal.
    pub const SENTINEL: Self = Self(Self::SENTINEL_VALUE);

    /// Reference to a static inner node, panics if the index is out of range.
    pub fn node(index: NodeIdx) -> Self {
        assert!(index.raw() <= Self::MAX_INDEX);
        Self(index.raw() << Self::TAG_BITS | Self::TAG_NODE)
    }

    /// Reference to a motion-blur inner node, panics if the index is out of
    /// range.
    pub fn node_mb(index: NodeMbIdx) -> Self {
        assert!(index.raw() <= Self::MAX_INDEX);
        Self(index.raw() << Self::TAG_BITS | Self::TAG_NODE_MB)
    }

    /// Reference to `count` primitives starting at `first`, panics if the
    /// index or count are out of range.
    pub fn leaf(first: PrimIdx, count: u32) -> Self {
        assert!(count >= 1);
        assert!(count <= Self::MAX_LEAF_ITEMS);
        assert!(first.raw() <= Self::MAX_INDEX);
        Self(first.raw() << Self::TAG_BITS | (Self::LEAF_TAG_BASE + count - 1))
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == Self::EMPTY_VALUE
    }

    #[inline(always)]
    pub fn is_sentinel(self) -> bool {
        self.0 == Self::SENTINEL_VALUE
    }

    #[inline(always)]
    pub fn is_node(self) -> bool {
        self.0 & Self::TAG_MASK == Self::TAG_NODE
    }

    #[inline(always)]
    pub fn is_node_mb(self) -> bool {
        self.0 & Self::TAG_MASK == Self::TAG_NODE_MB
    }

    #[inline(always)]
    pub fn is_leaf(self) -> bool {
        self.0 & Self::TAG_MASK >= Self::LEAF_TAG_BASE && !self.is_empty() && !self.is_sentinel()
    }

    pub fn node_index(self) -> NodeIdx {
        debug_assert!(self.is_node());
        NodeIdx::from_raw(self.0 >> Self::TAG_BITS)
    }

    pub fn node_mb_index(self) -> NodeMbIdx {
        debug_assert!(self.is_node_mb());
        NodeMbIdx::from_raw(self.0 >> Self::TAG_BITS)
    }

    pub fn leaf_range(self) -> PrimIdxRange {
        debug_assert!(self.is_leaf());
        PrimIdxRange::new(
            PrimIdx::from_raw(self.0 >> Self::TAG_BITS),
            (self.0 & Self::TAG_MASK) - Self::LEAF_TAG_BASE + 1,
        )
    }

    pub fn decode(self) -> NodeKind {
        if self.is_empty() {
            NodeKind::Empty
        } else if self.is_sentinel() {
            NodeKind::Sentinel
        } else if self.is_node() {
            NodeKind::Node {
                index: self.node_index(),
            }
        } else if self.is_node_mb() {
            NodeKind::NodeMb {
                index: self.node_mb_index(),
            }
        } else {
            NodeKind::Leaf {
                prims: self.leaf_range(),
            }
        }
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("0", &self.0)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    MAX_INDEX = NodeRef::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct NodeMbIdx = u32;
    MAX_INDEX = NodeRef::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct PrimIdx = u32;
    MAX_INDEX = NodeRef::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrimIdxRange {
    pub first: PrimIdx,
    pub last: PrimIdx,
}

impl PrimIdxRange {
    pub fn new(first: PrimIdx, count: u32) -> PrimIdxRange {
        PrimIdxRange {
            first,
            last: first + (count as usize),
        }
    }

    pub fn len(&self) -> usize {
        (self.last.raw() - self.first.raw()) as usize
    }

    pub fn into_range(self) -> std::ops::Range<PrimIdx> {
        self.first..self.last
    }
}

/// Four-ary bounding volume hierarchy over an arbitrary primitive type.
/// Inner nodes live in two arenas (static and motion blur), leaves reference
/// runs of the primitive vector.
#[derive(Clone, Debug)]
pub struct Bvh4<P> {
    root: NodeRef,
    nodes: IndexVec<NodeIdx, Node4>,
    mb_nodes: IndexVec<NodeMbIdx, Node4Mb>,
    prims: IndexVec<PrimIdx, P>,
    depth: usize,
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("tree depth {depth} exceeds the supported maximum {MAX_DEPTH}")]
    TooDeep { depth: usize },
    #[error("{node:?} references a node outside its arena")]
    DanglingNode { node: NodeRef },
    #[error("{node:?} references primitives outside the primitive array")]
    LeafOutOfRange { node: NodeRef },
    #[error("children of a node are not packed dense to the left")]
    SparseChildren,
    #[error("the sentinel reference may not appear inside the tree")]
    SentinelInTree,
}

impl<P> Bvh4<P> {
    /// Assembles a tree and validates every reachable reference, the
    /// dense-left packing of children, and the tree depth.
    pub fn new(
        root: NodeRef,
        nodes: IndexVec<NodeIdx, Node4>,
        mb_nodes: IndexVec<NodeMbIdx, Node4Mb>,
        prims: IndexVec<PrimIdx, P>,
    ) -> Result<Bvh4<P>, TreeError> {
        let depth = Self::validate(root, &nodes, &mb_nodes, &prims)?;
        Ok(Bvh4 {
            root,
            nodes,
            mb_nodes,
            prims,
            depth,
        })
    }

    /// A tree with no nodes; traversing it hits nothing.
    pub fn empty() -> Bvh4<P> {
        Bvh4 {
            root: NodeRef::EMPTY,
            nodes: IndexVec::new(),
            mb_nodes: IndexVec::new(),
            prims: IndexVec::new(),
            depth: 0,
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn prims(&self) -> &[P] {
        self.prims.as_raw_slice()
    }

    pub(crate) fn node(&self, r: NodeRef) -> &Node4 {
        &self.nodes[r.node_index()]
    }

    pub(crate) fn node_mb(&self, r: NodeRef) -> &Node4Mb {
        &self.mb_nodes[r.node_mb_index()]
    }

    pub(crate) fn leaf_prims(&self, r: NodeRef) -> &[P] {
        self.prims[r.leaf_range().into_range()].as_raw_slice()
    }

    fn validate(
        root: NodeRef,
        nodes: &IndexVec<NodeIdx, Node4>,
        mb_nodes: &IndexVec<NodeMbIdx, Node4Mb>,
        prims: &IndexVec<PrimIdx, P>,
    ) -> Result<usize, TreeError> {
        if root.is_empty() {
            return Ok(0);
        }

        let mut to_visit = vec![(root, 1usize)];
        let mut max_depth = 0;

        while let Some((r, depth)) = to_visit.pop() {
            if depth > MAX_DEPTH {
                return Err(TreeError::TooDeep { depth });
            }
            max_depth = max_depth.max(depth);

            let children = match r.decode() {
                NodeKind::Node { index } => {
                    &nodes
                        .get(index)
                        .ok_or(TreeError::DanglingNode { node: r })?
                        .children
                }
                NodeKind::NodeMb { index } => {
                    &mb_nodes
                        .get(index)
                        .ok_or(TreeError::DanglingNode { node: r })?
                        .children
                }
                NodeKind::Leaf { prims: range } => {
                    if range.last.raw() as usize > prims.len() {
                        return Err(TreeError::LeafOutOfRange { node: r });
                    }
                    continue;
                }
                NodeKind::Sentinel => return Err(TreeError::SentinelInTree),
                NodeKind::Empty => unreachable!("empty children are never queued"),
            };

            let mut seen_empty = false;
            for child in children {
                if child.is_empty() {
                    seen_empty = true;
                } else if seen_empty {
                    return Err(TreeError::SparseChildren);
                } else {
                    to_visit.push((*child, depth + 1));
                }
            }
        }

        Ok(max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert2::{assert, let_assert};
    use test_strategy::proptest;

    use crate::geometry::WorldBox;

    #[proptest]
    fn node_ref_construction_leaf(
        #[strategy(0u32..=NodeRef::MAX_INDEX)] index: u32,
        #[strategy(1u32..=NodeRef::MAX_LEAF_ITEMS)] count: u32,
    ) {
        let r = NodeRef::leaf(index.into(), count);
        let_assert!(NodeKind::Leaf { prims } = r.decode());
        assert!(prims.first.raw() == index);
        assert!(prims.len() == count as usize);
        assert!(r.is_leaf());
        assert!(!r.is_node() && !r.is_node_mb() && !r.is_empty() && !r.is_sentinel());
    }

    #[proptest]
    fn node_ref_construction_node(#[strategy(0u32..=NodeRef::MAX_INDEX)] index: u32) {
        let r = NodeRef::node(index.into());
        let_assert!(NodeKind::Node { index: decoded } = r.decode());
        assert!(decoded.raw() == index);
        assert!(r.is_node() && !r.is_node_mb() && !r.is_leaf());
    }

    #[proptest]
    fn node_ref_construction_node_mb(#[strategy(0u32..=NodeRef::MAX_INDEX)] index: u32) {
        let r = NodeRef::node_mb(index.into());
        let_assert!(NodeKind::NodeMb { index: decoded } = r.decode());
        assert!(decoded.raw() == index);
        assert!(r.is_node_mb() && !r.is_node() && !r.is_leaf());
    }

    #[test]
    fn node_ref_reserved_values() {
        assert!(NodeRef::EMPTY.decode() == NodeKind::Empty);
        assert!(NodeRef::SENTINEL.decode() == NodeKind::Sentinel);
        assert!(!NodeRef::EMPTY.is_node() && !NodeRef::EMPTY.is_leaf());
        assert!(!NodeRef::SENTINEL.is_node() && !NodeRef::SENTINEL.is_leaf());
    }

    #[test]
    #[should_panic]
    fn node_ref_leaf_count_zero() {
        NodeRef::leaf(0u32.into(), 0);
    }

    #[test]
    #[should_panic]
    fn node_ref_leaf_count_too_high() {
        NodeRef::leaf(0u32.into(), NodeRef::MAX_LEAF_ITEMS + 1);
    }

    #[test]
    #[should_panic]
    fn node_ref_node_index_out_of_range() {
        NodeRef::node(NodeIdx::from_raw(NodeRef::MAX_INDEX + 1));
    }

    fn unit_box() -> WorldBox {
        WorldBox::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into())
    }

    #[test]
    fn validates_single_leaf_tree() {
        let bvh = Bvh4::new(
            NodeRef::leaf(0u32.into(), 2),
            IndexVec::new(),
            IndexVec::new(),
            IndexVec::from_vec(vec![(), ()]),
        );
        assert!(bvh.unwrap().depth() == 1);
    }

    #[test]
    fn rejects_dangling_child() {
        let mut nodes = IndexVec::new();
        nodes.push(Node4::new([(NodeRef::node(5u32.into()), unit_box())]));

        let result = Bvh4::<()>::new(
            NodeRef::node(0u32.into()),
            nodes,
            IndexVec::new(),
            IndexVec::new(),
        );
        let_assert!(Err(TreeError::DanglingNode { .. }) = result);
    }

    #[test]
    fn rejects_leaf_past_primitives() {
        let result = Bvh4::new(
            NodeRef::leaf(0u32.into(), 3),
            IndexVec::new(),
            IndexVec::new(),
            IndexVec::from_vec(vec![(), ()]),
        );
        let_assert!(Err(TreeError::LeafOutOfRange { .. }) = result);
    }

    #[test]
    fn rejects_sparse_children() {
        let leaf = NodeRef::leaf(0u32.into(), 1);
        let mut nodes = IndexVec::new();
        let mut sparse = Node4::new([(leaf, unit_box())]);
        sparse.children[2] = leaf;
        nodes.push(sparse);

        let result = Bvh4::new(
            NodeRef::node(0u32.into()),
            nodes,
            IndexVec::new(),
            IndexVec::from_vec(vec![()]),
        );
        let_assert!(Err(TreeError::SparseChildren) = result);
    }

    #[test]
    fn rejects_too_deep_tree() {
        let mut nodes: IndexVec<NodeIdx, Node4> = IndexVec::new();
        // A chain one level past the supported depth.
        let mut child = NodeRef::leaf(0u32.into(), 1);
        for _ in 0..MAX_DEPTH {
            let idx = nodes.push(Node4::new([(child, unit_box())]));
            child = NodeRef::node(idx);
        }

        let result = Bvh4::new(
            child,
            nodes,
            IndexVec::new(),
            IndexVec::from_vec(vec![()]),
        );
        let_assert!(Err(TreeError::TooDeep { .. }) = result);
    }

    #[test]
    fn measures_chain_depth() {
        let mut nodes: IndexVec<NodeIdx, Node4> = IndexVec::new();
        let mut child = NodeRef::leaf(0u32.into(), 1);
        for _ in 0..5 {
            let idx = nodes.push(Node4::new([(child, unit_box())]));
            child = NodeRef::node(idx);
        }

        let bvh = Bvh4::new(child, nodes, IndexVec::new(), IndexVec::from_vec(vec![()]));
        assert!(bvh.unwrap().depth() == 6);
    }

    #[test]
    fn empty_tree_has_no_depth() {
        assert!(Bvh4::<()>::empty().depth() == 0);
    }
}
