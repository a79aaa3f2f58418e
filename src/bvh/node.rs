use wide::f32x4;

use crate::geometry::{
    intersect_box_packet, intersect_box_packet_mb, intersect_boxes_lane, intersect_boxes_lane_mb,
    FloatType, LaneRay, PacketPrecalc, SimdFloatType, SimdMaskType, WorldBox,
};
use crate::util::collect_to_array;

use super::NodeRef;

/// Uniform view over the two inner-node variants: the i-th child and its box
/// tests. Traversal code is generic over this, so each variant's descent
/// monomorphizes without runtime dispatch.
pub trait ChildSource {
    fn child(&self, i: usize) -> NodeRef;

    /// Packet slab test of child `i` against all four lanes.
    fn intersect_child(
        &self,
        i: usize,
        pre: &PacketPrecalc,
        tnear: SimdFloatType,
        tfar: SimdFloatType,
        time: SimdFloatType,
    ) -> (SimdMaskType, SimdFloatType);

    /// One lane against all four children at once. Returns a child hit
    /// bitmask and the per-child entry distances.
    fn intersect_children_lane(&self, lray: &LaneRay, tfar: FloatType) -> (u64, [FloatType; 4]);
}

/// Static inner node: up to four children and their bounds, one row per box
/// coordinate so a whole row loads as a single SIMD vector.
#[derive(Clone, Debug)]
pub struct Node4 {
    pub(crate) children: [NodeRef; 4],
    pub(crate) lower_x: [FloatType; 4],
    pub(crate) lower_y: [FloatType; 4],
    pub(crate) lower_z: [FloatType; 4],
    pub(crate) upper_x: [FloatType; 4],
    pub(crate) upper_y: [FloatType; 4],
    pub(crate) upper_z: [FloatType; 4],
}

impl Node4 {
    /// Builds a node from (child, bounds) pairs, packed dense to the left.
    /// Absent slots get the empty reference and bounds no ray can enter.
    pub fn new(children: impl IntoIterator<Item = (NodeRef, WorldBox)>) -> Node4 {
        let mut node = Node4 {
            children: [NodeRef::EMPTY; 4],
            lower_x: [FloatType::INFINITY; 4],
            lower_y: [FloatType::INFINITY; 4],
            lower_z: [FloatType::INFINITY; 4],
            upper_x: [FloatType::NEG_INFINITY; 4],
            upper_y: [FloatType::NEG_INFINITY; 4],
            upper_z: [FloatType::NEG_INFINITY; 4],
        };

        let slots: [Option<(NodeRef, WorldBox)>; 4] =
            collect_to_array(children.into_iter().map(Some));
        for (i, slot) in slots.into_iter().enumerate() {
            let Some((child, bounds)) = slot else { break };
            node.children[i] = child;
            node.lower_x[i] = bounds.min.x;
            node.lower_y[i] = bounds.min.y;
            node.lower_z[i] = bounds.min.z;
            node.upper_x[i] = bounds.max.x;
            node.upper_y[i] = bounds.max.y;
            node.upper_z[i] = bounds.max.z;
        }
        node
    }

    pub fn child_bounds(&self, i: usize) -> WorldBox {
        WorldBox::new(
            [self.lower_x[i], self.lower_y[i], self.lower_z[i]].into(),
            [self.upper_x[i], self.upper_y[i], self.upper_z[i]].into(),
        )
    }
}

impl ChildSource for Node4 {
    #[inline(always)]
    fn child(&self, i: usize) -> NodeRef {
        self.children[i]
    }

    #[inline(always)]
    fn intersect_child(
        &self,
        i: usize,
        pre: &PacketPrecalc,
        tnear: SimdFloatType,
        tfar: SimdFloatType,
        _time: SimdFloatType,
    ) -> (SimdMaskType, SimdFloatType) {
        intersect_box_packet(
            [self.lower_x[i], self.lower_y[i], self.lower_z[i]],
            [self.upper_x[i], self.upper_y[i], self.upper_z[i]],
            pre,
            tnear,
            tfar,
        )
    }

    #[inline(always)]
    fn intersect_children_lane(&self, lray: &LaneRay, tfar: FloatType) -> (u64, [FloatType; 4]) {
        intersect_boxes_lane(
            [
                f32x4::from(self.lower_x),
                f32x4::from(self.lower_y),
                f32x4::from(self.lower_z),
            ],
            [
                f32x4::from(self.upper_x),
                f32x4::from(self.upper_y),
                f32x4::from(self.upper_z),
            ],
            lray,
            tfar,
        )
    }
}

/// Motion-blur inner node: bounds move linearly over the time interval, the
/// effective coordinate at time t is `coord + t * dcoord`.
#[derive(Clone, Debug)]
pub struct Node4Mb {
    pub(crate) children: [NodeRef; 4],
    pub(crate) lower_x: [FloatType; 4],
    pub(crate) lower_y: [FloatType; 4],
    pub(crate) lower_z: [FloatType; 4],
    pub(crate) upper_x: [FloatType; 4],
    pub(crate) upper_y: [FloatType; 4],
    pub(crate) upper_z: [FloatType; 4],
    pub(crate) dlower_x: [FloatType; 4],
    pub(crate) dlower_y: [FloatType; 4],
    pub(crate) dlower_z: [FloatType; 4],
    pub(crate) dupper_x: [FloatType; 4],
    pub(crate) dupper_y: [FloatType; 4],
    pub(crate) dupper_z: [FloatType; 4],
}

impl Node4Mb {
    /// Builds a node from (child, bounds at t=0, bounds at t=1) triples; the
    /// velocity is the difference of the two. Packing as in [`Node4::new`].
    pub fn new(children: impl IntoIterator<Item = (NodeRef, WorldBox, WorldBox)>) -> Node4Mb {
        let mut node = Node4Mb {
            children: [NodeRef::EMPTY; 4],
            lower_x: [FloatType::INFINITY; 4],
            lower_y: [FloatType::INFINITY; 4],
            lower_z: [FloatType::INFINITY; 4],
            upper_x: [FloatType::NEG_INFINITY; 4],
            upper_y: [FloatType::NEG_INFINITY; 4],
            upper_z: [FloatType::NEG_INFINITY; 4],
            dlower_x: [0.0; 4],
            dlower_y: [0.0; 4],
            dlower_z: [0.0; 4],
            dupper_x: [0.0; 4],
            dupper_y: [0.0; 4],
            dupper_z: [0.0; 4],
        };

        let slots: [Option<(NodeRef, WorldBox, WorldBox)>; 4] =
            collect_to_array(children.into_iter().map(Some));
        for (i, slot) in slots.into_iter().enumerate() {
            let Some((child, at_start, at_end)) = slot else { break };
            node.children[i] = child;
            node.lower_x[i] = at_start.min.x;
            node.lower_y[i] = at_start.min.y;
            node.lower_z[i] = at_start.min.z;
            node.upper_x[i] = at_start.max.x;
            node.upper_y[i] = at_start.max.y;
            node.upper_z[i] = at_start.max.z;
            node.dlower_x[i] = at_end.min.x - at_start.min.x;
            node.dlower_y[i] = at_end.min.y - at_start.min.y;
            node.dlower_z[i] = at_end.min.z - at_start.min.z;
            node.dupper_x[i] = at_end.max.x - at_start.max.x;
            node.dupper_y[i] = at_end.max.y - at_start.max.y;
            node.dupper_z[i] = at_end.max.z - at_start.max.z;
        }
        node
    }
}

impl ChildSource for Node4Mb {
    #[inline(always)]
    fn child(&self, i: usize) -> NodeRef {
        self.children[i]
    }

    #[inline(always)]
    fn intersect_child(
        &self,
        i: usize,
        pre: &PacketPrecalc,
        tnear: SimdFloatType,
        tfar: SimdFloatType,
        time: SimdFloatType,
    ) -> (SimdMaskType, SimdFloatType) {
        intersect_box_packet_mb(
            [self.lower_x[i], self.lower_y[i], self.lower_z[i]],
            [self.dlower_x[i], self.dlower_y[i], self.dlower_z[i]],
            [self.upper_x[i], self.upper_y[i], self.upper_z[i]],
            [self.dupper_x[i], self.dupper_y[i], self.dupper_z[i]],
            pre,
            time,
            tnear,
            tfar,
        )
    }

    #[inline(always)]
    fn intersect_children_lane(&self, lray: &LaneRay, tfar: FloatType) -> (u64, [FloatType; 4]) {
        intersect_boxes_lane_mb(
            [
                f32x4::from(self.lower_x),
                f32x4::from(self.lower_y),
                f32x4::from(self.lower_z),
            ],
            [
                f32x4::from(self.dlower_x),
                f32x4::from(self.dlower_y),
                f32x4::from(self.dlower_z),
            ],
            [
                f32x4::from(self.upper_x),
                f32x4::from(self.upper_y),
                f32x4::from(self.upper_z),
            ],
            [
                f32x4::from(self.dupper_x),
                f32x4::from(self.dupper_y),
                f32x4::from(self.dupper_z),
            ],
            lray,
            tfar,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use simba::simd::{SimdBool as _, SimdValue};

    use crate::geometry::{Ray, RayPacket};

    #[test]
    fn packs_children_dense_left() {
        let leaf = NodeRef::leaf(0u32.into(), 1);
        let b = WorldBox::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into());
        let node = Node4::new([(leaf, b.clone()), (leaf, b.clone())]);

        assert!(node.children[0] == leaf);
        assert!(node.children[1] == leaf);
        assert!(node.children[2] == NodeRef::EMPTY);
        assert!(node.children[3] == NodeRef::EMPTY);
        assert!(node.child_bounds(1) == b);
    }

    #[test]
    fn absent_slots_never_hit() {
        let leaf = NodeRef::leaf(0u32.into(), 1);
        let b = WorldBox::new([-10.0, -10.0, -10.0].into(), [10.0, 10.0, 10.0].into());
        let node = Node4::new([(leaf, b)]);

        let packet =
            RayPacket::from_lanes([Ray::new([0.0, 0.0, -20.0].into(), [0.0, 0.0, 1.0].into()); 4]);
        let pre = PacketPrecalc::new(&packet.org, &packet.dir);

        let (hit0, _) = node.intersect_child(0, &pre, packet.tnear, packet.tfar, packet.time);
        let (hit1, _) = node.intersect_child(1, &pre, packet.tnear, packet.tfar, packet.time);
        assert!(hit0.extract(0));
        assert!(!hit1.any());

        let lray = LaneRay::from_packet(&packet, 0);
        let (bits, _) = node.intersect_children_lane(&lray, 100.0);
        assert!(bits == 0b0001);
    }

    #[test]
    fn motion_node_velocity_from_end_bounds() {
        let leaf = NodeRef::leaf(0u32.into(), 1);
        let b0 = WorldBox::new([0.0, -1.0, -1.0].into(), [1.0, 1.0, 1.0].into());
        let b1 = WorldBox::new([10.0, -1.0, -1.0].into(), [11.0, 1.0, 1.0].into());
        let node = Node4Mb::new([(leaf, b0, b1)]);

        assert!(node.dlower_x[0] == 10.0);
        assert!(node.dupper_x[0] == 10.0);
        assert!(node.dlower_y[0] == 0.0);
    }
}
