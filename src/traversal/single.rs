use assert2::debug_assert;
use simba::simd::SimdValue as _;

use crate::bvh::{Bvh4, ChildSource, NodeRef};
use crate::geometry::{FloatType, LaneRay, RayPacket};
use crate::primitive::PacketIntersector;
use crate::util::bit_iter;

use super::stack::NearStack;
use super::{node_types, TraversalConfig, TraversalStats};

#[derive(Copy, Clone)]
struct LaneEntry {
    node: NodeRef,
    near: FloatType,
}

impl LaneEntry {
    fn sentinel() -> LaneEntry {
        LaneEntry {
            node: NodeRef::SENTINEL,
            near: FloatType::INFINITY,
        }
    }
}

/// Closest-hit walk of a single lane starting at `start`. Hits are committed
/// straight into the packet; the driver folds the tightened tfar back into
/// its traversal copy afterwards.
pub(crate) fn intersect_lane<C, I>(
    bvh: &Bvh4<I::Prim>,
    intersector: &I,
    start: NodeRef,
    lane: usize,
    ray: &mut RayPacket,
    stats: &mut TraversalStats,
) where
    C: TraversalConfig,
    I: PacketIntersector,
{
    let lray = LaneRay::from_packet(ray, lane);
    let mut stack = NearStack::<LaneEntry>::seeded(
        LaneEntry::sentinel(),
        LaneEntry {
            node: start,
            near: FloatType::NEG_INFINITY,
        },
    );

    loop {
        let entry = stack.pop();
        if entry.node.is_sentinel() {
            break;
        }
        // tfar is re-read from the packet on purpose: an earlier leaf of this
        // walk may have tightened the lane already.
        if entry.near > ray.tfar.extract(lane) {
            continue;
        }

        if C::NODE_TYPES & node_types::STATIC != 0 && entry.node.is_node() {
            descend_lane(bvh.node(entry.node), &lray, ray.tfar.extract(lane), &mut stack, stats);
        } else if C::NODE_TYPES & node_types::MOTION_BLUR != 0 && entry.node.is_node_mb() {
            descend_lane(
                bvh.node_mb(entry.node),
                &lray,
                ray.tfar.extract(lane),
                &mut stack,
                stats,
            );
        } else {
            debug_assert!(entry.node.is_leaf());
            stats.leaf_visits += 1;
            intersector.intersect_lane(lane, ray, bvh.leaf_prims(entry.node));
        }
    }

    stats.max_stack_depth = stats.max_stack_depth.max(stack.high_water());
}

/// Any-hit walk of a single lane; true as soon as any primitive blocks it.
pub(crate) fn occluded_lane<C, I>(
    bvh: &Bvh4<I::Prim>,
    intersector: &I,
    start: NodeRef,
    lane: usize,
    ray: &RayPacket,
    stats: &mut TraversalStats,
) -> bool
where
    C: TraversalConfig,
    I: PacketIntersector,
{
    let lray = LaneRay::from_packet(ray, lane);
    let tfar = ray.tfar.extract(lane);
    let mut stack = NearStack::<LaneEntry>::seeded(
        LaneEntry::sentinel(),
        LaneEntry {
            node: start,
            near: FloatType::NEG_INFINITY,
        },
    );

    let blocked = loop {
        let entry = stack.pop();
        if entry.node.is_sentinel() {
            break false;
        }
        if entry.near > tfar {
            continue;
        }

        if C::NODE_TYPES & node_types::STATIC != 0 && entry.node.is_node() {
            descend_lane(bvh.node(entry.node), &lray, tfar, &mut stack, stats);
        } else if C::NODE_TYPES & node_types::MOTION_BLUR != 0 && entry.node.is_node_mb() {
            descend_lane(bvh.node_mb(entry.node), &lray, tfar, &mut stack, stats);
        } else {
            debug_assert!(entry.node.is_leaf());
            stats.leaf_visits += 1;
            if intersector.occluded_lane(lane, ray, bvh.leaf_prims(entry.node)) {
                break true;
            }
        }
    };

    stats.max_stack_depth = stats.max_stack_depth.max(stack.high_water());
    blocked
}

/// Tests all children of one node and queues the hit ones, nearest on top so
/// the next pop descends into it and the rest follow second-nearest first.
fn descend_lane<N: ChildSource>(
    node: &N,
    lray: &LaneRay,
    tfar: FloatType,
    stack: &mut NearStack<LaneEntry>,
    stats: &mut TraversalStats,
) {
    stats.single_nodes += 1;

    let (hits, dists) = node.intersect_children_lane(lray, tfar);
    let saved = stack.len();
    for i in bit_iter(hits) {
        let child = node.child(i);
        debug_assert!(!child.is_empty());
        stack.push(LaneEntry {
            node: child,
            near: dists[i],
        });
    }
    stack
        .tail_mut(saved)
        .sort_unstable_by(|a, b| b.near.total_cmp(&a.near));
}
