use assert2::debug_assert;
use simba::simd::{SimdBool as _, SimdPartialOrd as _, SimdValue as _};

use crate::bvh::{Bvh4, ChildSource, NodeRef};
use crate::geometry::{PacketPrecalc, RayPacket, SimdFloatType, SimdMaskType};
use crate::primitive::PacketIntersector;
use crate::util::bit_iter;
use crate::util::simba::{fast_min, movemask, SimbaWorkarounds as _};

use super::stack::NearStack;
use super::{node_types, single, TraversalConfig, TraversalStats};

#[derive(Copy, Clone)]
struct PacketEntry {
    node: NodeRef,
    near: SimdFloatType,
}

impl PacketEntry {
    fn sentinel() -> PacketEntry {
        PacketEntry {
            node: NodeRef::SENTINEL,
            near: SimdFloatType::infinity(),
        }
    }
}

/// Closest-hit traversal of a four-ray packet. Lanes outside `valid` are
/// ignored and left untouched. Hit attributes land in `ray.hit`, the
/// tightened distances in `ray.tfar`.
pub fn intersect<C, I>(
    valid: SimdMaskType,
    bvh: &Bvh4<I::Prim>,
    intersector: &I,
    ray: &mut RayPacket,
) -> TraversalStats
where
    C: TraversalConfig,
    I: PacketIntersector,
{
    let mut stats = TraversalStats::default();
    if bvh.root().is_empty() {
        return stats;
    }

    let pre = PacketPrecalc::new(&ray.org, &ray.dir);
    let ray_tnear = ray.tnear.select(valid, SimdFloatType::infinity());
    let mut ray_tfar = ray.tfar.select(valid, SimdFloatType::neg_infinity());

    let mut stack = NearStack::<PacketEntry>::seeded(
        PacketEntry::sentinel(),
        PacketEntry {
            node: bvh.root(),
            near: ray_tnear,
        },
    );

    'pop: loop {
        let entry = stack.pop();
        if entry.node.is_sentinel() {
            break;
        }

        // Cull anything that ended up behind every lane's closest hit.
        let active = entry.near.simd_lt(ray_tfar);
        if !active.any() {
            continue;
        }

        let bits = movemask(active);
        if bits.count_ones() as usize <= C::SWITCH_THRESHOLD {
            stats.single_switches += 1;
            for lane in bit_iter(bits) {
                single::intersect_lane::<C, I>(bvh, intersector, entry.node, lane, ray, &mut stats);
            }
            ray_tfar = fast_min(ray_tfar, ray.tfar);
            continue;
        }

        let mut cur_node = entry.node;
        let mut cur_dist = entry.near;

        loop {
            if C::NODE_TYPES & node_types::STATIC != 0 && cur_node.is_node() {
                let node = bvh.node(cur_node);
                stats.packet_nodes += 1;

                // Speculative pop of the next candidate; the child ordering
                // below may put it right back.
                let next = stack.pop();
                cur_node = next.node;
                cur_dist = next.near;

                descend_packet(
                    node, &pre, ray_tnear, ray_tfar, ray.time, &mut stack, &mut cur_node,
                    &mut cur_dist,
                );
            } else if C::NODE_TYPES & node_types::MOTION_BLUR != 0 && cur_node.is_node_mb() {
                let node = bvh.node_mb(cur_node);
                stats.packet_nodes += 1;

                let next = stack.pop();
                cur_node = next.node;
                cur_dist = next.near;

                descend_packet(
                    node, &pre, ray_tnear, ray_tfar, ray.time, &mut stack, &mut cur_node,
                    &mut cur_dist,
                );
            } else {
                break;
            }

            // Utilization drops as the packet diverges down the tree; bail
            // back to the pop point early when few lanes still care.
            if C::SWITCH_DURING_DOWN && utilization_low::<C>(ray_tfar, cur_dist) {
                stack.push(PacketEntry {
                    node: cur_node,
                    near: cur_dist,
                });
                continue 'pop;
            }
        }

        if cur_node.is_sentinel() {
            break;
        }
        debug_assert!(cur_node.is_leaf());

        let valid_leaf = ray_tfar.simd_gt(cur_dist);
        stats.leaf_visits += 1;
        intersector.intersect_packet(valid_leaf, ray, bvh.leaf_prims(cur_node));
        ray_tfar = ray.tfar.select(valid_leaf, ray_tfar);
    }

    stats.max_stack_depth = stats.max_stack_depth.max(stack.high_water());
    stats
}

/// Any-hit traversal of a four-ray packet. Writes `valid & terminated` into
/// the per-lane hit indicator and leaves the rest of the packet untouched.
pub fn occluded<C, I>(
    valid: SimdMaskType,
    bvh: &Bvh4<I::Prim>,
    intersector: &I,
    ray: &mut RayPacket,
) -> TraversalStats
where
    C: TraversalConfig,
    I: PacketIntersector,
{
    let mut stats = TraversalStats::default();
    if bvh.root().is_empty() {
        return stats;
    }

    let pre = PacketPrecalc::new(&ray.org, &ray.dir);
    let ray_tnear = ray.tnear.select(valid, SimdFloatType::infinity());
    let mut ray_tfar = ray.tfar.select(valid, SimdFloatType::neg_infinity());
    // Lanes outside `valid` count as finished so they never hold up the
    // all-terminated early exit.
    let mut terminated = !valid;

    let mut stack = NearStack::<PacketEntry>::seeded(
        PacketEntry::sentinel(),
        PacketEntry {
            node: bvh.root(),
            near: ray_tnear,
        },
    );

    'pop: loop {
        let entry = stack.pop();
        if entry.node.is_sentinel() {
            break;
        }

        let active = entry.near.simd_lt(ray_tfar);
        if !active.any() {
            continue;
        }

        let bits = movemask(active);
        if bits.count_ones() as usize <= C::SWITCH_THRESHOLD {
            stats.single_switches += 1;
            for lane in bit_iter(bits) {
                if single::occluded_lane::<C, I>(bvh, intersector, entry.node, lane, ray, &mut stats)
                {
                    terminated.replace(lane, true);
                }
            }
            if terminated.all() {
                break;
            }
            ray_tfar = SimdFloatType::neg_infinity().select(terminated, ray_tfar);
            continue;
        }

        let mut cur_node = entry.node;
        let mut cur_dist = entry.near;

        loop {
            if C::NODE_TYPES & node_types::STATIC != 0 && cur_node.is_node() {
                let node = bvh.node(cur_node);
                stats.packet_nodes += 1;

                let next = stack.pop();
                cur_node = next.node;
                cur_dist = next.near;

                descend_packet(
                    node, &pre, ray_tnear, ray_tfar, ray.time, &mut stack, &mut cur_node,
                    &mut cur_dist,
                );
            } else if C::NODE_TYPES & node_types::MOTION_BLUR != 0 && cur_node.is_node_mb() {
                let node = bvh.node_mb(cur_node);
                stats.packet_nodes += 1;

                let next = stack.pop();
                cur_node = next.node;
                cur_dist = next.near;

                descend_packet(
                    node, &pre, ray_tnear, ray_tfar, ray.time, &mut stack, &mut cur_node,
                    &mut cur_dist,
                );
            } else {
                break;
            }

            if C::SWITCH_DURING_DOWN && utilization_low::<C>(ray_tfar, cur_dist) {
                stack.push(PacketEntry {
                    node: cur_node,
                    near: cur_dist,
                });
                continue 'pop;
            }
        }

        if cur_node.is_sentinel() {
            break;
        }
        debug_assert!(cur_node.is_leaf());

        stats.leaf_visits += 1;
        let hit = intersector.occluded_packet(!terminated, ray, bvh.leaf_prims(cur_node));
        terminated = terminated | hit;
        if terminated.all() {
            break;
        }
        // Terminated lanes can no longer enter any box.
        ray_tfar = SimdFloatType::neg_infinity().select(terminated, ray_tfar);
    }

    ray.mark_occluded(valid & terminated);
    stats.max_stack_depth = stats.max_stack_depth.max(stack.high_water());
    stats
}

/// Child ordering of one inner node: a child that is nearer for any lane
/// takes over the in-register descent and the incumbent goes to the stack;
/// ties keep the incumbent. Iteration stops at the first absent child.
#[inline(always)]
fn descend_packet<N: ChildSource>(
    node: &N,
    pre: &PacketPrecalc,
    ray_tnear: SimdFloatType,
    ray_tfar: SimdFloatType,
    time: SimdFloatType,
    stack: &mut NearStack<PacketEntry>,
    cur_node: &mut NodeRef,
    cur_dist: &mut SimdFloatType,
) {
    for i in 0..4 {
        let child = node.child(i);
        if child.is_empty() {
            break;
        }

        let (hit, near) = node.intersect_child(i, pre, ray_tnear, ray_tfar, time);
        if !hit.any() {
            continue;
        }

        let child_dist = near.select(hit, SimdFloatType::infinity());
        if child_dist.simd_lt(*cur_dist).any() {
            stack.push(PacketEntry {
                node: *cur_node,
                near: *cur_dist,
            });
            *cur_node = child;
            *cur_dist = child_dist;
        } else {
            stack.push(PacketEntry {
                node: child,
                near: child_dist,
            });
        }
    }
}

#[inline(always)]
fn utilization_low<C: TraversalConfig>(ray_tfar: SimdFloatType, cur_dist: SimdFloatType) -> bool {
    let active = ray_tfar.simd_gt(cur_dist);
    (movemask(active).count_ones() as usize) <= C::SWITCH_THRESHOLD
}
