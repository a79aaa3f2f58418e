use simba::simd::{SimdBool as _, SimdPartialOrd as _, SimdValue as _};

use crate::geometry::{
    RayPacket, SimdFloatType, SimdMaskType, Triangle, WorldPoint, WorldPoint4,
};
use crate::util::{bit_iter, simba::movemask};

/// Leaf-primitive intersection as the traversal sees it. Implementations
/// must only touch lanes enabled by the mask or lane argument; everything
/// else about the primitives is opaque to the traversal.
pub trait PacketIntersector {
    type Prim;

    /// Closest-hit test of every primitive against the packet lanes enabled
    /// in `valid`. Tightens `ray.tfar` and writes hit attributes for lanes it
    /// hits.
    fn intersect_packet(&self, valid: SimdMaskType, ray: &mut RayPacket, prims: &[Self::Prim]);

    /// Any-hit test; returns the lanes within `valid` that are blocked.
    /// Does not mutate the packet.
    fn occluded_packet(
        &self,
        valid: SimdMaskType,
        ray: &RayPacket,
        prims: &[Self::Prim],
    ) -> SimdMaskType;

    /// Closest-hit test of one lane only.
    fn intersect_lane(&self, lane: usize, ray: &mut RayPacket, prims: &[Self::Prim]);

    /// Any-hit test of one lane only.
    fn occluded_lane(&self, lane: usize, ray: &RayPacket, prims: &[Self::Prim]) -> bool;
}

/// One world-space triangle and its identity in the scene.
#[derive(Clone, Debug)]
pub struct TrianglePrim {
    pub vertices: Triangle<WorldPoint>,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl TrianglePrim {
    pub fn new(
        a: impl Into<WorldPoint>,
        b: impl Into<WorldPoint>,
        c: impl Into<WorldPoint>,
        geom_id: u32,
        prim_id: u32,
    ) -> TrianglePrim {
        TrianglePrim {
            vertices: Triangle::new(a.into(), b.into(), c.into()),
            geom_id,
            prim_id,
        }
    }
}

/// Möller–Trumbore intersector over [`TrianglePrim`] leaves. Each triangle is
/// splatted across the packet and tested against all four lanes at once; the
/// lane entry points extract one lane of the same kernel so both traversal
/// modes see bit-identical distances.
pub struct TriangleIntersector;

impl TriangleIntersector {
    fn test(
        prim: &TrianglePrim,
        ray: &RayPacket,
    ) -> (SimdMaskType, SimdFloatType, SimdFloatType, SimdFloatType) {
        let wide = Triangle::<WorldPoint4>::splat(prim.vertices.clone());
        let (mask, t, u, v) = wide.intersect_packet(&ray.org, &ray.dir);
        let in_range = t.simd_ge(ray.tnear) & t.simd_le(ray.tfar);
        (mask & in_range, t, u, v)
    }
}

impl PacketIntersector for TriangleIntersector {
    type Prim = TrianglePrim;

    fn intersect_packet(&self, valid: SimdMaskType, ray: &mut RayPacket, prims: &[TrianglePrim]) {
        for prim in prims {
            let (mask, t, u, v) = Self::test(prim, ray);
            let mask = mask & valid;
            if !mask.any() {
                continue;
            }

            ray.tfar = t.select(mask, ray.tfar);
            ray.hit.u = u.select(mask, ray.hit.u);
            ray.hit.v = v.select(mask, ray.hit.v);

            let ng = prim.vertices.normal();
            ray.hit.ng.x = SimdFloatType::splat(ng.x).select(mask, ray.hit.ng.x);
            ray.hit.ng.y = SimdFloatType::splat(ng.y).select(mask, ray.hit.ng.y);
            ray.hit.ng.z = SimdFloatType::splat(ng.z).select(mask, ray.hit.ng.z);

            for lane in bit_iter(movemask(mask)) {
                ray.hit.geom_id[lane] = prim.geom_id;
                ray.hit.prim_id[lane] = prim.prim_id;
            }
        }
    }

    fn occluded_packet(
        &self,
        valid: SimdMaskType,
        ray: &RayPacket,
        prims: &[TrianglePrim],
    ) -> SimdMaskType {
        let mut blocked = SimdMaskType::splat(false);
        for prim in prims {
            let (mask, _, _, _) = Self::test(prim, ray);
            blocked = blocked | (mask & valid);
            if movemask(blocked) == movemask(valid) {
                break;
            }
        }
        blocked
    }

    fn intersect_lane(&self, lane: usize, ray: &mut RayPacket, prims: &[TrianglePrim]) {
        for prim in prims {
            let (mask, t, u, v) = Self::test(prim, ray);
            if !mask.extract(lane) {
                continue;
            }

            ray.tfar.replace(lane, t.extract(lane));
            ray.hit.u.replace(lane, u.extract(lane));
            ray.hit.v.replace(lane, v.extract(lane));

            let ng = prim.vertices.normal();
            ray.hit.ng.x.replace(lane, ng.x);
            ray.hit.ng.y.replace(lane, ng.y);
            ray.hit.ng.z.replace(lane, ng.z);

            ray.hit.geom_id[lane] = prim.geom_id;
            ray.hit.prim_id[lane] = prim.prim_id;
        }
    }

    fn occluded_lane(&self, lane: usize, ray: &RayPacket, prims: &[TrianglePrim]) -> bool {
        prims
            .iter()
            .any(|prim| Self::test(prim, ray).0.extract(lane))
    }
}
