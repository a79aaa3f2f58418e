use simba::simd::{SimdValue, WideF32x4};
use wide::{f32x4, CmpLt as _};

use crate::util::{bit_iter, simba::movemask};

use super::{
    FloatType, SimdFloatType, SimdMaskType, WorldPoint, WorldPoint4, WorldVector, WorldVector4,
    LANES,
};

/// Id value marking a lane that has not hit anything.
pub const INVALID_ID: u32 = u32::MAX;

/// Direction components below this magnitude are nudged before taking the
/// reciprocal, keeping the reciprocal finite.
const MIN_RCP_INPUT: FloatType = 1e-18;

/// A single ray. Directions are used as given, distances along the ray are in
/// units of the direction length.
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    pub direction: WorldVector,
    pub tnear: FloatType,
    pub tfar: FloatType,
    pub time: FloatType,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        Ray {
            origin,
            direction,
            tnear: 0.0,
            tfar: FloatType::INFINITY,
            time: 0.0,
        }
    }

    pub fn segment(origin: WorldPoint, direction: WorldVector, tnear: FloatType, tfar: FloatType) -> Ray {
        Ray {
            origin,
            direction,
            tnear,
            tfar,
            time: 0.0,
        }
    }

    pub fn at_time(self, time: FloatType) -> Ray {
        Ray { time, ..self }
    }
}

/// Four rays in structure-of-arrays form plus their hit state.
#[derive(Clone, Debug)]
pub struct RayPacket {
    pub org: WorldPoint4,
    pub dir: WorldVector4,
    pub tnear: SimdFloatType,
    pub tfar: SimdFloatType,
    pub time: SimdFloatType,
    pub hit: HitPacket,
}

/// Per-lane hit attributes, written by primitive intersectors.
#[derive(Clone, Debug)]
pub struct HitPacket {
    /// Unnormalized geometric normal at the hit.
    pub ng: WorldVector4,
    pub u: SimdFloatType,
    pub v: SimdFloatType,
    pub geom_id: [u32; LANES],
    pub prim_id: [u32; LANES],
}

impl Default for HitPacket {
    fn default() -> Self {
        HitPacket {
            ng: WorldVector4::zeros(),
            u: SimdFloatType::splat(0.0),
            v: SimdFloatType::splat(0.0),
            geom_id: [INVALID_ID; LANES],
            prim_id: [INVALID_ID; LANES],
        }
    }
}

impl RayPacket {
    pub fn from_lanes(rays: [Ray; LANES]) -> RayPacket {
        let gather = |f: &dyn Fn(&Ray) -> FloatType| {
            SimdFloatType::from([f(&rays[0]), f(&rays[1]), f(&rays[2]), f(&rays[3])])
        };
        RayPacket {
            org: WorldPoint4::new(
                gather(&|r| r.origin.x),
                gather(&|r| r.origin.y),
                gather(&|r| r.origin.z),
            ),
            dir: WorldVector4::new(
                gather(&|r| r.direction.x),
                gather(&|r| r.direction.y),
                gather(&|r| r.direction.z),
            ),
            tnear: gather(&|r| r.tnear),
            tfar: gather(&|r| r.tfar),
            time: gather(&|r| r.time),
            hit: HitPacket::default(),
        }
    }

    pub fn lane_org(&self, lane: usize) -> WorldPoint {
        WorldPoint::new(
            self.org.x.extract(lane),
            self.org.y.extract(lane),
            self.org.z.extract(lane),
        )
    }

    pub fn lane_dir(&self, lane: usize) -> WorldVector {
        WorldVector::new(
            self.dir.x.extract(lane),
            self.dir.y.extract(lane),
            self.dir.z.extract(lane),
        )
    }

    pub fn has_hit(&self, lane: usize) -> bool {
        self.hit.geom_id[lane] != INVALID_ID
    }

    /// Commits an any-hit result: lanes in `mask` get their geometry id
    /// zeroed, the occlusion convention of the hit indicator.
    pub fn mark_occluded(&mut self, mask: SimdMaskType) {
        for lane in bit_iter(movemask(mask)) {
            self.hit.geom_id[lane] = 0;
        }
    }

    pub fn is_occluded(&self, lane: usize) -> bool {
        self.hit.geom_id[lane] == 0
    }
}

/// One lane's view of a packet, derived when single-ray traversal starts.
/// The lane's tfar is deliberately not cached here, walkers re-read it from
/// the packet.
pub struct LaneRay {
    pub org: WorldPoint,
    pub rdir: WorldVector,
    pub tnear: FloatType,
    pub time: FloatType,
}

impl LaneRay {
    pub fn from_packet(ray: &RayPacket, lane: usize) -> LaneRay {
        LaneRay {
            org: ray.lane_org(lane),
            rdir: ray.lane_dir(lane).map(recip_safe_lane),
            tnear: ray.tnear.extract(lane),
            time: ray.time.extract(lane),
        }
    }
}

/// Componentwise reciprocal of a packet direction that produces no NaN or
/// Inf: components smaller than `MIN_RCP_INPUT` are replaced by that bound
/// carrying the input's sign bit, so an axis-parallel ray gets a huge finite
/// reciprocal of the right sign (a negative zero stays negative).
pub fn recip_safe(dir: &WorldVector4) -> WorldVector4 {
    dir.map(|c| {
        let sign = c.0 & f32x4::splat(-0.0);
        let nudged = f32x4::splat(MIN_RCP_INPUT) | sign;
        let tiny = c.0.abs().cmp_lt(f32x4::splat(MIN_RCP_INPUT));
        WideF32x4(f32x4::ONE / tiny.blend(nudged, c.0))
    })
}

/// Scalar mirror of [`recip_safe`], same constant and rounding so packet and
/// single-ray traversal see identical reciprocals.
pub fn recip_safe_lane(v: FloatType) -> FloatType {
    if v.abs() < MIN_RCP_INPUT {
        1.0 / MIN_RCP_INPUT.copysign(v)
    } else {
        1.0 / v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use test_case::test_case;
    use test_strategy::proptest;

    #[test_case(0.0, 1e18 ; "positive_zero")]
    #[test_case(-0.0, -1e18 ; "negative_zero")]
    #[test_case(2.0, 0.5 ; "ordinary")]
    #[test_case(-4.0, -0.25 ; "ordinary_negative")]
    #[test_case(1e-30, 1e18 ; "subnormal_range")]
    fn recip_safe_lane_cases(input: f32, expected: f32) {
        let r = recip_safe_lane(input);
        assert!(r == expected);
        assert!(r.is_finite());
    }

    #[proptest]
    fn recip_safe_packet_matches_lane(#[strategy(-1e6f32..1e6f32)] v: f32) {
        let packet = recip_safe(&WorldVector4::new(
            SimdFloatType::splat(v),
            SimdFloatType::splat(1.0),
            SimdFloatType::splat(1.0),
        ));
        proptest::prop_assert!(packet.x.extract(0) == recip_safe_lane(v));
    }

    #[test]
    fn from_lanes_round_trip() {
        let rays = [
            Ray::segment([1.0, 2.0, 3.0].into(), [0.0, 0.0, 1.0].into(), 0.0, 10.0),
            Ray::segment([4.0, 5.0, 6.0].into(), [0.0, 1.0, 0.0].into(), 0.5, 20.0),
            Ray::new([7.0, 8.0, 9.0].into(), [1.0, 0.0, 0.0].into()),
            Ray::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into()).at_time(0.75),
        ];
        let packet = RayPacket::from_lanes(rays);

        assert!(packet.lane_org(1) == rays[1].origin);
        assert!(packet.lane_dir(2) == rays[2].direction);
        assert!(packet.tnear.extract(1) == 0.5);
        assert!(packet.tfar.extract(0) == 10.0);
        assert!(packet.time.extract(3) == 0.75);
        assert!(!packet.has_hit(0));
    }

    #[test]
    fn mark_occluded_touches_only_masked_lanes() {
        let mut packet = RayPacket::from_lanes(
            [Ray::new([0.0, 0.0, 0.0].into(), [0.0, 0.0, 1.0].into()); 4],
        );
        packet.mark_occluded(crate::geometry::mask_from_lanes([true, false, true, false]));

        assert!(packet.is_occluded(0));
        assert!(!packet.is_occluded(1));
        assert!(packet.is_occluded(2));
        assert!(packet.hit.geom_id[3] == INVALID_ID);
    }

    #[test]
    fn lane_ray_derives_reciprocal() {
        let packet = RayPacket::from_lanes(
            [Ray::new([1.0, 2.0, 3.0].into(), [0.0, -2.0, 4.0].into()); 4],
        );
        let lray = LaneRay::from_packet(&packet, 2);

        assert!(lray.org == [1.0, 2.0, 3.0].into());
        assert!(lray.rdir.x == 1e18);
        assert!(lray.rdir.y == -0.5);
        assert!(lray.rdir.z == 0.25);
    }
}
