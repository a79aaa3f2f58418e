use simba::simd::{SimdPartialOrd as _, WideF32x4};
use wide::{f32x4, CmpLe as _};

use crate::util::simba::{fast_max, fast_min};

use super::{
    recip_safe, FloatType, LaneRay, SimdFloatType, SimdMaskType, WorldPoint4, WorldVector4,
};

/// Packet-side values shared by every box test of one traversal: the origin,
/// the safe reciprocal direction, and their product for the fused-multiply
/// reformulation of the slab test.
pub struct PacketPrecalc {
    pub org: WorldPoint4,
    pub rdir: WorldVector4,
    pub org_rdir: WorldVector4,
}

impl PacketPrecalc {
    pub fn new(org: &WorldPoint4, dir: &WorldVector4) -> PacketPrecalc {
        let rdir = recip_safe(dir);
        let org_rdir = org.coords.component_mul(&rdir);
        PacketPrecalc {
            org: org.clone(),
            rdir,
            org_rdir,
        }
    }
}

/// Slab test of one box against all four packet lanes.
/// Returns the lane hit mask and the per-lane entry distance, already clamped
/// to tnear. Uses `lower*rdir - org*rdir` so each plane costs one fused
/// multiply.
#[inline(always)]
pub fn intersect_box_packet(
    lower: [FloatType; 3],
    upper: [FloatType; 3],
    pre: &PacketPrecalc,
    tnear: SimdFloatType,
    tfar: SimdFloatType,
) -> (SimdMaskType, SimdFloatType) {
    let clip_min_x = WideF32x4(f32x4::splat(lower[0]).mul_sub(pre.rdir.x.0, pre.org_rdir.x.0));
    let clip_min_y = WideF32x4(f32x4::splat(lower[1]).mul_sub(pre.rdir.y.0, pre.org_rdir.y.0));
    let clip_min_z = WideF32x4(f32x4::splat(lower[2]).mul_sub(pre.rdir.z.0, pre.org_rdir.z.0));
    let clip_max_x = WideF32x4(f32x4::splat(upper[0]).mul_sub(pre.rdir.x.0, pre.org_rdir.x.0));
    let clip_max_y = WideF32x4(f32x4::splat(upper[1]).mul_sub(pre.rdir.y.0, pre.org_rdir.y.0));
    let clip_max_z = WideF32x4(f32x4::splat(upper[2]).mul_sub(pre.rdir.z.0, pre.org_rdir.z.0));

    clip_to_hit(
        [clip_min_x, clip_min_y, clip_min_z],
        [clip_max_x, clip_max_y, clip_max_z],
        tnear,
        tfar,
    )
}

/// Motion-blur variant: bounds are first reconstructed at each lane's time
/// from the base coordinate and its velocity.
#[inline(always)]
pub fn intersect_box_packet_mb(
    lower: [FloatType; 3],
    dlower: [FloatType; 3],
    upper: [FloatType; 3],
    dupper: [FloatType; 3],
    pre: &PacketPrecalc,
    time: SimdFloatType,
    tnear: SimdFloatType,
    tfar: SimdFloatType,
) -> (SimdMaskType, SimdFloatType) {
    let bound = |base: FloatType, delta: FloatType| {
        WideF32x4(time.0.mul_add(f32x4::splat(delta), f32x4::splat(base)))
    };
    let clip = |b: SimdFloatType, org: SimdFloatType, rdir: SimdFloatType| (b - org) * rdir;

    let clip_min_x = clip(bound(lower[0], dlower[0]), pre.org.x, pre.rdir.x);
    let clip_min_y = clip(bound(lower[1], dlower[1]), pre.org.y, pre.rdir.y);
    let clip_min_z = clip(bound(lower[2], dlower[2]), pre.org.z, pre.rdir.z);
    let clip_max_x = clip(bound(upper[0], dupper[0]), pre.org.x, pre.rdir.x);
    let clip_max_y = clip(bound(upper[1], dupper[1]), pre.org.y, pre.rdir.y);
    let clip_max_z = clip(bound(upper[2], dupper[2]), pre.org.z, pre.rdir.z);

    clip_to_hit(
        [clip_min_x, clip_min_y, clip_min_z],
        [clip_max_x, clip_max_y, clip_max_z],
        tnear,
        tfar,
    )
}

#[inline(always)]
fn clip_to_hit(
    clip_min: [SimdFloatType; 3],
    clip_max: [SimdFloatType; 3],
    tnear: SimdFloatType,
    tfar: SimdFloatType,
) -> (SimdMaskType, SimdFloatType) {
    let [min_x, min_y, min_z] = clip_min;
    let [max_x, max_y, max_z] = clip_max;

    let near = fast_max(
        fast_max(fast_min(min_x, max_x), fast_min(min_y, max_y)),
        fast_max(fast_min(min_z, max_z), tnear),
    );
    let far = fast_min(
        fast_min(fast_max(min_x, max_x), fast_max(min_y, max_y)),
        fast_min(fast_max(min_z, max_z), tfar),
    );

    (near.simd_le(far), near)
}

/// One lane against four boxes at once, one SIMD row per packed coordinate.
/// The near plane per axis is `lower` for a non-negative reciprocal and
/// `upper` otherwise, so no per-component min/max is needed.
/// Returns a box hit bitmask and the per-box entry distances.
#[inline(always)]
pub fn intersect_boxes_lane(
    lower: [f32x4; 3],
    upper: [f32x4; 3],
    lray: &LaneRay,
    tfar: FloatType,
) -> (u64, [FloatType; 4]) {
    let (near_x, far_x) = pick_planes(lower[0], upper[0], lray.rdir.x);
    let (near_y, far_y) = pick_planes(lower[1], upper[1], lray.rdir.y);
    let (near_z, far_z) = pick_planes(lower[2], upper[2], lray.rdir.z);

    let t_near = ((near_x - f32x4::splat(lray.org.x)) * f32x4::splat(lray.rdir.x))
        .fast_max((near_y - f32x4::splat(lray.org.y)) * f32x4::splat(lray.rdir.y))
        .fast_max((near_z - f32x4::splat(lray.org.z)) * f32x4::splat(lray.rdir.z))
        .fast_max(f32x4::splat(lray.tnear));
    let t_far = ((far_x - f32x4::splat(lray.org.x)) * f32x4::splat(lray.rdir.x))
        .fast_min((far_y - f32x4::splat(lray.org.y)) * f32x4::splat(lray.rdir.y))
        .fast_min((far_z - f32x4::splat(lray.org.z)) * f32x4::splat(lray.rdir.z))
        .fast_min(f32x4::splat(tfar));

    (t_near.cmp_le(t_far).move_mask() as u64, t_near.to_array())
}

/// Motion-blur variant of [`intersect_boxes_lane`].
#[inline(always)]
pub fn intersect_boxes_lane_mb(
    lower: [f32x4; 3],
    dlower: [f32x4; 3],
    upper: [f32x4; 3],
    dupper: [f32x4; 3],
    lray: &LaneRay,
    tfar: FloatType,
) -> (u64, [FloatType; 4]) {
    let t = f32x4::splat(lray.time);
    let at_time = |base: [f32x4; 3], delta: [f32x4; 3]| {
        [
            t.mul_add(delta[0], base[0]),
            t.mul_add(delta[1], base[1]),
            t.mul_add(delta[2], base[2]),
        ]
    };

    intersect_boxes_lane(at_time(lower, dlower), at_time(upper, dupper), lray, tfar)
}

#[inline(always)]
fn pick_planes(lower: f32x4, upper: f32x4, rdir: FloatType) -> (f32x4, f32x4) {
    if rdir >= 0.0 {
        (lower, upper)
    } else {
        (upper, lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use simba::simd::SimdValue;
    use test_case::{test_case, test_matrix};

    use crate::geometry::{Ray, RayPacket, WorldBox, WorldPoint, WorldVector};

    fn precalc(ray: &Ray) -> PacketPrecalc {
        let packet = RayPacket::from_lanes([*ray; 4]);
        PacketPrecalc::new(&packet.org, &packet.dir)
    }

    fn test_box(b: &WorldBox, ray: &Ray) -> Option<(f32, f32)> {
        let pre = precalc(ray);
        let (hit, near) = intersect_box_packet(
            b.min.coords.into(),
            b.max.coords.into(),
            &pre,
            SimdFloatType::splat(ray.tnear),
            SimdFloatType::splat(ray.tfar),
        );
        hit.extract(0).then(|| (near.extract(0), near.extract(3)))
    }

    /// Checks cases when the ray hits the box, including corner cases where
    /// the origin sits on a face or the direction is axis parallel.
    #[test_matrix(
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-10.0, 0.0, 5.0]
    )]
    fn hit(px: f32, py: f32, dx: f32, dy: f32, origin_pos: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }

        let b = WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into());

        let through = WorldPoint::new(px, py, 7.0);
        let d = WorldVector::new(dx, dy, 1.0);
        let origin = through + d * origin_pos;
        let ray = Ray::segment(origin, d, 0.0, 1000.0);

        let hit = test_box(&b, &ray);
        if origin_pos <= 0.0 {
            let (near, near_last_lane) = hit.expect("ray toward the box must hit");
            assert!(near >= 0.0);
            assert!(near == near_last_lane, "all lanes carry the same ray");
        }
    }

    /// Rays that lie parallel to one axis and start outside the corresponding
    /// slab must miss, even if they move toward the box on other axes.
    #[test_case( 0.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "low_x_parallel_miss")]
    #[test_case(12.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "high_x_parallel_miss")]
    #[test_case( 7.0,  0.0,  7.0,   1.0, 0.0, 0.0 ; "low_y_parallel_miss")]
    #[test_case( 7.0, 12.0,  7.0,   1.0, 0.0, 0.0 ; "high_y_parallel_miss")]
    #[test_case( 7.0,  7.0,  0.0,   1.0, 0.0, 0.0 ; "low_z_parallel_miss")]
    #[test_case( 7.0,  7.0, 12.0,   1.0, 0.0, 0.0 ; "high_z_parallel_miss")]
    #[test_case( 0.0,  0.0,  0.0,  -1.0, 1.0, 1.0 ; "corner_miss")]
    fn only_misses(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32) {
        let b = WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into());
        let ray = Ray::segment([px, py, pz].into(), [dx, dy, dz].into(), 0.0, 1000.0);

        assert!(test_box(&b, &ray) == None);
    }

    #[test]
    fn origin_inside_box_enters_at_tnear() {
        let b = WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into());
        let ray = Ray::segment([7.0, 7.0, 7.0].into(), [0.3, 1.0, -0.2].into(), 0.0, 1000.0);

        let (near, _) = test_box(&b, &ray).expect("origin inside the box always hits");
        assert!(near <= ray.tnear);
    }

    #[test]
    fn lane_kernel_matches_packet_kernel() {
        let b = WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into());
        let rays = [
            Ray::segment([7.0, 7.0, 0.0].into(), [0.0, 0.1, 1.0].into(), 0.0, 100.0),
            Ray::segment([7.0, 7.0, 20.0].into(), [0.0, 0.0, -1.0].into(), 0.0, 100.0),
            Ray::segment([0.0, 0.0, 0.0].into(), [-1.0, -1.0, -1.0].into(), 0.0, 100.0),
            Ray::segment([7.0, 12.0, 7.0].into(), [1.0, 0.0, 0.0].into(), 0.0, 100.0),
        ];
        let packet = RayPacket::from_lanes(rays);
        let pre = PacketPrecalc::new(&packet.org, &packet.dir);
        let (packet_hit, _) = intersect_box_packet(
            b.min.coords.into(),
            b.max.coords.into(),
            &pre,
            packet.tnear,
            packet.tfar,
        );

        // The same box in all four child slots of the lane kernel.
        let rows = |p: &WorldPoint| {
            [
                f32x4::splat(p.x),
                f32x4::splat(p.y),
                f32x4::splat(p.z),
            ]
        };
        for lane in 0..4 {
            let lray = LaneRay::from_packet(&packet, lane);
            let (bits, _) = intersect_boxes_lane(rows(&b.min), rows(&b.max), &lray, 100.0);
            assert!((bits != 0) == packet_hit.extract(lane), "lane {}", lane);
        }
    }

    #[test]
    fn moving_box_is_tested_at_lane_time() {
        // Box sweeps from x [0,1] to x [10,11] over the time interval.
        let lower = [0.0, -1.0, -1.0];
        let upper = [1.0, 1.0, 1.0];
        let dlower = [10.0, 0.0, 0.0];
        let dupper = [10.0, 0.0, 0.0];

        let base = Ray::segment([-1.0, 0.0, 0.0].into(), [1.0, 0.0, 0.0].into(), 0.0, 100.0);
        let packet = RayPacket::from_lanes([
            base.at_time(0.0),
            base.at_time(0.5),
            base.at_time(1.0),
            // Behind the box at any time.
            Ray::segment([20.0, 0.0, 0.0].into(), [1.0, 0.0, 0.0].into(), 0.0, 100.0),
        ]);
        let pre = PacketPrecalc::new(&packet.org, &packet.dir);

        let (hit, near) = intersect_box_packet_mb(
            lower,
            dlower,
            upper,
            dupper,
            &pre,
            packet.time,
            packet.tnear,
            packet.tfar,
        );

        assert!(hit.extract(0) && hit.extract(1) && hit.extract(2));
        assert!(!hit.extract(3));
        assert!((near.extract(0) - 1.0).abs() < 1e-5);
        assert!((near.extract(1) - 6.0).abs() < 1e-5);
        assert!((near.extract(2) - 11.0).abs() < 1e-5);

        // The lane kernel reconstructs the same bounds.
        for lane in 0..3 {
            let lray = LaneRay::from_packet(&packet, lane);
            let row = |v: [f32; 3], i: usize| f32x4::splat(v[i]);
            let (bits, dists) = intersect_boxes_lane_mb(
                [row(lower, 0), row(lower, 1), row(lower, 2)],
                [row(dlower, 0), row(dlower, 1), row(dlower, 2)],
                [row(upper, 0), row(upper, 1), row(upper, 2)],
                [row(dupper, 0), row(dupper, 1), row(dupper, 2)],
                &lray,
                100.0,
            );
            assert!(bits == 0b1111);
            assert!((dists[0] - near.extract(lane)).abs() < 1e-5);
        }
    }
}
