mod aabb;
mod ray_box_intersection;
mod ray_packet;
mod ray_triangle_intersection;
mod triangle;

use nalgebra::{Point3, Vector3};

pub use aabb::AABB;
pub use ray_box_intersection::{
    intersect_box_packet, intersect_box_packet_mb, intersect_boxes_lane, intersect_boxes_lane_mb,
    PacketPrecalc,
};
pub use ray_packet::{recip_safe, recip_safe_lane, HitPacket, LaneRay, Ray, RayPacket, INVALID_ID};
pub use triangle::Triangle;

pub use crate::util::simba::mask_from_lanes;

pub type FloatType = f32;
pub type SimdFloatType = simba::simd::WideF32x4;
pub type SimdMaskType = simba::simd::WideBoolF32x4;

/// Number of rays in a packet.
pub const LANES: usize = 4;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldPoint4 = Point3<SimdFloatType>;
pub type WorldVector4 = Vector3<SimdFloatType>;
