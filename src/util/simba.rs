use simba::simd::{SimdValue, WideF32x4};

use crate::geometry::{SimdFloatType, SimdMaskType, WorldVector4};

pub trait SimbaWorkarounds: SimdValue {
    fn infinity() -> Self;
    fn neg_infinity() -> Self;
}

impl SimbaWorkarounds for WideF32x4 {
    #[inline(always)]
    fn infinity() -> Self {
        Self::splat(f32::INFINITY)
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        Self::splat(f32::NEG_INFINITY)
    }
}

/// Componentwise minimum with the hardware ordering: the second operand wins
/// when the lanes are unordered. The traversal never feeds NaN here, see
/// `recip_safe`.
#[inline(always)]
pub fn fast_min(a: SimdFloatType, b: SimdFloatType) -> SimdFloatType {
    WideF32x4(a.0.fast_min(b.0))
}

#[inline(always)]
pub fn fast_max(a: SimdFloatType, b: SimdFloatType) -> SimdFloatType {
    WideF32x4(a.0.fast_max(b.0))
}

/// Builds a SIMD mask from per-lane bools.
pub fn mask_from_lanes(lanes: [bool; 4]) -> SimdMaskType {
    let mut mask = SimdMaskType::splat(false);
    for (i, lane) in lanes.into_iter().enumerate() {
        mask.replace(i, lane);
    }
    mask
}

/// Lane bitmask of a SIMD mask, bit i set iff lane i is true.
#[inline(always)]
pub fn movemask(mask: SimdMaskType) -> u64 {
    mask.0.move_mask() as u64
}

pub fn fma_dot(a: &WorldVector4, b: &WorldVector4) -> SimdFloatType {
    WideF32x4(a.z.0.mul_add(b.z.0, a.y.0.mul_add(b.y.0, a.x.0 * b.x.0)))
}
