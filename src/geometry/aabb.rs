use super::{FloatType, WorldBox, WorldVector};

#[derive(Clone, Debug, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }
}

impl WorldBox {
    /// A box no ray can enter, used for absent child slots.
    pub fn never_hit() -> WorldBox {
        AABB {
            min: [FloatType::INFINITY; 3].into(),
            max: [FloatType::NEG_INFINITY; 3].into(),
        }
    }

    /// Smallest box containing both inputs.
    pub fn merged(&self, other: &WorldBox) -> WorldBox {
        AABB {
            min: self.min.coords.zip_map(&other.min.coords, f32::min).into(),
            max: self.max.coords.zip_map(&other.max.coords, f32::max).into(),
        }
    }

    /// The box grown by `margin` on every side.
    pub fn padded(&self, margin: FloatType) -> WorldBox {
        let m = WorldVector::repeat(margin);
        AABB {
            min: self.min - m,
            max: self.max + m,
        }
    }
}
