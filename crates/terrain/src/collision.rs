//! Axis-aligned bounds for body tracking
//!
//! Plain glam math, independent of the physics engine, so the tracker can be
//! fed from any body registry.

use crate::chunk::CHUNK_SIZE;
use glam::{IVec3, Vec3};

/// World-space box, `min` and `max` inclusive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB around a center point
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Degenerate AABB containing a single point
    pub fn point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Both corners finite and ordered
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    /// Smallest AABB containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Shift by `offset`
    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Grow by `margin` on every side
    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Inclusive range of chunk keys the AABB touches
    ///
    /// Coordinates are floored and saturate at the `i32` range, so huge but
    /// finite boxes still produce a (very large) range instead of wrapping.
    ///
    /// # Example
    /// ```
    /// use terrain_stream::collision::Aabb;
    /// use glam::{IVec3, Vec3};
    ///
    /// let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(16.0, 15.9, 0.5));
    /// let (min, max) = aabb.chunk_range();
    /// assert_eq!(min, IVec3::new(-1, 0, 0));
    /// assert_eq!(max, IVec3::new(1, 0, 0));
    /// ```
    pub fn chunk_range(&self) -> (IVec3, IVec3) {
        let to_chunk = |v: Vec3| {
            let c = (v / CHUNK_SIZE as f32).floor();
            // `as` saturates for out-of-range floats
            IVec3::new(c.x as i32, c.y as i32, c.z as i32)
        };
        (to_chunk(self.min), to_chunk(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_translate_expand() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = a.translated(Vec3::new(4.0, 0.0, 0.0));

        let u = a.union(&b);
        assert_eq!(u.min, Vec3::ZERO);
        assert_eq!(u.max, Vec3::new(5.0, 1.0, 1.0));

        let e = a.expanded(2.0);
        assert_eq!(e.min, Vec3::splat(-2.0));
        assert_eq!(e.max, Vec3::splat(3.0));
    }

    #[test]
    fn test_validity() {
        assert!(Aabb::point(Vec3::ONE).is_valid());
        assert!(!Aabb::new(Vec3::ONE, Vec3::ZERO).is_valid());
        assert!(!Aabb::new(Vec3::ZERO, Vec3::new(f32::INFINITY, 1.0, 1.0)).is_valid());
    }

    #[test]
    fn test_chunk_range_floors_negative() {
        let aabb = Aabb::new(Vec3::new(-0.1, -16.0, -16.1), Vec3::new(0.0, 0.0, 0.0));
        let (min, max) = aabb.chunk_range();
        assert_eq!(min, IVec3::new(-1, -1, -2));
        assert_eq!(max, IVec3::ZERO);
    }

    #[test]
    fn test_chunk_range_saturates() {
        let aabb = Aabb::new(Vec3::splat(-1e30), Vec3::splat(1e30));
        let (min, max) = aabb.chunk_range();
        assert_eq!(min, IVec3::splat(i32::MIN));
        assert_eq!(max, IVec3::splat(i32::MAX));
    }
}
