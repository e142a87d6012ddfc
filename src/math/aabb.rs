//! Axis-aligned boxes for brush bounds and tile overlap

use crate::core::types::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self::new(center - half_extent, center + half_extent)
    }

    /// Smallest box containing every point, or `None` for an empty slice
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        Some(rest.iter().fold(Aabb::new(*first, *first), |mut aabb, &p| {
            aabb.expand(p);
            aabb
        }))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow every face outward by `margin`
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    /// Bounds of the eight transformed corners. Conservative under rotation.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let corner = |i: u8| {
            Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            )
        };
        let first = transform.transform_point3(corner(0));
        (1..8u8).fold(Aabb::new(first, first), |mut aabb, i| {
            aabb.expand(transform.transform_point3(corner(i)));
            aabb
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_and_half_extent() {
        let aabb = Aabb::from_center_half_extent(Vec3::new(1.0, 2.0, 3.0), Vec3::splat(0.5));
        assert_eq!(aabb.center(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.half_extent(), Vec3::splat(0.5));
        assert_eq!(aabb.inflated(0.5).half_extent(), Vec3::ONE);
    }

    #[test]
    fn test_from_points() {
        assert!(Aabb::from_points(&[]).is_none());
        let aabb = Aabb::from_points(&[Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 3.0, 0.5)]).unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 0.5));
    }

    #[test]
    fn test_transformed_translate_scale() {
        let unit = Aabb::new(Vec3::splat(-1.0), Vec3::ONE);
        let m = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let world = unit.transformed(&m);
        assert!((world.min - Vec3::new(3.0, -2.0, -2.0)).length() < 1e-5);
        assert!((world.max - Vec3::new(7.0, 2.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_transformed_rotation_is_conservative() {
        let unit = Aabb::new(Vec3::splat(-1.0), Vec3::ONE);
        let m = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4);
        let world = unit.transformed(&m);
        let r = 2.0_f32.sqrt();
        assert!((world.max.x - r).abs() < 1e-5);
        assert!((world.max.y - 1.0).abs() < 1e-5);
    }
}
