use glam::Vec3;

use crate::math::Aabb;

/// Axis for oriented shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Get unit vector for this axis
    pub fn to_vec3(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }
}

/// Analytic brush shapes, defined in brush-local space where the brush
/// volume spans [-1, 1] on every axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    RoundedBox { half_extents: Vec3, radius: f32 },
    Capsule { radius: f32, half_height: f32, axis: Axis },
    Cylinder { radius: f32, half_height: f32, axis: Axis },
    Torus { major: f32, minor: f32 },
}

impl Shape {
    /// Signed distance from a local point (negative = inside)
    pub fn sdf(&self, p: Vec3) -> f32 {
        match *self {
            Shape::Sphere { radius } => p.length() - radius,
            Shape::Box { half_extents } => {
                let q = p.abs() - half_extents;
                q.max(Vec3::ZERO).length() + q.x.max(q.y.max(q.z)).min(0.0)
            }
            Shape::RoundedBox { half_extents, radius } => {
                let q = p.abs() - (half_extents - Vec3::splat(radius));
                q.max(Vec3::ZERO).length() + q.x.max(q.y.max(q.z)).min(0.0) - radius
            }
            Shape::Capsule { radius, half_height, axis } => {
                let axis_vec = axis.to_vec3();
                let t = p.dot(axis_vec).clamp(-half_height, half_height);
                (p - axis_vec * t).length() - radius
            }
            Shape::Cylinder { radius, half_height, axis } => {
                let axis_vec = axis.to_vec3();
                let h = p.dot(axis_vec);
                let d_radial = (p - axis_vec * h).length() - radius;
                let d_height = h.abs() - half_height;
                let outside = Vec3::new(d_radial.max(0.0), d_height.max(0.0), 0.0).length();
                outside + d_radial.max(d_height).min(0.0)
            }
            Shape::Torus { major, minor } => {
                let ring = (p.x * p.x + p.z * p.z).sqrt() - major;
                (ring * ring + p.y * p.y).sqrt() - minor
            }
        }
    }

    /// Local-space bounds of the solid
    pub fn local_bounds(&self) -> Aabb {
        let half = match *self {
            Shape::Sphere { radius } => Vec3::splat(radius),
            Shape::Box { half_extents } | Shape::RoundedBox { half_extents, .. } => half_extents,
            Shape::Capsule { radius, half_height, axis } => {
                axis.to_vec3() * half_height + Vec3::splat(radius)
            }
            Shape::Cylinder { radius, half_height, axis } => {
                let a = axis.to_vec3();
                a * half_height + (Vec3::ONE - a) * radius
            }
            Shape::Torus { major, minor } => Vec3::new(major + minor, minor, major + minor),
        };
        Aabb::from_center_half_extent(Vec3::ZERO, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_sdf() {
        let s = Shape::Sphere { radius: 0.5 };
        assert!((s.sdf(Vec3::ZERO) + 0.5).abs() < 1e-6);
        assert!((s.sdf(Vec3::new(1.0, 0.0, 0.0)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_box_sdf_inside_and_corner() {
        let b = Shape::Box { half_extents: Vec3::splat(0.5) };
        assert!((b.sdf(Vec3::ZERO) + 0.5).abs() < 1e-6);
        let corner = b.sdf(Vec3::splat(1.0));
        assert!((corner - (3.0_f32 * 0.25).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_rounded_box_matches_box_on_faces() {
        let rb = Shape::RoundedBox { half_extents: Vec3::splat(0.5), radius: 0.1 };
        assert!(rb.sdf(Vec3::new(0.5, 0.0, 0.0)).abs() < 1e-5);
        assert!(rb.sdf(Vec3::splat(0.5)) > 0.0);
    }

    #[test]
    fn test_capsule_and_cylinder_along_axis() {
        let c = Shape::Capsule { radius: 0.2, half_height: 0.5, axis: Axis::Y };
        assert!((c.sdf(Vec3::new(0.0, 0.7, 0.0))).abs() < 1e-6);
        let cyl = Shape::Cylinder { radius: 0.2, half_height: 0.5, axis: Axis::Y };
        assert!((cyl.sdf(Vec3::new(0.0, 0.6, 0.0)) - 0.1).abs() < 1e-6);
        assert!((cyl.sdf(Vec3::new(0.3, 0.0, 0.0)) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_torus_ring() {
        let t = Shape::Torus { major: 0.6, minor: 0.2 };
        assert!((t.sdf(Vec3::new(0.6, 0.0, 0.0)) + 0.2).abs() < 1e-6);
        assert!(t.sdf(Vec3::ZERO) > 0.0);
    }

    #[test]
    fn test_local_bounds_contain_surface() {
        let shapes = [
            Shape::Sphere { radius: 0.5 },
            Shape::Capsule { radius: 0.2, half_height: 0.5, axis: Axis::X },
            Shape::Cylinder { radius: 0.3, half_height: 0.4, axis: Axis::Z },
            Shape::Torus { major: 0.6, minor: 0.2 },
        ];
        for shape in shapes {
            let bounds = shape.local_bounds().inflated(1e-4);
            for corner in [bounds.min, bounds.max] {
                assert!(shape.sdf(corner) >= -1e-4, "{:?}", shape);
            }
        }
    }
}
