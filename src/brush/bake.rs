//! CPU baking of brush geometry into local-space SDF grids.
//!
//! Grids cover brush-local [-1, 1]^3 with samples at cell centers. Mesh
//! brushes are normalized into that cube first. Distance magnitude comes from
//! the closest triangle; the sign comes from the generalized winding number,
//! so meshes with small holes still bake a usable inside.

use glam::Vec3;
use rayon::prelude::*;

use crate::brush::shape::Shape;
use crate::core::error::Error;
use crate::math::Aabb;

/// Fraction of the local cube a normalized mesh may occupy
const MESH_FILL: f32 = 0.9;

/// Triangle soup geometry of a mesh brush
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGeometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check index list shape and range
    pub fn validate(&self) -> Result<(), Error> {
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(Error::Brush(format!(
                "index count {} is not a non-empty multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= self.positions.len()) {
            return Err(Error::Brush(format!(
                "index {} out of range of {} positions",
                bad,
                self.positions.len()
            )));
        }
        Ok(())
    }

    /// Triangles mapped into the local cube, preserving aspect ratio
    pub fn normalized_triangles(&self) -> Result<Vec<[Vec3; 3]>, Error> {
        self.validate()?;
        let bounds = Aabb::from_points(&self.positions)
            .ok_or_else(|| Error::Brush("mesh has no positions".into()))?;
        let center = bounds.center();
        let half = bounds.half_extent().max_element().max(f32::EPSILON);
        let scale = MESH_FILL / half;

        Ok(self
            .indices
            .chunks_exact(3)
            .map(|t| {
                [
                    (self.positions[t[0] as usize] - center) * scale,
                    (self.positions[t[1] as usize] - center) * scale,
                    (self.positions[t[2] as usize] - center) * scale,
                ]
            })
            .collect())
    }
}

/// Cubic grid of signed distances over local [-1, 1]^3
#[derive(Clone, Debug, PartialEq)]
pub struct SdfGrid {
    pub resolution: u32,
    /// x-fastest, then y, then z
    pub data: Vec<f32>,
}

impl SdfGrid {
    /// Local-space position of a sample
    #[inline]
    pub fn sample_position(resolution: u32, x: u32, y: u32, z: u32) -> Vec3 {
        let step = 2.0 / resolution as f32;
        Vec3::new(
            -1.0 + (x as f32 + 0.5) * step,
            -1.0 + (y as f32 + 0.5) * step,
            -1.0 + (z as f32 + 0.5) * step,
        )
    }

    fn from_fn<F>(resolution: u32, f: F) -> Self
    where
        F: Fn(Vec3) -> f32 + Sync,
    {
        let res = resolution as usize;
        let mut data = vec![0.0f32; res * res * res];
        data.par_chunks_mut(res * res).enumerate().for_each(|(z, slice)| {
            for y in 0..res {
                for x in 0..res {
                    let p = Self::sample_position(resolution, x as u32, y as u32, z as u32);
                    slice[y * res + x] = f(p);
                }
            }
        });
        Self { resolution, data }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> f32 {
        let r = self.resolution as usize;
        self.data[(z as usize * r + y as usize) * r + x as usize]
    }

    /// Trilinear sample at a local position, clamped to the grid, plus the
    /// distance from the clamped point for positions outside the cube
    pub fn sample(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(Vec3::splat(-1.0), Vec3::splat(1.0));
        let outside = (p - clamped).length();

        let r = self.resolution as f32;
        let g = ((clamped + Vec3::ONE) * 0.5 * r - Vec3::splat(0.5)).clamp(Vec3::ZERO, Vec3::splat(r - 1.0));
        let base = g.floor();
        let f = g - base;
        let max = self.resolution - 1;
        let (x0, y0, z0) = (base.x as u32, base.y as u32, base.z as u32);
        let (x1, y1, z1) = ((x0 + 1).min(max), (y0 + 1).min(max), (z0 + 1).min(max));

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(self.get(x0, y0, z0), self.get(x1, y0, z0), f.x);
        let c10 = lerp(self.get(x0, y1, z0), self.get(x1, y1, z0), f.x);
        let c01 = lerp(self.get(x0, y0, z1), self.get(x1, y0, z1), f.x);
        let c11 = lerp(self.get(x0, y1, z1), self.get(x1, y1, z1), f.x);
        let c0 = lerp(c00, c10, f.y);
        let c1 = lerp(c01, c11, f.y);
        lerp(c0, c1, f.z) + outside
    }
}

/// Evaluate an analytic shape on a grid
pub fn bake_shape(shape: &Shape, resolution: u32) -> SdfGrid {
    SdfGrid::from_fn(resolution, |p| shape.sdf(p))
}

/// Bake a triangle mesh into a grid
pub fn bake_mesh(mesh: &MeshGeometry, resolution: u32) -> Result<SdfGrid, Error> {
    let triangles = mesh.normalized_triangles()?;
    let start = std::time::Instant::now();

    let grid = SdfGrid::from_fn(resolution, |p| {
        let mut best = f32::MAX;
        let mut winding = 0.0f32;
        for tri in &triangles {
            let q = closest_point_on_triangle(p, tri[0], tri[1], tri[2]);
            best = best.min((p - q).length_squared());
            winding += solid_angle(p, tri[0], tri[1], tri[2]);
        }
        let distance = best.sqrt();
        if winding / (4.0 * std::f32::consts::PI) > 0.5 { -distance } else { distance }
    });

    log::debug!("Baked {} triangles at {}^3 in {:.1}ms",
        triangles.len(), resolution, start.elapsed().as_secs_f64() * 1000.0);
    Ok(grid)
}

/// Closest point to `p` on triangle `abc` (Voronoi region walk)
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Signed solid angle of triangle `abc` seen from `p`
fn solid_angle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let a = a - p;
    let b = b - p;
    let c = c - p;
    let (la, lb, lc) = (a.length(), b.length(), c.length());
    let numerator = a.dot(b.cross(c));
    let denominator = la * lb * lc + a.dot(b) * lc + b.dot(c) * la + c.dot(a) * lb;
    2.0 * numerator.atan2(denominator)
}
