//! Vertex layouts, capacity rules and the CPU version of the dual
//! contouring kernel.
//!
//! The GPU kernel visits samples in parallel, so the order of its quads is
//! arbitrary. The set of quads and the final vertex count match this code
//! whenever nothing overflows.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec2, Vec3};

use crate::volume::voxel::{GpuVoxel, LevelGrid};

/// Vertices claimed per emitted quad
pub const QUAD_VERTICES: u32 = 6;

/// Vertex soup entry (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct MeshVertex {
    /// w = 1
    pub position: [f32; 4],
    /// w = 0
    pub normal: [f32; 4],
    /// xy = planar uv, z = brush id, w = ownership
    pub texcoord: [f32; 4],
}

impl MeshVertex {
    pub fn position(&self) -> Vec3 {
        Vec3::from_slice(&self.position[..3])
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_slice(&self.normal[..3])
    }

    pub fn brush_id(&self) -> u32 {
        self.texcoord[2] as u32
    }
}

/// Indirect draw record, laid out like `wgpu::util::DrawIndirectArgs`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Atomic claim counter of the contouring kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct MeshCounter {
    /// Vertices claimed, including dropped claims
    pub count: u32,
    /// 1 once any claim was dropped
    pub overflow: u32,
    /// Quads dropped
    pub dropped: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct MeshParams {
    pub capacity: u32,
    pub _pad: [u32; 3],
}

/// Vertex capacity for a level of `voxel_count` voxels.
///
/// Whole quads only, at least one, and no larger than `max_bytes` allows.
pub fn vertex_capacity(voxel_count: u32, vertices_per_voxel: f32, max_bytes: u64) -> u32 {
    let vertex_bytes = std::mem::size_of::<MeshVertex>() as u64;
    let wanted = (voxel_count as f64 * vertices_per_voxel.max(0.0) as f64) as u64;
    let limit = max_bytes / vertex_bytes;
    let quads = (wanted.min(limit) / QUAD_VERTICES as u64).clamp(1, (u32::MAX / QUAD_VERTICES) as u64);
    quads as u32 * QUAD_VERTICES
}

/// Drawable vertex count for a final counter value
pub fn valid_vertex_count(counter: u32, capacity: u32) -> u32 {
    let valid = counter.min(capacity);
    valid - valid % 3
}

impl DrawArgs {
    pub fn from_counter(counter: u32, capacity: u32) -> Self {
        Self {
            vertex_count: valid_vertex_count(counter, capacity),
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Output of one contouring pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContourMesh {
    pub vertices: Vec<MeshVertex>,
    pub counter: MeshCounter,
}

impl ContourMesh {
    pub fn draw_args(&self, capacity: u32) -> DrawArgs {
        DrawArgs::from_counter(self.counter.count, capacity)
    }

    pub fn overflowed(&self) -> bool {
        self.counter.overflow != 0
    }
}

const CORNERS: [UVec3; 8] = [
    UVec3::new(0, 0, 0),
    UVec3::new(1, 0, 0),
    UVec3::new(0, 1, 0),
    UVec3::new(1, 1, 0),
    UVec3::new(0, 0, 1),
    UVec3::new(1, 0, 1),
    UVec3::new(0, 1, 1),
    UVec3::new(1, 1, 1),
];

struct Field<'a> {
    grid: LevelGrid,
    voxels: &'a [GpuVoxel],
}

impl Field<'_> {
    fn voxel(&self, c: UVec3) -> &GpuVoxel {
        &self.voxels[self.grid.index(c.x, c.y, c.z)]
    }

    /// Unclaimed samples read as one voxel outside
    fn sample(&self, c: UVec3) -> f32 {
        self.voxel(c).distance().unwrap_or(self.grid.voxel_size())
    }

    fn cell_vertex(&self, cell: UVec3, brush_id: u32, ownership: f32) -> MeshVertex {
        let values = CORNERS.map(|c| self.sample(cell + c));

        let mut sum = Vec3::ZERO;
        let mut crossings = 0;
        for a in 0..8 {
            for axis in 0..3 {
                let bit = 1 << axis;
                if a & bit != 0 {
                    continue;
                }
                let b = a | bit;
                let (va, vb) = (values[a], values[b]);
                if (va < 0.0) != (vb < 0.0) {
                    let t = va / (va - vb);
                    sum += CORNERS[a].as_vec3().lerp(CORNERS[b].as_vec3(), t);
                    crossings += 1;
                }
            }
        }
        let local = if crossings > 0 { sum / crossings as f32 } else { Vec3::splat(0.5) };
        let position = self.grid.voxel_center(cell) + local * self.grid.voxel_size();

        let gradient: Vec3 = CORNERS
            .iter()
            .zip(values)
            .map(|(c, v)| (c.as_vec3() * 2.0 - Vec3::ONE) * v)
            .sum();
        let normal = if gradient.length_squared() > 1e-12 { gradient.normalize() } else { Vec3::Y };

        let origin = self.grid.origin();
        let uv = (Vec2::new(position.x, position.z) - Vec2::new(origin.x, origin.z)) / self.grid.world_bounds;
        MeshVertex {
            position: position.extend(1.0).to_array(),
            normal: normal.extend(0.0).to_array(),
            texcoord: [uv.x, uv.y, brush_id as f32, ownership],
        }
    }
}

/// Contour `voxels` of `grid` into at most `capacity` vertices
pub fn contour(grid: &LevelGrid, voxels: &[GpuVoxel], capacity: u32) -> ContourMesh {
    let field = Field { grid: *grid, voxels };
    let r = grid.resolution;
    let mut mesh = ContourMesh::default();

    // Edge axis, then the four cell offsets around it (subtracted from the sample)
    let edges: [(UVec3, [UVec3; 4]); 3] = [
        (UVec3::X, [UVec3::new(0, 1, 1), UVec3::new(0, 0, 1), UVec3::ZERO, UVec3::new(0, 1, 0)]),
        (UVec3::Y, [UVec3::new(1, 0, 1), UVec3::new(1, 0, 0), UVec3::ZERO, UVec3::new(0, 0, 1)]),
        (UVec3::Z, [UVec3::new(1, 1, 0), UVec3::new(0, 1, 0), UVec3::ZERO, UVec3::new(1, 0, 0)]),
    ];

    for z in 0..r {
        for y in 0..r {
            for x in 0..r {
                let s = UVec3::new(x, y, z);
                let d0 = field.sample(s);
                for (axis, offsets) in &edges {
                    let end = s + *axis;
                    // The edge and the four cells around it must be inside the level
                    let across = UVec3::ONE - *axis;
                    if end.max_element() >= r || s.cmplt(across).any() || (s + across).max_element() >= r {
                        continue;
                    }
                    let d1 = field.sample(end);
                    if (d0 < 0.0) == (d1 < 0.0) {
                        continue;
                    }

                    let base = mesh.counter.count;
                    mesh.counter.count += QUAD_VERTICES;
                    if base + QUAD_VERTICES > capacity {
                        mesh.counter.overflow = 1;
                        mesh.counter.dropped += 1;
                        continue;
                    }

                    let inside = if d0 < 0.0 { field.voxel(s) } else { field.voxel(end) };
                    let [c0, c1, c2, c3] =
                        offsets.map(|o| field.cell_vertex(s - o, inside.brush_id, inside.ownership));
                    let quad = if d0 < 0.0 { [c0, c1, c2, c0, c2, c3] } else { [c0, c2, c1, c0, c3, c2] };
                    mesh.vertices.extend_from_slice(&quad);
                }
            }
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::voxel::encode_distance;

    fn sphere_field(grid: &LevelGrid, radius: f32) -> Vec<GpuVoxel> {
        let r = grid.resolution;
        let mut voxels = vec![GpuVoxel::UNCLAIMED; grid.voxel_count() as usize];
        for z in 0..r {
            for y in 0..r {
                for x in 0..r {
                    let p = grid.voxel_center(UVec3::new(x, y, z));
                    let d = p.length() - radius;
                    voxels[grid.index(x, y, z)] = GpuVoxel {
                        distance: encode_distance(d),
                        ownership: 1.0,
                        brush_id: 3,
                        _pad: 0,
                        normal_distance: p.normalize_or_zero().extend(d).to_array(),
                    };
                }
            }
        }
        voxels
    }

    #[test]
    fn test_layouts() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 48);
        assert_eq!(std::mem::size_of::<DrawArgs>(), 16);
        assert_eq!(std::mem::size_of::<MeshCounter>(), 16);
        assert_eq!(std::mem::size_of::<MeshParams>(), 16);
    }

    #[test]
    fn test_capacity_is_whole_quads() {
        let cap = vertex_capacity(128 * 128 * 128, 0.75, u64::MAX);
        assert_eq!(cap % QUAD_VERTICES, 0);
        assert!(cap <= (128.0f64.powi(3) * 0.75) as u32);
        assert_eq!(vertex_capacity(1, 0.75, u64::MAX), QUAD_VERTICES);
        // 10 vertices fit, one quad does
        assert_eq!(vertex_capacity(1000, 1.0, 48 * 10), 6);
    }

    #[test]
    fn test_valid_count_clamps_to_whole_triangles() {
        assert_eq!(valid_vertex_count(12, 100), 12);
        assert_eq!(valid_vertex_count(120, 100), 99);
        assert_eq!(valid_vertex_count(0, 100), 0);
        assert_eq!(DrawArgs::from_counter(7, 100).vertex_count, 6);
        assert_eq!(DrawArgs::from_counter(7, 100).instance_count, 1);
    }

    #[test]
    fn test_sphere_surface() {
        let grid = LevelGrid::new(16, 16.0);
        let voxels = sphere_field(&grid, 4.3);
        let mesh = contour(&grid, &voxels, 1 << 20);

        assert!(!mesh.overflowed());
        assert!(!mesh.vertices.is_empty());
        assert_eq!(mesh.vertices.len() as u32, mesh.counter.count);
        assert_eq!(mesh.vertices.len() % 6, 0);
        assert_eq!(mesh.draw_args(1 << 20).vertex_count, mesh.counter.count);

        for v in &mesh.vertices {
            let p = v.position();
            assert!((p.length() - 4.3).abs() < 0.5, "{:?}", p);
            assert!(v.normal().dot(p.normalize()) > 0.8);
            assert_eq!(v.brush_id(), 3);
        }

        let facing_out = mesh
            .vertices
            .chunks_exact(3)
            .filter(|t| {
                let [a, b, c] = [t[0].position(), t[1].position(), t[2].position()];
                (b - a).cross(c - a).dot(a + b + c) > 0.0
            })
            .count();
        assert!(facing_out * 100 >= (mesh.vertices.len() / 3) * 95, "{}", facing_out);
    }

    #[test]
    fn test_overflow_drops_whole_quads() {
        let grid = LevelGrid::new(16, 16.0);
        let voxels = sphere_field(&grid, 4.3);
        let full = contour(&grid, &voxels, 1 << 20);
        let clipped = contour(&grid, &voxels, 12);

        assert!(clipped.overflowed());
        assert_eq!(clipped.vertices.len(), 12);
        assert_eq!(clipped.counter.count, full.counter.count);
        assert_eq!(clipped.counter.dropped, full.counter.count / 6 - 2);
        assert_eq!(clipped.draw_args(12).vertex_count, 12);
        assert_eq!(&clipped.vertices[..], &full.vertices[..12]);
    }

    #[test]
    fn test_unclaimed_field_is_empty() {
        let grid = LevelGrid::new(8, 8.0);
        let voxels = vec![GpuVoxel::UNCLAIMED; grid.voxel_count() as usize];
        let mesh = contour(&grid, &voxels, 600);
        assert!(mesh.vertices.is_empty());
        assert_eq!(mesh.counter, MeshCounter::default());
    }
}
