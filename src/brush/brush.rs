//! Brush data model and its GPU mirror

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

use crate::brush::bake::MeshGeometry;
use crate::brush::shape::Shape;
use crate::math::Aabb;

/// Source transform of a brush-bearing scene object
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, applied Z * Y * X
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Default::default() }
    }

    /// Model matrix mapping the local [-1, 1] cube onto a `world_size` cube
    pub fn brush_matrix(&self, world_size: f32) -> Mat4 {
        let rotation = Quat::from_rotation_z(self.rotation.z)
            * Quat::from_rotation_y(self.rotation.y)
            * Quat::from_rotation_x(self.rotation.x);
        Mat4::from_scale_rotation_translation(self.scale * (world_size * 0.5), rotation, self.position)
    }
}

/// How a brush combines with what is already in the volume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum BrushOp {
    #[default]
    Union = 0,
    Subtract = 1,
    Intersect = 2,
    /// Union blended over the brush's blend radius
    SmoothUnion = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BrushKind {
    Mesh = 0,
    Analytic = 1,
}

/// Whether the GPU copy of a brush is current
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum DirtyState {
    #[default]
    Clean = 0,
    NeedsUpdate = 1,
    /// Skipped by every kernel
    Inactive = 2,
}

/// Geometry a brush is baked from
#[derive(Clone, Debug, PartialEq)]
pub enum BrushGeometry {
    Mesh(MeshGeometry),
    Analytic(Shape),
}

impl BrushGeometry {
    pub fn kind(&self) -> BrushKind {
        match self {
            BrushGeometry::Mesh(_) => BrushKind::Mesh,
            BrushGeometry::Analytic(_) => BrushKind::Analytic,
        }
    }
}

/// One brush-bearing scene object as handed over by the host
///
/// Sources sharing the same `Arc` geometry share one pair of SDF textures.
#[derive(Clone, Debug)]
pub struct BrushSource {
    pub geometry: Arc<BrushGeometry>,
    pub transform: Transform,
    /// Edge length of the world cube the local volume maps onto
    pub world_size: f32,
    pub stiffness: f32,
    pub blend_radius: f32,
    pub smoothness: f32,
    pub op: BrushOp,
    /// Texture resolution override
    pub resolution: Option<u32>,
}

impl BrushSource {
    pub fn new(geometry: Arc<BrushGeometry>, transform: Transform) -> Self {
        Self {
            geometry,
            transform,
            world_size: 2.0,
            stiffness: 1.0,
            blend_radius: 0.0,
            smoothness: 0.0,
            op: BrushOp::Union,
            resolution: None,
        }
    }

    pub fn with_op(mut self, op: BrushOp) -> Self {
        self.op = op;
        self
    }

    pub fn with_world_size(mut self, world_size: f32) -> Self {
        self.world_size = world_size;
        self
    }

    pub fn with_blend(mut self, blend_radius: f32) -> Self {
        self.blend_radius = blend_radius;
        self
    }
}

/// CPU-side brush state
#[derive(Clone, Debug, PartialEq)]
pub struct Brush {
    pub id: u32,
    pub kind: BrushKind,
    /// Triangle vertices in the shared vertex pool
    pub vertex_count: u32,
    pub vertex_offset: u32,
    /// Geometry slot shared by brushes with the same source geometry
    pub geometry_slot: u32,
    /// Texture ids, alternated when the geometry is re-baked
    pub textures: [u32; 2],
    /// Index into `textures` of the one kernels read
    pub active_texture: usize,
    pub resolution: u32,
    /// Offset of this brush's density grid, in cells
    pub density_offset: u32,
    pub world_size: f32,
    pub model: Mat4,
    pub inv_model: Mat4,
    pub aabb: Aabb,
    pub center: Vec3,
    pub dirty: DirtyState,
    pub stiffness: f32,
    pub blend_radius: f32,
    pub smoothness: f32,
    pub op: BrushOp,
}

impl Brush {
    /// Texture the volume kernels sample
    pub fn read_texture(&self) -> u32 {
        self.textures[self.active_texture]
    }

    /// Texture the next re-bake uploads into
    pub fn write_texture(&self) -> u32 {
        self.textures[1 - self.active_texture]
    }

    /// Local distance to world distance factor (exact for uniform scale)
    pub fn distance_scale(&self) -> f32 {
        let axes = [
            self.model.x_axis.truncate().length(),
            self.model.y_axis.truncate().length(),
            self.model.z_axis.truncate().length(),
        ];
        axes.into_iter().fold(f32::MAX, f32::min)
    }

    /// Replace the model matrix and everything derived from it
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
        self.inv_model = model.inverse();
        self.aabb = Aabb::new(Vec3::splat(-1.0), Vec3::ONE)
            .transformed(&model)
            .inflated(self.blend_radius);
        self.center = model.transform_point3(Vec3::ZERO);
    }

    pub fn to_gpu(&self) -> GpuBrush {
        GpuBrush {
            model: self.model.to_cols_array_2d(),
            inv_model: self.inv_model.to_cols_array_2d(),
            aabb_min: self.aabb.min.extend(self.blend_radius).to_array(),
            aabb_max: self.aabb.max.extend(self.smoothness).to_array(),
            center: self.center.extend(self.stiffness).to_array(),
            kind: self.kind as u32,
            vertex_count: self.vertex_count,
            vertex_offset: self.vertex_offset,
            resolution: self.resolution,
            texture_read: self.read_texture(),
            texture_write: self.write_texture(),
            opcode: self.op as u32,
            id: self.id,
            distance_scale: self.distance_scale(),
            dirty: self.dirty as u32,
            geometry_slot: self.geometry_slot,
            density_offset: self.density_offset,
        }
    }
}

/// GPU brush record (224 bytes, std430 compatible)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuBrush {
    pub model: [[f32; 4]; 4],
    pub inv_model: [[f32; 4]; 4],
    /// xyz = world min, w = blend radius
    pub aabb_min: [f32; 4],
    /// xyz = world max, w = smoothness
    pub aabb_max: [f32; 4],
    /// xyz = world center, w = stiffness
    pub center: [f32; 4],
    pub kind: u32,
    pub vertex_count: u32,
    pub vertex_offset: u32,
    pub resolution: u32,
    pub texture_read: u32,
    pub texture_write: u32,
    pub opcode: u32,
    pub id: u32,
    pub distance_scale: f32,
    pub dirty: u32,
    pub geometry_slot: u32,
    pub density_offset: u32,
}

impl GpuBrush {
    /// Byte range holding the matrices, bounds and center
    pub const TRANSFORM_BYTES: std::ops::Range<usize> = 0..176;
    /// Byte range holding the two texture ids
    pub const TEXTURE_BYTES: std::ops::Range<usize> = 192..200;
    /// Byte range holding the dirty flag
    pub const DIRTY_BYTES: std::ops::Range<usize> = 212..216;
}
