//! Brush registry: builds brushes from scene sources, keeps their GPU mirror
//! current through partial buffer writes.

use std::sync::Arc;

use glam::Mat4;

use crate::brush::bake::{bake_mesh, bake_shape, SdfGrid};
use crate::brush::brush::{Brush, BrushGeometry, BrushKind, BrushSource, DirtyState, GpuBrush, Transform};
use crate::core::error::Error;
use crate::gpu::context::GpuContext;
use crate::gpu::plan::{Component, FramePlan, ResourceId};
use crate::gpu::table::GpuTable;

/// Matrix entries closer than this count as unchanged
const MATRIX_EPSILON: f32 = 1e-6;

/// One distinct brush geometry and its baked grid
#[derive(Clone, Debug)]
pub struct GeometrySlot {
    pub geometry: Arc<BrushGeometry>,
    pub grid: SdfGrid,
    /// Texture ids of the pair backing this geometry
    pub textures: [u32; 2],
    /// Index into `textures` currently read by kernels
    pub active_texture: usize,
}

impl GeometrySlot {
    pub fn resolution(&self) -> u32 {
        self.grid.resolution
    }

    pub fn cell_count(&self) -> u32 {
        self.grid.resolution.pow(3)
    }
}

/// Brushes, geometry slots and vertex pool built at setup
#[derive(Clone, Debug)]
pub struct BrushLayout {
    pub brushes: Vec<Brush>,
    pub geometries: Vec<GeometrySlot>,
    /// De-indexed triangle vertices of every mesh geometry (w = 1)
    pub vertex_pool: Vec<[f32; 4]>,
    /// Total density cells over all geometries
    pub density_cells: u32,
}

/// Targeted write into the brush buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrushPatch {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Build one brush per source, sharing geometry slots between sources whose
/// geometry is the same `Arc`
pub fn create_brushes(sources: &[BrushSource], default_resolution: u32) -> Result<BrushLayout, Error> {
    let mut geometries: Vec<GeometrySlot> = Vec::new();
    let mut geometry_vertices: Vec<(u32, u32)> = Vec::new();
    let mut density_offsets: Vec<u32> = Vec::new();
    let mut vertex_pool: Vec<[f32; 4]> = Vec::new();
    let mut density_cells = 0u32;
    let mut brushes = Vec::with_capacity(sources.len());

    for (id, source) in sources.iter().enumerate() {
        let slot = match geometries.iter().position(|g| Arc::ptr_eq(&g.geometry, &source.geometry)) {
            Some(slot) => slot,
            None => {
                let resolution = source.resolution.unwrap_or(default_resolution).max(2);
                let grid = match source.geometry.as_ref() {
                    BrushGeometry::Mesh(mesh) => bake_mesh(mesh, resolution)?,
                    BrushGeometry::Analytic(shape) => bake_shape(shape, resolution),
                };

                let vertex_offset = vertex_pool.len() as u32;
                if let BrushGeometry::Mesh(mesh) = source.geometry.as_ref() {
                    for tri in mesh.normalized_triangles()? {
                        vertex_pool.extend(tri.iter().map(|v| v.extend(1.0).to_array()));
                    }
                }
                geometry_vertices.push((vertex_offset, vertex_pool.len() as u32 - vertex_offset));

                let slot = geometries.len();
                density_offsets.push(density_cells);
                density_cells += resolution.pow(3);
                geometries.push(GeometrySlot {
                    geometry: source.geometry.clone(),
                    grid,
                    textures: [2 * slot as u32, 2 * slot as u32 + 1],
                    active_texture: 0,
                });
                slot
            }
        };

        let geometry = &geometries[slot];
        let (vertex_offset, vertex_count) = geometry_vertices[slot];
        let mut brush = Brush {
            id: id as u32,
            kind: source.geometry.kind(),
            vertex_count,
            vertex_offset,
            geometry_slot: slot as u32,
            textures: geometry.textures,
            active_texture: geometry.active_texture,
            resolution: geometry.resolution(),
            density_offset: density_offsets[slot],
            world_size: source.world_size,
            model: Mat4::IDENTITY,
            inv_model: Mat4::IDENTITY,
            aabb: Default::default(),
            center: Default::default(),
            dirty: DirtyState::NeedsUpdate,
            stiffness: source.stiffness,
            blend_radius: source.blend_radius,
            smoothness: source.smoothness,
            op: source.op,
        };
        brush.set_model(source.transform.brush_matrix(source.world_size));
        brushes.push(brush);
    }

    log::info!("Created {} brushes over {} geometries ({} pooled vertices, {} density cells)",
        brushes.len(), geometries.len(), vertex_pool.len(), density_cells);

    Ok(BrushLayout { brushes, geometries, vertex_pool, density_cells })
}

fn patch_of(index: usize, gpu: &GpuBrush, range: std::ops::Range<usize>) -> BrushPatch {
    let stride = std::mem::size_of::<GpuBrush>();
    BrushPatch {
        offset: (index * stride + range.start) as u64,
        bytes: bytemuck::bytes_of(gpu)[range].to_vec(),
    }
}

/// Recompute model matrices from `transforms` and return the writes that
/// bring the GPU copy up to date.
///
/// Changed brushes become `NeedsUpdate` and get their transform block and
/// dirty flag patched. Brushes that were `NeedsUpdate` and did not move go
/// back to `Clean` with only the flag patched. Inactive brushes are skipped.
pub fn compute_patches(brushes: &mut [Brush], transforms: &[Transform]) -> Vec<BrushPatch> {
    if transforms.len() != brushes.len() {
        log::warn!("brush update with {} transforms for {} brushes", transforms.len(), brushes.len());
    }

    let mut patches = Vec::new();
    for (index, (brush, transform)) in brushes.iter_mut().zip(transforms).enumerate() {
        if brush.dirty == DirtyState::Inactive {
            continue;
        }
        let model = transform.brush_matrix(brush.world_size);
        if !model.abs_diff_eq(brush.model, MATRIX_EPSILON) {
            brush.set_model(model);
            brush.dirty = DirtyState::NeedsUpdate;
            let gpu = brush.to_gpu();
            patches.push(patch_of(index, &gpu, GpuBrush::TRANSFORM_BYTES));
            patches.push(patch_of(index, &gpu, GpuBrush::DIRTY_BYTES));
        } else if brush.dirty == DirtyState::NeedsUpdate {
            brush.dirty = DirtyState::Clean;
            patches.push(patch_of(index, &brush.to_gpu(), GpuBrush::DIRTY_BYTES));
        }
    }
    patches
}

/// Owner of the brush buffer and vertex pool
pub struct BrushRegistry {
    layout: BrushLayout,
    buffer: wgpu::Buffer,
    vertex_pool: wgpu::Buffer,
    resource: ResourceId,
    /// Patches written since the last recorded plan
    pending_writes: bool,
}

impl BrushRegistry {
    /// Upload the full brush array once
    pub fn new(ctx: &GpuContext, table: &mut GpuTable, layout: BrushLayout) -> Self {
        let gpu: Vec<GpuBrush> = layout.brushes.iter().map(Brush::to_gpu).collect();
        let buffer = crate::gpu::layout::storage_buffer(
            &ctx.device,
            "brush_buffer",
            (gpu.len() * std::mem::size_of::<GpuBrush>()) as u64,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        );
        if !gpu.is_empty() {
            ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&gpu));
        }

        let vertex_pool = crate::gpu::layout::storage_buffer(
            &ctx.device,
            "brush_vertex_pool",
            (layout.vertex_pool.len() * 16) as u64,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::VERTEX,
        );
        if !layout.vertex_pool.is_empty() {
            ctx.queue.write_buffer(&vertex_pool, 0, bytemuck::cast_slice(&layout.vertex_pool));
        }

        let resource = table.add_buffer("brush_buffer", &buffer);
        Self { layout, buffer, vertex_pool, resource, pending_writes: true }
    }

    /// Push changed transforms to the GPU; returns the number of moved brushes
    pub fn update_brushes_on_gpu(&mut self, ctx: &GpuContext, transforms: &[Transform]) -> usize {
        let patches = compute_patches(&mut self.layout.brushes, transforms);
        let moved = patches.iter().filter(|p| p.bytes.len() > 4).count();
        for patch in &patches {
            ctx.queue.write_buffer(&self.buffer, patch.offset, &patch.bytes);
        }
        if !patches.is_empty() {
            self.pending_writes = true;
            log::trace!("brush update: {} moved, {} patches", moved, patches.len());
        }
        moved
    }

    /// Enable or disable a brush; inactive brushes are skipped by every kernel
    pub fn set_active(&mut self, ctx: &GpuContext, index: usize, active: bool) {
        let Some(brush) = self.layout.brushes.get_mut(index) else {
            log::warn!("set_active: no brush {}", index);
            return;
        };
        brush.dirty = if active { DirtyState::NeedsUpdate } else { DirtyState::Inactive };
        let patch = patch_of(index, &brush.to_gpu(), GpuBrush::DIRTY_BYTES);
        ctx.queue.write_buffer(&self.buffer, patch.offset, &patch.bytes);
        self.pending_writes = true;
    }

    /// Replace a geometry's grid and flip its texture pair.
    ///
    /// The caller uploads the new grid into the old write texture before the
    /// next frame; brushes sharing the geometry switch to it together.
    pub fn replace_geometry(&mut self, ctx: &GpuContext, slot: usize, grid: SdfGrid) -> Result<(), Error> {
        let geometry = self
            .layout
            .geometries
            .get_mut(slot)
            .ok_or_else(|| Error::Brush(format!("no geometry slot {}", slot)))?;
        if grid.resolution != geometry.grid.resolution {
            return Err(Error::Brush(format!(
                "replacement grid is {}^3, slot {} is {}^3",
                grid.resolution, slot, geometry.grid.resolution
            )));
        }
        geometry.grid = grid;
        geometry.active_texture = 1 - geometry.active_texture;
        let active = geometry.active_texture;

        for (index, brush) in self.layout.brushes.iter_mut().enumerate() {
            if brush.geometry_slot as usize != slot {
                continue;
            }
            brush.active_texture = active;
            let patch = patch_of(index, &brush.to_gpu(), GpuBrush::TEXTURE_BYTES);
            ctx.queue.write_buffer(&self.buffer, patch.offset, &patch.bytes);
        }
        self.pending_writes = true;
        Ok(())
    }

    /// Record the host writes issued since the last frame
    pub fn plan(&mut self, plan: &mut FramePlan) {
        if std::mem::take(&mut self.pending_writes) {
            plan.host_write(Component::BrushRegistry, self.resource);
        }
    }

    pub fn brushes(&self) -> &[Brush] {
        &self.layout.brushes
    }

    /// Current CPU state, enough to rebuild the registry elsewhere
    pub fn layout(&self) -> &BrushLayout {
        &self.layout
    }

    pub fn geometries(&self) -> &[GeometrySlot] {
        &self.layout.geometries
    }

    pub fn density_cells(&self) -> u32 {
        self.layout.density_cells
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn vertex_pool(&self) -> &wgpu::Buffer {
        &self.vertex_pool
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn count(&self) -> u32 {
        self.layout.brushes.len() as u32
    }

    pub fn mesh_brush_count(&self) -> usize {
        self.layout.brushes.iter().filter(|b| b.kind == BrushKind::Mesh).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::bake::tests::cube_mesh;
    use crate::brush::shape::Shape;
    use glam::Vec3;

    fn sources() -> Vec<BrushSource> {
        let sphere = Arc::new(BrushGeometry::Analytic(Shape::Sphere { radius: 0.8 }));
        let cube = Arc::new(BrushGeometry::Mesh(cube_mesh()));
        vec![
            BrushSource::new(sphere.clone(), Transform::default()),
            BrushSource::new(cube, Transform::from_position(Vec3::X)),
            BrushSource::new(sphere, Transform::from_position(Vec3::Y)),
        ]
    }

    fn transforms(layout: &BrushLayout) -> Vec<Transform> {
        layout
            .brushes
            .iter()
            .map(|b| Transform::from_position(b.center))
            .collect()
    }

    #[test]
    fn test_shared_geometry_shares_slot_and_textures() {
        let layout = create_brushes(&sources(), 8).unwrap();
        assert_eq!(layout.brushes.len(), 3);
        assert_eq!(layout.geometries.len(), 2);
        assert_eq!(layout.brushes[0].geometry_slot, layout.brushes[2].geometry_slot);
        assert_eq!(layout.brushes[0].textures, [0, 1]);
        assert_eq!(layout.brushes[1].textures, [2, 3]);
        assert_eq!(layout.density_cells, 2 * 8 * 8 * 8);
        assert_eq!(layout.brushes[1].density_offset, 512);
    }

    #[test]
    fn test_mesh_vertices_pooled() {
        let layout = create_brushes(&sources(), 8).unwrap();
        let cube = &layout.brushes[1];
        assert_eq!(cube.kind, BrushKind::Mesh);
        assert_eq!(cube.vertex_offset, 0);
        assert_eq!(cube.vertex_count, 36);
        assert_eq!(layout.vertex_pool.len(), 36);
        assert_eq!(layout.brushes[0].vertex_count, 0);
    }

    #[test]
    fn test_invalid_mesh_is_rejected() {
        let mut bad = cube_mesh();
        bad.indices.pop();
        let source = BrushSource::new(Arc::new(BrushGeometry::Mesh(bad)), Transform::default());
        assert!(create_brushes(&[source], 8).is_err());
    }

    #[test]
    fn test_unchanged_transforms_only_clear_dirty_flag() {
        let mut layout = create_brushes(&sources(), 8).unwrap();
        let t = transforms(&layout);

        let patches = compute_patches(&mut layout.brushes, &t);
        assert_eq!(patches.len(), 3);
        assert!(patches.iter().all(|p| p.bytes.len() == 4));
        assert!(layout.brushes.iter().all(|b| b.dirty == DirtyState::Clean));

        assert!(compute_patches(&mut layout.brushes, &t).is_empty());
    }

    #[test]
    fn test_moved_brush_patches_transform_and_flag() {
        let mut layout = create_brushes(&sources(), 8).unwrap();
        let mut t = transforms(&layout);
        compute_patches(&mut layout.brushes, &t);

        t[1].position += Vec3::new(0.0, 0.0, 2.0);
        let patches = compute_patches(&mut layout.brushes, &t);
        assert_eq!(patches.len(), 2);
        let stride = std::mem::size_of::<GpuBrush>() as u64;
        assert_eq!(patches[0].offset, stride);
        assert_eq!(patches[0].bytes.len(), GpuBrush::TRANSFORM_BYTES.len());
        assert_eq!(patches[1].offset, stride + GpuBrush::DIRTY_BYTES.start as u64);
        assert_eq!(layout.brushes[1].dirty, DirtyState::NeedsUpdate);

        let full = bytemuck::bytes_of(&layout.brushes[1].to_gpu()).to_vec();
        assert_eq!(&full[GpuBrush::TRANSFORM_BYTES], patches[0].bytes.as_slice());
    }

    #[test]
    fn test_inactive_brushes_never_patched() {
        let mut layout = create_brushes(&sources(), 8).unwrap();
        layout.brushes[0].dirty = DirtyState::Inactive;
        let mut t = transforms(&layout);
        t[0].position = Vec3::splat(10.0);
        let patches = compute_patches(&mut layout.brushes, &t);
        let stride = std::mem::size_of::<GpuBrush>() as u64;
        assert!(patches.iter().all(|p| p.offset >= stride));
    }

    #[test]
    fn test_registry_uploads_and_replaces_geometry() {
        let Some(ctx) = crate::gpu::context::test_support::context() else { return };
        let layout = create_brushes(&sources(), 8).unwrap();
        let mut table = GpuTable::new();
        let mut registry = BrushRegistry::new(&ctx, &mut table, layout);

        let mut plan = FramePlan::new();
        registry.plan(&mut plan);
        assert_eq!(plan.len(), 1);
        let mut plan = FramePlan::new();
        registry.plan(&mut plan);
        assert!(plan.is_empty());

        let grid = bake_shape(&Shape::Sphere { radius: 0.3 }, 8);
        registry.replace_geometry(&ctx, 0, grid).unwrap();
        assert_eq!(registry.brushes()[0].read_texture(), 1);
        assert_eq!(registry.brushes()[2].read_texture(), 1);
        assert_eq!(registry.brushes()[1].read_texture(), 2);

        let wrong = bake_shape(&Shape::Sphere { radius: 0.3 }, 4);
        assert!(registry.replace_geometry(&ctx, 0, wrong).is_err());

        let gpu: Vec<GpuBrush> = crate::gpu::readback::read_pod_blocking(&ctx, registry.buffer(), 3).unwrap();
        assert_eq!(gpu[0].texture_read, 1);
        assert_eq!(gpu[1].id, 1);
    }
}
