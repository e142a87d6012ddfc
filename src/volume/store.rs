//! Volume resources: voxel buffers per level, brush SDF textures and the
//! coarse world mips.
//!
//! Every level gets three canonical buffers, one per frame slot, and a
//! scratch pair the propagator ping-pongs between. Each geometry slot gets a
//! pair of 3D textures so a re-bake never overwrites the texture the current
//! frame samples.

use crate::brush::bake::SdfGrid;
use crate::brush::registry::GeometrySlot;
use crate::core::config::{EngineConfig, LEVEL_COUNT};
use crate::core::error::Error;
use crate::gpu::context::GpuContext;
use crate::gpu::layout::{storage_buffer, uniform_buffer};
use crate::gpu::plan::{Component, FramePlan, ResourceId};
use crate::gpu::table::GpuTable;
use crate::volume::tier::{TierEstimate, TierSelector};
use crate::volume::voxel::LevelGrid;

/// Format of brush textures and world mips
pub const SDF_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Buffers of one voxel level
pub struct LevelBuffers {
    pub grid: LevelGrid,
    /// Indexed by frame slot
    pub canonical: [wgpu::Buffer; 3],
    pub canonical_ids: [ResourceId; 3],
    pub scratch: [wgpu::Buffer; 2],
    pub scratch_ids: [ResourceId; 2],
    pub params: wgpu::Buffer,
}

/// One 3D SDF texture
pub struct VolumeTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub resolution: u32,
    pub resource: ResourceId,
}

/// World SDF mip built by collapsing the coarsest level
pub struct WorldMip {
    pub volume: VolumeTexture,
    /// Reduction factor relative to the coarsest level
    pub factor: u32,
}

/// Owner of every voxel buffer and SDF texture
pub struct VolumeStore {
    estimate: TierEstimate,
    selector: TierSelector,
    levels: Vec<LevelBuffers>,
    brush_textures: Vec<VolumeTexture>,
    world_mips: Vec<WorldMip>,
    /// Textures written through the queue since the last recorded plan
    pending_uploads: Vec<ResourceId>,
}

fn create_volume_texture(
    ctx: &GpuContext,
    table: &mut GpuTable,
    label: &str,
    resolution: u32,
    usage: wgpu::TextureUsages,
) -> VolumeTexture {
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: resolution,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: SDF_FORMAT,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let resource = table.add_texture(label);
    VolumeTexture { texture, view, resolution, resource }
}

/// Bytes of the brush texture pairs backing `geometries`
pub fn brush_texture_bytes(geometries: &[GeometrySlot]) -> u64 {
    geometries.iter().map(|g| 2 * g.cell_count() as u64 * 4).sum()
}

impl VolumeStore {
    /// Pick a tier and allocate everything. Brush grids are uploaded into
    /// both textures of their pair.
    pub fn new(
        ctx: &GpuContext,
        table: &mut GpuTable,
        config: &EngineConfig,
        geometries: &[GeometrySlot],
    ) -> Result<Self, Error> {
        let mut selector = TierSelector::new();
        let estimate = selector.set_voxel_grid_size(
            config,
            config.memory_budget_mb * 1024 * 1024,
            ctx.max_storage_allocation(),
            brush_texture_bytes(geometries),
        )?;

        let usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let levels = estimate
            .levels
            .iter()
            .enumerate()
            .map(|(i, grid)| {
                let size = grid.buffer_size();
                let canonical: [wgpu::Buffer; 3] = std::array::from_fn(|slot| {
                    storage_buffer(&ctx.device, &format!("voxels_l{}_frame{}", i + 1, slot), size, usage)
                });
                let scratch: [wgpu::Buffer; 2] = std::array::from_fn(|s| {
                    storage_buffer(&ctx.device, &format!("voxels_l{}_scratch{}", i + 1, s), size, usage)
                });
                let canonical_ids = std::array::from_fn(|slot| {
                    table.add_buffer(&format!("voxels_l{}_frame{}", i + 1, slot), &canonical[slot])
                });
                let scratch_ids = std::array::from_fn(|s| {
                    table.add_buffer(&format!("voxels_l{}_scratch{}", i + 1, s), &scratch[s])
                });
                let params = uniform_buffer(&ctx.device, &ctx.queue, &format!("level_params_l{}", i + 1), &grid.params());
                LevelBuffers { grid: *grid, canonical, canonical_ids, scratch, scratch_ids, params }
            })
            .collect();

        let mut store = Self {
            estimate,
            selector,
            levels,
            brush_textures: Vec::with_capacity(geometries.len() * 2),
            world_mips: Vec::new(),
            pending_uploads: Vec::new(),
        };

        for (slot, geometry) in geometries.iter().enumerate() {
            for (side, &texture_id) in geometry.textures.iter().enumerate() {
                debug_assert_eq!(texture_id as usize, store.brush_textures.len());
                let volume = create_volume_texture(
                    ctx,
                    table,
                    &format!("brush_sdf_{}_{}", slot, side),
                    geometry.resolution(),
                    wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                );
                store.brush_textures.push(volume);
                store.upload_brush_grid(ctx, texture_id, &geometry.grid)?;
            }
        }

        if config.collapse.enabled {
            let world = store.estimate.world().resolution;
            for factor in config.collapse.factors() {
                let resolution = (world / factor).max(1);
                let volume = create_volume_texture(
                    ctx,
                    table,
                    &format!("world_sdf_mip{}", factor),
                    resolution,
                    wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                );
                store.world_mips.push(WorldMip { volume, factor });
            }
        }

        log::info!("Volume store: {:?} tier, {} brush textures, {} world mips, {}MB estimated",
            store.estimate.tier, store.brush_textures.len(), store.world_mips.len(),
            store.estimate.total_bytes / 1024 / 1024);

        Ok(store)
    }

    /// Re-run tier selection against a new budget.
    ///
    /// The selector never raises the tier. Buffers stay at their current
    /// size; a `true` return means the owner must rebuild its resources
    /// (see `Dispatch::set_memory_budget`).
    pub fn set_voxel_grid_size(&mut self, config: &EngineConfig, budget_bytes: u64, max_buffer: u64) -> Result<bool, Error> {
        let fixed = self.brush_textures.iter().map(|t| (t.resolution as u64).pow(3) * 4).sum();
        let estimate = self.selector.set_voxel_grid_size(config, budget_bytes, max_buffer, fixed)?;
        let changed = estimate.tier != self.estimate.tier;
        if changed {
            log::warn!("Voxel tier lowered from {:?} to {:?}; volume resources need a rebuild", self.estimate.tier, estimate.tier);
        }
        Ok(changed)
    }

    /// Write a baked grid into one brush texture
    pub fn upload_brush_grid(&mut self, ctx: &GpuContext, texture_id: u32, grid: &SdfGrid) -> Result<(), Error> {
        let target = self
            .brush_textures
            .get(texture_id as usize)
            .ok_or_else(|| Error::Brush(format!("no brush texture {}", texture_id)))?;
        if target.resolution != grid.resolution {
            return Err(Error::Brush(format!(
                "grid is {}^3 but texture {} is {}^3",
                grid.resolution, texture_id, target.resolution
            )));
        }

        let res = grid.resolution;
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&grid.data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(res * 4),
                rows_per_image: Some(res),
            },
            wgpu::Extent3d {
                width: res,
                height: res,
                depth_or_array_layers: res,
            },
        );
        if !self.pending_uploads.contains(&target.resource) {
            self.pending_uploads.push(target.resource);
        }
        Ok(())
    }

    /// Record the texture uploads issued since the last frame
    pub fn plan(&mut self, plan: &mut FramePlan) {
        for resource in self.pending_uploads.drain(..) {
            plan.host_write(Component::VolumeStore, resource);
        }
    }

    pub fn estimate(&self) -> &TierEstimate {
        &self.estimate
    }

    pub fn level(&self, index: usize) -> &LevelBuffers {
        &self.levels[index.min(LEVEL_COUNT - 1)]
    }

    pub fn levels(&self) -> &[LevelBuffers] {
        &self.levels
    }

    pub fn brush_textures(&self) -> &[VolumeTexture] {
        &self.brush_textures
    }

    pub fn brush_texture(&self, id: u32) -> Option<&VolumeTexture> {
        self.brush_textures.get(id as usize)
    }

    pub fn world_mips(&self) -> &[WorldMip] {
        &self.world_mips
    }

    /// Bytes of every canonical and scratch voxel buffer
    pub fn voxel_bytes(&self) -> u64 {
        self.levels.iter().map(|l| l.grid.buffer_size() * 5).sum()
    }
}
