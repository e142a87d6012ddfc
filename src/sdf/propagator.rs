//! GPU signed distance propagation.
//!
//! Every frame each level is rebuilt from scratch in its first scratch
//! buffer: clear to unclaimed, rasterize the brushes binned into each
//! voxel's tile, smooth from a copied snapshot, then run directional sweeps
//! that carry distances
//! into unclaimed space. The result is copied into the level's canonical
//! buffer for the current frame slot. After the coarsest level the world
//! mips are collapsed from it.

use crate::brush::brush::{Brush, BrushOp, DirtyState};
use crate::brush::registry::BrushRegistry;
use crate::core::config::EngineConfig;
use crate::gpu::context::GpuContext;
use crate::gpu::layout::{
    compute_pipeline, dynamic_binding, dynamic_uniform_buffer, groups, storage_entry, storage_texture_3d_entry,
    texture_3d_entry, uniform_buffer, uniform_entry, DYNAMIC_STRIDE,
};
use crate::gpu::plan::{Barrier, BindingId, Component, DispatchOp, FramePlan, KernelId, ResourceId};
use crate::gpu::shaders;
use crate::gpu::table::GpuTable;
use crate::tile::binner::TileBinner;
use crate::volume::store::{VolumeStore, SDF_FORMAT};

/// Voxel kernels run 4x4x4 workgroups
const VOXEL_WORKGROUP: u32 = 4;

/// Ownership kept per voxel step away from the writing brush
pub const OWNERSHIP_DECAY: f32 = 0.9;

/// Per-dispatch uniform of the brush write kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq, Eq)]
pub struct BrushPass {
    pub geometry: u32,
    pub phase: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq)]
pub struct SweepParams {
    pub direction: u32,
    pub decay: f32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq)]
pub struct CollapseParams {
    pub factor: u32,
    pub resolution: u32,
    pub _pad: u32,
    /// Value of texels with no claimed voxel
    pub far: f32,
}

/// Write phase of an opcode: additive brushes first, carving brushes second
pub fn write_phase(op: BrushOp) -> u32 {
    match op {
        BrushOp::Union | BrushOp::SmoothUnion => 0,
        BrushOp::Subtract | BrushOp::Intersect => 1,
    }
}

/// (phase, geometry) pairs with at least one active brush, in execution order
pub fn write_passes(brushes: &[Brush]) -> Vec<BrushPass> {
    let mut passes: Vec<(u32, u32)> = brushes
        .iter()
        .filter(|b| b.dirty != DirtyState::Inactive)
        .map(|b| (write_phase(b.op), b.geometry_slot))
        .collect();
    passes.sort_unstable();
    passes.dedup();
    passes
        .into_iter()
        .map(|(phase, geometry)| BrushPass { geometry, phase, _pad: [0; 2] })
        .collect()
}

/// Dynamic offset of a pass entry in the pass uniform buffer
fn pass_offset(pass: &BrushPass) -> u32 {
    (pass.geometry * 2 + pass.phase) * DYNAMIC_STRIDE
}

/// Kernel bindings of one level
struct LevelBindings {
    clear: BindingId,
    /// Indexed by geometry slot, then texture side
    write: Vec<[BindingId; 2]>,
    /// scratch0 -> scratch1, scratch1 -> scratch0
    smooth: [BindingId; 2],
    sweep: [BindingId; 2],
    workgroups: [u32; 3],
    canonical: [ResourceId; 3],
    scratch: [ResourceId; 2],
}

struct MipBindings {
    /// Indexed by frame slot
    bindings: [BindingId; 3],
    target: ResourceId,
    workgroups: [u32; 3],
}

/// Recorder of the per-level propagation and world mip collapse
pub struct Propagator {
    clear: KernelId,
    write: KernelId,
    smooth: KernelId,
    sweep: KernelId,
    collapse: KernelId,
    levels: Vec<LevelBindings>,
    mips: Vec<MipBindings>,
    /// Texture resources by geometry slot and side
    textures: Vec<[ResourceId; 2]>,
    brush_buffer: ResourceId,
    brush_tiles: ResourceId,
    brush_indices: ResourceId,
    smoothing_passes: u32,
    sweep_iterations: u32,
    _pass_params: wgpu::Buffer,
    _sweep_params: wgpu::Buffer,
    _collapse_params: Vec<wgpu::Buffer>,
}

impl Propagator {
    pub fn new(
        ctx: &GpuContext,
        table: &mut GpuTable,
        config: &EngineConfig,
        store: &VolumeStore,
        registry: &BrushRegistry,
        binner: &TileBinner,
    ) -> Self {
        let device = &ctx.device;

        let clear_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxel_clear_layout"),
            entries: &[uniform_entry(0, false), storage_entry(1, false)],
        });
        let write_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("brush_write_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                uniform_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, true),
                texture_3d_entry(7),
            ],
        });
        let smooth_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxel_smooth_layout"),
            entries: &[uniform_entry(0, false), storage_entry(1, true), storage_entry(2, false)],
        });
        let sweep_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxel_sweep_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let collapse_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("world_collapse_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                storage_entry(2, true),
                storage_texture_3d_entry(3, SDF_FORMAT),
            ],
        });

        let voxel = shaders::VOXEL_COMMON;
        let clear = table.add_kernel(
            "voxel_clear",
            compute_pipeline(device, "voxel_clear", &[voxel, shaders::VOXEL_CLEAR], "clear", &clear_bgl),
        );
        let write = table.add_kernel(
            "brush_write",
            compute_pipeline(
                device,
                "brush_write",
                &[voxel, shaders::BRUSH_COMMON, shaders::TILE_COMMON, shaders::BRUSH_WRITE],
                "write_brushes",
                &write_bgl,
            ),
        );
        let smooth = table.add_kernel(
            "voxel_smooth",
            compute_pipeline(device, "voxel_smooth", &[voxel, shaders::SMOOTH], "smooth_level", &smooth_bgl),
        );
        let sweep = table.add_kernel(
            "voxel_sweep",
            compute_pipeline(device, "voxel_sweep", &[voxel, shaders::SWEEP], "sweep_step", &sweep_bgl),
        );
        let collapse = table.add_kernel(
            "world_collapse",
            compute_pipeline(device, "world_collapse", &[voxel, shaders::COLLAPSE], "collapse_mip", &collapse_bgl),
        );

        let geometry_count = registry.geometries().len() as u32;
        let pass_entries: Vec<BrushPass> = (0..geometry_count.max(1))
            .flat_map(|geometry| (0..2).map(move |phase| BrushPass { geometry, phase, _pad: [0; 2] }))
            .collect();
        let pass_params = dynamic_uniform_buffer(device, &ctx.queue, "brush_pass_params", &pass_entries);
        let sweep_entries: Vec<SweepParams> = (0..8)
            .map(|direction| SweepParams { direction, decay: OWNERSHIP_DECAY, _pad: [0; 2] })
            .collect();
        let sweep_params = dynamic_uniform_buffer(device, &ctx.queue, "sweep_params", &sweep_entries);

        let textures: Vec<[ResourceId; 2]> = registry
            .geometries()
            .iter()
            .map(|g| g.textures.map(|t| store.brush_textures()[t as usize].resource))
            .collect();
        let bins = binner.brush_bins();

        let levels = store
            .levels()
            .iter()
            .map(|level| {
                let name = |kind: &str| format!("{}_l{}", kind, level.grid.resolution);
                let clear_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&name("voxel_clear")),
                    layout: &clear_bgl,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: level.params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: level.scratch[0].as_entire_binding() },
                    ],
                });

                let write_groups = registry
                    .geometries()
                    .iter()
                    .map(|g| {
                        g.textures.map(|t| {
                            let view = &store.brush_textures()[t as usize].view;
                            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                                label: Some(&name("brush_write")),
                                layout: &write_bgl,
                                entries: &[
                                    wgpu::BindGroupEntry { binding: 0, resource: level.params.as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 1, resource: binner.brush_params().as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 2, resource: dynamic_binding::<BrushPass>(&pass_params) },
                                    wgpu::BindGroupEntry { binding: 3, resource: level.scratch[0].as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 4, resource: registry.buffer().as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 5, resource: bins.tiles.as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 6, resource: bins.indices.as_entire_binding() },
                                    wgpu::BindGroupEntry { binding: 7, resource: wgpu::BindingResource::TextureView(view) },
                                ],
                            });
                            table.add_binding(group)
                        })
                    })
                    .collect();

                let ping_pong = |layout: &wgpu::BindGroupLayout, label: &str, uniform: Option<&wgpu::Buffer>| {
                    [(0usize, 1usize), (1, 0)].map(|(src, dst)| {
                        let mut entries = vec![wgpu::BindGroupEntry {
                            binding: 0,
                            resource: level.params.as_entire_binding(),
                        }];
                        if let Some(buffer) = uniform {
                            entries.push(wgpu::BindGroupEntry { binding: 1, resource: dynamic_binding::<SweepParams>(buffer) });
                        }
                        let base = entries.len() as u32;
                        entries.push(wgpu::BindGroupEntry { binding: base, resource: level.scratch[src].as_entire_binding() });
                        entries.push(wgpu::BindGroupEntry { binding: base + 1, resource: level.scratch[dst].as_entire_binding() });
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some(label),
                            layout,
                            entries: &entries,
                        })
                    })
                };
                let smooth_groups = ping_pong(&smooth_bgl, "voxel_smooth", None);
                let sweep_groups = ping_pong(&sweep_bgl, "voxel_sweep", Some(&sweep_params));

                let g = groups(level.grid.resolution, VOXEL_WORKGROUP);
                LevelBindings {
                    clear: table.add_binding(clear_group),
                    write: write_groups,
                    smooth: smooth_groups.map(|b| table.add_binding(b)),
                    sweep: sweep_groups.map(|b| table.add_binding(b)),
                    workgroups: [g; 3],
                    canonical: level.canonical_ids,
                    scratch: level.scratch_ids,
                }
            })
            .collect::<Vec<_>>();

        let world = store.level(store.levels().len() - 1);
        let mut collapse_params = Vec::with_capacity(store.world_mips().len());
        let mips = store
            .world_mips()
            .iter()
            .map(|mip| {
                let params = uniform_buffer(
                    device,
                    &ctx.queue,
                    &format!("collapse_params_mip{}", mip.factor),
                    &CollapseParams {
                        factor: mip.factor,
                        resolution: mip.volume.resolution,
                        _pad: 0,
                        far: world.grid.world_bounds * 2.0,
                    },
                );
                let bindings = std::array::from_fn(|slot| {
                    let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("world_collapse"),
                        layout: &collapse_bgl,
                        entries: &[
                            wgpu::BindGroupEntry { binding: 0, resource: world.params.as_entire_binding() },
                            wgpu::BindGroupEntry { binding: 1, resource: params.as_entire_binding() },
                            wgpu::BindGroupEntry { binding: 2, resource: world.canonical[slot].as_entire_binding() },
                            wgpu::BindGroupEntry {
                                binding: 3,
                                resource: wgpu::BindingResource::TextureView(&mip.volume.view),
                            },
                        ],
                    });
                    table.add_binding(group)
                });
                collapse_params.push(params);
                let g = groups(mip.volume.resolution, VOXEL_WORKGROUP);
                MipBindings { bindings, target: mip.volume.resource, workgroups: [g; 3] }
            })
            .collect();

        log::info!("SDF propagator: {} levels, {} geometries, {} smoothing passes, {} sweeps per level",
            levels.len(), geometry_count, config.smoothing_passes, config.sweep_iterations);

        Self {
            clear,
            write,
            smooth,
            sweep,
            collapse,
            levels,
            mips,
            textures,
            brush_buffer: registry.resource(),
            brush_tiles: bins.tiles_id,
            brush_indices: bins.indices_id,
            smoothing_passes: config.smoothing_passes,
            sweep_iterations: config.sweep_iterations,
            _pass_params: pass_params,
            _sweep_params: sweep_params,
            _collapse_params: collapse_params,
        }
    }

    fn plan_level(&self, plan: &mut FramePlan, level: &LevelBindings, slot: usize, registry: &BrushRegistry) {
        let component = Component::Propagator;
        let work = level.workgroups;
        let canonical = level.canonical[slot];

        plan.dispatch(
            DispatchOp::new(component, "voxel_clear", self.clear, level.clear, work).writes(&[level.scratch[0]]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);

        for pass in write_passes(registry.brushes()) {
            let g = pass.geometry as usize;
            let side = registry.geometries()[g].active_texture;
            plan.dispatch(
                DispatchOp::new(component, "brush_write", self.write, level.write[g][side], work)
                    .with_offset(pass_offset(&pass))
                    .reads(&[self.brush_buffer, self.brush_tiles, self.brush_indices, self.textures[g][side]])
                    .reads(&[level.scratch[0]])
                    .writes(&[level.scratch[0]]),
            );
            plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
        }

        // Smoothing reads a snapshot in the other scratch buffer and writes
        // back over the live one
        let mut current = 0;
        for _ in 0..self.smoothing_passes {
            let snapshot = 1 - current;
            plan.barrier(Barrier::COMPUTE_TO_TRANSFER.union(Barrier::TRANSFER_TO_TRANSFER));
            plan.copy(component, level.scratch[current], level.scratch[snapshot]);
            plan.barrier(Barrier::TRANSFER_TO_COMPUTE);
            plan.dispatch(
                DispatchOp::new(component, "voxel_smooth", self.smooth, level.smooth[snapshot], work)
                    .reads(&[level.scratch[snapshot]])
                    .writes(&[level.scratch[current]]),
            );
            plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
        }
        for i in 0..self.sweep_iterations {
            plan.dispatch(
                DispatchOp::new(component, "voxel_sweep", self.sweep, level.sweep[current], work)
                    .with_offset((i % 8) * DYNAMIC_STRIDE)
                    .reads(&[level.scratch[current]])
                    .writes(&[level.scratch[1 - current]]),
            );
            plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
            current = 1 - current;
        }

        plan.barrier(Barrier::COMPUTE_TO_TRANSFER);
        plan.copy(component, level.scratch[current], canonical);
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE.union(Barrier::TRANSFER_TO_TRANSFER));
    }

    /// Record propagation of every level into `slot`, then the mip collapse.
    ///
    /// Brush buffer writes and the brush tile sort must be visible.
    pub fn plan(&self, plan: &mut FramePlan, slot: usize, registry: &BrushRegistry) {
        let slot = slot % 3;
        for level in &self.levels {
            self.plan_level(plan, level, slot, registry);
        }

        let Some(world) = self.levels.last() else { return };
        if self.mips.is_empty() {
            return;
        }
        for mip in &self.mips {
            plan.dispatch(
                DispatchOp::new(Component::Propagator, "world_collapse", self.collapse, mip.bindings[slot], mip.workgroups)
                    .reads(&[world.canonical[slot]])
                    .writes(&[mip.target]),
            );
        }
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
    }

    pub fn sweep_iterations(&self) -> u32 {
        self.sweep_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::brush::{BrushGeometry, BrushSource, Transform};
    use crate::brush::registry::create_brushes;
    use crate::brush::shape::Shape;
    use crate::gpu::readback::read_pod_blocking;
    use crate::gpu::plan::Op;
    use crate::sim::quanta::QuantaField;
    use crate::sim::simulator::QuantaBuffers;
    use crate::tile::reference::TileGrid;
    use crate::volume::voxel::GpuVoxel;
    use glam::{UVec3, Vec3};
    use std::sync::Arc;

    fn sources() -> Vec<BrushSource> {
        let sphere = Arc::new(BrushGeometry::Analytic(Shape::Sphere { radius: 0.8 }));
        let cube = Arc::new(BrushGeometry::Analytic(Shape::Box { half_extents: Vec3::splat(0.5) }));
        vec![
            BrushSource::new(sphere.clone(), Transform::default()).with_world_size(6.0),
            BrushSource::new(cube, Transform::from_position(Vec3::X * 2.0)).with_op(BrushOp::Subtract),
            BrushSource::new(sphere, Transform::from_position(Vec3::Y * 4.0)).with_op(BrushOp::SmoothUnion),
        ]
    }

    #[test]
    fn test_passes_run_additive_phase_first() {
        let layout = create_brushes(&sources(), 8).unwrap();
        let passes = write_passes(&layout.brushes);
        let order: Vec<(u32, u32)> = passes.iter().map(|p| (p.phase, p.geometry)).collect();
        // Both spheres share geometry 0 and phase 0
        assert_eq!(order, vec![(0, 0), (1, 1)]);
        assert_eq!(pass_offset(&passes[1]), 3 * DYNAMIC_STRIDE);
    }

    #[test]
    fn test_inactive_brushes_get_no_pass() {
        let mut layout = create_brushes(&sources(), 8).unwrap();
        layout.brushes[1].dirty = DirtyState::Inactive;
        let passes = write_passes(&layout.brushes);
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].phase, 0);
        assert!(write_passes(&[]).is_empty());
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<BrushPass>(), 16);
        assert_eq!(std::mem::size_of::<SweepParams>(), 16);
        assert_eq!(std::mem::size_of::<CollapseParams>(), 16);
    }

    #[test]
    fn test_gpu_propagation_claims_sphere() {
        let Some(ctx) = crate::gpu::context::test_support::context() else { return };
        let mut config = EngineConfig::default();
        config.levels[0].resolution = 32;
        config.levels[1].resolution = 32;
        config.levels[2].resolution = 32;
        config.sweep_iterations = 16;
        config.smoothing_passes = 2;
        config.quanta_count = 1024;

        let mut table = GpuTable::new();
        let layout = create_brushes(&sources(), 16).unwrap();
        let mut registry = BrushRegistry::new(&ctx, &mut table, layout);
        let mut store = VolumeStore::new(&ctx, &mut table, &config, registry.geometries()).unwrap();
        let field = QuantaField::seeded([16, 16, 4], config.quanta_count);
        let quanta = QuantaBuffers::new(&ctx, &mut table, &field);
        let grid = TileGrid::new(store.estimate().world(), config.tile_size);
        let binner = TileBinner::new(&ctx, &mut table, grid, &registry, &quanta);
        let propagator = Propagator::new(&ctx, &mut table, &config, &store, &registry, &binner);

        let mut plan = FramePlan::new();
        registry.plan(&mut plan);
        store.plan(&mut plan);
        plan.barrier(Barrier::HOST_TO_GPU);
        binner.plan_brush_sort(&mut plan);
        propagator.plan(&mut plan, 1, &registry);
        assert!(crate::gpu::hazards::validate(&plan).is_empty());
        assert_eq!(plan.dispatch_labels().iter().filter(|l| **l == "world_collapse").count(), 3);

        // Each smoothing pass reads a fresh copy of the buffer it overwrites
        let ops: Vec<&Op> = plan.ops().iter().filter(|op| !matches!(op, Op::Barrier(_))).collect();
        let mut smooth_passes = 0;
        for (i, op) in ops.iter().enumerate() {
            let Op::Dispatch(d) = op else { continue };
            if d.label != "voxel_smooth" {
                continue;
            }
            smooth_passes += 1;
            let Op::Copy { src, dst, .. } = ops[i - 1] else { panic!("smoothing without a snapshot copy") };
            assert_eq!(d.reads, vec![*dst]);
            assert_eq!(d.writes, vec![*src]);
        }
        assert_eq!(smooth_passes, 2 * 3);

        ctx.submit_and_wait("propagation_test", |encoder| {
            crate::gpu::executor::record(&plan, &table, encoder);
        })
        .unwrap();

        let read_level = |index: usize| {
            let level = store.level(index);
            let voxels: Vec<GpuVoxel> =
                read_pod_blocking(&ctx, &level.canonical[1], level.grid.voxel_count() as usize).unwrap();
            (level.grid, voxels)
        };
        let at = |(grid, voxels): &(crate::volume::voxel::LevelGrid, Vec<GpuVoxel>), p: Vec3| {
            let c = ((p - grid.origin()) / grid.voxel_size()).floor().as_uvec3();
            voxels[grid.index(c.x, c.y, c.z)]
        };

        let fine = read_level(0);
        let center = at(&fine, Vec3::splat(0.1));
        assert!(center.distance().unwrap() < 0.0, "{:?}", center);
        assert_eq!(center.brush_id, 0);

        // Inside the sphere but carved by the subtract cube
        let carved = at(&fine, Vec3::new(2.1, 0.1, 0.1));
        assert!(carved.distance().unwrap() > 0.0, "{:?}", carved);

        // Outside every brush bound, reached by the sweeps
        let world = read_level(2);
        let outside = at(&world, Vec3::new(-5.5, 0.1, 0.1));
        let d = outside.distance().unwrap();
        assert!(d > 0.5 && d < 4.0, "{}", d);

        let claimed = world.1.iter().filter(|v| v.distance().is_some()).count();
        assert!(claimed > world.1.len() / 5, "{}", claimed);
        assert_eq!(world.1.len() as u32, UVec3::splat(32).element_product());
    }
}
