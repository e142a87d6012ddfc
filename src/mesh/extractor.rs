//! GPU dual contouring into the shared vertex soup.
//!
//! Per frame: clear the counter, contour the mid-resolution level of the
//! current frame slot, then patch the indirect draw record from the counter.
//! Both outputs are handed to the external draw with the vertex-input and
//! indirect-read scopes.

use crate::core::config::EngineConfig;
use crate::core::error::Error;
use crate::gpu::context::GpuContext;
use crate::gpu::layout::{compute_pipeline, groups, storage_buffer, storage_entry, uniform_buffer, uniform_entry};
use crate::gpu::plan::{Access, Barrier, BindingId, Component, DispatchOp, FramePlan, KernelId, ResourceId, Stage};
use crate::gpu::readback::read_pod_blocking;
use crate::gpu::shaders;
use crate::gpu::table::GpuTable;
use crate::mesh::contour::{vertex_capacity, DrawArgs, MeshCounter, MeshParams, MeshVertex};
use crate::volume::store::VolumeStore;

/// Level the surface is extracted from
pub const MESH_LEVEL: usize = 1;

const VOXEL_WORKGROUP: u32 = 4;

pub struct MeshExtractor {
    contour: KernelId,
    finalize: KernelId,
    /// Indexed by frame slot
    contour_bindings: [BindingId; 3],
    finalize_binding: BindingId,
    vertices: wgpu::Buffer,
    vertices_id: ResourceId,
    args: wgpu::Buffer,
    args_id: ResourceId,
    counter: wgpu::Buffer,
    counter_id: ResourceId,
    level: [ResourceId; 3],
    capacity: u32,
    workgroups: [u32; 3],
    _params: wgpu::Buffer,
}

impl MeshExtractor {
    pub fn new(ctx: &GpuContext, table: &mut GpuTable, config: &EngineConfig, store: &VolumeStore) -> Self {
        let device = &ctx.device;
        let level = store.level(MESH_LEVEL);
        let capacity = vertex_capacity(
            level.grid.voxel_count(),
            config.mesh_vertices_per_voxel,
            ctx.max_storage_allocation(),
        );

        let contour_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("dual_contour_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });
        let finalize_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("finalize_draw_layout"),
            entries: &[uniform_entry(0, false), storage_entry(1, true), storage_entry(2, false)],
        });

        let contour = table.add_kernel(
            "dual_contour",
            compute_pipeline(
                device,
                "dual_contour",
                &[shaders::VOXEL_COMMON, shaders::DUAL_CONTOUR],
                "contour",
                &contour_bgl,
            ),
        );
        let finalize = table.add_kernel(
            "finalize_draw",
            compute_pipeline(device, "finalize_draw", &[shaders::FINALIZE_DRAW], "finalize", &finalize_bgl),
        );

        let params = uniform_buffer(device, &ctx.queue, "mesh_params", &MeshParams { capacity, _pad: [0; 3] });
        let vertices = storage_buffer(
            device,
            "mesh_vertices",
            capacity as u64 * std::mem::size_of::<MeshVertex>() as u64,
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_SRC,
        );
        let args = storage_buffer(
            device,
            "mesh_draw_args",
            std::mem::size_of::<DrawArgs>() as u64,
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_SRC,
        );
        let counter = storage_buffer(
            device,
            "mesh_counter",
            std::mem::size_of::<MeshCounter>() as u64,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let vertices_id = table.add_buffer("mesh_vertices", &vertices);
        let args_id = table.add_buffer("mesh_draw_args", &args);
        let counter_id = table.add_buffer("mesh_counter", &counter);

        let contour_bindings = std::array::from_fn(|slot| {
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("dual_contour"),
                layout: &contour_bgl,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: level.params.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: params.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: level.canonical[slot].as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: vertices.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 4, resource: counter.as_entire_binding() },
                ],
            });
            table.add_binding(group)
        });
        let finalize_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("finalize_draw"),
            layout: &finalize_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: counter.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: args.as_entire_binding() },
            ],
        });
        let finalize_binding = table.add_binding(finalize_group);

        log::info!("Mesh extractor: {} vertex capacity ({:.1} MB) over a {}^3 level",
            capacity,
            capacity as f64 * std::mem::size_of::<MeshVertex>() as f64 / (1024.0 * 1024.0),
            level.grid.resolution);

        let g = groups(level.grid.resolution, VOXEL_WORKGROUP);
        Self {
            contour,
            finalize,
            contour_bindings,
            finalize_binding,
            vertices,
            vertices_id,
            args,
            args_id,
            counter,
            counter_id,
            level: level.canonical_ids,
            capacity,
            workgroups: [g; 3],
            _params: params,
        }
    }

    /// Record extraction from frame slot `slot` and hand the outputs to the
    /// draw. The level's canonical buffer for `slot` must be visible.
    pub fn plan(&self, plan: &mut FramePlan, slot: usize) {
        let component = Component::MeshExtractor;
        let slot = slot % 3;

        plan.clear(component, self.counter_id);
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE);

        plan.dispatch(
            DispatchOp::new(component, "dual_contour", self.contour, self.contour_bindings[slot], self.workgroups)
                .reads(&[self.level[slot], self.counter_id])
                .writes(&[self.vertices_id, self.counter_id]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);

        plan.dispatch(
            DispatchOp::new(component, "finalize_draw", self.finalize, self.finalize_binding, [1, 1, 1])
                .reads(&[self.counter_id])
                .writes(&[self.args_id]),
        );
        plan.barrier(Barrier::COMPUTE_TO_DRAW);

        plan.handoff(self.vertices_id, Stage::VERTEX_INPUT, Access::VERTEX_READ);
        plan.handoff(self.args_id, Stage::DRAW_INDIRECT, Access::INDIRECT_READ);
    }

    /// Vertex soup for the external draw
    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertices
    }

    /// Indirect draw record for the external draw
    pub fn draw_args_buffer(&self) -> &wgpu::Buffer {
        &self.args
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn read_draw_args(&self, ctx: &GpuContext) -> Result<DrawArgs, Error> {
        first(read_pod_blocking(ctx, &self.args, 1)?)
    }

    pub fn read_counter(&self, ctx: &GpuContext) -> Result<MeshCounter, Error> {
        first(read_pod_blocking(ctx, &self.counter, 1)?)
    }

    /// Blocking copy of the first `count` vertices
    pub fn read_vertices(&self, ctx: &GpuContext, count: u32) -> Result<Vec<MeshVertex>, Error> {
        read_pod_blocking(ctx, &self.vertices, count.min(self.capacity) as usize)
    }
}

fn first<T>(values: Vec<T>) -> Result<T, Error> {
    values
        .into_iter()
        .next()
        .ok_or_else(|| Error::Gpu("empty readback".into()))
}
