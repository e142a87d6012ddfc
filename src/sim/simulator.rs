//! GPU quanta simulation.
//!
//! Quanta live in three buffers. Slots 0 and 1 alternate as step input and
//! output; slot 2 is the Read copy refreshed by [`Simulator::plan_copy_out_to_read`]
//! so readbacks never see a buffer the next step is writing. Deformation
//! state only needs the ping-pong pair.

use crate::brush::registry::BrushRegistry;
use crate::core::config::{EngineConfig, SimulationConfig};
use crate::core::error::Error;
use crate::core::frame::StepSlots;
use crate::gpu::context::GpuContext;
use crate::gpu::layout::{compute_pipeline, groups, storage_buffer, storage_entry, uniform_buffer, uniform_entry};
use crate::gpu::plan::{Barrier, BindingId, Component, DispatchOp, FramePlan, KernelId, ResourceId};
use crate::gpu::readback::{read_pod_async, read_pod_blocking, ReadbackGuard, ReadbackStatus};
use crate::gpu::shaders;
use crate::gpu::table::GpuTable;
use crate::sim::quanta::{Deformation, Quanta, QuantaField, SimParams};
use crate::tile::binner::TileBinner;
use crate::tile::reference::GpuTile;
use crate::volume::store::VolumeStore;

const QUANTA_WORKGROUP: u32 = 256;

/// Quanta and deformation buffers
pub struct QuantaBuffers {
    /// In/Out pair plus the Read copy, see [`StepSlots`]
    pub quanta: [wgpu::Buffer; 3],
    pub quanta_ids: [ResourceId; 3],
    pub deformation: [wgpu::Buffer; 2],
    pub deformation_ids: [ResourceId; 2],
    pub count: u32,
}

impl QuantaBuffers {
    /// Allocate and seed every slot from `field`
    pub fn new(ctx: &GpuContext, table: &mut GpuTable, field: &QuantaField) -> Self {
        let usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let count = field.len() as u32;
        let quanta_bytes = count as u64 * std::mem::size_of::<Quanta>() as u64;
        let deformation_bytes = count as u64 * std::mem::size_of::<Deformation>() as u64;

        let quanta: [wgpu::Buffer; 3] = std::array::from_fn(|i| {
            storage_buffer(&ctx.device, &format!("quanta_{}", i), quanta_bytes.max(4), usage)
        });
        let deformation: [wgpu::Buffer; 2] = std::array::from_fn(|i| {
            storage_buffer(&ctx.device, &format!("deformation_{}", i), deformation_bytes.max(4), usage)
        });
        let quanta_ids = std::array::from_fn(|i| table.add_buffer(&format!("quanta_{}", i), &quanta[i]));
        let deformation_ids =
            std::array::from_fn(|i| table.add_buffer(&format!("deformation_{}", i), &deformation[i]));

        let buffers = Self { quanta, quanta_ids, deformation, deformation_ids, count };
        buffers.write(ctx, field);
        buffers
    }

    /// Queue writes of `field` into all quanta slots and identity deformation
    fn write(&self, ctx: &GpuContext, field: &QuantaField) {
        if field.is_empty() {
            return;
        }
        let bytes = bytemuck::cast_slice(&field.quanta);
        for buffer in &self.quanta {
            ctx.queue.write_buffer(buffer, 0, bytes);
        }
        let identity = vec![Deformation::IDENTITY; field.len()];
        for buffer in &self.deformation {
            ctx.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&identity));
        }
    }

    fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.quanta_ids.iter().chain(&self.deformation_ids).copied()
    }
}

/// Quanta step, bootstrap brush fill and the Read copy
pub struct Simulator {
    buffers: QuantaBuffers,
    field_size: [i32; 3],
    sim: SimulationConfig,
    brush_count: u32,
    update: KernelId,
    fill: KernelId,
    /// Indexed by parity, then frame slot
    update_bindings: [[BindingId; 3]; 2],
    fill_bindings: [[BindingId; 3]; 2],
    params: wgpu::Buffer,
    params_id: ResourceId,
    density: wgpu::Buffer,
    density_id: ResourceId,
    density_cells: u32,
    read_tiles: wgpu::Buffer,
    read_tiles_id: ResourceId,
    read_indices: wgpu::Buffer,
    read_indices_id: ResourceId,
    /// Quanta tiles and indices by parity
    quanta_bins: [[ResourceId; 2]; 2],
    brush_buffer: ResourceId,
    brush_tiles: ResourceId,
    brush_indices: ResourceId,
    /// Coarsest level canonical buffers by frame slot
    world: [ResourceId; 3],
    workgroups: u32,
    pending_writes: Vec<ResourceId>,
    guard: ReadbackGuard,
}

impl Simulator {
    pub fn new(
        ctx: &GpuContext,
        table: &mut GpuTable,
        config: &EngineConfig,
        buffers: QuantaBuffers,
        store: &VolumeStore,
        registry: &BrushRegistry,
        binner: &TileBinner,
    ) -> Self {
        let device = &ctx.device;

        let update_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quanta_update_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                uniform_entry(2, false),
                storage_entry(3, true),
                storage_entry(4, false),
                storage_entry(5, true),
                storage_entry(6, false),
                storage_entry(7, true),
                storage_entry(8, true),
                storage_entry(9, true),
            ],
        });
        let fill_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("brush_fill_layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                uniform_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, true),
                storage_entry(7, true),
                storage_entry(8, false),
            ],
        });

        let update = table.add_kernel(
            "quanta_update",
            compute_pipeline(
                device,
                "quanta_update",
                &[shaders::VOXEL_COMMON, shaders::QUANTA_COMMON, shaders::TILE_COMMON, shaders::QUANTA_UPDATE],
                "update",
                &update_bgl,
            ),
        );
        let fill = table.add_kernel(
            "brush_fill",
            compute_pipeline(
                device,
                "brush_fill",
                &[
                    shaders::VOXEL_COMMON,
                    shaders::QUANTA_COMMON,
                    shaders::BRUSH_COMMON,
                    shaders::TILE_COMMON,
                    shaders::BRUSH_FILL,
                ],
                "fill",
                &fill_bgl,
            ),
        );

        let params = uniform_buffer(
            device,
            &ctx.queue,
            "sim_params",
            &SimParams::new(&config.simulation, config.field_size, buffers.count, registry.count(), 0),
        );
        let params_id = table.add_buffer("sim_params", &params);

        let density_cells = registry.density_cells();
        let density = storage_buffer(
            device,
            "brush_density",
            density_cells.max(1) as u64 * 4,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let density_id = table.add_buffer("brush_density", &density);

        let bins = [binner.quanta_bins(0), binner.quanta_bins(1)];
        let copy_usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let read_tiles = storage_buffer(device, "quanta_read_tiles", bins[0].tiles.size(), copy_usage);
        let read_indices = storage_buffer(device, "quanta_read_indices", bins[0].indices.size(), copy_usage);
        let read_tiles_id = table.add_buffer("quanta_read_tiles", &read_tiles);
        let read_indices_id = table.add_buffer("quanta_read_indices", &read_indices);

        let world = store.level(store.levels().len() - 1);
        let brush_bins = binner.brush_bins();

        let mut update_bindings = [[BindingId(0); 3]; 2];
        let mut fill_bindings = [[BindingId(0); 3]; 2];
        for parity in 0..2 {
            let (input, output) = (parity, 1 - parity);
            for slot in 0..3 {
                let update_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("quanta_update"),
                    layout: &update_bgl,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: world.params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: binner.quanta_params().as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: buffers.quanta[input].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 4, resource: buffers.quanta[output].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 5, resource: buffers.deformation[input].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 6, resource: buffers.deformation[output].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 7, resource: bins[input].tiles.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 8, resource: bins[input].indices.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 9, resource: world.canonical[slot].as_entire_binding() },
                    ],
                });
                let fill_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("brush_fill"),
                    layout: &fill_bgl,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: world.params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: binner.brush_params().as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: buffers.quanta[output].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 4, resource: registry.buffer().as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 5, resource: brush_bins.tiles.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 6, resource: brush_bins.indices.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 7, resource: world.canonical[slot].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 8, resource: density.as_entire_binding() },
                    ],
                });
                update_bindings[parity][slot] = table.add_binding(update_group);
                fill_bindings[parity][slot] = table.add_binding(fill_group);
            }
        }

        log::info!("Simulator: {} quanta, field {:?}, {} density cells",
            buffers.count, config.field_size, density_cells);

        Self {
            field_size: config.field_size,
            sim: config.simulation,
            brush_count: registry.count(),
            update,
            fill,
            update_bindings,
            fill_bindings,
            params,
            params_id,
            density,
            density_id,
            density_cells,
            read_tiles,
            read_tiles_id,
            read_indices,
            read_indices_id,
            quanta_bins: bins.map(|b| [b.tiles_id, b.indices_id]),
            brush_buffer: registry.resource(),
            brush_tiles: brush_bins.tiles_id,
            brush_indices: brush_bins.indices_id,
            world: world.canonical_ids,
            workgroups: groups(buffers.count, QUANTA_WORKGROUP),
            pending_writes: Vec::new(),
            guard: ReadbackGuard::new(),
            buffers,
        }
    }

    /// Write this frame's step parameters and record every pending host write
    pub fn plan_params(&mut self, ctx: &GpuContext, plan: &mut FramePlan, frame: u32) {
        let params = SimParams::new(&self.sim, self.field_size, self.buffers.count, self.brush_count, frame);
        ctx.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
        plan.host_write(Component::Simulator, self.params_id);
        for resource in self.pending_writes.drain(..) {
            plan.host_write(Component::Simulator, resource);
        }
    }

    /// One step from the input to the output slot of `slots`.
    ///
    /// The quanta sort of the input and the SDF of `slot` must be visible.
    pub fn plan_update(&self, plan: &mut FramePlan, slots: StepSlots, slot: usize) {
        let (input, output) = (slots.input(), slots.output());
        let b = &self.buffers;
        let [tiles, indices] = self.quanta_bins[input];
        plan.dispatch(
            DispatchOp::new(
                Component::Simulator,
                "quanta_update",
                self.update,
                self.update_bindings[input][slot % 3],
                [self.workgroups, 1, 1],
            )
            .reads(&[self.params_id, b.quanta_ids[input], b.deformation_ids[input], tiles, indices])
            .reads(&[self.world[slot % 3]])
            .writes(&[b.quanta_ids[output], b.deformation_ids[output]]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
    }

    /// Bootstrap claim of quanta in the output slot. The density grids are
    /// zeroed first when `clear_density` is set.
    pub fn plan_brush_fill(&self, plan: &mut FramePlan, slots: StepSlots, slot: usize, clear_density: bool) {
        let (input, output) = (slots.input(), slots.output());
        if clear_density {
            plan.clear(Component::Simulator, self.density_id);
            plan.barrier(Barrier::TRANSFER_TO_COMPUTE);
        }
        let out = self.buffers.quanta_ids[output];
        plan.dispatch(
            DispatchOp::new(
                Component::Simulator,
                "brush_fill",
                self.fill,
                self.fill_bindings[input][slot % 3],
                [self.workgroups, 1, 1],
            )
            .reads(&[self.params_id, self.brush_buffer, self.brush_tiles, self.brush_indices, self.world[slot % 3]])
            .reads(&[out, self.density_id])
            .writes(&[out, self.density_id]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
    }

    /// Copy the step output and the quanta tiles it was stepped with into
    /// the Read copies
    pub fn plan_copy_out_to_read(&self, plan: &mut FramePlan, slots: StepSlots) {
        let component = Component::Simulator;
        let ids = &self.buffers.quanta_ids;
        let [tiles, indices] = self.quanta_bins[slots.input()];
        plan.barrier(Barrier::COMPUTE_TO_TRANSFER);
        plan.copy(component, ids[slots.output()], ids[slots.read()]);
        plan.copy(component, tiles, self.read_tiles_id);
        plan.copy(component, indices, self.read_indices_id);
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE.union(Barrier::TRANSFER_TO_TRANSFER));
    }

    /// Replace the quanta with `field` in every slot. Deformation resets to
    /// identity. The writes are recorded with the next [`Self::plan_params`].
    pub fn upload(&mut self, ctx: &GpuContext, field: &QuantaField) -> Result<(), Error> {
        if field.len() as u64 != self.buffers.count as u64 {
            return Err(Error::QuantaCountMismatch {
                expected: self.buffers.count as u64,
                found: field.len() as u64,
            });
        }
        self.buffers.write(ctx, field);
        for resource in self.buffers.resources() {
            if !self.pending_writes.contains(&resource) {
                self.pending_writes.push(resource);
            }
        }
        log::info!("Uploaded {} quanta", field.len());
        Ok(())
    }

    /// Blocking copy of the Read slot
    pub fn read_back_full(&self, ctx: &GpuContext) -> Result<QuantaField, Error> {
        let quanta = read_pod_blocking(ctx, &self.buffers.quanta[StepSlots::READ], self.buffers.count as usize)?;
        Ok(QuantaField { field_size: self.field_size, quanta })
    }

    /// Asynchronous copy of the Read slot.
    ///
    /// `callback` runs once on the readback thread. While a readback is in
    /// flight further requests are rejected and their callback is dropped.
    pub fn read_back_async<F>(&self, ctx: &GpuContext, callback: F) -> ReadbackStatus
    where
        F: FnOnce(Result<QuantaField, Error>) + Send + 'static,
    {
        let Some(ticket) = self.guard.try_acquire() else {
            log::warn!("Quanta readback rejected: previous readback still in flight");
            return ReadbackStatus::Rejected;
        };
        let field_size = self.field_size;
        let started = read_pod_async::<Quanta, _>(
            ctx,
            &self.buffers.quanta[StepSlots::READ],
            self.buffers.count as usize,
            ticket,
            move |result| callback(result.map(|quanta| QuantaField { field_size, quanta })),
        );
        match started {
            Ok(()) => ReadbackStatus::Started,
            Err(e) => {
                log::warn!("Quanta readback rejected: {}", e);
                ReadbackStatus::Rejected
            }
        }
    }

    /// Blocking copy of the brush density grids
    pub fn read_density(&self, ctx: &GpuContext) -> Result<Vec<u32>, Error> {
        read_pod_blocking(ctx, &self.density, self.density_cells as usize)
    }

    /// Blocking copy of the quanta tiles published with the Read slot
    pub fn read_tiles(&self, ctx: &GpuContext, tile_count: u32) -> Result<Vec<GpuTile>, Error> {
        read_pod_blocking(ctx, &self.read_tiles, tile_count as usize)
    }

    pub fn buffers(&self) -> &QuantaBuffers {
        &self.buffers
    }

    pub fn read_indices(&self) -> &wgpu::Buffer {
        &self.read_indices
    }

    pub fn count(&self) -> u32 {
        self.buffers.count
    }
}

/// Quanta claimed by each brush, indexed by brush id
pub fn claimed_per_brush(field: &QuantaField, brush_count: u32) -> Vec<u32> {
    let mut counts = vec![0u32; brush_count as usize];
    for owner in field.quanta.iter().filter_map(Quanta::owner) {
        if let Some(count) = counts.get_mut(owner as usize) {
            *count += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::brush::{BrushGeometry, BrushOp, BrushSource, Transform};
    use crate::brush::registry::create_brushes;
    use crate::brush::shape::Shape;
    use crate::gpu::executor;
    use crate::gpu::hazards;
    use crate::sdf::Propagator;
    use crate::tile::reference::TileGrid;
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn test_claimed_per_brush_ignores_unknown_owners() {
        let mut field = QuantaField::seeded([4, 4, 4], 8);
        field.quanta[0].information[0] = 1;
        field.quanta[1].information[0] = 1;
        field.quanta[2].information[0] = 2;
        field.quanta[3].information[0] = 9;
        assert_eq!(claimed_per_brush(&field, 2), vec![2, 1]);
    }

    struct Rig {
        ctx: GpuContext,
        table: GpuTable,
        registry: BrushRegistry,
        store: VolumeStore,
        binner: TileBinner,
        propagator: Propagator,
        sim: Simulator,
    }

    fn rig() -> Option<Rig> {
        let ctx = crate::gpu::context::test_support::context()?;
        let mut config = EngineConfig::default();
        for level in config.levels.iter_mut() {
            level.resolution = 32;
        }
        config.field_size = [16, 16, 4];
        config.quanta_count = 1024;

        let sphere = Arc::new(BrushGeometry::Analytic(Shape::Sphere { radius: 0.8 }));
        let cube = Arc::new(BrushGeometry::Analytic(Shape::Box { half_extents: Vec3::splat(0.5) }));
        let sources = vec![
            BrushSource::new(sphere, Transform::default()).with_world_size(6.0),
            BrushSource::new(cube, Transform::from_position(Vec3::new(5.0, 0.0, 0.0))).with_op(BrushOp::Subtract),
        ];

        let mut table = GpuTable::new();
        let layout = create_brushes(&sources, 16).ok()?;
        let registry = BrushRegistry::new(&ctx, &mut table, layout);
        let store = VolumeStore::new(&ctx, &mut table, &config, registry.geometries()).ok()?;
        let field = QuantaField::seeded(config.field_size, config.quanta_count);
        let buffers = QuantaBuffers::new(&ctx, &mut table, &field);
        let grid = TileGrid::new(store.estimate().world(), config.tile_size);
        let binner = TileBinner::new(&ctx, &mut table, grid, &registry, &buffers);
        let propagator = Propagator::new(&ctx, &mut table, &config, &store, &registry, &binner);
        let sim = Simulator::new(&ctx, &mut table, &config, buffers, &store, &registry, &binner);
        Some(Rig { ctx, table, registry, store, binner, propagator, sim })
    }

    fn step(rig: &mut Rig, slots: StepSlots, fill: bool) {
        let mut plan = FramePlan::new();
        rig.registry.plan(&mut plan);
        rig.store.plan(&mut plan);
        rig.sim.plan_params(&rig.ctx, &mut plan, 0);
        plan.barrier(Barrier::HOST_TO_GPU);
        rig.binner.plan_brush_sort(&mut plan);
        rig.propagator.plan(&mut plan, 0, &rig.registry);
        rig.binner.plan_quanta_sort(&mut plan, slots.input());
        rig.sim.plan_update(&mut plan, slots, 0);
        if fill {
            rig.sim.plan_brush_fill(&mut plan, slots, 0, true);
        }
        rig.sim.plan_copy_out_to_read(&mut plan, slots);
        assert!(hazards::validate(&plan).is_empty(), "{:?}", hazards::validate(&plan));

        rig.ctx
            .submit_and_wait("simulator_test", |encoder| {
                executor::record(&plan, &rig.table, encoder);
            })
            .unwrap();
    }

    #[test]
    fn test_gpu_step_and_fill() {
        let Some(mut rig) = rig() else { return };
        step(&mut rig, StepSlots::new(), true);

        let field = rig.sim.read_back_full(&rig.ctx).unwrap();
        assert_eq!(field.len(), 1024);
        assert_eq!(field.quanta.iter().filter(|q| q.mass() > 0.0).count(), 1024);
        for q in &field.quanta {
            assert!(q.position[0].abs() <= 8.0 && q.position[1].abs() <= 8.0 && q.position[2].abs() <= 2.0);
        }

        // Only the additive sphere claims
        let claimed = claimed_per_brush(&field, 2);
        assert!(claimed[0] > 0, "{:?}", claimed);
        assert_eq!(claimed[1], 0);

        let center = field
            .quanta
            .iter()
            .find(|q| Vec3::from_slice(&q.position[..3]).length() < 1.0)
            .unwrap();
        assert_eq!(center.owner(), Some(0));

        let density: u32 = rig.sim.read_density(&rig.ctx).unwrap().iter().sum();
        assert_eq!(density, claimed[0]);

        let tile_count = rig.binner.grid().tile_count();
        let tiles = rig.sim.read_tiles(&rig.ctx, tile_count).unwrap();
        assert_eq!(tiles.iter().map(|t| t.count).sum::<u32>(), 1024);
    }

    #[test]
    fn test_gpu_upload_replaces_every_slot() {
        let Some(mut rig) = rig() else { return };
        let mut field = QuantaField::seeded([16, 16, 4], 1024);
        field.quanta[5].information[0] = 2;
        rig.sim.upload(&rig.ctx, &field).unwrap();

        let mut plan = FramePlan::new();
        rig.sim.plan_params(&rig.ctx, &mut plan, 0);
        assert_eq!(plan.len(), 6);
        rig.ctx.submit_and_wait("upload_test", |_| {}).unwrap();
        assert_eq!(rig.sim.read_back_full(&rig.ctx).unwrap(), field);

        let short = QuantaField::seeded([16, 16, 4], 8);
        assert!(matches!(
            rig.sim.upload(&rig.ctx, &short),
            Err(Error::QuantaCountMismatch { expected: 1024, found: 8 })
        ));
    }

    #[test]
    fn test_gpu_overlapping_readback_is_rejected() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        let Some(rig) = rig() else { return };
        let expected = rig.sim.read_back_full(&rig.ctx).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        // The first callback holds its ticket until the gate opens
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();
        let first_calls = calls.clone();
        let first = rig.sim.read_back_async(&rig.ctx, move |result| {
            let _ = gate_rx.recv();
            first_calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        let second_calls = calls.clone();
        let second = rig.sim.read_back_async(&rig.ctx, move |_| {
            second_calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(first, ReadbackStatus::Started);
        assert_eq!(second, ReadbackStatus::Rejected);

        gate_tx.send(()).unwrap();
        let payload = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(payload, expected);
        assert_eq!(payload.len(), 1024);

        // Ticket drops right after the callback returns
        let deadline = Instant::now() + Duration::from_secs(10);
        while rig.sim.guard.is_busy() {
            assert!(Instant::now() < deadline, "readback ticket never released");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (tx, rx) = mpsc::channel();
        let again_calls = calls.clone();
        let again = rig.sim.read_back_async(&rig.ctx, move |result| {
            again_calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result.map(|f| f.len()));
        });
        assert_eq!(again, ReadbackStatus::Started);
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap(), 1024);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
