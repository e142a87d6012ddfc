//! Per-frame orchestration.
//!
//! [`Dispatch`] owns every subsystem and records one frame plan per call:
//!
//! 1. brush, texture and parameter host writes, then one host barrier
//! 2. brush tile sort
//! 3. SDF propagation of every level into the current frame slot
//! 4. quanta tile sort of the step input
//! 5. quanta step, then brush fill while bootstrapping
//! 6. Read copy of the step output
//! 7. dual contouring and the hand-off to the external draw
//!
//! The plan is validated in debug builds, lowered onto the caller's
//! encoder, and the frame slot, step parity and bootstrap phase advance.

use std::path::Path;

use crate::brush::bake::SdfGrid;
use crate::brush::brush::{BrushSource, Transform};
use crate::brush::registry::{create_brushes, BrushLayout, BrushRegistry};
use crate::core::config::EngineConfig;
use crate::core::error::Error;
use crate::core::frame::{Ring, StepSlots};
use crate::core::Result;
use crate::gpu::context::GpuContext;
use crate::gpu::executor::{self, RecordStats};
use crate::gpu::hazards;
use crate::gpu::plan::{Barrier, FramePlan};
use crate::gpu::readback::ReadbackStatus;
use crate::gpu::table::GpuTable;
use crate::mesh::extractor::MeshExtractor;
use crate::sdf::Propagator;
use crate::sim::phase::SimPhase;
use crate::sim::quanta::QuantaField;
use crate::sim::simulator::{QuantaBuffers, Simulator};
use crate::tile::binner::TileBinner;
use crate::tile::reference::TileGrid;
use crate::volume::store::VolumeStore;

/// Buffers the external draw consumes
#[derive(Clone, Copy)]
pub struct MeshOutputs<'a> {
    pub vertices: &'a wgpu::Buffer,
    /// One `DrawArgs` record for `draw_indirect`
    pub draw_args: &'a wgpu::Buffer,
    pub vertex_capacity: u32,
}

pub struct Dispatch {
    config: EngineConfig,
    table: GpuTable,
    registry: BrushRegistry,
    store: VolumeStore,
    binner: TileBinner,
    propagator: Propagator,
    simulator: Simulator,
    extractor: MeshExtractor,
    slot: Ring<3>,
    steps: StepSlots,
    phase: SimPhase,
    frame_count: u64,
}

impl Dispatch {
    /// Build every subsystem for `sources`. The brush set is fixed from here on.
    pub fn new(ctx: &GpuContext, config: EngineConfig, sources: &[BrushSource]) -> Result<Self> {
        config.validate()?;
        let layout = create_brushes(sources, config.brush_texture_resolution)?;
        let field = QuantaField::seeded(config.field_size, config.quanta_count);
        Self::build(ctx, config, layout, &field)
    }

    fn build(ctx: &GpuContext, config: EngineConfig, layout: BrushLayout, field: &QuantaField) -> Result<Self> {
        let mut table = GpuTable::new();
        let registry = BrushRegistry::new(ctx, &mut table, layout);
        let store = VolumeStore::new(ctx, &mut table, &config, registry.geometries())?;

        let quanta = QuantaBuffers::new(ctx, &mut table, field);
        let grid = TileGrid::new(store.estimate().world(), config.tile_size);
        let binner = TileBinner::new(ctx, &mut table, grid, &registry, &quanta);
        let propagator = Propagator::new(ctx, &mut table, &config, &store, &registry, &binner);
        let simulator = Simulator::new(ctx, &mut table, &config, quanta, &store, &registry, &binner);
        let extractor = MeshExtractor::new(ctx, &mut table, &config, &store);

        log::info!("Dispatch ready: {} brushes, {} kernels, {} resources, tier {:?}",
            registry.count(), table.kernel_count(), table.resource_count(), store.estimate().tier);

        let phase = SimPhase::new(config.bootstrap_frames);
        Ok(Self {
            config,
            table,
            registry,
            store,
            binner,
            propagator,
            simulator,
            extractor,
            slot: Ring::new(),
            steps: StepSlots::new(),
            phase,
            frame_count: 0,
        })
    }

    /// Plan of the next frame. Host writes pending since the last frame are
    /// issued to the queue and recorded in the plan.
    pub fn plan_frame(&mut self, ctx: &GpuContext) -> FramePlan {
        let slot = self.slot.current();
        let steps = self.steps;
        let mut plan = FramePlan::new();

        self.registry.plan(&mut plan);
        self.store.plan(&mut plan);
        self.simulator.plan_params(ctx, &mut plan, self.frame_count as u32);
        plan.barrier(Barrier::HOST_TO_GPU);

        self.binner.plan_brush_sort(&mut plan);
        self.propagator.plan(&mut plan, slot, &self.registry);

        self.binner.plan_quanta_sort(&mut plan, steps.input());
        self.simulator.plan_update(&mut plan, steps, slot);
        if self.phase.is_bootstrap() {
            let first = self.phase.is_first_bootstrap_frame(self.config.bootstrap_frames);
            self.simulator.plan_brush_fill(&mut plan, steps, slot, first);
        }
        self.simulator.plan_copy_out_to_read(&mut plan, steps);

        self.extractor.plan(&mut plan, slot);
        plan
    }

    /// Record the next frame into `encoder` and advance
    pub fn record_frame(&mut self, ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder) -> RecordStats {
        let plan = self.plan_frame(ctx);
        debug_assert!(hazards::check(&plan), "frame {} plan has hazards", self.frame_count);

        let stats = executor::record(&plan, &self.table, encoder);
        log::debug!("frame {} slot {} parity {} {:?}: {} ops, {} dispatches, {} compute passes",
            self.frame_count, self.slot.current(), self.steps.input(), self.phase,
            plan.len(), stats.dispatches, stats.compute_passes);
        if stats.skipped > 0 {
            log::warn!("frame {}: {} ops skipped", self.frame_count, stats.skipped);
        }

        self.slot.advance();
        self.steps.flip();
        self.phase = self.phase.advance();
        self.frame_count += 1;
        stats
    }

    /// Record, submit and wait for one frame
    pub fn run_frame(&mut self, ctx: &GpuContext) -> Result<RecordStats> {
        let mut stats = RecordStats::default();
        ctx.submit_and_wait("claybrush_frame", |encoder| {
            stats = self.record_frame(ctx, encoder);
        })?;
        Ok(stats)
    }

    /// Push new brush transforms; returns the number of brushes that moved
    pub fn update_brushes(&mut self, ctx: &GpuContext, transforms: &[Transform]) -> usize {
        self.registry.update_brushes_on_gpu(ctx, transforms)
    }

    pub fn set_brush_active(&mut self, ctx: &GpuContext, index: usize, active: bool) {
        self.registry.set_active(ctx, index, active);
    }

    /// Swap a geometry to a newly baked grid.
    ///
    /// The grid goes into the geometry's idle texture; brushes switch to it
    /// from the next frame while in-flight frames keep reading the old one.
    pub fn replace_geometry(&mut self, ctx: &GpuContext, slot: usize, grid: SdfGrid) -> Result<()> {
        let geometry = self
            .registry
            .geometries()
            .get(slot)
            .ok_or_else(|| Error::Brush(format!("no geometry slot {}", slot)))?;
        let idle = geometry.textures[1 - geometry.active_texture];
        self.store.upload_brush_grid(ctx, idle, &grid)?;
        self.registry.replace_geometry(ctx, slot, grid)
    }

    /// Re-run voxel tier selection against a new memory budget.
    ///
    /// The tier only ever goes down. When it does, every GPU resource is
    /// rebuilt at the new level resolutions; brush state and the current
    /// quanta carry over, frame counters and the simulation phase are kept.
    /// Returns whether a rebuild happened.
    pub fn set_memory_budget(&mut self, ctx: &GpuContext, budget_mb: u64) -> Result<bool> {
        let lowered =
            self.store.set_voxel_grid_size(&self.config, budget_mb * 1024 * 1024, ctx.max_storage_allocation())?;
        self.config.memory_budget_mb = budget_mb;
        if !lowered {
            return Ok(false);
        }

        let field = self.read_back_quanta(ctx)?;
        let rebuilt = Self::build(ctx, self.config.clone(), self.registry.layout().clone(), &field)?;
        let (phase, frame_count) = (self.phase, self.frame_count);
        *self = Self { phase, frame_count, ..rebuilt };
        log::info!("Dispatch rebuilt at tier {:?} for a {}MB budget", self.store.estimate().tier, budget_mb);
        Ok(true)
    }

    /// Reset the quanta to the seeded lattice and bootstrap again
    pub fn reseed(&mut self, ctx: &GpuContext) -> Result<()> {
        let field = QuantaField::seeded(self.config.field_size, self.config.quanta_count);
        self.simulator.upload(ctx, &field)?;
        self.phase = SimPhase::restart(self.config.bootstrap_frames);
        Ok(())
    }

    pub fn mesh_outputs(&self) -> MeshOutputs<'_> {
        MeshOutputs {
            vertices: self.extractor.vertex_buffer(),
            draw_args: self.extractor.draw_args_buffer(),
            vertex_capacity: self.extractor.capacity(),
        }
    }

    /// Blocking snapshot of the quanta as of the last recorded step
    pub fn read_back_quanta(&self, ctx: &GpuContext) -> Result<QuantaField> {
        self.simulator.read_back_full(ctx)
    }

    /// Asynchronous snapshot; rejected while another one is in flight
    pub fn read_back_quanta_async<F>(&self, ctx: &GpuContext, callback: F) -> ReadbackStatus
    where
        F: FnOnce(Result<QuantaField>) + Send + 'static,
    {
        self.simulator.read_back_async(ctx, callback)
    }

    pub fn save_quanta_blob(&self, ctx: &GpuContext, path: &Path) -> Result<()> {
        self.read_back_quanta(ctx)?.save_blob(path)
    }

    pub fn save_quanta_text(&self, ctx: &GpuContext, path: &Path) -> Result<()> {
        self.read_back_quanta(ctx)?.save_text(path)
    }

    /// Replace the quanta from a binary snapshot. A count mismatch aborts
    /// the load and leaves the simulation untouched.
    pub fn load_quanta_blob(&mut self, ctx: &GpuContext, path: &Path) -> Result<()> {
        let mut field = self.empty_field();
        field.load_blob(path)?;
        self.simulator.upload(ctx, &field)
    }

    /// Text counterpart of [`Self::load_quanta_blob`]
    pub fn load_quanta_text(&mut self, ctx: &GpuContext, path: &Path) -> Result<()> {
        let mut field = self.empty_field();
        field.load_text(path)?;
        self.simulator.upload(ctx, &field)
    }

    /// Placeholder sized for the configured count, used as a load target
    fn empty_field(&self) -> QuantaField {
        QuantaField {
            field_size: self.config.field_size,
            quanta: vec![Default::default(); self.config.quanta_count as usize],
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &BrushRegistry {
        &self.registry
    }

    pub fn store(&self) -> &VolumeStore {
        &self.store
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn extractor(&self) -> &MeshExtractor {
        &self.extractor
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frame slot the next frame writes
    pub fn frame_slot(&self) -> usize {
        self.slot.current()
    }
}
