//! GPU tile sort.
//!
//! Brushes and quanta are binned into the same world tile grid by three
//! dispatches each: histogram, single-workgroup exclusive scan, scatter.
//! Brush bins are rebuilt every frame into one set; quanta bins alternate
//! with the simulation parity so the bins a frame reads are never the bins
//! the next sort writes. Brush bins get a fourth pass that orders every
//! tile's slice by brush index, since scatter order follows atomic arrival
//! and brush combination is order sensitive.

use crate::brush::registry::BrushRegistry;
use crate::gpu::context::GpuContext;
use crate::gpu::layout::{compute_pipeline, groups, storage_buffer, storage_entry, uniform_buffer, uniform_entry};
use crate::gpu::plan::{Barrier, BindingId, Component, DispatchOp, FramePlan, KernelId, ResourceId};
use crate::gpu::shaders;
use crate::gpu::table::GpuTable;
use crate::sim::simulator::QuantaBuffers;
use crate::tile::reference::{GpuTile, TileGrid};

const BRUSH_WORKGROUP: u32 = 64;
const QUANTA_WORKGROUP: u32 = 256;

/// Tile records plus the index array they point into
pub struct TileBins {
    pub tiles: wgpu::Buffer,
    pub tiles_id: ResourceId,
    pub indices: wgpu::Buffer,
    pub indices_id: ResourceId,
    /// Entries in `indices`
    pub capacity: u32,
}

impl TileBins {
    pub fn new(ctx: &GpuContext, table: &mut GpuTable, label: &str, tile_count: u32, capacity: u32) -> Self {
        let usage = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let tiles_label = format!("{}_tiles", label);
        let indices_label = format!("{}_indices", label);
        let tiles = storage_buffer(
            &ctx.device,
            &tiles_label,
            tile_count as u64 * std::mem::size_of::<GpuTile>() as u64,
            usage,
        );
        let indices = storage_buffer(&ctx.device, &indices_label, capacity as u64 * 4, usage);
        let tiles_id = table.add_buffer(&tiles_label, &tiles);
        let indices_id = table.add_buffer(&indices_label, &indices);
        Self { tiles, tiles_id, indices, indices_id, capacity }
    }
}

/// Everything one entity domain needs to sort
struct SortSet {
    labels: [&'static str; 3],
    workgroup: u32,
    entity_count: u32,
    histogram: KernelId,
    scatter: KernelId,
    /// In-tile index ordering, brush set only
    order: Option<(&'static str, KernelId)>,
    params: wgpu::Buffer,
    cursor: wgpu::Buffer,
    cursor_id: ResourceId,
    /// One per bin set
    bins: Vec<TileBins>,
    entities: Vec<ResourceId>,
    bindings: Vec<BindingId>,
    prefix_bindings: Vec<BindingId>,
}

/// Tile sort of brushes and quanta
pub struct TileBinner {
    grid: TileGrid,
    prefix: KernelId,
    brushes: SortSet,
    quanta: SortSet,
}

fn sort_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            uniform_entry(0, false),
            storage_entry(1, false),
            storage_entry(2, false),
            storage_entry(3, false),
            storage_entry(4, true),
        ],
    })
}

struct SortLayouts<'a> {
    sort: &'a wgpu::BindGroupLayout,
    prefix: &'a wgpu::BindGroupLayout,
}

struct SortSpec<'a> {
    name: &'static str,
    labels: [&'static str; 3],
    order: Option<&'static str>,
    sources: &'a [&'a str],
    workgroup: u32,
    entity_count: u32,
    capacity: u32,
}

/// Kernels, parameters, cursor and one bin set per entity buffer
fn build_sort_set(
    ctx: &GpuContext,
    table: &mut GpuTable,
    grid: &TileGrid,
    layouts: &SortLayouts,
    spec: SortSpec,
    entity_buffers: &[(&wgpu::Buffer, ResourceId)],
) -> SortSet {
    let device = &ctx.device;
    let [histogram_label, prefix_label, scatter_label] = spec.labels;
    let histogram = table.add_kernel(
        histogram_label,
        compute_pipeline(device, histogram_label, spec.sources, "histogram", layouts.sort),
    );
    let scatter = table.add_kernel(
        scatter_label,
        compute_pipeline(device, scatter_label, spec.sources, "scatter", layouts.sort),
    );
    let order = spec.order.map(|label| {
        (label, table.add_kernel(label, compute_pipeline(device, label, spec.sources, "order", layouts.sort)))
    });
    let params = uniform_buffer(
        device,
        &ctx.queue,
        &format!("{}_tile_params", spec.name),
        &grid.params(spec.entity_count, spec.capacity),
    );
    let cursor_label = format!("{}_tile_cursor", spec.name);
    let cursor = storage_buffer(device, &cursor_label, grid.tile_count() as u64 * 4, wgpu::BufferUsages::COPY_DST);
    let cursor_id = table.add_buffer(&cursor_label, &cursor);

    let mut set = SortSet {
        labels: spec.labels,
        workgroup: spec.workgroup,
        entity_count: spec.entity_count,
        histogram,
        scatter,
        order,
        params,
        cursor,
        cursor_id,
        bins: Vec::with_capacity(entity_buffers.len()),
        entities: Vec::with_capacity(entity_buffers.len()),
        bindings: Vec::with_capacity(entity_buffers.len()),
        prefix_bindings: Vec::with_capacity(entity_buffers.len()),
    };

    for (i, &(entity_buffer, entity_id)) in entity_buffers.iter().enumerate() {
        let bins = TileBins::new(ctx, table, &format!("{}_bins{}", spec.name, i), grid.tile_count(), spec.capacity);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(histogram_label),
            layout: layouts.sort,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: set.params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: bins.tiles.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: set.cursor.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: bins.indices.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: entity_buffer.as_entire_binding() },
            ],
        });
        let prefix_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(prefix_label),
            layout: layouts.prefix,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: set.params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: bins.tiles.as_entire_binding() },
            ],
        });
        set.bindings.push(table.add_binding(bind_group));
        set.prefix_bindings.push(table.add_binding(prefix_group));
        set.entities.push(entity_id);
        set.bins.push(bins);
    }
    set
}

impl TileBinner {
    pub fn new(
        ctx: &GpuContext,
        table: &mut GpuTable,
        grid: TileGrid,
        registry: &BrushRegistry,
        quanta: &QuantaBuffers,
    ) -> Self {
        let device = &ctx.device;
        let tile_count = grid.tile_count();

        let sort_bgl = sort_layout(device, "tile_sort_layout");
        let prefix_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile_prefix_layout"),
            entries: &[uniform_entry(0, false), storage_entry(1, false)],
        });

        let prefix = table.add_kernel(
            "tile_prefix",
            compute_pipeline(device, "tile_prefix", &[shaders::TILE_COMMON, shaders::TILE_PREFIX], "prefix", &prefix_bgl),
        );
        let layouts = SortLayouts { sort: &sort_bgl, prefix: &prefix_bgl };

        // Every brush may touch every tile
        let max_entries = (ctx.max_storage_allocation() / 4).min(u32::MAX as u64) as u32;
        let wanted = (registry.count() as u64 * tile_count as u64).max(1);
        if wanted > max_entries as u64 {
            log::warn!("Brush tile index array clamped from {} to {} entries", wanted, max_entries);
        }
        let brush_capacity = wanted.min(max_entries as u64) as u32;

        let brushes = build_sort_set(
            ctx,
            table,
            &grid,
            &layouts,
            SortSpec {
                name: "brush",
                labels: ["brush_histogram", "brush_prefix", "brush_scatter"],
                order: Some("brush_order"),
                sources: &[shaders::BRUSH_COMMON, shaders::TILE_COMMON, shaders::TILE_BIN_BRUSHES],
                workgroup: BRUSH_WORKGROUP,
                entity_count: registry.count(),
                capacity: brush_capacity,
            },
            &[(registry.buffer(), registry.resource())],
        );
        let quanta_set = build_sort_set(
            ctx,
            table,
            &grid,
            &layouts,
            SortSpec {
                name: "quanta",
                labels: ["quanta_histogram", "quanta_prefix", "quanta_scatter"],
                order: None,
                sources: &[shaders::QUANTA_COMMON, shaders::TILE_COMMON, shaders::TILE_BIN_QUANTA],
                workgroup: QUANTA_WORKGROUP,
                entity_count: quanta.count,
                capacity: quanta.count,
            },
            &[(&quanta.quanta[0], quanta.quanta_ids[0]), (&quanta.quanta[1], quanta.quanta_ids[1])],
        );

        log::info!("Tile grid {}x{}x{} ({} tiles, {} world units each), brush index capacity {}",
            grid.dims.x, grid.dims.y, grid.dims.z, tile_count, grid.tile_size, brush_capacity);

        Self { grid, prefix, brushes, quanta: quanta_set }
    }

    fn plan_sort(&self, set: &SortSet, bin: usize, plan: &mut FramePlan) {
        let bins = &set.bins[bin];
        let entity = set.entities[bin];
        let component = Component::TileBinner;
        let work = [groups(set.entity_count, set.workgroup), 1, 1];

        plan.clear(component, bins.tiles_id);
        plan.clear(component, set.cursor_id);
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE);

        plan.dispatch(
            DispatchOp::new(component, set.labels[0], set.histogram, set.bindings[bin], work)
                .reads(&[entity])
                .writes(&[bins.tiles_id]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);

        plan.dispatch(
            DispatchOp::new(component, set.labels[1], self.prefix, set.prefix_bindings[bin], [1, 1, 1])
                .reads(&[bins.tiles_id])
                .writes(&[bins.tiles_id]),
        );
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);

        plan.dispatch(
            DispatchOp::new(component, set.labels[2], set.scatter, set.bindings[bin], work)
                .reads(&[entity, bins.tiles_id])
                .writes(&[set.cursor_id, bins.indices_id]),
        );

        if let Some((label, kernel)) = set.order {
            plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
            plan.dispatch(
                DispatchOp::new(component, label, kernel, set.bindings[bin], [groups(self.grid.tile_count(), set.workgroup), 1, 1])
                    .reads(&[bins.tiles_id, bins.indices_id])
                    .writes(&[bins.indices_id]),
            );
        }
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE.union(Barrier::COMPUTE_TO_TRANSFER));
    }

    /// Brush sort; reads the brush buffer, so host writes must be visible
    pub fn plan_brush_sort(&self, plan: &mut FramePlan) {
        self.plan_sort(&self.brushes, 0, plan);
    }

    /// Quanta sort of the input buffer of `parity`
    pub fn plan_quanta_sort(&self, plan: &mut FramePlan, parity: usize) {
        self.plan_sort(&self.quanta, parity % 2, plan);
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn brush_bins(&self) -> &TileBins {
        &self.brushes.bins[0]
    }

    pub fn quanta_bins(&self, parity: usize) -> &TileBins {
        &self.quanta.bins[parity % 2]
    }

    pub fn brush_params(&self) -> &wgpu::Buffer {
        &self.brushes.params
    }

    pub fn quanta_params(&self) -> &wgpu::Buffer {
        &self.quanta.params
    }
}
