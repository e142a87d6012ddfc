//! Lowers a [`FramePlan`] onto a wgpu command encoder.
//!
//! Runs of dispatches with no barrier between them share one compute pass.
//! Barriers, clears and copies end the current pass; wgpu synchronises usage
//! across pass and transfer boundaries, which is where the plan's barriers sit.

use crate::gpu::plan::{FramePlan, Op};
use crate::gpu::table::GpuTable;

/// What one recording produced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub compute_passes: u32,
    pub dispatches: u32,
    pub transfers: u32,
    /// Ops skipped because a handle was missing from the table
    pub skipped: u32,
}

/// Record every op of `plan` into `encoder`
pub fn record(plan: &FramePlan, table: &GpuTable, encoder: &mut wgpu::CommandEncoder) -> RecordStats {
    let ops = plan.ops();
    let mut stats = RecordStats::default();
    let mut i = 0;

    while i < ops.len() {
        match &ops[i] {
            Op::Dispatch(_) => {
                let start = i;
                while i < ops.len() && matches!(ops[i], Op::Dispatch(_)) {
                    i += 1;
                }

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("claybrush_compute"),
                    timestamp_writes: None,
                });
                stats.compute_passes += 1;

                for op in &ops[start..i] {
                    let Op::Dispatch(d) = op else { continue };
                    let (Some(pipeline), Some(bind_group)) = (table.kernel(d.kernel), table.binding(d.binding)) else {
                        log::error!("dispatch {} references a missing kernel or binding", d.label);
                        stats.skipped += 1;
                        continue;
                    };
                    pass.set_pipeline(pipeline);
                    match d.dynamic_offset {
                        Some(offset) => pass.set_bind_group(0, bind_group, &[offset]),
                        None => pass.set_bind_group(0, bind_group, &[]),
                    }
                    let [x, y, z] = d.workgroups;
                    pass.dispatch_workgroups(x, y, z);
                    log::trace!("dispatch {} ({}) {}x{}x{}", d.label, table.kernel_label(d.kernel), x, y, z);
                    stats.dispatches += 1;
                }
                continue;
            }
            Op::Clear { resource, .. } => match table.buffer(*resource) {
                Some(buffer) => {
                    encoder.clear_buffer(buffer, 0, None);
                    stats.transfers += 1;
                }
                None => {
                    log::error!("clear of non-buffer resource {}", table.label(*resource));
                    stats.skipped += 1;
                }
            },
            Op::Copy { src, dst, .. } => match (table.buffer(*src), table.buffer(*dst)) {
                (Some(s), Some(d)) => {
                    encoder.copy_buffer_to_buffer(s, 0, d, 0, s.size().min(d.size()));
                    stats.transfers += 1;
                }
                _ => {
                    log::error!("copy {} -> {} needs two buffers", table.label(*src), table.label(*dst));
                    stats.skipped += 1;
                }
            },
            Op::HostWrite { .. } | Op::Barrier(_) | Op::Handoff { .. } => {}
        }
        i += 1;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::test_support;
    use crate::gpu::plan::{Component, ResourceId};

    #[test]
    fn test_copy_and_clear_execute() {
        let Some(ctx) = test_support::context() else { return };

        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let a = crate::gpu::layout::storage_buffer(&ctx.device, "a", 64, usage);
        let b = crate::gpu::layout::storage_buffer(&ctx.device, "b", 64, usage);
        ctx.queue.write_buffer(&a, 0, bytemuck::cast_slice(&[7u32; 16]));

        let mut table = GpuTable::new();
        let ra = table.add_buffer("a", &a);
        let rb = table.add_buffer("b", &b);
        let missing = ResourceId(99);

        let mut plan = FramePlan::new();
        plan.copy(Component::Simulator, ra, rb);
        plan.clear(Component::Simulator, missing);

        let mut stats = RecordStats::default();
        ctx.submit_and_wait("executor_test", |encoder| {
            stats = record(&plan, &table, encoder);
        })
        .unwrap();

        assert_eq!(stats.transfers, 1);
        assert_eq!(stats.skipped, 1);
        let words: Vec<u32> = crate::gpu::readback::read_pod_blocking(&ctx, &b, 16).unwrap();
        assert!(words.iter().all(|&w| w == 7));
    }
}
