//! Recorded frame plans.
//!
//! Stages do not talk to the command encoder directly. Each stage appends
//! [`Op`]s to a [`FramePlan`], declaring which resources every op reads and
//! writes and where the execution/memory barriers sit. The plan is checked by
//! [`crate::gpu::hazards`] and lowered onto wgpu by [`crate::gpu::executor`].

use std::fmt;

bitflags::bitflags! {
    /// Pipeline stages an access or barrier scope refers to
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct Stage: u32 {
        /// CPU writes staged through the queue
        const HOST = 1 << 0;
        /// Buffer clears and copies
        const TRANSFER = 1 << 1;
        const COMPUTE = 1 << 2;
        /// Indirect argument fetch of the external draw
        const DRAW_INDIRECT = 1 << 3;
        /// Vertex fetch of the external draw
        const VERTEX_INPUT = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Memory access kinds covered by a barrier
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct Access: u32 {
        const HOST_WRITE = 1 << 0;
        const TRANSFER_READ = 1 << 1;
        const TRANSFER_WRITE = 1 << 2;
        const SHADER_READ = 1 << 3;
        const SHADER_WRITE = 1 << 4;
        const INDIRECT_READ = 1 << 5;
        const VERTEX_READ = 1 << 6;
    }
}

/// Handle of a buffer or texture registered in a [`crate::gpu::GpuTable`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

/// Handle of a compute pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

/// Handle of a bind group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// Subsystem that records an op
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    BrushRegistry,
    VolumeStore,
    TileBinner,
    Propagator,
    Simulator,
    MeshExtractor,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::BrushRegistry => "brush_registry",
            Component::VolumeStore => "volume_store",
            Component::TileBinner => "tile_binner",
            Component::Propagator => "sdf_propagator",
            Component::Simulator => "simulator",
            Component::MeshExtractor => "mesh_extractor",
        };
        f.write_str(name)
    }
}

/// Execution and memory dependency between two groups of ops
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub src_stage: Stage,
    pub src_access: Access,
    pub dst_stage: Stage,
    pub dst_access: Access,
}

impl Barrier {
    pub const fn new(src_stage: Stage, src_access: Access, dst_stage: Stage, dst_access: Access) -> Self {
        Self { src_stage, src_access, dst_stage, dst_access }
    }

    /// Queue uploads visible to compute and transfer, and ordered before
    /// their later writes
    pub const HOST_TO_GPU: Barrier = Barrier::new(
        Stage::HOST,
        Access::HOST_WRITE,
        Stage::COMPUTE.union(Stage::TRANSFER),
        Access::SHADER_READ
            .union(Access::TRANSFER_READ)
            .union(Access::SHADER_WRITE)
            .union(Access::TRANSFER_WRITE),
    );

    /// Storage writes visible to the next dispatch
    pub const COMPUTE_TO_COMPUTE: Barrier = Barrier::new(
        Stage::COMPUTE,
        Access::SHADER_WRITE,
        Stage::COMPUTE,
        Access::SHADER_READ.union(Access::SHADER_WRITE),
    );

    /// Clears and copies visible to the next dispatch
    pub const TRANSFER_TO_COMPUTE: Barrier = Barrier::new(
        Stage::TRANSFER,
        Access::TRANSFER_WRITE,
        Stage::COMPUTE,
        Access::SHADER_READ.union(Access::SHADER_WRITE),
    );

    /// Storage writes visible to a copy
    pub const COMPUTE_TO_TRANSFER: Barrier = Barrier::new(
        Stage::COMPUTE,
        Access::SHADER_WRITE.union(Access::SHADER_READ),
        Stage::TRANSFER,
        Access::TRANSFER_READ.union(Access::TRANSFER_WRITE),
    );

    /// Copy results visible to a later copy
    pub const TRANSFER_TO_TRANSFER: Barrier = Barrier::new(
        Stage::TRANSFER,
        Access::TRANSFER_WRITE,
        Stage::TRANSFER,
        Access::TRANSFER_READ.union(Access::TRANSFER_WRITE),
    );

    /// Storage writes visible to an indirect draw
    pub const COMPUTE_TO_DRAW: Barrier = Barrier::new(
        Stage::COMPUTE,
        Access::SHADER_WRITE,
        Stage::DRAW_INDIRECT.union(Stage::VERTEX_INPUT),
        Access::INDIRECT_READ.union(Access::VERTEX_READ),
    );

    /// Merge two barriers into one covering both scopes
    pub const fn union(self, other: Barrier) -> Barrier {
        Barrier {
            src_stage: self.src_stage.union(other.src_stage),
            src_access: self.src_access.union(other.src_access),
            dst_stage: self.dst_stage.union(other.dst_stage),
            dst_access: self.dst_access.union(other.dst_access),
        }
    }
}

/// One compute dispatch
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOp {
    pub component: Component,
    pub label: &'static str,
    pub kernel: KernelId,
    pub binding: BindingId,
    /// Dynamic uniform offset for bind group 0
    pub dynamic_offset: Option<u32>,
    pub workgroups: [u32; 3],
    pub reads: Vec<ResourceId>,
    pub writes: Vec<ResourceId>,
}

impl DispatchOp {
    pub fn new(
        component: Component,
        label: &'static str,
        kernel: KernelId,
        binding: BindingId,
        workgroups: [u32; 3],
    ) -> Self {
        Self {
            component,
            label,
            kernel,
            binding,
            dynamic_offset: None,
            workgroups,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn reads(mut self, resources: &[ResourceId]) -> Self {
        self.reads.extend_from_slice(resources);
        self
    }

    pub fn writes(mut self, resources: &[ResourceId]) -> Self {
        self.writes.extend_from_slice(resources);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.dynamic_offset = Some(offset);
        self
    }
}

/// Recorded operation
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Queue write performed before the batch runs
    HostWrite { component: Component, resource: ResourceId },
    /// Zero-fill a buffer
    Clear { component: Component, resource: ResourceId },
    /// Whole-buffer copy
    Copy { component: Component, src: ResourceId, dst: ResourceId },
    Dispatch(DispatchOp),
    Barrier(Barrier),
    /// Resource released to an external consumer
    Handoff { resource: ResourceId, stage: Stage, access: Access },
}

/// A single declared access of one op
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub stage: Stage,
    pub access: Access,
    pub write: bool,
}

impl Op {
    /// Component recording the op, if it has one
    pub fn component(&self) -> Option<Component> {
        match self {
            Op::HostWrite { component, .. }
            | Op::Clear { component, .. }
            | Op::Copy { component, .. } => Some(*component),
            Op::Dispatch(d) => Some(d.component),
            Op::Barrier(_) | Op::Handoff { .. } => None,
        }
    }

    /// Every resource access the op performs
    pub fn accesses(&self) -> Vec<ResourceAccess> {
        let read = |resource, stage, access| ResourceAccess { resource, stage, access, write: false };
        let write = |resource, stage, access| ResourceAccess { resource, stage, access, write: true };
        match self {
            Op::HostWrite { resource, .. } => vec![write(*resource, Stage::HOST, Access::HOST_WRITE)],
            Op::Clear { resource, .. } => vec![write(*resource, Stage::TRANSFER, Access::TRANSFER_WRITE)],
            Op::Copy { src, dst, .. } => vec![
                read(*src, Stage::TRANSFER, Access::TRANSFER_READ),
                write(*dst, Stage::TRANSFER, Access::TRANSFER_WRITE),
            ],
            Op::Dispatch(d) => d
                .reads
                .iter()
                .map(|r| read(*r, Stage::COMPUTE, Access::SHADER_READ))
                .chain(d.writes.iter().map(|r| write(*r, Stage::COMPUTE, Access::SHADER_WRITE)))
                .collect(),
            Op::Barrier(_) => Vec::new(),
            Op::Handoff { resource, stage, access } => vec![read(*resource, *stage, *access)],
        }
    }

    /// Short name for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Op::HostWrite { component, resource } => format!("{}: host write {:?}", component, resource),
            Op::Clear { component, resource } => format!("{}: clear {:?}", component, resource),
            Op::Copy { component, src, dst } => format!("{}: copy {:?} -> {:?}", component, src, dst),
            Op::Dispatch(d) => format!("{}: dispatch {}", d.component, d.label),
            Op::Barrier(_) => "barrier".to_string(),
            Op::Handoff { resource, .. } => format!("handoff {:?}", resource),
        }
    }
}

/// Ordered ops of one frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramePlan {
    ops: Vec<Op>,
}

impl FramePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn host_write(&mut self, component: Component, resource: ResourceId) {
        self.ops.push(Op::HostWrite { component, resource });
    }

    pub fn clear(&mut self, component: Component, resource: ResourceId) {
        self.ops.push(Op::Clear { component, resource });
    }

    pub fn copy(&mut self, component: Component, src: ResourceId, dst: ResourceId) {
        self.ops.push(Op::Copy { component, src, dst });
    }

    pub fn dispatch(&mut self, op: DispatchOp) {
        self.ops.push(Op::Dispatch(op));
    }

    /// Append a barrier, merging with an immediately preceding one
    pub fn barrier(&mut self, barrier: Barrier) {
        if let Some(Op::Barrier(last)) = self.ops.last_mut() {
            *last = last.union(barrier);
        } else {
            self.ops.push(Op::Barrier(barrier));
        }
    }

    pub fn handoff(&mut self, resource: ResourceId, stage: Stage, access: Access) {
        self.ops.push(Op::Handoff { resource, stage, access });
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn dispatch_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Dispatch(_))).count()
    }

    pub fn barrier_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Barrier(_))).count()
    }

    /// Labels of all dispatches, in order
    pub fn dispatch_labels(&self) -> Vec<&'static str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Dispatch(d) => Some(d.label),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_barriers_merge() {
        let mut plan = FramePlan::new();
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE);
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
        assert_eq!(plan.barrier_count(), 1);
        let Op::Barrier(b) = plan.ops()[0] else { panic!("expected barrier") };
        assert!(b.src_stage.contains(Stage::TRANSFER | Stage::COMPUTE));
        assert!(b.src_access.contains(Access::TRANSFER_WRITE | Access::SHADER_WRITE));
    }

    #[test]
    fn test_dispatch_accesses() {
        let op = Op::Dispatch(
            DispatchOp::new(Component::Simulator, "update", KernelId(0), BindingId(0), [1, 1, 1])
                .reads(&[ResourceId(1)])
                .writes(&[ResourceId(2)]),
        );
        let accesses = op.accesses();
        assert_eq!(accesses.len(), 2);
        assert!(!accesses[0].write);
        assert_eq!(accesses[0].access, Access::SHADER_READ);
        assert!(accesses[1].write);
        assert_eq!(op.component(), Some(Component::Simulator));
    }

    #[test]
    fn test_copy_reads_src_writes_dst() {
        let op = Op::Copy { component: Component::Propagator, src: ResourceId(3), dst: ResourceId(4) };
        let accesses = op.accesses();
        assert_eq!(accesses[0].resource, ResourceId(3));
        assert!(!accesses[0].write);
        assert_eq!(accesses[1].resource, ResourceId(4));
        assert!(accesses[1].write);
    }

    #[test]
    fn test_counts_and_labels() {
        let mut plan = FramePlan::new();
        plan.clear(Component::TileBinner, ResourceId(0));
        plan.barrier(Barrier::TRANSFER_TO_COMPUTE);
        plan.dispatch(DispatchOp::new(Component::TileBinner, "histogram", KernelId(0), BindingId(0), [1, 1, 1]));
        plan.barrier(Barrier::COMPUTE_TO_COMPUTE);
        plan.dispatch(DispatchOp::new(Component::TileBinner, "prefix", KernelId(1), BindingId(1), [1, 1, 1]));
        assert_eq!(plan.len(), 5);
        assert_eq!(plan.dispatch_count(), 2);
        assert_eq!(plan.barrier_count(), 2);
        assert_eq!(plan.dispatch_labels(), vec!["histogram", "prefix"]);
    }
}
