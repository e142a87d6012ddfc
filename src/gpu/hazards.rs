//! Frame plan hazard checking.
//!
//! Walks a [`FramePlan`] in order and tracks, per resource, the last write
//! and which stage/access scopes barriers have made it visible to. Every
//! later access by a different op must be covered by such a scope. A read
//! followed by a write needs a barrier whose source stage includes the read.
//! Each resource may have only one writing component per frame.

use std::collections::HashMap;

use thiserror::Error;

use crate::gpu::plan::{Access, Barrier, Component, FramePlan, Op, ResourceId, Stage};

/// Ordering violation found in a frame plan
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Hazard {
    #[error("{resource:?} written by op {writer} and accessed by op {accessor} without a covering barrier")]
    Unsynchronized { resource: ResourceId, writer: usize, accessor: usize },

    #[error("{resource:?} read by op {reader} and overwritten by op {writer} without an execution barrier")]
    WriteAfterRead { resource: ResourceId, reader: usize, writer: usize },

    #[error("{resource:?} written by both {first} and {second} in one frame")]
    MultipleWriters { resource: ResourceId, first: Component, second: Component },
}

#[derive(Clone, Copy, Debug)]
struct LastWrite {
    op: usize,
    stage: Stage,
    access: Access,
}

#[derive(Debug)]
struct ResourceState {
    last_write: Option<LastWrite>,
    visible_stage: Stage,
    visible_access: Access,
    pending_reads: Vec<(usize, Stage)>,
    writer: Option<Component>,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            last_write: None,
            visible_stage: Stage::empty(),
            visible_access: Access::empty(),
            pending_reads: Vec::new(),
            writer: None,
        }
    }
}

impl ResourceState {
    fn apply_barrier(&mut self, barrier: &Barrier) {
        if let Some(w) = self.last_write {
            if barrier.src_stage.contains(w.stage) && barrier.src_access.contains(w.access) {
                self.visible_stage |= barrier.dst_stage;
                self.visible_access |= barrier.dst_access;
            }
        }
        self.pending_reads.retain(|(_, stage)| !barrier.src_stage.contains(*stage));
    }
}

/// Check a plan, returning every hazard found
pub fn validate(plan: &FramePlan) -> Vec<Hazard> {
    let mut states: HashMap<ResourceId, ResourceState> = HashMap::new();
    let mut hazards = Vec::new();

    for (index, op) in plan.ops().iter().enumerate() {
        if let Op::Barrier(barrier) = op {
            for state in states.values_mut() {
                state.apply_barrier(barrier);
            }
            continue;
        }

        let accesses = op.accesses();
        let component = op.component();

        for a in &accesses {
            let state = states.entry(a.resource).or_default();

            if let Some(w) = state.last_write {
                let covered = state.visible_stage.contains(a.stage) && state.visible_access.contains(a.access);
                if w.op != index && !covered {
                    hazards.push(Hazard::Unsynchronized {
                        resource: a.resource,
                        writer: w.op,
                        accessor: index,
                    });
                }
            }

            if a.write {
                if let Some((reader, _)) = state.pending_reads.iter().find(|(op, _)| *op != index) {
                    hazards.push(Hazard::WriteAfterRead {
                        resource: a.resource,
                        reader: *reader,
                        writer: index,
                    });
                }
                if let (Some(first), Some(second)) = (state.writer, component) {
                    if first != second {
                        hazards.push(Hazard::MultipleWriters { resource: a.resource, first, second });
                    }
                }
            }
        }

        for a in &accesses {
            let state = states.entry(a.resource).or_default();
            if a.write {
                state.last_write = Some(LastWrite { op: index, stage: a.stage, access: a.access });
                state.visible_stage = Stage::empty();
                state.visible_access = Access::empty();
                state.pending_reads.clear();
                if state.writer.is_none() {
                    state.writer = component;
                }
            } else {
                state.pending_reads.push((index, a.stage));
            }
        }
    }

    hazards
}

/// Log every hazard and report whether the plan is clean
pub fn check(plan: &FramePlan) -> bool {
    let hazards = validate(plan);
    for hazard in &hazards {
        log::error!("frame plan hazard: {}", hazard);
    }
    hazards.is_empty()
}
