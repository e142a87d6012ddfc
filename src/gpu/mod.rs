//! GPU plumbing shared by every stage: device context, frame plans, hazard
//! checking, plan execution and readback.

pub mod context;
pub mod plan;
pub mod hazards;
pub mod table;
pub mod layout;
pub mod executor;
pub mod readback;
pub mod shaders;

pub use context::GpuContext;
pub use plan::{Access, Barrier, BindingId, Component, DispatchOp, FramePlan, KernelId, Op, ResourceId, Stage};
pub use table::GpuTable;
pub use readback::{ReadbackGuard, ReadbackStatus, ReadbackTicket};
