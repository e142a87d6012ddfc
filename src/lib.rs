//! Claybrush - GPU sculpting of signed distance fields from brushes, with a
//! quanta simulation and a dual-contoured surface mesh

pub mod core;
pub mod math;
pub mod gpu;
pub mod brush;
pub mod volume;
pub mod tile;
pub mod sdf;
pub mod sim;
pub mod mesh;
pub mod dispatch;

pub use crate::core::{EngineConfig, Error, Result};
pub use crate::dispatch::{Dispatch, MeshOutputs};
pub use crate::gpu::GpuContext;
