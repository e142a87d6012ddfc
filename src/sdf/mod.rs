//! Signed distance propagation over the voxel levels

pub mod sweep;
pub mod combine;
pub mod propagator;

pub use propagator::{write_passes, BrushPass, Propagator};
