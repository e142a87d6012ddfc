//! Quanta field: records, snapshots, bootstrap phase and the GPU step

pub mod quanta;
pub mod serialize;
pub mod phase;
pub mod simulator;

pub use quanta::{lattice_dims, Deformation, Quanta, QuantaField, SimParams};
pub use phase::SimPhase;
pub use simulator::{claimed_per_brush, QuantaBuffers, Simulator};
