//! Voxel volume: per-level voxel buffers, brush SDF textures and world mips

pub mod voxel;
pub mod tier;
pub mod store;

pub use voxel::{decode_distance, encode_distance, GpuVoxel, LevelGrid, LevelParams, UNCLAIMED};
pub use tier::{QualityTier, TierEstimate, TierSelector};
pub use store::{LevelBuffers, VolumeStore, VolumeTexture, WorldMip};
