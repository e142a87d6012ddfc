//! WGSL sources, embedded at compile time

/// Voxel layout, distance packing and level parameters
pub const VOXEL_COMMON: &str = include_str!("../../shaders/voxel_common.wgsl");
/// Brush layout and opcodes
pub const BRUSH_COMMON: &str = include_str!("../../shaders/brush_common.wgsl");
/// Quanta and deformation layouts
pub const QUANTA_COMMON: &str = include_str!("../../shaders/quanta_common.wgsl");
/// Tile grid parameters and tile record
pub const TILE_COMMON: &str = include_str!("../../shaders/tile_common.wgsl");

pub const VOXEL_CLEAR: &str = include_str!("../../shaders/voxel_clear.wgsl");
pub const BRUSH_WRITE: &str = include_str!("../../shaders/brush_write.wgsl");
pub const SMOOTH: &str = include_str!("../../shaders/smooth.wgsl");
pub const SWEEP: &str = include_str!("../../shaders/sweep.wgsl");
pub const COLLAPSE: &str = include_str!("../../shaders/collapse.wgsl");

pub const TILE_BIN_BRUSHES: &str = include_str!("../../shaders/tile_bin_brushes.wgsl");
pub const TILE_BIN_QUANTA: &str = include_str!("../../shaders/tile_bin_quanta.wgsl");
pub const TILE_PREFIX: &str = include_str!("../../shaders/tile_prefix.wgsl");

pub const QUANTA_UPDATE: &str = include_str!("../../shaders/quanta_update.wgsl");
pub const BRUSH_FILL: &str = include_str!("../../shaders/brush_fill.wgsl");

pub const DUAL_CONTOUR: &str = include_str!("../../shaders/dual_contour.wgsl");
pub const FINALIZE_DRAW: &str = include_str!("../../shaders/finalize_draw.wgsl");
