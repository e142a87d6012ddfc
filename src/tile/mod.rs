//! Spatial tile binning of brushes and quanta

pub mod reference;
pub mod binner;

pub use reference::{GpuTile, TileGrid, TileParams, TileSort};
pub use binner::{TileBinner, TileBins};
