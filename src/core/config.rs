//! Pipeline configuration.
//!
//! Everything the per-frame driver needs to size its GPU resources lives in
//! [`EngineConfig`]. The config is plain serde data so it can be tweaked from
//! a JSON file next to the host application.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::Result;

/// Number of voxel detail levels
pub const LEVEL_COUNT: usize = 3;

/// Default quanta count (one quanta per lattice site)
pub const DEFAULT_QUANTA_COUNT: u32 = 1_048_576;

/// Largest quanta count the snapshot and dispatch sizes are laid out for
pub const MAX_QUANTA_COUNT: u32 = 8_388_608;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Full pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extent of the quanta field in world units (x, y, z).
    pub field_size: [i32; 3],
    /// Fixed number of simulated quanta. Must be a power of two.
    pub quanta_count: u32,
    /// Voxel detail levels, finest first.
    pub levels: [LevelConfig; LEVEL_COUNT],
    /// Tile edge length in voxels of the coarsest level.
    pub tile_size: u32,
    /// Directional sweeps per level per frame.
    pub sweep_iterations: u32,
    /// Smoothing passes run before the sweeps.
    pub smoothing_passes: u32,
    /// Frames during which brushes claim nearby quanta.
    pub bootstrap_frames: u32,
    /// World SDF mip generation.
    pub collapse: CollapseConfig,
    /// Device memory budget for the voxel tier estimate (megabytes).
    pub memory_budget_mb: u64,
    /// Edge length of the per-brush SDF textures.
    pub brush_texture_resolution: u32,
    /// Vertex budget of the extracted mesh, per mid-level voxel.
    pub mesh_vertices_per_voxel: f32,
    /// Particle/material simulation constants.
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            field_size: [32, 32, 16],
            quanta_count: DEFAULT_QUANTA_COUNT,
            levels: [
                LevelConfig { resolution: 256, world_bounds: 8.0 },
                LevelConfig { resolution: 128, world_bounds: 16.0 },
                LevelConfig { resolution: 64, world_bounds: 32.0 },
            ],
            tile_size: 8,
            sweep_iterations: 8,
            smoothing_passes: 1,
            bootstrap_frames: 3,
            collapse: CollapseConfig::default(),
            memory_budget_mb: 2048,
            brush_texture_resolution: 64,
            mesh_vertices_per_voxel: 0.75,
            simulation: SimulationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values no GPU layout can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.quanta_count == 0 || !self.quanta_count.is_power_of_two() {
            return Err(Error::Format(format!(
                "quanta_count must be a power of two, got {}",
                self.quanta_count
            )));
        }
        if self.quanta_count > MAX_QUANTA_COUNT {
            return Err(Error::Format(format!(
                "quanta_count {} exceeds the maximum {}",
                self.quanta_count, MAX_QUANTA_COUNT
            )));
        }
        if self.field_size.iter().any(|&s| s <= 0) {
            return Err(Error::Format(format!("field_size must be positive, got {:?}", self.field_size)));
        }
        for (i, level) in self.levels.iter().enumerate() {
            if level.resolution == 0 || level.world_bounds <= 0.0 {
                return Err(Error::Format(format!("level {} has an empty grid", i + 1)));
            }
        }
        let coarsest = self.levels[LEVEL_COUNT - 1].world_bounds;
        if self.field_size.iter().any(|&s| s as f32 > coarsest) {
            return Err(Error::Format(format!(
                "field_size {:?} does not fit inside the coarsest level bounds {}",
                self.field_size, coarsest
            )));
        }
        if self.tile_size == 0 || self.levels[LEVEL_COUNT - 1].resolution % self.tile_size != 0 {
            return Err(Error::Format(format!(
                "tile_size {} must divide the coarsest resolution {}",
                self.tile_size,
                self.levels[LEVEL_COUNT - 1].resolution
            )));
        }
        if self.brush_texture_resolution < 2 {
            return Err(Error::Format("brush_texture_resolution must be at least 2".into()));
        }
        if self.collapse.enabled && self.collapse.halving.iter().any(|&h| h < 2) {
            return Err(Error::Format("collapse halving factors must be >= 2".into()));
        }
        if !(self.mesh_vertices_per_voxel > 0.0) {
            return Err(Error::Format("mesh_vertices_per_voxel must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// One voxel detail level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Voxels per axis at the highest quality tier.
    pub resolution: u32,
    /// Edge length of the cube the level covers, centered at the origin.
    pub world_bounds: f32,
}

/// World SDF mip generation from the coarsest level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseConfig {
    pub enabled: bool,
    /// Per-mip reduction factor relative to the previous mip.
    pub halving: Vec<u32>,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            halving: vec![2, 2, 2],
        }
    }
}

impl CollapseConfig {
    /// Cumulative reduction factor of every mip.
    pub fn factors(&self) -> Vec<u32> {
        self.halving
            .iter()
            .scan(1u32, |acc, &h| {
                *acc = acc.saturating_mul(h);
                Some(*acc)
            })
            .collect()
    }
}

/// Material simulation constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed step in seconds.
    pub dt: f32,
    /// Spring constant between neighbouring quanta.
    pub stiffness: f32,
    /// Velocity retained per step (0-1).
    pub damping: f32,
    pub gravity: [f32; 3],
    /// Distance below which quanta and surfaces repel.
    pub collision_radius: f32,
    /// Neighbours inspected per quanta per step.
    pub neighbor_cap: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            stiffness: 40.0,
            damping: 0.98,
            gravity: [0.0, -9.81, 0.0],
            collision_radius: 0.25,
            neighbor_cap: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::quanta::QuantaField;

    #[test]
    fn test_default_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_field_fits_coarsest_level() {
        let config = EngineConfig::default();
        let half = config.levels[LEVEL_COUNT - 1].world_bounds * 0.5;
        let field = QuantaField::seeded(config.field_size, config.quanta_count);
        assert!(field
            .quanta
            .iter()
            .filter(|q| q.mass() > 0.0)
            .all(|q| q.position[..3].iter().all(|c| c.abs() <= half)));
    }

    #[test]
    fn test_rejects_field_larger_than_coarsest_level() {
        let config = EngineConfig { field_size: [64, 64, 16], ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Format(_))));
        let config = EngineConfig { field_size: [32, 32, 32], ..Default::default() };
        config.validate().unwrap();
    }

    #[test]
    fn test_collapse_factors_are_cumulative() {
        let collapse = CollapseConfig { enabled: true, halving: vec![2, 4, 2] };
        assert_eq!(collapse.factors(), vec![2, 8, 16]);
    }

    #[test]
    fn test_rejects_non_power_of_two_quanta() {
        let config = EngineConfig { quanta_count: 1000, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Format(_))));
    }

    #[test]
    fn test_rejects_oversized_quanta_count() {
        let config = EngineConfig { quanta_count: MAX_QUANTA_COUNT * 2, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Format(_))));
        let config = EngineConfig { quanta_count: MAX_QUANTA_COUNT, ..Default::default() };
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_tile_size_not_dividing_resolution() {
        let config = EngineConfig { tile_size: 7, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/claybrush.json");

        let config = EngineConfig {
            quanta_count: 4096,
            sweep_iterations: 12,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "tile_size": 4 }"#).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.tile_size, 4);
        assert_eq!(loaded.quanta_count, DEFAULT_QUANTA_COUNT);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));
    }
}
