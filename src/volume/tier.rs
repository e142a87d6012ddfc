//! Voxel resolution tiers.
//!
//! The voxel grid size is picked once at setup by estimating the memory of
//! every volume resource at a tier and walking down the tiers until the
//! estimate fits the budget. The selector only ever moves down.

use crate::core::config::{EngineConfig, LEVEL_COUNT};
use crate::core::error::Error;
use crate::volume::voxel::{GpuVoxel, LevelGrid};

/// Smallest per-axis resolution any tier produces
const MIN_RESOLUTION: u32 = 8;

/// Canonical frame slots per level
pub const FRAME_SLOTS: u64 = 3;
/// Scratch ping-pong buffers per level
pub const SCRATCH_SLOTS: u64 = 2;

/// Quality tiers, highest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTier {
    Ultra,
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [QualityTier::Ultra, QualityTier::High, QualityTier::Medium, QualityTier::Low];

    /// Resolution divisor applied to every level
    pub fn divisor(self) -> u32 {
        match self {
            QualityTier::Ultra => 1,
            QualityTier::High => 2,
            QualityTier::Medium => 4,
            QualityTier::Low => 8,
        }
    }

    pub fn lower(self) -> Option<QualityTier> {
        match self {
            QualityTier::Ultra => Some(QualityTier::High),
            QualityTier::High => Some(QualityTier::Medium),
            QualityTier::Medium => Some(QualityTier::Low),
            QualityTier::Low => None,
        }
    }
}

/// Memory estimate of the volume resources at one tier
#[derive(Clone, Debug, PartialEq)]
pub struct TierEstimate {
    pub tier: QualityTier,
    pub levels: [LevelGrid; LEVEL_COUNT],
    pub total_bytes: u64,
    /// Largest single buffer, checked against the device allocation limit
    pub largest_buffer: u64,
}

impl TierEstimate {
    /// Coarsest level, which spans the whole world
    pub fn world(&self) -> &LevelGrid {
        &self.levels[LEVEL_COUNT - 1]
    }
}

/// Estimate volume memory at `tier`. `fixed_bytes` covers resources that do
/// not scale with the tier (brush textures).
pub fn estimate(config: &EngineConfig, tier: QualityTier, fixed_bytes: u64) -> TierEstimate {
    let levels: [LevelGrid; LEVEL_COUNT] = std::array::from_fn(|i| {
        let level = config.levels[i];
        LevelGrid::new((level.resolution / tier.divisor()).max(MIN_RESOLUTION), level.world_bounds)
    });

    let voxel_bytes: u64 = levels
        .iter()
        .map(|l| l.buffer_size() * (FRAME_SLOTS + SCRATCH_SLOTS))
        .sum();

    let world = levels[LEVEL_COUNT - 1].resolution;
    let mip_bytes: u64 = if config.collapse.enabled {
        config
            .collapse
            .factors()
            .iter()
            .map(|f| ((world / f).max(1) as u64).pow(3) * 4)
            .sum()
    } else {
        0
    };

    let largest_buffer = levels.iter().map(LevelGrid::buffer_size).max().unwrap_or(0);

    TierEstimate {
        tier,
        levels,
        total_bytes: voxel_bytes + mip_bytes + fixed_bytes,
        largest_buffer,
    }
}

/// One-way tier selection
#[derive(Clone, Debug, Default)]
pub struct TierSelector {
    chosen: Option<QualityTier>,
}

impl TierSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chosen(&self) -> Option<QualityTier> {
        self.chosen
    }

    /// Pick the highest tier at or below the current one whose estimate fits.
    ///
    /// Downgrades are logged. If even the lowest tier exceeds the budget it is
    /// used anyway; only a buffer larger than the device can allocate fails.
    pub fn set_voxel_grid_size(
        &mut self,
        config: &EngineConfig,
        budget_bytes: u64,
        max_buffer: u64,
        fixed_bytes: u64,
    ) -> Result<TierEstimate, Error> {
        let mut tier = self.chosen.unwrap_or(QualityTier::Ultra);
        loop {
            let e = estimate(config, tier, fixed_bytes);
            let fits = e.total_bytes <= budget_bytes && e.largest_buffer <= max_buffer;
            if fits {
                break self.commit(e);
            }
            match tier.lower() {
                Some(next) => {
                    log::warn!("Voxel tier {:?} needs {}MB (largest buffer {}MB) of {}MB budget, trying {:?}",
                        tier, e.total_bytes / 1024 / 1024, e.largest_buffer / 1024 / 1024,
                        budget_bytes / 1024 / 1024, next);
                    tier = next;
                }
                None if e.largest_buffer <= max_buffer => {
                    log::warn!("Voxel tier {:?} exceeds the {}MB budget; using it anyway",
                        tier, budget_bytes / 1024 / 1024);
                    break self.commit(e);
                }
                None => {
                    break Err(Error::Budget(format!(
                        "lowest voxel tier needs a {} byte buffer, device allows {}",
                        e.largest_buffer, max_buffer
                    )));
                }
            }
        }
    }

    fn commit(&mut self, e: TierEstimate) -> Result<TierEstimate, Error> {
        log::info!("Voxel tier {:?}: resolutions {}/{}/{}, {}MB",
            e.tier, e.levels[0].resolution, e.levels[1].resolution, e.levels[2].resolution,
            e.total_bytes / 1024 / 1024);
        self.chosen = Some(e.tier);
        Ok(e)
    }
}

/// Bytes of one GPU voxel
pub const VOXEL_BYTES: u64 = std::mem::size_of::<GpuVoxel>() as u64;

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_estimates_shrink_with_tier() {
        let config = EngineConfig::default();
        let sizes: Vec<u64> = QualityTier::ALL
            .iter()
            .map(|&t| estimate(&config, t, 0).total_bytes)
            .collect();
        assert!(sizes.windows(2).all(|w| w[0] > w[1]), "{:?}", sizes);
    }

    #[test]
    fn test_ultra_fits_large_budget() {
        let config = EngineConfig::default();
        let mut selector = TierSelector::new();
        let e = selector.set_voxel_grid_size(&config, 64 * GB, u64::MAX, 0).unwrap();
        assert_eq!(e.tier, QualityTier::Ultra);
        assert_eq!(e.levels[0].resolution, 256);
    }

    #[test]
    fn test_degrades_until_fit() {
        let config = EngineConfig::default();
        let high = estimate(&config, QualityTier::High, 0).total_bytes;
        let mut selector = TierSelector::new();
        let e = selector.set_voxel_grid_size(&config, high, u64::MAX, 0).unwrap();
        assert_eq!(e.tier, QualityTier::High);
        assert_eq!(e.levels[1].resolution, 64);
    }

    #[test]
    fn test_buffer_limit_forces_downgrade() {
        let config = EngineConfig::default();
        let mut selector = TierSelector::new();
        // 128^3 voxels of 32 bytes = 64MB; L1 at High is exactly that.
        let e = selector.set_voxel_grid_size(&config, 64 * GB, 64 * 1024 * 1024, 0).unwrap();
        assert_eq!(e.tier, QualityTier::High);
    }

    #[test]
    fn test_never_climbs_back() {
        let config = EngineConfig::default();
        let mut selector = TierSelector::new();
        let medium = estimate(&config, QualityTier::Medium, 0).total_bytes;
        selector.set_voxel_grid_size(&config, medium, u64::MAX, 0).unwrap();
        assert_eq!(selector.chosen(), Some(QualityTier::Medium));

        let e = selector.set_voxel_grid_size(&config, 64 * GB, u64::MAX, 0).unwrap();
        assert_eq!(e.tier, QualityTier::Medium);
    }

    #[test]
    fn test_tiny_budget_uses_lowest_tier() {
        let config = EngineConfig::default();
        let mut selector = TierSelector::new();
        let e = selector.set_voxel_grid_size(&config, 1, u64::MAX, 0).unwrap();
        assert_eq!(e.tier, QualityTier::Low);
    }

    #[test]
    fn test_impossible_buffer_limit_is_an_error() {
        let config = EngineConfig::default();
        let mut selector = TierSelector::new();
        let result = selector.set_voxel_grid_size(&config, 64 * GB, 1024, 0);
        assert!(matches!(result, Err(Error::Budget(_))));
    }

    #[test]
    fn test_fixed_bytes_count_against_budget() {
        let config = EngineConfig::default();
        let ultra = estimate(&config, QualityTier::Ultra, 0).total_bytes;
        let mut selector = TierSelector::new();
        let e = selector.set_voxel_grid_size(&config, ultra, u64::MAX, 1).unwrap();
        assert_eq!(e.tier, QualityTier::High);
        assert_eq!(VOXEL_BYTES, 32);
    }
}
