//! Voxel record and distance packing.
//!
//! Distances are stored as order-preserving `u32` keys: comparing two keys as
//! unsigned integers gives the same order as comparing the distances, so the
//! GPU can `atomicMin` signed distances. [`UNCLAIMED`] sorts after every real
//! distance.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

/// Distance key of a voxel no brush or sweep has reached
pub const UNCLAIMED: u32 = u32::MAX;

/// Pack a distance into an order-preserving key
#[inline]
pub fn encode_distance(d: f32) -> u32 {
    let bits = d.to_bits();
    if bits & 0x8000_0000 != 0 { !bits } else { bits | 0x8000_0000 }
}

/// Unpack a key; `None` for [`UNCLAIMED`]
#[inline]
pub fn decode_distance(key: u32) -> Option<f32> {
    if key == UNCLAIMED {
        return None;
    }
    let bits = if key & 0x8000_0000 != 0 { key & 0x7FFF_FFFF } else { !key };
    Some(f32::from_bits(bits))
}

/// GPU voxel record (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct GpuVoxel {
    /// Packed distance, see [`encode_distance`]
    pub distance: u32,
    /// Ownership weight of `brush_id` (1 at the brush, decaying with propagation)
    pub ownership: f32,
    pub brush_id: u32,
    pub _pad: u32,
    /// xyz = surface normal estimate, w = unpacked distance
    pub normal_distance: [f32; 4],
}

impl GpuVoxel {
    pub const UNCLAIMED: GpuVoxel = GpuVoxel {
        distance: UNCLAIMED,
        ownership: 0.0,
        brush_id: u32::MAX,
        _pad: 0,
        normal_distance: [0.0; 4],
    };

    pub fn distance(&self) -> Option<f32> {
        decode_distance(self.distance)
    }
}

/// Per-level grid parameters (uniform, 32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct LevelParams {
    /// xyz = world-space min corner, w = voxel size
    pub origin: [f32; 4],
    /// x = y = z = resolution, w = voxel count
    pub dims: [u32; 4],
}

/// Geometry of one voxel level after tier selection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelGrid {
    pub resolution: u32,
    /// Edge length of the covered cube, centered at the origin
    pub world_bounds: f32,
}

impl LevelGrid {
    pub fn new(resolution: u32, world_bounds: f32) -> Self {
        Self { resolution, world_bounds }
    }

    pub fn voxel_size(&self) -> f32 {
        self.world_bounds / self.resolution as f32
    }

    pub fn voxel_count(&self) -> u32 {
        self.resolution.pow(3)
    }

    pub fn origin(&self) -> Vec3 {
        Vec3::splat(-self.world_bounds * 0.5)
    }

    /// World position of a voxel center
    pub fn voxel_center(&self, v: UVec3) -> Vec3 {
        self.origin() + (v.as_vec3() + Vec3::splat(0.5)) * self.voxel_size()
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let r = self.resolution as usize;
        (z as usize * r + y as usize) * r + x as usize
    }

    pub fn buffer_size(&self) -> u64 {
        self.voxel_count() as u64 * std::mem::size_of::<GpuVoxel>() as u64
    }

    pub fn params(&self) -> LevelParams {
        LevelParams {
            origin: self.origin().extend(self.voxel_size()).to_array(),
            dims: [self.resolution, self.resolution, self.resolution, self.voxel_count()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_preserves_order() {
        let values = [-1e9f32, -3.5, -0.25, -0.0, 0.0, 1e-6, 0.5, 2.0, 1e9, f32::INFINITY];
        for pair in values.windows(2) {
            assert!(
                encode_distance(pair[0]) <= encode_distance(pair[1]),
                "{} vs {}", pair[0], pair[1]
            );
        }
        assert!(encode_distance(f32::INFINITY) < UNCLAIMED);
    }

    #[test]
    fn test_encoding_roundtrips_bits() {
        for d in [-7.25f32, -0.0, 0.0, 0.125, 1234.5] {
            assert_eq!(decode_distance(encode_distance(d)).map(f32::to_bits), Some(d.to_bits()));
        }
        assert_eq!(decode_distance(UNCLAIMED), None);
    }

    #[test]
    fn test_voxel_layout() {
        assert_eq!(std::mem::size_of::<GpuVoxel>(), 32);
        assert_eq!(std::mem::size_of::<LevelParams>(), 32);
        assert_eq!(GpuVoxel::UNCLAIMED.distance(), None);
    }

    #[test]
    fn test_level_grid_geometry() {
        let level = LevelGrid::new(64, 32.0);
        assert_eq!(level.voxel_size(), 0.5);
        assert_eq!(level.origin(), Vec3::splat(-16.0));
        assert_eq!(level.voxel_center(UVec3::ZERO), Vec3::splat(-15.75));
        assert_eq!(level.index(1, 1, 1), 1 + 64 + 64 * 64);
        assert_eq!(level.buffer_size(), 64 * 64 * 64 * 32);
        assert_eq!(level.params().dims[3], 262_144);
    }
}
