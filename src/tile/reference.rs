//! Tile grid geometry and the CPU version of the three-pass tile sort.
//!
//! The GPU binner runs the same histogram, exclusive scan and scatter; the
//! CPU code is used by tests and benchmarks and defines the expected counts
//! and offsets. Entity order inside a tile is not part of the contract.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

use crate::math::Aabb;
use crate::volume::voxel::LevelGrid;

/// Tile record as laid out on the GPU
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct GpuTile {
    pub count: u32,
    pub offset: u32,
}

/// Tile sort uniform (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct TileParams {
    /// xyz = grid min corner, w = tile edge length
    pub origin: [f32; 4],
    /// xyz = tiles per axis, w = tile count
    pub dims: [u32; 4],
    pub entity_count: u32,
    /// Length of the index array
    pub capacity: u32,
    pub _pad: [u32; 2],
}

/// Fixed grid of cubic tiles over the world level
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileGrid {
    pub origin: Vec3,
    pub tile_size: f32,
    pub dims: UVec3,
}

impl TileGrid {
    /// Tiles of `tile_voxels` voxels per edge over `world`
    pub fn new(world: &LevelGrid, tile_voxels: u32) -> Self {
        let per_axis = world.resolution.div_ceil(tile_voxels.max(1)).max(1);
        Self {
            origin: world.origin(),
            tile_size: world.voxel_size() * tile_voxels.max(1) as f32,
            dims: UVec3::splat(per_axis),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.dims.x * self.dims.y * self.dims.z
    }

    /// Tile containing `p`; points outside the grid go to the nearest edge tile
    pub fn tile_coord(&self, p: Vec3) -> UVec3 {
        let g = ((p - self.origin) / self.tile_size).floor();
        g.clamp(Vec3::ZERO, (self.dims - UVec3::ONE).as_vec3()).as_uvec3()
    }

    #[inline]
    pub fn linear(&self, c: UVec3) -> u32 {
        (c.z * self.dims.y + c.y) * self.dims.x + c.x
    }

    pub fn tile_index(&self, p: Vec3) -> u32 {
        self.linear(self.tile_coord(p))
    }

    /// Every tile an AABB overlaps, after clamping to the grid
    pub fn tiles_overlapping(&self, aabb: &Aabb) -> impl Iterator<Item = u32> + '_ {
        let lo = self.tile_coord(aabb.min);
        let hi = self.tile_coord(aabb.max);
        (lo.z..=hi.z).flat_map(move |z| {
            (lo.y..=hi.y).flat_map(move |y| (lo.x..=hi.x).map(move |x| self.linear(UVec3::new(x, y, z))))
        })
    }

    pub fn params(&self, entity_count: u32, capacity: u32) -> TileParams {
        TileParams {
            origin: self.origin.extend(self.tile_size).to_array(),
            dims: [self.dims.x, self.dims.y, self.dims.z, self.tile_count()],
            entity_count,
            capacity,
            _pad: [0; 2],
        }
    }
}

/// Result of one tile sort
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileSort {
    pub counts: Vec<u32>,
    pub offsets: Vec<u32>,
    /// Entity indices grouped by tile
    pub indices: Vec<u32>,
}

impl TileSort {
    /// Entities binned into `tile`
    pub fn entities(&self, tile: u32) -> &[u32] {
        let t = tile as usize;
        let start = self.offsets[t] as usize;
        let end = (start + self.counts[t] as usize).min(self.indices.len());
        &self.indices[start.min(end)..end]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Offsets are an exclusive scan of counts and the index array holds
    /// exactly their sum
    pub fn is_consistent(&self) -> bool {
        let ordered = self
            .offsets
            .windows(2)
            .zip(&self.counts)
            .all(|(w, &c)| w[0] <= w[1] && w[0] + c <= w[1]);
        let first = self.offsets.first().is_none_or(|&o| o == 0);
        ordered && first && self.total() as usize == self.indices.len()
    }
}

/// Count entities per tile
pub fn histogram(tile_count: u32, tiles: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut counts = vec![0u32; tile_count as usize];
    for t in tiles {
        counts[t as usize] += 1;
    }
    counts
}

/// Exclusive prefix sum
pub fn exclusive_scan(counts: &[u32]) -> Vec<u32> {
    counts
        .iter()
        .scan(0u32, |acc, &c| {
            let offset = *acc;
            *acc += c;
            Some(offset)
        })
        .collect()
}

/// Write each (tile, entity) pair at `offset[tile] + cursor[tile]++`
pub fn scatter(counts: &[u32], offsets: &[u32], pairs: impl IntoIterator<Item = (u32, u32)>) -> Vec<u32> {
    let total: u32 = counts.iter().sum();
    let mut cursor = vec![0u32; counts.len()];
    let mut indices = vec![0u32; total as usize];
    for (tile, entity) in pairs {
        let t = tile as usize;
        let slot = offsets[t] + cursor[t];
        cursor[t] += 1;
        indices[slot as usize] = entity;
    }
    indices
}

/// Sort points, one tile each
pub fn sort_points(grid: &TileGrid, points: &[Vec3]) -> TileSort {
    let tiles: Vec<u32> = points.iter().map(|&p| grid.tile_index(p)).collect();
    let counts = histogram(grid.tile_count(), tiles.iter().copied());
    let offsets = exclusive_scan(&counts);
    let indices = scatter(&counts, &offsets, tiles.iter().enumerate().map(|(i, &t)| (t, i as u32)));
    TileSort { counts, offsets, indices }
}

/// Sort boxes into every tile they overlap; `None` entries are skipped
pub fn sort_boxes(grid: &TileGrid, boxes: &[Option<Aabb>]) -> TileSort {
    let pairs: Vec<(u32, u32)> = boxes
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.as_ref().map(|b| (i, b)))
        .flat_map(|(i, b)| grid.tiles_overlapping(b).map(move |t| (t, i as u32)))
        .collect();
    let counts = histogram(grid.tile_count(), pairs.iter().map(|&(t, _)| t));
    let offsets = exclusive_scan(&counts);
    let indices = scatter(&counts, &offsets, pairs);
    TileSort { counts, offsets, indices }
}
