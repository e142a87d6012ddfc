//! CPU versions of the smoothing and directional sweep kernels.
//!
//! A sweep is one Jacobi step of a first-order upwind Eikonal update: every
//! voxel looks at its three upwind neighbours for the sweep's octant and
//! takes the Godunov solution if it is closer than what it holds. Unclaimed
//! voxels (`None`) act as infinitely far. Sign is kept from the voxel itself,
//! or taken from the nearest upwind neighbour when the voxel is unclaimed.

use glam::{IVec3, UVec3};

use crate::volume::voxel::LevelGrid;

/// Sweep direction signs for octant `k` (bit 0 = x, bit 1 = y, bit 2 = z;
/// a set bit sweeps towards negative coordinates)
pub fn octant(k: u32) -> IVec3 {
    let sign = |bit: u32| if k & bit != 0 { -1 } else { 1 };
    IVec3::new(sign(1), sign(2), sign(4))
}

/// First-order Godunov solution from three upwind distances (any order)
pub fn godunov(mut a: [f32; 3], h: f32) -> f32 {
    a.sort_by(|x, y| x.total_cmp(y));
    let [a0, a1, a2] = a;
    let mut u = a0 + h;
    if u > a1 {
        let diff = a0 - a1;
        u = 0.5 * (a0 + a1 + (2.0 * h * h - diff * diff).max(0.0).sqrt());
        if u > a2 {
            let s = a0 + a1 + a2;
            let q = a0 * a0 + a1 * a1 + a2 * a2 - h * h;
            u = (s + (s * s - 3.0 * q).max(0.0).sqrt()) / 3.0;
        }
    }
    u
}

fn at(grid: &LevelGrid, field: &[Option<f32>], c: IVec3) -> Option<f32> {
    let r = grid.resolution as i32;
    if c.min_element() < 0 || c.max_element() >= r {
        return None;
    }
    field[grid.index(c.x as u32, c.y as u32, c.z as u32)]
}

/// One sweep in octant `direction`
pub fn sweep_step(grid: &LevelGrid, src: &[Option<f32>], direction: u32) -> Vec<Option<f32>> {
    let h = grid.voxel_size();
    let s = octant(direction);
    let r = grid.resolution;
    let mut dst = src.to_vec();

    for z in 0..r {
        for y in 0..r {
            for x in 0..r {
                let c = UVec3::new(x, y, z).as_ivec3();
                let upwind = [
                    at(grid, src, c - IVec3::new(s.x, 0, 0)),
                    at(grid, src, c - IVec3::new(0, s.y, 0)),
                    at(grid, src, c - IVec3::new(0, 0, s.z)),
                ];
                let far = upwind.map(|d| d.map_or(f32::INFINITY, f32::abs));
                let candidate = godunov(far, h);
                if !candidate.is_finite() {
                    continue;
                }

                let index = grid.index(x, y, z);
                let own = src[index];
                if own.is_some_and(|d| d.abs() <= candidate) {
                    continue;
                }
                let sign_source = own.or_else(|| {
                    upwind
                        .iter()
                        .flatten()
                        .copied()
                        .min_by(|a, b| a.abs().total_cmp(&b.abs()))
                });
                let sign = match sign_source {
                    Some(d) if d < 0.0 => -1.0,
                    _ => 1.0,
                };
                dst[index] = Some(sign * candidate);
            }
        }
    }
    dst
}

/// Blend claimed voxels whose six neighbours are all claimed halfway towards
/// the neighbour average
pub fn smooth_step(grid: &LevelGrid, src: &[Option<f32>]) -> Vec<Option<f32>> {
    const FACES: [IVec3; 6] = [IVec3::X, IVec3::NEG_X, IVec3::Y, IVec3::NEG_Y, IVec3::Z, IVec3::NEG_Z];
    let r = grid.resolution;
    let mut dst = src.to_vec();

    for z in 0..r {
        for y in 0..r {
            for x in 0..r {
                let index = grid.index(x, y, z);
                let Some(d) = src[index] else { continue };
                let c = UVec3::new(x, y, z).as_ivec3();
                let neighbours: Option<Vec<f32>> = FACES.iter().map(|&f| at(grid, src, c + f)).collect();
                if let Some(n) = neighbours {
                    let avg = n.iter().sum::<f32>() / 6.0;
                    dst[index] = Some(0.5 * d + 0.5 * avg);
                }
            }
        }
    }
    dst
}

/// Smoothing passes followed by `iterations` sweeps cycling the octants
pub fn propagate(grid: &LevelGrid, seed: &[Option<f32>], smoothing_passes: u32, iterations: u32) -> Vec<Option<f32>> {
    let mut field = seed.to_vec();
    for _ in 0..smoothing_passes {
        field = smooth_step(grid, &field);
    }
    for i in 0..iterations {
        field = sweep_step(grid, &field, i % 8);
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid(resolution: u32) -> LevelGrid {
        LevelGrid::new(resolution, resolution as f32)
    }

    #[test]
    fn test_octants_cover_all_sign_combinations() {
        let mut all: Vec<IVec3> = (0..8).map(octant).collect();
        all.sort_by_key(|v| (v.x, v.y, v.z));
        all.dedup();
        assert_eq!(all.len(), 8);
        assert_eq!(octant(0), IVec3::ONE);
        assert_eq!(octant(7), IVec3::NEG_ONE);
    }

    #[test]
    fn test_godunov_cases() {
        let inf = f32::INFINITY;
        assert_eq!(godunov([0.0, inf, inf], 1.0), 1.0);
        assert!((godunov([0.0, 0.0, inf], 1.0) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((godunov([0.0, 0.0, 0.0], 1.0) - 1.0 / 3f32.sqrt()).abs() < 1e-6);
        assert_eq!(godunov([inf, 2.0, inf], 0.5), 2.5);
        assert!(godunov([inf; 3], 1.0).is_infinite());
    }

    #[test]
    fn test_point_seed_reaches_faces_and_diagonals() {
        let grid = unit_grid(16);
        let mut seed = vec![None; grid.voxel_count() as usize];
        seed[grid.index(8, 8, 8)] = Some(0.0);
        let field = propagate(&grid, &seed, 0, 8);

        for (x, y, z) in [(9, 8, 8), (7, 8, 8), (8, 9, 8), (8, 7, 8), (8, 8, 9), (8, 8, 7)] {
            assert_eq!(field[grid.index(x, y, z)], Some(1.0));
        }
        let diagonal = field[grid.index(9, 9, 8)].unwrap();
        assert!((diagonal - 2f32.sqrt()).abs() < 0.5, "{}", diagonal);
        assert_eq!(field[grid.index(0, 0, 0)], None);
    }

    #[test]
    fn test_plane_seed_is_exact_and_keeps_sign() {
        let grid = unit_grid(16);
        let mut seed = vec![None; grid.voxel_count() as usize];
        for z in 0..16 {
            for y in 0..16 {
                seed[grid.index(7, y, z)] = Some(-0.5);
                seed[grid.index(8, y, z)] = Some(0.5);
            }
        }
        let field = propagate(&grid, &seed, 0, 8);
        assert_eq!(field[grid.index(5, 3, 3)], Some(-2.5));
        assert_eq!(field[grid.index(10, 3, 3)], Some(2.5));
        assert_eq!(field[grid.index(4, 3, 3)], Some(-3.5));
    }

    #[test]
    fn test_exact_field_is_a_fixed_point() {
        let grid = unit_grid(12);
        let mut field = vec![None; grid.voxel_count() as usize];
        for z in 0..12 {
            for y in 0..12 {
                for x in 0..12 {
                    field[grid.index(x, y, z)] = Some(x as f32 - 5.5);
                }
            }
        }
        let swept = propagate(&grid, &field, 0, 16);
        assert_eq!(swept, field);
    }

    #[test]
    fn test_static_seed_converges() {
        let grid = unit_grid(16);
        let mut seed = vec![None; grid.voxel_count() as usize];
        seed[grid.index(3, 4, 5)] = Some(-0.25);
        seed[grid.index(12, 10, 9)] = Some(0.75);

        let a = propagate(&grid, &seed, 0, 160);
        let b = sweep_step(&grid, &a, 0);
        let changed = a.iter().zip(&b).filter(|(x, y)| x != y).count();
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_smooth_blends_interior_only() {
        let grid = unit_grid(4);
        let mut field = vec![Some(1.0); grid.voxel_count() as usize];
        field[grid.index(1, 1, 1)] = Some(7.0);
        field[grid.index(0, 0, 0)] = None;
        let smoothed = smooth_step(&grid, &field);
        assert_eq!(smoothed[grid.index(1, 1, 1)], Some(4.0));
        // Has an out-of-grid neighbour
        assert_eq!(smoothed[grid.index(0, 1, 1)], Some(1.0));
        assert_eq!(smoothed[grid.index(0, 0, 0)], None);
    }
}
