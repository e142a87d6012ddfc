//! CPU model of brush combination at a single voxel.
//!
//! Mirrors `combine` in the brush write kernel. Union and smooth union do not
//! commute, so the fold order is part of the result: passes run by
//! (phase, geometry) and brushes inside a pass by ascending index, which is
//! the order the ordered tile bins hand them to the kernel.

use crate::brush::brush::BrushOp;
use crate::sdf::propagator::write_phase;

/// A brush sampled at one voxel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushHit {
    pub index: u32,
    pub geometry: u32,
    pub op: BrushOp,
    /// Smooth union radius
    pub blend: f32,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelState {
    /// `None` while no brush has claimed the voxel
    pub distance: Option<f32>,
    pub owner: Option<u32>,
    pub ownership: f32,
}

impl VoxelState {
    pub const UNCLAIMED: VoxelState = VoxelState { distance: None, owner: None, ownership: 0.0 };

    pub fn claimed(distance: f32, owner: u32, ownership: f32) -> Self {
        Self { distance: Some(distance), owner: Some(owner), ownership }
    }
}

/// Polynomial smooth minimum; plain `min` for `k <= 0`
pub fn smooth_min(a: f32, b: f32, k: f32) -> f32 {
    if k <= 0.0 {
        return a.min(b);
    }
    let h = (0.5 + 0.5 * (b - a) / k).clamp(0.0, 1.0);
    b + (a - b) * h - k * h * (1.0 - h)
}

/// Apply one brush to a voxel
pub fn combine(v: VoxelState, hit: &BrushHit) -> VoxelState {
    let d = hit.distance;
    match (hit.op, v.distance) {
        (BrushOp::Union, None) | (BrushOp::SmoothUnion, None) => VoxelState::claimed(d, hit.index, 1.0),
        (BrushOp::Union, Some(current)) => {
            if d < current {
                VoxelState::claimed(d, hit.index, 1.0)
            } else {
                v
            }
        }
        (BrushOp::SmoothUnion, Some(current)) => {
            let k = hit.blend;
            let blended = smooth_min(current, d, k);
            if d < current {
                let ownership = (0.5 + 0.5 * (current - d) / k.max(1e-6)).clamp(0.0, 1.0);
                VoxelState { distance: Some(blended), owner: Some(hit.index), ownership }
            } else {
                VoxelState { distance: Some(blended), ..v }
            }
        }
        // Carving leaves unclaimed space alone
        (BrushOp::Subtract | BrushOp::Intersect, None) => v,
        (op, Some(current)) => {
            let carved = if op == BrushOp::Subtract { current.max(-d) } else { current.max(d) };
            if carved != current {
                VoxelState::claimed(carved, hit.index, 1.0)
            } else {
                v
            }
        }
    }
}

/// Fold every brush touching a voxel in GPU write order
pub fn write_voxel(start: VoxelState, hits: &[BrushHit]) -> VoxelState {
    let mut ordered: Vec<&BrushHit> = hits.iter().collect();
    ordered.sort_by_key(|h| (write_phase(h.op), h.geometry, h.index));
    ordered.into_iter().fold(start, combine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(index: u32, op: BrushOp, blend: f32, distance: f32) -> BrushHit {
        BrushHit { index, geometry: 0, op, blend, distance }
    }

    fn permutations(hits: &[BrushHit]) -> Vec<Vec<BrushHit>> {
        if hits.len() <= 1 {
            return vec![hits.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..hits.len() {
            let mut rest = hits.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_smooth_min_matches_min_far_apart() {
        assert_eq!(smooth_min(0.0, 5.0, 0.5), 0.0);
        assert_eq!(smooth_min(2.0, 1.0, 0.0), 1.0);
        assert!(smooth_min(1.0, 1.0, 0.5) < 1.0);
    }

    #[test]
    fn test_union_and_smooth_union_do_not_commute() {
        let start = VoxelState::claimed(1.0, 9, 1.0);
        let a = hit(0, BrushOp::Union, 0.0, 0.8);
        let b = hit(1, BrushOp::SmoothUnion, 0.5, 1.2);

        let a_then_b = combine(combine(start, &a), &b);
        let b_then_a = combine(combine(start, &b), &a);
        assert_ne!(a_then_b.distance, b_then_a.distance);

        // Write order ignores the order the hits arrive in
        assert_eq!(write_voxel(start, &[a, b]), a_then_b);
        assert_eq!(write_voxel(start, &[b, a]), a_then_b);
    }

    #[test]
    fn test_write_voxel_is_permutation_invariant() {
        let hits = [
            hit(0, BrushOp::SmoothUnion, 0.5, 1.2),
            hit(1, BrushOp::Union, 0.0, 0.8),
            hit(2, BrushOp::SmoothUnion, 0.3, 0.9),
            hit(3, BrushOp::Subtract, 0.0, 0.2),
            BrushHit { geometry: 1, ..hit(4, BrushOp::Union, 0.0, 0.85) },
        ];
        for start in [VoxelState::UNCLAIMED, VoxelState::claimed(1.0, 7, 1.0)] {
            let expected = write_voxel(start, &hits);
            for order in permutations(&hits) {
                assert_eq!(write_voxel(start, &order), expected, "{:?}", order);
            }
        }
    }

    #[test]
    fn test_carving_runs_after_additive() {
        let cut = hit(0, BrushOp::Subtract, 0.0, 0.5);
        let body = hit(1, BrushOp::Union, 0.0, -1.0);
        // The cut has the lower index but still lands on the claimed body
        let v = write_voxel(VoxelState::UNCLAIMED, &[cut, body]);
        assert_eq!(v.distance, Some(-0.5));
        assert_eq!(v.owner, Some(0));
    }
}
