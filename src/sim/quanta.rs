//! Quanta records and the seeded field

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, UVec3, Vec3};

use crate::core::config::SimulationConfig;

/// One simulated field sample (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct Quanta {
    /// xyz = position, w = mass
    pub position: [f32; 4],
    /// xyz = mean neighbour velocity, w = neighbour count
    pub resonance: [f32; 4],
    /// x = owning brush id + 1 (0 = unclaimed), y = contact count
    pub information: [i32; 4],
    /// xyz = velocity, w = kinetic energy
    pub mana: [f32; 4],
}

impl Quanta {
    pub fn at(position: Vec3) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            ..Default::default()
        }
    }

    pub fn mass(&self) -> f32 {
        self.position[3]
    }

    /// Brush that claimed this quanta during bootstrap
    pub fn owner(&self) -> Option<u32> {
        let tag = self.information[0];
        (tag > 0).then(|| tag as u32 - 1)
    }
}

/// Per-quanta deformation state (96 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct Deformation {
    /// Deformation gradient columns
    pub gradient: [[f32; 4]; 3],
    /// Affine velocity columns
    pub affine: [[f32; 4]; 3],
}

impl Default for Deformation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Deformation {
    pub const IDENTITY: Deformation = Deformation {
        gradient: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        affine: [[0.0; 4]; 3],
    };
}

/// Simulation step uniform (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct SimParams {
    /// xyz = gravity, w = dt
    pub gravity_dt: [f32; 4],
    /// xyz = half field extent, w = collision radius
    pub field_half: [f32; 4],
    pub stiffness: f32,
    pub damping: f32,
    pub quanta_count: u32,
    pub neighbor_cap: u32,
    pub frame: u32,
    pub brush_count: u32,
    pub _pad: [u32; 2],
}

impl SimParams {
    pub fn new(sim: &SimulationConfig, field_size: [i32; 3], quanta_count: u32, brush_count: u32, frame: u32) -> Self {
        let half = IVec3::from_array(field_size).as_vec3() * 0.5;
        Self {
            gravity_dt: Vec3::from_array(sim.gravity).extend(sim.dt).to_array(),
            field_half: half.extend(sim.collision_radius).to_array(),
            stiffness: sim.stiffness,
            damping: sim.damping,
            quanta_count,
            neighbor_cap: sim.neighbor_cap,
            frame,
            brush_count,
            _pad: [0; 2],
        }
    }
}

/// CPU copy of the quanta array with the field extent it was seeded for
#[derive(Clone, Debug, PartialEq)]
pub struct QuantaField {
    pub field_size: [i32; 3],
    pub quanta: Vec<Quanta>,
}

impl QuantaField {
    /// Near-uniform lattice over the field, centered at the origin.
    ///
    /// See [`lattice_dims`] for the site counts. Entries beyond the lattice
    /// stay zeroed (mass 0) and are ignored by the simulation.
    pub fn seeded(field_size: [i32; 3], count: u32) -> Self {
        let extent = IVec3::from_array(field_size).max(IVec3::ONE).as_vec3();
        let n = lattice_dims(field_size, count);

        let mut quanta = vec![Quanta::default(); count as usize];
        let sites = (0..n.z).flat_map(|z| (0..n.y).flat_map(move |y| (0..n.x).map(move |x| (x, y, z))));
        for (slot, (x, y, z)) in quanta.iter_mut().zip(sites) {
            let cell = Vec3::new(x as f32, y as f32, z as f32) + 0.5;
            *slot = Quanta::at(cell * extent / n.as_vec3() - extent * 0.5);
        }

        let placed = n.x as u64 * n.y as u64 * n.z as u64;
        if placed < count as u64 {
            log::warn!("Seeded {} of {} quanta on a {}x{}x{} lattice; {} stay massless",
                placed, count, n.x, n.y, n.z, count as u64 - placed);
        } else {
            log::info!("Seeded {} quanta on a {}x{}x{} lattice", placed, n.x, n.y, n.z);
        }

        Self { field_size, quanta }
    }

    pub fn len(&self) -> usize {
        self.quanta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quanta.is_empty()
    }
}

/// Sites per axis of the seeding lattice.
///
/// The step is the cube root of volume per quanta and each axis gets
/// `round(extent / step)` sites. When rounding overshoots `count`, the axis
/// with the most sites loses one until the lattice fits, so only whole
/// layers are placed.
pub fn lattice_dims(field_size: [i32; 3], count: u32) -> UVec3 {
    let extent = IVec3::from_array(field_size).max(IVec3::ONE).as_vec3();
    let volume = extent.x * extent.y * extent.z;
    let step = (volume / count.max(1) as f32).cbrt();
    let mut n = (extent / step).round().max(Vec3::ONE).as_uvec3();

    while n.x as u64 * n.y as u64 * n.z as u64 > count.max(1) as u64 {
        let axis = if n.x >= n.y && n.x >= n.z {
            0
        } else if n.y >= n.z {
            1
        } else {
            2
        };
        n[axis] -= 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        assert_eq!(std::mem::size_of::<Quanta>(), 64);
        assert_eq!(std::mem::size_of::<Deformation>(), 96);
        assert_eq!(std::mem::size_of::<SimParams>(), 64);
    }

    #[test]
    fn test_exact_lattice_fills_every_slot() {
        let field = QuantaField::seeded([16, 16, 4], 1024);
        assert_eq!(field.len(), 1024);
        assert!(field.quanta.iter().all(|q| q.mass() == 1.0));
        // 16x16x4 sites at unit spacing
        assert_eq!(field.quanta[0].position, [-7.5, -7.5, -1.5, 1.0]);
        assert_eq!(field.quanta[1023].position, [7.5, 7.5, 1.5, 1.0]);
    }

    #[test]
    fn test_overshooting_lattice_keeps_whole_layers() {
        // round(7 / cbrt(49 / 32)) = 6 sites on x and y, 36 > 32
        let n = lattice_dims([7, 7, 1], 32);
        assert!(n.x * n.y * n.z <= 32);
        assert_eq!(n, UVec3::new(5, 6, 1));

        let field = QuantaField::seeded([7, 7, 1], 32);
        let placed: Vec<&Quanta> = field.quanta.iter().filter(|q| q.mass() > 0.0).collect();
        assert_eq!(placed.len(), 30);
        let top_row = placed.iter().filter(|q| q.position[1] == placed[29].position[1]).count();
        assert_eq!(top_row, n.x as usize);
    }

    #[test]
    fn test_exact_lattice_is_not_shrunk() {
        assert_eq!(lattice_dims([16, 16, 4], 1024), UVec3::new(16, 16, 4));
        assert_eq!(lattice_dims([32, 32, 16], 1_048_576), UVec3::new(128, 128, 64));
    }

    #[test]
    fn test_positions_inside_field() {
        let field = QuantaField::seeded([64, 64, 16], 4096);
        for q in field.quanta.iter().filter(|q| q.mass() > 0.0) {
            assert!(q.position[0].abs() < 32.0);
            assert!(q.position[1].abs() < 32.0);
            assert!(q.position[2].abs() < 8.0);
        }
    }

    #[test]
    fn test_surplus_entries_are_zeroed() {
        // 10^3 volume, 8 quanta: step 5, 2 sites per axis, exact
        let exact = QuantaField::seeded([10, 10, 10], 8);
        assert!(exact.quanta.iter().all(|q| q.mass() == 1.0));

        // 5x1x1 lattice for a thin field leaves the rest empty
        let flat = QuantaField::seeded([4, 1, 1], 8);
        let placed = flat.quanta.iter().filter(|q| q.mass() > 0.0).count();
        assert_eq!(placed, 5);
        assert_eq!(flat.quanta[7], Quanta::default());
    }

    #[test]
    fn test_owner_tag() {
        let mut q = Quanta::at(Vec3::ZERO);
        assert_eq!(q.owner(), None);
        q.information[0] = 4;
        assert_eq!(q.owner(), Some(3));
    }

    #[test]
    fn test_params_pack_config() {
        let sim = SimulationConfig::default();
        let params = SimParams::new(&sim, [64, 64, 16], 1024, 3, 7);
        assert_eq!(params.field_half, [32.0, 32.0, 8.0, sim.collision_radius]);
        assert_eq!(params.gravity_dt[3], sim.dt);
        assert_eq!(params.brush_count, 3);
    }
}
