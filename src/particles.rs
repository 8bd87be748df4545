use bytemuck::{Pod, Zeroable};

// The compaction scan runs in 512-thread blocks, and the single-block
// offsets pass scans up to 512 block totals, so capacity is the square.
pub const SCAN_WIDTH: u32 = 512;
pub const SCAN_BLOCK_SIZE: u32 = 512;
pub const MAX_PARTICLES: u32 = SCAN_WIDTH * SCAN_WIDTH;

// Workgroup size of the emit and update kernels.
pub const SIM_WORKGROUP_SIZE: u32 = 256;

// This must match the Particle struct in the compute and draw shaders:
// three 16-byte groups, each a vec3 plus a scalar.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 3],
    pub mass: f32,
    pub velocity: [f32; 3],
    pub life: f32,
    pub acceleration: [f32; 3],
    pub size: f32,
}

const _: () = assert!(std::mem::size_of::<Particle>() == 48);

pub fn workgroup_count(items: u32, group_size: u32) -> u32 {
    (items + group_size - 1) / group_size
}

pub fn num_scan_blocks(num_particles: u32) -> u32 {
    workgroup_count(num_particles, SCAN_BLOCK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_layout_matches_device_record() {
        assert_eq!(std::mem::size_of::<Particle>(), 48);
        assert_eq!(std::mem::offset_of!(Particle, position), 0);
        assert_eq!(std::mem::offset_of!(Particle, mass), 12);
        assert_eq!(std::mem::offset_of!(Particle, velocity), 16);
        assert_eq!(std::mem::offset_of!(Particle, life), 28);
        assert_eq!(std::mem::offset_of!(Particle, acceleration), 32);
        assert_eq!(std::mem::offset_of!(Particle, size), 44);
    }

    #[test]
    fn workgroup_counts_round_up() {
        assert_eq!(workgroup_count(0, 256), 0);
        assert_eq!(workgroup_count(1, 256), 1);
        assert_eq!(workgroup_count(256, 256), 1);
        assert_eq!(workgroup_count(257, 256), 2);
        assert_eq!(num_scan_blocks(512), 1);
        assert_eq!(num_scan_blocks(513), 2);
        // Full capacity still fits the single-block offsets pass.
        assert_eq!(num_scan_blocks(MAX_PARTICLES), SCAN_WIDTH);
    }
}
