use crate::buffer_util::{make_storage_buffer, SizedBuffer};
use crate::particles::{Particle, MAX_PARTICLES};

/// Double-buffered particle storage. Exactly one buffer is current at a
/// time; `current` and `other` are computed views on the flip bit so
/// they can never drift apart. Compaction is the only stage that flips.
pub struct ParticleStore {
    buffers: [SizedBuffer; 2],
    current: usize,
    live: u32,
}

impl ParticleStore {
    pub fn new(device: &wgpu::Device) -> Self {
        let size =
            MAX_PARTICLES as wgpu::BufferAddress * std::mem::size_of::<Particle>() as wgpu::BufferAddress;
        ParticleStore {
            buffers: [
                make_storage_buffer(device, "Particle buffer 0", size),
                make_storage_buffer(device, "Particle buffer 1", size),
            ],
            current: 0,
            live: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        MAX_PARTICLES
    }

    /// Particles at indices below this are alive; the rest of the
    /// buffer is stale data from earlier frames.
    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &SizedBuffer {
        &self.buffers[self.current]
    }

    pub fn other(&self) -> &SizedBuffer {
        &self.buffers[self.current ^ 1]
    }

    /// Fixed-index access, for building one bind group per orientation.
    pub fn buffer(&self, index: usize) -> &SizedBuffer {
        &self.buffers[index]
    }

    pub fn add_live(&mut self, count: u32) {
        self.live = (self.live + count).min(MAX_PARTICLES);
    }

    pub fn set_live(&mut self, count: u32) {
        self.live = count.min(MAX_PARTICLES);
    }

    pub fn flip(&mut self) {
        self.current ^= 1;
    }
}
