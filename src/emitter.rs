use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use rand::Rng;

use crate::buffer_util::{make_uniform_buffer, SizedBuffer};
use crate::particle_store::ParticleStore;
use crate::particles::{workgroup_count, SIM_WORKGROUP_SIZE};
use crate::settings::EmitterSettings;
use crate::shader_utils;

// Device-side mirror of the emission settings. Must match the
// EmissionSettings block in emit.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct EmissionUniforms {
    position: [f32; 3],
    position_radius: f32,
    velocity: [f32; 3],
    velocity_angle_cos: f32,
    mass_min: f32,
    mass_max: f32,
    life_min: f32,
    life_max: f32,
    size_min: f32,
    size_max: f32,
    _pad: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<EmissionUniforms>() == 64);

impl EmissionUniforms {
    pub fn from_settings(settings: &EmitterSettings) -> Self {
        EmissionUniforms {
            position: settings.position,
            position_radius: settings.position_radius,
            velocity: settings.velocity,
            velocity_angle_cos: settings.velocity_angle_cos(),
            mass_min: settings.mass_min,
            mass_max: settings.mass_max,
            life_min: settings.life_min,
            life_max: settings.life_max,
            size_min: settings.size_min,
            size_max: settings.size_max,
            _pad: [0.0; 2],
        }
    }
}

// Must match the EmitParams block in emit.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct EmitParams {
    offset: u32,
    count: u32,
    seed: u32,
    _pad: u32,
}

const _: () = assert!(std::mem::size_of::<EmitParams>() == 16);

/// Appends a batch of freshly randomized particles at the tail of the
/// live range of the current buffer.
pub struct Emitter {
    pipeline: wgpu::ComputePipeline,
    bind_groups: [wgpu::BindGroup; 2],
    params_buffer: SizedBuffer,
    seed: u32,
}

impl Emitter {
    pub fn new(
        device: &wgpu::Device,
        store: &ParticleStore,
        settings_buffer: &wgpu::Buffer,
    ) -> Result<Self> {
        let module = shader_utils::create_shader_module(device, "emit.wgsl")?;
        let params_buffer = make_uniform_buffer(device, "Emit params", &EmitParams::zeroed());

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Emit bind group layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Emit pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Emit pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        // One bind group per store orientation.
        let bind_groups = [0usize, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Emit bind group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: store.buffer(i).buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: settings_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buffer.buffer.as_entire_binding(),
                    },
                ],
            })
        });

        Ok(Emitter {
            pipeline,
            bind_groups,
            params_buffer,
            seed: 0,
        })
    }

    /// Encodes one emission batch writing `count` records starting at
    /// `offset`. Each call advances the seed so repeated emissions
    /// never replay a random stream.
    pub fn encode(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        buffer_index: usize,
        offset: u32,
        count: u32,
    ) {
        let params = EmitParams {
            offset,
            count,
            seed: self.seed,
            _pad: 0,
        };
        self.seed = self.seed.wrapping_add(1);
        queue.write_buffer(&self.params_buffer.buffer, 0, bytemuck::bytes_of(&params));

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle emit"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_groups[buffer_index], &[]);
        cpass.dispatch_workgroups(workgroup_count(count, SIM_WORKGROUP_SIZE), 1, 1);
    }
}

/// Draws the batch size for one emission, clamped so the population
/// never exceeds capacity. Capacity exhaustion is not an error; the
/// request silently shrinks, possibly to zero.
pub fn spawn_count(
    rng: &mut impl Rng,
    count_min: u32,
    count_max: u32,
    live: u32,
    capacity: u32,
) -> u32 {
    let hi = count_max.max(count_min);
    let drawn = rng.gen_range(count_min..=hi);
    drawn.min(capacity.saturating_sub(live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn spawn_count_is_exact_for_fixed_range() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(spawn_count(&mut rng, 10, 10, 0, 100), 10);
    }

    #[test]
    fn spawn_count_clamps_to_remaining_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(spawn_count(&mut rng, 10, 10, 95, 100), 5);
        assert_eq!(spawn_count(&mut rng, 10, 10, 100, 100), 0);
    }

    #[test]
    fn spawn_count_stays_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let n = spawn_count(&mut rng, 3, 9, 0, 100);
            assert!((3..=9).contains(&n));
        }
    }

    #[test]
    fn spawn_count_tolerates_inverted_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = spawn_count(&mut rng, 9, 3, 0, 100);
        assert!(n >= 9);
    }

    #[test]
    fn uniforms_carry_the_cone_cosine() {
        let mut settings = crate::settings::EmitterSettings::default();
        settings.velocity_angle = 180.0;
        let u = EmissionUniforms::from_settings(&settings);
        assert!((u.velocity_angle_cos + 1.0).abs() < 1e-6);
        settings.velocity_angle = 0.0;
        let u = EmissionUniforms::from_settings(&settings);
        assert!((u.velocity_angle_cos - 1.0).abs() < 1e-6);
    }

    #[test]
    fn emission_uniform_layout() {
        assert_eq!(std::mem::size_of::<EmissionUniforms>(), 64);
        assert_eq!(std::mem::offset_of!(EmissionUniforms, velocity), 16);
        assert_eq!(std::mem::offset_of!(EmissionUniforms, mass_min), 32);
        assert_eq!(std::mem::offset_of!(EmissionUniforms, size_max), 52);
    }
}
