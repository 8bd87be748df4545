use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use crate::buffer_util::{make_uniform_buffer, SizedBuffer};
use crate::particle_store::ParticleStore;
use crate::particles::{workgroup_count, SIM_WORKGROUP_SIZE};
use crate::settings::UpdateSettings;
use crate::shader_utils;

// Must match the IntegrateParams block in update.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct IntegrateParams {
    force: [f32; 3],
    delta_time: f32,
    num_particles: u32,
    gravity: f32,
    drag: f32,
    _pad: f32,
}

const _: () = assert!(std::mem::size_of::<IntegrateParams>() == 32);

/// Advances every live particle by one time step, in place. Expired
/// particles are left in the buffer for the compactor to reap; this
/// stage never changes the live count.
pub struct Integrator {
    pipeline: wgpu::ComputePipeline,
    bind_groups: [wgpu::BindGroup; 2],
    params_buffer: SizedBuffer,
}

impl Integrator {
    pub fn new(device: &wgpu::Device, store: &ParticleStore) -> Result<Self> {
        let module = shader_utils::create_shader_module(device, "update.wgsl")?;
        let params_buffer =
            make_uniform_buffer(device, "Integrate params", &IntegrateParams::zeroed());

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Integrate bind group layout"),
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
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Integrate pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Integrate pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_groups = [0usize, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Integrate bind group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: store.buffer(i).buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: params_buffer.buffer.as_entire_binding(),
                    },
                ],
            })
        });

        Ok(Integrator {
            pipeline,
            bind_groups,
            params_buffer,
        })
    }

    pub fn encode(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        buffer_index: usize,
        num_particles: u32,
        settings: &UpdateSettings,
        delta_time: f32,
    ) {
        let params = IntegrateParams {
            force: settings.force,
            delta_time,
            num_particles,
            gravity: settings.gravity,
            drag: settings.drag,
            _pad: 0.0,
        };
        queue.write_buffer(&self.params_buffer.buffer, 0, bytemuck::bytes_of(&params));

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle integrate"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bind_groups[buffer_index], &[]);
        cpass.dispatch_workgroups(workgroup_count(num_particles, SIM_WORKGROUP_SIZE), 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrate_params_layout() {
        assert_eq!(std::mem::size_of::<IntegrateParams>(), 32);
        assert_eq!(std::mem::offset_of!(IntegrateParams, delta_time), 12);
        assert_eq!(std::mem::offset_of!(IntegrateParams, num_particles), 16);
        assert_eq!(std::mem::offset_of!(IntegrateParams, drag), 24);
    }
}
