use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use crate::buffer_util::{
    make_readable_storage_buffer, make_storage_buffer, make_uniform_buffer, ReadbackBuffer,
    SizedBuffer,
};
use crate::particle_store::ParticleStore;
use crate::particles::{num_scan_blocks, MAX_PARTICLES, SCAN_WIDTH};
use crate::shader_utils;

// Must match the ScanParams block shared by the scan and scatter shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ScanParams {
    num_particles: u32,
    _pad: [u32; 3],
}

// Must match the BlockParams block in scan_offsets.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlockParams {
    num_blocks: u32,
    _pad: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<ScanParams>() == 16);
const _: () = assert!(std::mem::size_of::<BlockParams>() == 16);

/// Removes expired particles without any serial host-side pass. A
/// three-phase block-parallel prefix sum assigns every survivor a dense
/// index, a scatter copies survivors into the other buffer of the
/// store, and the surviving total is read back as the new live count.
pub struct Compactor {
    scan_local_pipeline: wgpu::ComputePipeline,
    scan_offsets_pipeline: wgpu::ComputePipeline,
    scan_apply_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    scan_local_bind_groups: [wgpu::BindGroup; 2],
    scan_offsets_bind_group: wgpu::BindGroup,
    scan_apply_bind_group: wgpu::BindGroup,
    scatter_bind_groups: [wgpu::BindGroup; 2],
    count_params: SizedBuffer,
    block_params: SizedBuffer,
    total_buffer: SizedBuffer,
    readback: ReadbackBuffer,
}

impl Compactor {
    pub fn new(device: &wgpu::Device, store: &ParticleStore) -> Result<Self> {
        let scan_local_module = shader_utils::create_shader_module(device, "scan_local.wgsl")?;
        let scan_offsets_module = shader_utils::create_shader_module(device, "scan_offsets.wgsl")?;
        let scan_apply_module = shader_utils::create_shader_module(device, "scan_apply.wgsl")?;
        let scatter_module = shader_utils::create_shader_module(device, "compact.wgsl")?;

        let indices_buffer = make_storage_buffer(
            device,
            "Compact indices",
            MAX_PARTICLES as wgpu::BufferAddress * 4,
        );
        let block_totals_buffer = make_storage_buffer(
            device,
            "Scan block totals",
            SCAN_WIDTH as wgpu::BufferAddress * 4,
        );
        let total_buffer = make_readable_storage_buffer(device, "Scan total", 4);
        let count_params = make_uniform_buffer(device, "Scan count params", &ScanParams::zeroed());
        let block_params = make_uniform_buffer(device, "Scan block params", &BlockParams::zeroed());
        let readback = ReadbackBuffer::new(device, "Live count readback", 4);

        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let compute_pipeline = |label: &str,
                                module: &wgpu::ShaderModule,
                                layout: &wgpu::BindGroupLayout| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        // Phase 1: per-block survivor scan of the current buffer.
        let scan_local_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Scan local bind group layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, false),
                    storage_entry(2, false),
                    uniform_entry(3),
                ],
            });
        let scan_local_pipeline =
            compute_pipeline("Scan local pipeline", &scan_local_module, &scan_local_layout);
        let scan_local_bind_groups = [0usize, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Scan local bind group"),
                layout: &scan_local_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: store.buffer(i).buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: indices_buffer.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: block_totals_buffer.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: count_params.buffer.as_entire_binding(),
                    },
                ],
            })
        });

        // Phase 2: single-block exclusive scan of the block totals.
        let scan_offsets_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Scan offsets bind group layout"),
                entries: &[
                    storage_entry(0, false),
                    storage_entry(1, false),
                    uniform_entry(2),
                ],
            });
        let scan_offsets_pipeline = compute_pipeline(
            "Scan offsets pipeline",
            &scan_offsets_module,
            &scan_offsets_layout,
        );
        let scan_offsets_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scan offsets bind group"),
            layout: &scan_offsets_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: block_totals_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: total_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: block_params.buffer.as_entire_binding(),
                },
            ],
        });

        // Phase 3: add block offsets onto the local indices.
        let scan_apply_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Scan apply bind group layout"),
                entries: &[
                    storage_entry(0, false),
                    storage_entry(1, true),
                    uniform_entry(2),
                ],
            });
        let scan_apply_pipeline = compute_pipeline(
            "Scan apply pipeline",
            &scan_apply_module,
            &scan_apply_layout,
        );
        let scan_apply_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scan apply bind group"),
            layout: &scan_apply_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: indices_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: block_totals_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: count_params.buffer.as_entire_binding(),
                },
            ],
        });

        // Scatter: survivors move from the current buffer into the
        // other one at their dense indices.
        let scatter_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scatter bind group layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                uniform_entry(3),
            ],
        });
        let scatter_pipeline =
            compute_pipeline("Scatter pipeline", &scatter_module, &scatter_layout);
        let scatter_bind_groups = [0usize, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Scatter bind group"),
                layout: &scatter_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: store.buffer(i).buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: indices_buffer.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: store.buffer(i ^ 1).buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: count_params.buffer.as_entire_binding(),
                    },
                ],
            })
        });

        Ok(Compactor {
            scan_local_pipeline,
            scan_offsets_pipeline,
            scan_apply_pipeline,
            scatter_pipeline,
            scan_local_bind_groups,
            scan_offsets_bind_group,
            scan_apply_bind_group,
            scatter_bind_groups,
            count_params,
            block_params,
            total_buffer,
            readback,
        })
    }

    /// Encodes the full compaction: three scan phases, the scatter, and
    /// the copy of the surviving total into the readback buffer. Flips
    /// the store so the scatter destination becomes current.
    pub fn encode(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        store: &mut ParticleStore,
    ) {
        let num_particles = store.live();
        let num_blocks = num_scan_blocks(num_particles);
        queue.write_buffer(
            &self.count_params.buffer,
            0,
            bytemuck::bytes_of(&ScanParams {
                num_particles,
                _pad: [0; 3],
            }),
        );
        queue.write_buffer(
            &self.block_params.buffer,
            0,
            bytemuck::bytes_of(&BlockParams {
                num_blocks,
                _pad: [0; 3],
            }),
        );

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Survivor scan"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.scan_local_pipeline);
            cpass.set_bind_group(0, &self.scan_local_bind_groups[store.current_index()], &[]);
            cpass.dispatch_workgroups(num_blocks, 1, 1);
        }
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Block offsets"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.scan_offsets_pipeline);
            cpass.set_bind_group(0, &self.scan_offsets_bind_group, &[]);
            cpass.dispatch_workgroups(1, 1, 1);
        }
        // A single block has no cross-block offset to apply.
        if num_blocks > 1 {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Apply block offsets"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.scan_apply_pipeline);
            cpass.set_bind_group(0, &self.scan_apply_bind_group, &[]);
            cpass.dispatch_workgroups(num_blocks - 1, 1, 1);
        }
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compact scatter"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.scatter_pipeline);
            cpass.set_bind_group(0, &self.scatter_bind_groups[store.current_index()], &[]);
            cpass.dispatch_workgroups(num_blocks, 1, 1);
        }

        store.flip();
        self.readback.copy_from(encoder, &self.total_buffer.buffer);
    }

    /// Blocks until the submitted compaction has finished on the device
    /// and adopts the surviving count as the store's live count.
    pub fn resolve(&self, device: &wgpu::Device, store: &mut ParticleStore) -> Result<()> {
        let live = self.readback.read_u32(device)?;
        store.set_live(live);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{Particle, SCAN_BLOCK_SIZE};

    const BLOCK: usize = SCAN_BLOCK_SIZE as usize;

    // Host mirrors of the scan shaders, block-for-block. The scatter is
    // only defined over entries the scan marked alive; everything else
    // in `indices` is stale garbage, exactly as on the device.

    fn scan_local(alive: &[bool], indices: &mut [u32]) -> Vec<u32> {
        let num_blocks = (alive.len() + BLOCK - 1) / BLOCK;
        let mut block_totals = Vec::with_capacity(num_blocks);
        for block in 0..num_blocks {
            let mut running = 0u32;
            for i in block * BLOCK..((block + 1) * BLOCK).min(alive.len()) {
                if alive[i] {
                    indices[i] = running;
                    running += 1;
                }
            }
            block_totals.push(running);
        }
        block_totals
    }

    fn scan_offsets(block_totals: &mut [u32]) -> u32 {
        let mut acc = 0u32;
        for total in block_totals.iter_mut() {
            let value = *total;
            *total = acc;
            acc += value;
        }
        acc
    }

    fn scan_apply(indices: &mut [u32], block_totals: &[u32]) {
        for i in BLOCK..indices.len() {
            indices[i] = indices[i].wrapping_add(block_totals[i / BLOCK]);
        }
    }

    fn scatter(particles: &[Particle], alive: &[bool], indices: &[u32], out: &mut [Particle]) {
        for (i, p) in particles.iter().enumerate() {
            if alive[i] {
                out[indices[i] as usize] = *p;
            }
        }
    }

    // Runs the three phases the way the orchestration does, including
    // the skip of the apply pass for a single block.
    fn run_scan(alive: &[bool]) -> (Vec<u32>, u32) {
        let mut indices = vec![0xdead_beefu32; alive.len()];
        let mut block_totals = scan_local(alive, &mut indices);
        let total = scan_offsets(&mut block_totals);
        let num_blocks = block_totals.len();
        if num_blocks > 1 {
            scan_apply(&mut indices, &block_totals);
        }
        (indices, total)
    }

    fn test_pattern(n: usize, salt: u64) -> Vec<bool> {
        // Small deterministic generator; keeps the patterns varied
        // across sizes without pulling rand into every test.
        let mut state = salt.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) & 1 == 1
            })
            .collect()
    }

    #[test]
    fn scan_total_counts_survivors() {
        for &n in &[1usize, 5, 511, 512, 513, 1024, 1500, 2048 + 17] {
            let alive = test_pattern(n, n as u64);
            let (_, total) = run_scan(&alive);
            let expected = alive.iter().filter(|&&a| a).count() as u32;
            assert_eq!(total, expected, "n = {}", n);
        }
    }

    #[test]
    fn scan_produces_an_order_preserving_dense_mapping() {
        for &n in &[7usize, 512, 700, 1536, 4096 + 3] {
            let alive = test_pattern(n, 31 + n as u64);
            let (indices, total) = run_scan(&alive);
            let mut expected = 0u32;
            for i in 0..n {
                if alive[i] {
                    // Survivors land densely, in their original order.
                    assert_eq!(indices[i], expected, "i = {}, n = {}", i, n);
                    expected += 1;
                }
            }
            assert_eq!(expected, total);
        }
    }

    #[test]
    fn single_block_skips_the_apply_pass() {
        let n = 100;
        assert_eq!(num_scan_blocks(n as u32), 1);
        let alive = test_pattern(n, 99);
        let (indices, total) = run_scan(&alive);
        let survivors = alive.iter().filter(|&&a| a).count() as u32;
        assert_eq!(total, survivors);
        let mut seen = vec![false; total as usize];
        for i in 0..n {
            if alive[i] {
                assert!(!seen[indices[i] as usize]);
                seen[indices[i] as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    fn make_particle(i: usize, life: f32) -> Particle {
        Particle {
            position: [i as f32, 2.0 * i as f32, -(i as f32)],
            mass: 1.0 + i as f32 * 0.25,
            velocity: [0.5 * i as f32, -1.0, 3.0],
            life,
            acceleration: [0.0, -9.8, 0.0],
            size: 0.05 + i as f32 * 0.001,
        }
    }

    #[test]
    fn compaction_preserves_survivor_records_exactly() {
        // Ten live particles, three expired: the seven survivors keep
        // every field and their relative order.
        let mut particles: Vec<Particle> = (0..10).map(|i| make_particle(i, 1.0)).collect();
        for &i in &[2usize, 5, 9] {
            particles[i].life = 0.0;
        }
        let alive: Vec<bool> = particles.iter().map(|p| p.life > 0.0).collect();
        let (indices, total) = run_scan(&alive);
        assert_eq!(total, 7);

        let mut out = vec![Particle::zeroed(); particles.len()];
        scatter(&particles, &alive, &indices, &mut out);

        let expected: Vec<Particle> = particles
            .iter()
            .copied()
            .filter(|p| p.life > 0.0)
            .collect();
        assert_eq!(&out[..7], &expected[..]);
    }

    #[test]
    fn compaction_is_idempotent() {
        let n = 1300;
        let alive = test_pattern(n, 4242);
        let particles: Vec<Particle> = (0..n)
            .map(|i| make_particle(i, if alive[i] { 2.0 } else { -0.5 }))
            .collect();

        let (indices, total) = run_scan(&alive);
        let mut first = vec![Particle::zeroed(); n];
        scatter(&particles, &alive, &indices, &mut first);
        let first_live = &first[..total as usize];

        // Everything that survived the first pass is still alive, so a
        // second compaction must be the identity on the live range.
        let alive2: Vec<bool> = first_live.iter().map(|p| p.life > 0.0).collect();
        assert!(alive2.iter().all(|&a| a));
        let (indices2, total2) = run_scan(&alive2);
        assert_eq!(total2, total);
        let mut second = vec![Particle::zeroed(); total as usize];
        scatter(first_live, &alive2, &indices2, &mut second);
        assert_eq!(&second[..], first_live);
    }
}
