use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use wgpu::util::DeviceExt;

pub struct SizedBuffer {
    pub buffer: wgpu::Buffer,
    pub size: wgpu::BufferAddress,
}

pub fn make_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: wgpu::BufferAddress,
) -> SizedBuffer {
    SizedBuffer {
        buffer: device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        }),
        size,
    }
}

// Storage buffer the host can copy out of, for device-produced scalars.
pub fn make_readable_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: wgpu::BufferAddress,
) -> SizedBuffer {
    SizedBuffer {
        buffer: device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }),
        size,
    }
}

pub fn make_uniform_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    label: &str,
    data: &T,
) -> SizedBuffer {
    let bytes = bytemuck::bytes_of(data);
    SizedBuffer {
        buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        }),
        size: bytes.len() as wgpu::BufferAddress,
    }
}

/// A host-side value paired with its device-side uniform copy. The host
/// struct is the source of truth; the device copy is refreshed only on
/// a dirty transition, so per-frame reads cost nothing when the value
/// is untouched.
pub struct SyncedUniform<T, G: bytemuck::Pod> {
    value: T,
    to_gpu: fn(&T) -> G,
    buffer: SizedBuffer,
    dirty: bool,
}

impl<T, G: bytemuck::Pod> SyncedUniform<T, G> {
    pub fn new(device: &wgpu::Device, label: &str, value: T, to_gpu: fn(&T) -> G) -> Self {
        let buffer = make_uniform_buffer(device, label, &to_gpu(&value));
        SyncedUniform {
            value,
            to_gpu,
            buffer,
            dirty: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access marks the device copy stale.
    pub fn edit(&mut self) -> &mut T {
        self.dirty = true;
        &mut self.value
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer.buffer
    }

    pub fn sync_if_dirty(&mut self, queue: &wgpu::Queue) {
        if self.dirty {
            let gpu = (self.to_gpu)(&self.value);
            queue.write_buffer(&self.buffer.buffer, 0, bytemuck::bytes_of(&gpu));
            self.dirty = false;
        }
    }
}

const READBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-mappable landing buffer for device-to-host reads. `read_u32`
/// blocks until previously submitted work has completed; this is the
/// one sanctioned synchronous stall in the frame loop.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    size: wgpu::BufferAddress,
}

impl ReadbackBuffer {
    pub fn new(device: &wgpu::Device, label: &str, size: wgpu::BufferAddress) -> Self {
        ReadbackBuffer {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            size,
        }
    }

    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, src: &wgpu::Buffer) {
        encoder.copy_buffer_to_buffer(src, 0, &self.buffer, 0, self.size);
    }

    pub fn read_u32(&self, device: &wgpu::Device) -> anyhow::Result<u32> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv_timeout(READBACK_TIMEOUT)
            .context("device never signalled readback completion")?
            .map_err(|e| anyhow!("readback map failed: {:?}", e))?;
        let value = {
            let data = slice.get_mapped_range();
            u32::from_le_bytes(data[..4].try_into()?)
        };
        self.buffer.unmap();
        Ok(value)
    }
}
