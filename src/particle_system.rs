use anyhow::Result;
use crossbeam_channel::Receiver;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::buffer_util::SyncedUniform;
use crate::compactor::Compactor;
use crate::emitter::{self, EmissionUniforms, Emitter};
use crate::integrator::Integrator;
use crate::load_image;
use crate::particle_renderer::{DrawUniforms, ParticleRenderer};
use crate::particle_store::ParticleStore;
use crate::settings::{AppConfig, EmitterSettings, RenderSettings, UpdateSettings};

/// Commands produced by the windowing layer, drained once per frame at
/// the top of `update`.
#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    TogglePause,
}

/// Frame-counting trigger. An interval of zero disables the stage
/// entirely; the comparison is `>=` so lowering the interval below an
/// already accumulated count still fires.
#[derive(Debug, Default)]
struct Cadence {
    elapsed: u32,
}

impl Cadence {
    fn tick(&mut self, interval: u32) -> bool {
        if interval == 0 {
            return false;
        }
        self.elapsed += 1;
        if self.elapsed >= interval {
            self.elapsed = 0;
            true
        } else {
            false
        }
    }
}

/// Owns the particle store, every stage, and the live tuning state, and
/// decides per frame which stages run. Stages never talk to each other;
/// all data flows through the store's buffers.
pub struct ParticleSystem {
    store: ParticleStore,
    emitter: Emitter,
    integrator: Integrator,
    compactor: Compactor,
    renderer: ParticleRenderer,
    emission: SyncedUniform<EmitterSettings, EmissionUniforms>,
    update_settings: UpdateSettings,
    render_settings: SyncedUniform<RenderSettings, DrawUniforms>,
    controls: Receiver<ControlEvent>,
    running: bool,
    emit_cadence: Cadence,
    compact_cadence: Cadence,
    rng: StdRng,
}

impl ParticleSystem {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        config: &AppConfig,
        camera_buffer: &wgpu::Buffer,
        controls: Receiver<ControlEvent>,
    ) -> Result<Self> {
        let store = ParticleStore::new(device);
        let emission = SyncedUniform::new(
            device,
            "Emission settings",
            config.emitter,
            |s| EmissionUniforms::from_settings(s),
        );
        let render_settings = SyncedUniform::new(
            device,
            "Draw params",
            config.render,
            |s| DrawUniforms::from_settings(s),
        );

        let emitter = Emitter::new(device, &store, emission.buffer())?;
        let integrator = Integrator::new(device, &store)?;
        let compactor = Compactor::new(device, &store)?;
        let (billboard_view, billboard_sampler) = load_image::load_billboard_texture(device, queue);
        let renderer = ParticleRenderer::new(
            device,
            surface_format,
            &store,
            camera_buffer,
            render_settings.buffer(),
            &billboard_view,
            &billboard_sampler,
        )?;

        Ok(ParticleSystem {
            store,
            emitter,
            integrator,
            compactor,
            renderer,
            emission,
            update_settings: config.update,
            render_settings,
            controls,
            running: true,
            emit_cadence: Cadence::default(),
            compact_cadence: Cadence::default(),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn live(&self) -> u32 {
        self.store.live()
    }

    pub fn running(&self) -> bool {
        self.running
    }

    // Settings are edited in place by the front-end; mutable access
    // marks the device copy stale where one exists.
    pub fn emitter_settings(&self) -> &EmitterSettings {
        self.emission.get()
    }

    pub fn emitter_settings_mut(&mut self) -> &mut EmitterSettings {
        self.emission.edit()
    }

    pub fn update_settings_mut(&mut self) -> &mut UpdateSettings {
        &mut self.update_settings
    }

    pub fn render_settings_mut(&mut self) -> &mut RenderSettings {
        self.render_settings.edit()
    }

    /// Runs one simulated frame: drains control events, then dispatches
    /// whichever compute stages are due. Submission happens here; if a
    /// compaction was encoded this blocks on its readback and adopts
    /// the surviving count.
    pub fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, delta_time: f32) {
        while let Ok(event) = self.controls.try_recv() {
            match event {
                ControlEvent::TogglePause => self.running = !self.running,
            }
        }
        if !self.running {
            return;
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle sim"),
        });
        let mut encoded_any = false;
        let mut compacted = false;

        if self.emit_cadence.tick(self.emission.get().emit_interval) {
            encoded_any |= self.encode_emit(queue, &mut encoder);
        }
        if self.store.live() > 0 {
            self.integrator.encode(
                queue,
                &mut encoder,
                self.store.current_index(),
                self.store.live(),
                &self.update_settings,
                delta_time,
            );
            encoded_any = true;
            if self.compact_cadence.tick(self.emission.get().compact_interval) {
                self.compactor.encode(queue, &mut encoder, &mut self.store);
                compacted = true;
            }
        }

        if encoded_any {
            queue.submit(std::iter::once(encoder.finish()));
            if compacted {
                if let Err(e) = self.compactor.resolve(device, &mut self.store) {
                    log::error!("compaction readback failed: {:#}", e);
                }
            }
        }
    }

    fn encode_emit(&mut self, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder) -> bool {
        self.emission.sync_if_dirty(queue);
        let settings = *self.emission.get();
        let count = emitter::spawn_count(
            &mut self.rng,
            settings.count_min,
            settings.count_max,
            self.store.live(),
            self.store.capacity(),
        );
        if count == 0 {
            return false;
        }
        let offset = self.store.live();
        self.emitter
            .encode(queue, encoder, self.store.current_index(), offset, count);
        // Optimistic: the dispatch fills these slots before anything
        // reads them, because later stages sit behind it in submission
        // order. Safe as long as all live-count mutation stays on this
        // thread.
        self.store.add_live(count);
        true
    }

    /// Draws the current population; a no-op while empty. Runs in both
    /// the running and paused states.
    pub fn draw(&mut self, queue: &wgpu::Queue, rpass: &mut wgpu::RenderPass<'_>) {
        if self.store.live() == 0 {
            return;
        }
        self.render_settings.sync_if_dirty(queue);
        self.renderer
            .render(rpass, self.store.current_index(), self.store.live());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_disables_the_cadence() {
        let mut cadence = Cadence::default();
        for _ in 0..100 {
            assert!(!cadence.tick(0));
        }
        assert_eq!(cadence.elapsed, 0);
    }

    #[test]
    fn cadence_fires_every_interval_frames() {
        let mut cadence = Cadence::default();
        let fired: Vec<bool> = (0..9).map(|_| cadence.tick(3)).collect();
        assert_eq!(
            fired,
            vec![false, false, true, false, false, true, false, false, true]
        );
    }

    #[test]
    fn interval_of_one_fires_every_frame() {
        let mut cadence = Cadence::default();
        for _ in 0..5 {
            assert!(cadence.tick(1));
        }
    }

    #[test]
    fn lowering_the_interval_still_fires() {
        let mut cadence = Cadence::default();
        assert!(!cadence.tick(10));
        assert!(!cadence.tick(10));
        assert!(!cadence.tick(10));
        // The tuned interval dropped below the accumulated count.
        assert!(cadence.tick(2));
        assert_eq!(cadence.elapsed, 0);
    }
}
