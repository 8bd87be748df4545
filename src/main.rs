use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use plume::camera::OrbitCamera;
use plume::frame_timer::FrameTimer;
use plume::particle_system::{ControlEvent, ParticleSystem};
use plume::settings::{self, AppConfig};

gflags::define! {
    --config: &str = "config.toml"
}
gflags::define! {
    --log_filter: &str = "info"
}
gflags::define! {
    -h, --help = false
}

const MAX_DELTA_TIME: f32 = 0.1;
const TITLE_REFRESH: Duration = Duration::from_secs(1);
const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.008,
    g: 0.010,
    b: 0.022,
    a: 1.0,
};

#[derive(Debug, Default, Clone, Copy)]
struct MouseState {
    middle: bool,
    right: bool,
    position: Option<(f64, f64)>,
}

struct GpuState {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    camera: OrbitCamera,
    system: ParticleSystem,
    timer: FrameTimer,
    last_title: Instant,
}

impl GpuState {
    async fn new(
        window: Arc<Window>,
        config: &AppConfig,
        controls: Receiver<ControlEvent>,
    ) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no compatible GPU adapter"))?;
        // The scan passes run 512-wide workgroups, above the default
        // WebGPU limit of 256.
        let required_limits = wgpu::Limits {
            max_compute_invocations_per_workgroup: plume::particles::SCAN_BLOCK_SIZE,
            max_compute_workgroup_size_x: plume::particles::SCAN_BLOCK_SIZE,
            ..wgpu::Limits::default()
        };
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("plume device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("failed to create device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let aspect = surface_config.width as f32 / surface_config.height as f32;
        let camera = OrbitCamera::new(&device, cgmath::Point3::new(0.0, 0.0, 0.0), 10.0, aspect);
        let system = ParticleSystem::new(&device, &queue, format, config, camera.buffer(), controls)?;

        Ok(GpuState {
            surface,
            device,
            queue,
            surface_config,
            camera,
            system,
            timer: FrameTimer::new(config.fps, MAX_DELTA_TIME),
            last_title: Instant::now(),
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.camera.set_aspect(width as f32 / height as f32);
    }

    fn render(&mut self, window: &Window) {
        let delta_time = self.timer.tick();
        self.system.update(&self.device, &self.queue, delta_time);
        self.camera.sync_if_dirty(&self.queue);

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return;
            }
            Err(e) => {
                log::warn!("dropped a frame: {:?}", e);
                return;
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame render"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Particle pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.system.draw(&self.queue, &mut rpass);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        if self.last_title.elapsed() >= TITLE_REFRESH {
            let paused = if self.system.running() { "" } else { " (paused)" };
            window.set_title(&format!(
                "plume - {} particles - {:.0} fps{}",
                self.system.live(),
                self.timer.fps(),
                paused
            ));
            self.last_title = Instant::now();
        }
    }
}

struct App {
    config: AppConfig,
    controls: Sender<ControlEvent>,
    pending_receiver: Option<Receiver<ControlEvent>>,
    window: Option<Arc<Window>>,
    state: Option<GpuState>,
    mouse: MouseState,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("plume")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window_width,
                self.config.window_height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        let Some(receiver) = self.pending_receiver.take() else {
            event_loop.exit();
            return;
        };
        match futures::executor::block_on(GpuState::new(window.clone(), &self.config, receiver)) {
            Ok(state) => {
                self.window = Some(window);
                self.state = Some(state);
            }
            Err(e) => {
                log::error!("GPU initialization failed: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape | KeyCode::KeyQ => event_loop.exit(),
                KeyCode::Space => {
                    let _ = self.controls.send(ControlEvent::TogglePause);
                }
                _ => {}
            },
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Middle => self.mouse.middle = pressed,
                    MouseButton::Right => self.mouse.right = pressed,
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((last_x, last_y)) = self.mouse.position {
                    let dx = (position.x - last_x) as f32;
                    let dy = (position.y - last_y) as f32;
                    if let Some(state) = &mut self.state {
                        if self.mouse.middle {
                            state
                                .camera
                                .rotate((0.25 * dx).to_radians(), (0.25 * dy).to_radians());
                        }
                        if self.mouse.right {
                            state.camera.forward(0.005 * (dx - dy));
                        }
                    }
                }
                self.mouse.position = Some((position.x, position.y));
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(state), Some(window)) = (&mut self.state, &self.window) {
                    state.render(window);
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    gflags::parse();
    if HELP.flag {
        gflags::print_help_and_exit(0);
    }
    scrub_log::init_with_filter_string(LOG_FILTER.flag)
        .map_err(|e| anyhow!("failed to initialize logging: {:?}", e))?;

    let config = settings::load(CONFIG.flag);
    log::info!(
        "particle capacity: {}, emit interval: {} frames, compact interval: {} frames",
        plume::particles::MAX_PARTICLES,
        config.emitter.emit_interval,
        config.emitter.compact_interval
    );

    let (sender, receiver) = crossbeam_channel::unbounded();
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        config,
        controls: sender,
        pending_receiver: Some(receiver),
        window: None,
        state: None,
        mouse: MouseState::default(),
    };
    event_loop.run_app(&mut app).context("event loop failed")?;
    Ok(())
}
