use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use cgmath::{Deg, Matrix4, Point3, SquareMatrix, Vector3};

use crate::buffer_util::{make_uniform_buffer, SizedBuffer};

const Z_NEAR: f32 = 0.001;
const Z_FAR: f32 = 100_000.0;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

// Must match the CameraUniforms block in draw.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniforms {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    view_inv: [[f32; 4]; 4],
}

const _: () = assert!(std::mem::size_of::<CameraUniforms>() == 192);

/// Camera pose in spherical coordinates around a look-at point.
/// phi is the polar angle, clamped away from the poles so the up
/// vector stays well defined.
pub struct OrbitState {
    pub look_at: Point3<f32>,
    pub theta: f32,
    pub phi: f32,
    pub radius: f32,
    pub aspect: f32,
}

impl OrbitState {
    pub fn new(look_at: Point3<f32>, radius: f32, aspect: f32) -> Self {
        OrbitState {
            look_at,
            theta: 0.0,
            phi: PI * 0.5,
            radius,
            aspect,
        }
    }

    pub fn position(&self) -> Point3<f32> {
        let offset = Vector3::new(
            self.radius * self.phi.sin() * self.theta.cos(),
            self.radius * self.phi.cos(),
            self.radius * self.phi.sin() * self.theta.sin(),
        );
        self.look_at + offset
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.theta -= delta_x;
        if self.theta < 0.0 {
            self.theta += 2.0 * PI;
        } else if self.theta >= 2.0 * PI {
            self.theta -= 2.0 * PI;
        }
        self.phi = (self.phi + delta_y).clamp(0.1, PI - 0.1);
    }

    pub fn forward(&mut self, delta: f32) {
        self.radius = (self.radius + delta).max(0.1);
    }

    pub fn uniforms(&self) -> CameraUniforms {
        let view = Matrix4::look_at_rh(self.position(), self.look_at, Vector3::unit_y());
        let proj = OPENGL_TO_WGPU_MATRIX * cgmath::perspective(Deg(45.0), self.aspect, Z_NEAR, Z_FAR);
        let view_inv = view.invert().unwrap_or_else(|| Matrix4::identity());
        CameraUniforms {
            view: view.into(),
            proj: proj.into(),
            view_inv: view_inv.into(),
        }
    }
}

/// Orbit camera owning its device uniform buffer. The draw stage binds
/// the buffer; the host copy is refreshed only when the pose changed.
pub struct OrbitCamera {
    state: OrbitState,
    buffer: SizedBuffer,
    dirty: bool,
}

impl OrbitCamera {
    pub fn new(device: &wgpu::Device, look_at: Point3<f32>, radius: f32, aspect: f32) -> Self {
        let state = OrbitState::new(look_at, radius, aspect);
        let buffer = make_uniform_buffer(device, "Camera uniforms", &state.uniforms());
        OrbitCamera {
            state,
            buffer,
            dirty: false,
        }
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.state.rotate(delta_x, delta_y);
        self.dirty = true;
    }

    pub fn forward(&mut self, delta: f32) {
        self.state.forward(delta);
        self.dirty = true;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.state.aspect = aspect;
        self.dirty = true;
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer.buffer
    }

    pub fn sync_if_dirty(&mut self, queue: &wgpu::Queue) {
        if self.dirty {
            queue.write_buffer(
                &self.buffer.buffer,
                0,
                bytemuck::bytes_of(&self.state.uniforms()),
            );
            self.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::EuclideanSpace;

    #[test]
    fn position_stays_on_the_orbit_sphere() {
        let mut state = OrbitState::new(Point3::new(1.0, 2.0, 3.0), 7.5, 16.0 / 9.0);
        for _ in 0..50 {
            state.rotate(0.3, 0.17);
            let r = (state.position() - state.look_at).map(|c| c * c);
            let dist = (r.x + r.y + r.z).sqrt();
            assert!((dist - 7.5).abs() < 1e-3);
        }
    }

    #[test]
    fn polar_angle_is_clamped_away_from_the_poles() {
        let mut state = OrbitState::new(Point3::origin(), 5.0, 1.0);
        state.rotate(0.0, 100.0);
        assert!((state.phi - (PI - 0.1)).abs() < 1e-6);
        state.rotate(0.0, -100.0);
        assert!((state.phi - 0.1).abs() < 1e-6);
    }

    #[test]
    fn dolly_never_reaches_the_center() {
        let mut state = OrbitState::new(Point3::origin(), 5.0, 1.0);
        state.forward(-100.0);
        assert!(state.radius >= 0.1);
    }

    #[test]
    fn view_inverse_is_the_inverse() {
        let state = OrbitState::new(Point3::new(0.5, -2.0, 4.0), 11.0, 1.5);
        let view = Matrix4::look_at_rh(state.position(), state.look_at, Vector3::unit_y());
        let uniforms = state.uniforms();
        let inv: Matrix4<f32> = uniforms.view_inv.into();
        let product = view * inv;
        let identity = Matrix4::<f32>::identity();
        let a: [[f32; 4]; 4] = product.into();
        let b: [[f32; 4]; 4] = identity.into();
        for (col_a, col_b) in a.iter().zip(b.iter()) {
            for (x, y) in col_a.iter().zip(col_b.iter()) {
                assert!((x - y).abs() < 1e-4);
            }
        }
    }
}
