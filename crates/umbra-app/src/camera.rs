//! Orbit camera driven by the arrow keys and mouse wheel.

use glam::{Mat4, Vec3};
use umbra_renderer::CameraMatrices;

const MIN_DISTANCE: f32 = 2.0;
const MAX_DISTANCE: f32 = 60.0;
const PITCH_LIMIT: f32 = 1.5;

pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Radians around +Y.
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
}

impl OrbitCamera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            target: Vec3::new(0.0, 1.0, 0.0),
            distance: 14.0,
            yaw: 0.6,
            pitch: 0.45,
            fov_y: 60f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 200.0,
        };
        camera.set_viewport(width, height);
        camera
    }

    /// Zero-sized viewports keep the previous aspect.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn orbit(&mut self, d_yaw: f32, d_pitch: f32) {
        self.yaw = (self.yaw + d_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + d_pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance - delta).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    pub fn matrices(&self) -> CameraMatrices {
        let view = Mat4::look_at_rh(self.eye(), self.target, Vec3::Y);
        let mut projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // Vulkan clip space points Y down.
        projection.y_axis.y *= -1.0;
        CameraMatrices { view, projection }
    }
}
