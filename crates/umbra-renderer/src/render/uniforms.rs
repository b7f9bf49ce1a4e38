//! Per-frame uniform data.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Camera matrices supplied by the caller each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    /// Already Y-flipped for Vulkan clip space.
    pub projection: Mat4,
}

/// Set 1 binding 0 (std140).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    /// Lighting reconstructs world positions from depth with this.
    pub inverse_view_projection: Mat4,
    pub camera_position: Vec4,
    pub directional_light_count: u32,
    pub point_light_count: u32,
    pub enable_directional_lights: u32,
    pub enable_point_lights: u32,
    pub shadow_far_plane: f32,
    pub _pad: [f32; 3],
}

/// Light counts and switches copied into [`CameraUniform`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightingState {
    pub directional_count: u32,
    pub point_count: u32,
    pub enable_directional: bool,
    pub enable_point: bool,
    pub shadow_far_plane: f32,
}

impl CameraUniform {
    pub fn new(camera: &CameraMatrices, lighting: &LightingState) -> Self {
        let view_projection = camera.projection * camera.view;
        Self {
            model: Mat4::IDENTITY,
            view: camera.view,
            projection: camera.projection,
            inverse_view_projection: view_projection.inverse(),
            camera_position: camera.view.inverse().w_axis,
            directional_light_count: lighting.directional_count,
            point_light_count: lighting.point_count,
            enable_directional_lights: lighting.enable_directional as u32,
            enable_point_lights: lighting.enable_point as u32,
            shadow_far_plane: lighting.shadow_far_plane,
            _pad: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 304);
        assert_eq!(std::mem::offset_of!(CameraUniform, camera_position), 256);
        assert_eq!(std::mem::offset_of!(CameraUniform, shadow_far_plane), 288);
    }

    #[test]
    fn test_camera_position_from_view() {
        let eye = Vec3::new(3.0, 2.0, -5.0);
        let camera = CameraMatrices {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0),
        };
        let uniform = CameraUniform::new(
            &camera,
            &LightingState {
                directional_count: 1,
                point_count: 2,
                enable_directional: true,
                enable_point: false,
                shadow_far_plane: 100.0,
            },
        );
        assert!(uniform.camera_position.truncate().abs_diff_eq(eye, 1e-4));
        assert_eq!(uniform.enable_directional_lights, 1);
        assert_eq!(uniform.enable_point_lights, 0);
        assert_eq!(uniform.model, Mat4::IDENTITY);
    }
}
