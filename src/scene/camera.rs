//! Camera system

use glam::{Mat4, Vec3};

use crate::convention::GraphicsBackendConvention;

/// Perspective projection parameters. The aspect ratio is taken from the
/// viewport every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self::perspective(60.0, 0.01, 100.0)
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            near,
            far,
        }
    }

    pub fn tan_half_fov_y(&self) -> f32 {
        (self.fov_y * 0.5).tan()
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    /// Looking at the model field from behind its near edge, slightly pitched
    /// down.
    fn default() -> Self {
        let pitch: f32 = -0.3;
        let position = Vec3::new(0.0, 1.5, -4.0);
        let forward = Vec3::new(0.0, pitch.sin(), pitch.cos());
        Self {
            position,
            target: position + forward,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Unjittered projection in the depth range of `convention`
    pub fn projection_matrix(&self, convention: GraphicsBackendConvention, aspect: f32) -> Mat4 {
        convention.perspective(
            self.projection.fov_y,
            aspect,
            self.projection.near,
            self.projection.far,
        )
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_looks_down_at_the_field() {
        let camera = Camera::default();
        let forward = camera.forward();
        assert!(forward.z > 0.9);
        assert!(forward.y < 0.0);
        assert!((camera.projection.fov_y.to_degrees() - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_origin_is_in_front_of_default_camera() {
        let camera = Camera::default();
        let view = camera.view_matrix();
        let origin = view.transform_point3(Vec3::ZERO);
        assert!(origin.z < 0.0);
    }
}
