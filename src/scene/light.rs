//! Light types for the scene

use glam::{Vec3, Vec4};

/// The single shadow-casting light
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Point { position: Vec3 },
    /// `direction` points from the scene toward the light
    Directional { direction: Vec3 },
}

impl Light {
    /// Homogeneous world-space form: w = 1 position, w = 0 direction toward the light
    pub fn homogeneous(&self) -> Vec4 {
        match self {
            Light::Point { position } => position.extend(1.0),
            Light::Directional { direction } => direction.normalize_or_zero().extend(0.0),
        }
    }
}

/// Point light circling the origin at a fixed height
#[derive(Debug, Clone)]
pub struct OrbitingLight {
    pub radius: f32,
    pub height: f32,
    /// Radians per second
    pub angular_speed: f32,
    pub angle: f32,
}

impl Default for OrbitingLight {
    fn default() -> Self {
        Self {
            radius: 3.0,
            height: 1.5,
            angular_speed: 0.75,
            angle: 0.0,
        }
    }
}

impl OrbitingLight {
    /// Advance the orbit; a paused light keeps its position
    pub fn update(&mut self, dt: f32, moving: bool) {
        if moving {
            self.angle = (self.angle + self.angular_speed * dt) % std::f32::consts::TAU;
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.angle.cos() * self.radius,
            self.height,
            self.angle.sin() * self.radius,
        )
    }

    pub fn light(&self) -> Light {
        Light::Point {
            position: self.position(),
        }
    }
}
