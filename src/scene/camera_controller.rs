//! Camera controller system
//!
//! Input mapping lives in the demo; controllers only turn an abstract
//! [`CameraInput`] into camera motion.

use glam::{Vec2, Vec3};

use super::Camera;

/// Input state for camera controllers
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (WASD, QE for up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Sprint modifier (shift)
    pub sprint: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Mouse scroll delta (positive = scroll up)
    pub scroll_delta: f32,

    /// Whether mouse look is active (e.g., right mouse button held)
    pub mouse_look_active: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    /// Whether anything in this input would move the camera
    pub fn is_idle(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right || self.up || self.down)
            && (!self.mouse_look_active || self.mouse_delta == Vec2::ZERO)
    }
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;

    /// Reset the controller to default state
    fn reset(&mut self);
}

/// Free-fly camera controller (FPS-style)
///
/// - WASD: Move forward/backward/left/right
/// - QE: Move up/down
/// - Mouse: Look around (when mouse_look_active)
/// - Scroll: Adjust movement speed
/// - Shift: Sprint (2x speed)
pub struct FreeFlyController {
    /// Current yaw angle (horizontal rotation) in radians
    pub yaw: f32,
    /// Current pitch angle in radians, positive looks down
    pub pitch: f32,
    /// Base movement speed in units per second
    pub move_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Mouse sensitivity (radians per pixel)
    pub mouse_sensitivity: f32,
    pub sprint_multiplier: f32,
    /// Speed change per scroll unit
    pub scroll_speed_factor: f32,
}

impl Default for FreeFlyController {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            move_speed: 2.0,
            min_speed: 0.25,
            max_speed: 20.0,
            mouse_sensitivity: 0.003,
            sprint_multiplier: 2.0,
            scroll_speed_factor: 1.2,
        }
    }
}

impl FreeFlyController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }

    /// Initialize yaw/pitch from camera's current orientation
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        let forward = camera.forward();
        self.yaw = forward.z.atan2(forward.x);
        self.pitch = (-forward.y).asin();
    }

    fn forward_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            -self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    /// Perpendicular to forward, on the XZ plane
    fn right_direction(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, self.yaw.cos()).normalize()
    }
}

impl CameraController for FreeFlyController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.scroll_delta != 0.0 {
            if input.scroll_delta > 0.0 {
                self.move_speed *= self.scroll_speed_factor;
            } else {
                self.move_speed /= self.scroll_speed_factor;
            }
            self.move_speed = self.move_speed.clamp(self.min_speed, self.max_speed);
        }

        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            self.yaw += input.mouse_delta.x * self.mouse_sensitivity;
            self.pitch += input.mouse_delta.y * self.mouse_sensitivity;

            let max_pitch = std::f32::consts::FRAC_PI_2 - 0.01;
            self.pitch = self.pitch.clamp(-max_pitch, max_pitch);
            self.yaw %= 2.0 * std::f32::consts::PI;
        }

        let forward = self.forward_direction();
        let right = self.right_direction();

        let mut velocity = Vec3::ZERO;
        if input.forward {
            velocity += forward;
        }
        if input.backward {
            velocity -= forward;
        }
        if input.right {
            velocity += right;
        }
        if input.left {
            velocity -= right;
        }
        if input.up {
            velocity += Vec3::Y;
        }
        if input.down {
            velocity -= Vec3::Y;
        }

        if velocity.length_squared() > 0.0 {
            velocity = velocity.normalize();
        }

        let speed = if input.sprint {
            self.move_speed * self.sprint_multiplier
        } else {
            self.move_speed
        };

        camera.position += velocity * speed * dt;
        camera.target = camera.position + forward;
    }

    fn name(&self) -> &'static str {
        "FreeFly"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
