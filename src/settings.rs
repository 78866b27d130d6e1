//! Tunable parameters bound to the settings panel.

use std::ops::RangeInclusive;

/// Penumbra shape of the contact shadows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactShadowsMode {
    /// Binary occlusion
    #[default]
    Hard,
    Soft,
    /// Soft with a wider falloff band
    VerySoft,
}

impl ContactShadowsMode {
    pub const ALL: [ContactShadowsMode; 3] = [Self::Hard, Self::Soft, Self::VerySoft];

    pub fn label(&self) -> &'static str {
        match self {
            ContactShadowsMode::Hard => "Hard",
            ContactShadowsMode::Soft => "Soft",
            ContactShadowsMode::VerySoft => "Very soft",
        }
    }

    /// Value written into the uniform block
    pub fn as_u32(&self) -> u32 {
        match self {
            ContactShadowsMode::Hard => 0,
            ContactShadowsMode::Soft => 1,
            ContactShadowsMode::VerySoft => 2,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ContactShadowsMode::Soft,
            2 => ContactShadowsMode::VerySoft,
            _ => ContactShadowsMode::Hard,
        }
    }
}

pub const SHADOW_RADIUS_RANGE: RangeInclusive<f32> = 1e-3..=1.0;
pub const SHADOW_RADIUS_PIXELS_RANGE: RangeInclusive<f32> = 1.0..=100.0;
pub const SHADOW_STEPS_RANGE: RangeInclusive<u32> = 1..=64;
pub const FEEDBACK_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Every knob of the renderer. Plain data; the renderer reads a sanitized copy
/// at the start of each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSettings {
    pub use_screen_space_radius: bool,
    /// March length in world units
    pub shadow_radius: f32,
    /// March length in pixels
    pub shadow_radius_pixels: f32,
    pub shadow_steps: u32,
    pub contact_shadows_mode: ContactShadowsMode,
    pub use_noise_offset: bool,
    pub dynamic_noise: bool,
    pub display_shadows_only: bool,
    pub move_light: bool,
    pub enable_txaa: bool,
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub apply_mitchell_filter: bool,
    pub debug_slow_frame: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            use_screen_space_radius: false,
            shadow_radius: 0.25,
            shadow_radius_pixels: 25.0,
            shadow_steps: 8,
            contact_shadows_mode: ContactShadowsMode::Hard,
            use_noise_offset: true,
            dynamic_noise: true,
            display_shadows_only: false,
            move_light: true,
            enable_txaa: false,
            feedback_min: 0.88,
            feedback_max: 0.97,
            apply_mitchell_filter: true,
            debug_slow_frame: false,
        }
    }
}

impl ShadowSettings {
    /// Copy with every numeric field clamped into its UI range. NaN falls back
    /// to the default value.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        Self {
            shadow_radius: clamp_or(self.shadow_radius, SHADOW_RADIUS_RANGE, defaults.shadow_radius),
            shadow_radius_pixels: clamp_or(
                self.shadow_radius_pixels,
                SHADOW_RADIUS_PIXELS_RANGE,
                defaults.shadow_radius_pixels,
            ),
            shadow_steps: self
                .shadow_steps
                .clamp(*SHADOW_STEPS_RANGE.start(), *SHADOW_STEPS_RANGE.end()),
            feedback_min: clamp_or(self.feedback_min, FEEDBACK_RANGE, defaults.feedback_min),
            feedback_max: clamp_or(self.feedback_max, FEEDBACK_RANGE, defaults.feedback_max),
            ..self.clone()
        }
    }

    /// March length as seen by the shader: pixels or world units
    pub fn effective_radius(&self) -> f32 {
        if self.use_screen_space_radius {
            self.shadow_radius_pixels
        } else {
            self.shadow_radius
        }
    }
}

fn clamp_or(value: f32, range: RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(*range.start(), *range.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_clamps_out_of_range_values() {
        let settings = ShadowSettings {
            shadow_radius: 5.0,
            shadow_radius_pixels: 0.0,
            shadow_steps: 0,
            feedback_min: -1.0,
            feedback_max: f32::NAN,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(settings.shadow_radius, 1.0);
        assert_eq!(settings.shadow_radius_pixels, 1.0);
        assert_eq!(settings.shadow_steps, 1);
        assert_eq!(settings.feedback_min, 0.0);
        assert_eq!(settings.feedback_max, ShadowSettings::default().feedback_max);
    }

    #[test]
    fn test_effective_radius_follows_mode() {
        let mut settings = ShadowSettings::default();
        assert_eq!(settings.effective_radius(), 0.25);
        settings.use_screen_space_radius = true;
        assert_eq!(settings.effective_radius(), 25.0);
    }

    #[test]
    fn test_mode_round_trips_through_uniform_value() {
        for mode in ContactShadowsMode::ALL {
            assert_eq!(ContactShadowsMode::from_u32(mode.as_u32()), mode);
        }
    }
}
