//! Screen-space contact shadow ray march.
//!
//! From each pixel a short ray is marched toward the light in view space.
//! Every sample is projected back to the screen and compared with the linear
//! depth stored there; a sample behind the stored surface, but not too far
//! behind, is occluded.

use glam::{UVec2, Vec2};
use image::Luma;

use super::{direction_to_light, pixel_uv, sample_point, ScalarImage};
use crate::frame::{project_to_uv, FrameUniforms};
use crate::settings::ContactShadowsMode;

/// Depth bias as a fraction of the pixel's linear depth
pub const DEPTH_BIAS_SCALE: f32 = 0.002;
pub const MIN_DEPTH_BIAS: f32 = 1e-4;
/// Soft falloff band as a fraction of the ray length
pub const SOFT_BAND_SCALE: f32 = 0.5;
pub const VERY_SOFT_BAND_SCALE: f32 = 2.0;

/// Per-pixel value in [0, 1) that decorrelates the march start between
/// neighbours. `phase` shifts the pattern for dynamic noise.
pub fn interleaved_gradient_noise(pixel: Vec2, phase: u32) -> f32 {
    let p = pixel + Vec2::splat(5.588238 * phase as f32);
    let inner = p.dot(Vec2::new(0.06711056, 0.00583715));
    let value = 52.9829189 * (inner - inner.floor());
    value - value.floor()
}

pub fn depth_bias(linear_depth: f32) -> f32 {
    (linear_depth * DEPTH_BIAS_SCALE).max(MIN_DEPTH_BIAS)
}

/// March length in view units at the given depth
pub fn ray_length(uniforms: &FrameUniforms, linear_depth: f32) -> f32 {
    if uniforms.use_screen_space_radius {
        let height = uniforms.viewport.y.max(1) as f32;
        uniforms.shadow_radius * 2.0 * uniforms.tan_half_fov_y * linear_depth / height
    } else {
        uniforms.shadow_radius
    }
}

/// How much one sample occludes, in [0, 1]. `delta` is how far the sample
/// lies behind the stored surface.
pub fn occlusion_amount(mode: ContactShadowsMode, delta: f32, bias: f32, ray_length: f32) -> f32 {
    if !(delta > bias) {
        return 0.0;
    }
    let falloff = |band: f32| (1.0 - (delta - bias) / band).clamp(0.0, 1.0);
    match mode {
        ContactShadowsMode::Hard => {
            if delta < ray_length {
                1.0
            } else {
                0.0
            }
        }
        ContactShadowsMode::Soft => falloff(ray_length * SOFT_BAND_SCALE),
        ContactShadowsMode::VerySoft => falloff(ray_length * VERY_SOFT_BAND_SCALE),
    }
}

/// Shadow term of one pixel: 1 lit, 0 fully occluded
pub fn march_shadow(linear_depth: &ScalarImage, pixel: UVec2, uniforms: &FrameUniforms) -> f32 {
    let (width, height) = linear_depth.dimensions();
    let size = UVec2::new(width, height);
    let depth = linear_depth.get_pixel(pixel.x, pixel.y)[0];
    if !(depth > 0.0) || !depth.is_finite() {
        return 1.0;
    }

    let origin = uniforms
        .ndc_to_view
        .view_position(pixel_uv(pixel, size), depth);
    let Some(direction) = direction_to_light(uniforms.light_position_view, origin) else {
        return 1.0;
    };

    let length = ray_length(uniforms, depth);
    let steps = uniforms.shadow_steps.max(1);
    let step = length / steps as f32;
    let offset = if uniforms.use_noise_offset {
        interleaved_gradient_noise(pixel.as_vec2(), uniforms.noise_phase)
    } else {
        0.0
    };
    let bias = depth_bias(depth);

    let mut occlusion: f32 = 0.0;
    for i in 0..steps {
        let sample = origin + direction * (step * (i as f32 + 1.0 - offset));
        let ray_depth = -sample.z;
        if ray_depth <= 0.0 {
            break;
        }
        let Some(uv) = project_to_uv(&uniforms.view_to_proj, uniforms.convention, sample) else {
            break;
        };
        let Some(Luma([scene_depth])) = sample_point(linear_depth, uv) else {
            break;
        };

        let delta = ray_depth - scene_depth;
        occlusion = occlusion.max(occlusion_amount(
            uniforms.contact_shadows_mode,
            delta,
            bias,
            length,
        ));
        if occlusion >= 1.0 {
            break;
        }
    }

    1.0 - occlusion
}

/// Shadow buffer for a whole linear depth buffer
pub fn compute_shadows(linear_depth: &ScalarImage, uniforms: &FrameUniforms) -> ScalarImage {
    let (width, height) = linear_depth.dimensions();
    ScalarImage::from_fn(width, height, |x, y| {
        Luma([march_shadow(linear_depth, UVec2::new(x, y), uniforms)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameInputs, FrameState};
    use crate::scene::Light;
    use crate::shading::uv_to_pixel;
    use crate::settings::ShadowSettings;
    use crate::shading::test_scene::*;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    const SIZE: UVec2 = UVec2::new(128, 128);

    fn light_above() -> Light {
        Light::Point {
            position: Vec3::new(0.0, 10.0, 0.0),
        }
    }

    fn settings(mode: ContactShadowsMode) -> ShadowSettings {
        ShadowSettings {
            contact_shadows_mode: mode,
            use_noise_offset: false,
            ..Default::default()
        }
    }

    fn bumpy_depth(seed: u64) -> ScalarImage {
        let mut rng = StdRng::seed_from_u64(seed);
        ScalarImage::from_fn(SIZE.x, SIZE.y, |_, _| Luma([rng.gen_range(2.0..6.0)]))
    }

    #[rstest]
    #[case::hard(ContactShadowsMode::Hard)]
    #[case::soft(ContactShadowsMode::Soft)]
    #[case::very_soft(ContactShadowsMode::VerySoft)]
    fn test_output_is_in_unit_range(#[case] mode: ContactShadowsMode) {
        let camera = overhead_camera();
        let settings = ShadowSettings {
            use_noise_offset: true,
            ..settings(mode)
        };
        let uniforms = uniforms(&camera, light_above(), &settings, SIZE);
        let shadows = compute_shadows(&bumpy_depth(1), &uniforms);
        assert!(shadows.pixels().all(|p| (0.0..=1.0).contains(&p[0])));
    }

    #[test]
    fn test_hard_mode_is_binary() {
        let camera = overhead_camera();
        let uniforms = uniforms(&camera, light_above(), &settings(ContactShadowsMode::Hard), SIZE);
        let shadows = compute_shadows(&bumpy_depth(2), &uniforms);
        assert!(shadows.pixels().all(|p| p[0] == 0.0 || p[0] == 1.0));
        assert!(shadows.pixels().any(|p| p[0] == 0.0));
    }

    #[test]
    fn test_very_soft_band_is_wider() {
        let (bias, length) = (0.01, 0.25);
        let mut wider_somewhere = false;
        for i in 0..200 {
            let delta = i as f32 * 0.005;
            let soft = occlusion_amount(ContactShadowsMode::Soft, delta, bias, length);
            let very_soft = occlusion_amount(ContactShadowsMode::VerySoft, delta, bias, length);
            assert!(very_soft >= soft);
            wider_somewhere |= soft == 0.0 && very_soft > 0.0;
        }
        assert!(wider_somewhere);

        let camera = overhead_camera();
        let depth = bumpy_depth(3);
        let soft = compute_shadows(
            &depth,
            &uniforms(&camera, light_above(), &settings(ContactShadowsMode::Soft), SIZE),
        );
        let very_soft = compute_shadows(
            &depth,
            &uniforms(&camera, light_above(), &settings(ContactShadowsMode::VerySoft), SIZE),
        );
        for (s, v) in soft.pixels().zip(very_soft.pixels()) {
            assert!(v[0] <= s[0]);
        }
    }

    #[test]
    fn test_noise_pattern_repeats_every_eight_frames() {
        let camera = overhead_camera();
        let settings = ShadowSettings {
            contact_shadows_mode: ContactShadowsMode::Soft,
            use_noise_offset: true,
            dynamic_noise: true,
            move_light: false,
            ..Default::default()
        };
        let depth = bumpy_depth(4);
        let mut state = FrameState::default();
        let frames: Vec<ScalarImage> = (0..=8)
            .map(|_| {
                let uniforms = state.begin_frame(FrameInputs {
                    camera: &camera,
                    light: light_above(),
                    settings: &settings,
                    width: SIZE.x,
                    height: SIZE.y,
                });
                state.end_frame();
                compute_shadows(&depth, &uniforms)
            })
            .collect();

        assert_eq!(frames[0], frames[8]);
        assert_ne!(frames[0], frames[1]);
    }

    /// Pixel under the point `distance` along the ray from `pixel` toward the
    /// light, and that point's linear depth
    fn along_ray(uniforms: &FrameUniforms, pixel: UVec2, depth: f32, distance: f32) -> (UVec2, f32) {
        let origin = uniforms
            .ndc_to_view
            .view_position(pixel_uv(pixel, uniforms.viewport), depth);
        let direction = direction_to_light(uniforms.light_position_view, origin).unwrap();
        let point = origin + direction * distance;
        let uv = project_to_uv(&uniforms.view_to_proj, uniforms.convention, point).unwrap();
        (uv_to_pixel(uv, uniforms.viewport).unwrap(), -point.z)
    }

    #[test]
    fn test_single_step_decides_with_one_sample() {
        const WIDE: UVec2 = UVec2::new(1024, 1024);
        const PLANE_DEPTH: f32 = 2.0;
        let camera = overhead_camera();
        let settings = ShadowSettings {
            shadow_steps: 1,
            shadow_radius: 0.01,
            use_screen_space_radius: false,
            ..settings(ContactShadowsMode::Hard)
        };
        let uniforms = uniforms(&camera, light_above(), &settings, WIDE);
        let pixel = UVec2::new(512, 600);

        // Occluder just in front of the ray point `distance` away; bias is 0.004 here
        let shadow_with_occluder_at = |distance: f32| {
            let (hit, ray_depth) = along_ray(&uniforms, pixel, PLANE_DEPTH, distance);
            assert_ne!(hit, pixel);
            let mut depth = ScalarImage::from_pixel(WIDE.x, WIDE.y, Luma([PLANE_DEPTH]));
            depth.put_pixel(hit.x, hit.y, Luma([ray_depth - 0.007]));
            march_shadow(&depth, pixel, &uniforms)
        };

        assert_eq!(shadow_with_occluder_at(0.01), 0.0);
        assert_eq!(shadow_with_occluder_at(0.03), 1.0);
    }

    #[test]
    fn test_soft_modes_produce_partial_shadow() {
        let camera = overhead_camera();
        let scene = TestScene {
            ground: true,
            spheres: vec![(Vec3::new(0.0, 0.15, 0.0), 0.07)],
        };
        for mode in [ContactShadowsMode::Soft, ContactShadowsMode::VerySoft] {
            let uniforms = uniforms(&camera, light_above(), &settings(mode), SIZE);
            let shadows = compute_shadows(&scene.linear_depth(&uniforms), &uniforms);
            assert!(shadows.pixels().any(|p| p[0] > 0.0 && p[0] < 1.0), "{mode:?}");
        }
    }

    #[test]
    fn test_zero_steps_are_treated_as_one() {
        let camera = overhead_camera();
        let depth = bumpy_depth(6);
        let mut uniforms = uniforms(&camera, light_above(), &settings(ContactShadowsMode::Hard), SIZE);
        uniforms.shadow_steps = 1;
        let one = compute_shadows(&depth, &uniforms);
        uniforms.shadow_steps = 0;
        assert_eq!(compute_shadows(&depth, &uniforms), one);
    }

    #[test]
    fn test_flat_ground_is_fully_lit() {
        let camera = overhead_camera();
        let scene = TestScene {
            ground: true,
            spheres: Vec::new(),
        };
        for mode in ContactShadowsMode::ALL {
            let uniforms = uniforms(&camera, light_above(), &settings(mode), SIZE);
            let shadows = compute_shadows(&scene.linear_depth(&uniforms), &uniforms);
            assert!(shadows.pixels().all(|p| p[0] == 1.0), "{mode:?}");
        }
    }

    #[test]
    fn test_ground_under_elevated_sphere_is_shadowed() {
        let camera = overhead_camera();
        let scene = TestScene {
            ground: true,
            spheres: vec![(Vec3::new(0.0, 0.15, 0.0), 0.07)],
        };
        let uniforms = uniforms(&camera, light_above(), &settings(ContactShadowsMode::Hard), SIZE);
        let depth = scene.linear_depth(&uniforms);
        let shadows = compute_shadows(&depth, &uniforms);

        let under = pixel_of(&uniforms, Vec3::ZERO);
        let ground_depth = uniforms
            .world_to_view
            .transform_point3(Vec3::ZERO)
            .z
            .abs();
        // The ground point itself is visible past the sphere
        assert!((depth.get_pixel(under.x, under.y)[0] - ground_depth).abs() < 0.05);
        assert_eq!(shadows.get_pixel(under.x, under.y)[0], 0.0);

        for far in [Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.5), Vec3::new(0.0, 0.0, -1.0)] {
            let pixel = pixel_of(&uniforms, far);
            assert_eq!(shadows.get_pixel(pixel.x, pixel.y)[0], 1.0, "{far}");
        }
    }

    #[test]
    fn test_light_at_the_surface_is_lit() {
        let camera = overhead_camera();
        let depth = bumpy_depth(7);
        let mut uniforms = uniforms(&camera, light_above(), &settings(ContactShadowsMode::Hard), SIZE);
        let pixel = UVec2::new(10, 20);
        let at = uniforms
            .ndc_to_view
            .view_position(pixel_uv(pixel, SIZE), depth.get_pixel(pixel.x, pixel.y)[0]);
        uniforms.light_position_view = at.extend(1.0);
        assert_eq!(march_shadow(&depth, pixel, &uniforms), 1.0);
    }

    #[test]
    fn test_screen_space_radius_scales_with_depth() {
        let camera = overhead_camera();
        let settings = ShadowSettings {
            use_screen_space_radius: true,
            shadow_radius_pixels: 20.0,
            ..Default::default()
        };
        let uniforms = uniforms(&camera, light_above(), &settings, SIZE);
        let near = ray_length(&uniforms, 1.0);
        assert!((ray_length(&uniforms, 4.0) - 4.0 * near).abs() < 1e-6);
        let expected = 20.0 * 2.0 * (22.5f32).to_radians().tan() / SIZE.y as f32;
        assert!((near - expected).abs() < 1e-6);
    }

    #[test]
    fn test_noise_is_in_unit_range_and_phase_dependent() {
        let mut differs = false;
        for y in 0..16 {
            for x in 0..16 {
                let p = Vec2::new(x as f32, y as f32);
                let n = interleaved_gradient_noise(p, 0);
                assert!((0.0..1.0).contains(&n));
                differs |= n != interleaved_gradient_noise(p, 3);
            }
        }
        assert!(differs);
    }
}
