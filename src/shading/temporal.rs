//! Temporal reprojection and feedback filter.
//!
//! The current (jittered) color is optionally reconstructed with a
//! Mitchell-Netravali filter, last frame's output is fetched at the
//! reprojected position, clamped to the current 3x3 neighbourhood and blended
//! in with a weight that drops with luminance change and motion.

use glam::{IVec2, UVec2, Vec2, Vec3};
use image::{Rgb, Rgb32FImage};

use super::{pixel_uv, VelocityImage};
use crate::frame::{project_to_uv, FrameUniforms};

/// Feedback falloff per pixel of screen motion
pub const MOTION_SENSITIVITY: f32 = 0.125;

/// Luminance floor when normalising the history difference
const LUMINANCE_FLOOR: f32 = 0.2;

const MITCHELL_B: f32 = 1.0 / 3.0;
const MITCHELL_C: f32 = 1.0 / 3.0;

/// Rec. 709 luma
pub fn luminance(color: Vec3) -> f32 {
    color.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Mitchell-Netravali kernel with B = C = 1/3
pub fn mitchell_netravali(x: f32) -> f32 {
    let (b, c) = (MITCHELL_B, MITCHELL_C);
    let x = x.abs();
    let x2 = x * x;
    let x3 = x2 * x;
    if x < 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * x3 + (-18.0 + 12.0 * b + 6.0 * c) * x2 + (6.0 - 2.0 * b)) / 6.0
    } else if x < 2.0 {
        ((-b - 6.0 * c) * x3 + (6.0 * b + 30.0 * c) * x2 + (-12.0 * b - 48.0 * c) * x + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}

fn fetch_clamped(image: &Rgb32FImage, texel: IVec2) -> Vec3 {
    let (width, height) = image.dimensions();
    let max = IVec2::new(width as i32 - 1, height as i32 - 1);
    let t = texel.clamp(IVec2::ZERO, max.max(IVec2::ZERO));
    Vec3::from_array(image.get_pixel(t.x as u32, t.y as u32).0)
}

fn neighbourhood() -> impl Iterator<Item = IVec2> {
    (-1..=1).flat_map(|y| (-1..=1).map(move |x| IVec2::new(x, y)))
}

/// Current color at `pixel` reconstructed over the 3x3 neighbourhood. The
/// samples sit `jitter` pixels away from where an unjittered frame would
/// have put them.
pub fn filter_current(current: &Rgb32FImage, pixel: UVec2, jitter: Vec2) -> Vec3 {
    let center = pixel.as_ivec2();
    let mut sum = Vec3::ZERO;
    let mut weight_sum = 0.0;
    for offset in neighbourhood() {
        let weight = mitchell_netravali((offset.as_vec2() - jitter).length());
        sum += fetch_clamped(current, center + offset) * weight;
        weight_sum += weight;
    }
    if weight_sum.abs() < 1e-6 {
        return fetch_clamped(current, center);
    }
    (sum / weight_sum).max(Vec3::ZERO)
}

/// Per-channel min and max of the 3x3 neighbourhood
pub fn neighbourhood_bounds(current: &Rgb32FImage, pixel: UVec2) -> (Vec3, Vec3) {
    let center = pixel.as_ivec2();
    neighbourhood().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(lo, hi), offset| {
            let c = fetch_clamped(current, center + offset);
            (lo.min(c), hi.max(c))
        },
    )
}

/// Bilinear fetch with clamp-to-edge addressing
pub fn sample_bilinear(image: &Rgb32FImage, uv: Vec2) -> Vec3 {
    let (width, height) = image.dimensions();
    let p = uv * Vec2::new(width as f32, height as f32) - 0.5;
    let base = p.floor();
    let f = p - base;
    let t = base.as_ivec2();
    let top = fetch_clamped(image, t).lerp(fetch_clamped(image, t + IVec2::X), f.x);
    let bottom = fetch_clamped(image, t + IVec2::Y).lerp(fetch_clamped(image, t + IVec2::ONE), f.x);
    top.lerp(bottom, f.y)
}

/// History blend weight between the two bounds, given in either order
pub fn feedback_weight(current: Vec3, history: Vec3, velocity_pixels: f32, lo: f32, hi: f32) -> f32 {
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    let lum_current = luminance(current);
    let lum_history = luminance(history);
    let difference =
        (lum_current - lum_history).abs() / lum_current.max(lum_history).max(LUMINANCE_FLOOR);
    let similarity = (1.0 - difference).clamp(0.0, 1.0);
    let motion_confidence = 1.0 / (1.0 + velocity_pixels.abs() * MOTION_SENSITIVITY);
    let k = lo + (hi - lo) * similarity * similarity * motion_confidence;
    if k.is_finite() {
        k.max(lo).min(hi)
    } else {
        lo
    }
}

/// Screen motion of a world point between the previous and the current
/// frame, in UV units and without jitter. Zero when either projection falls
/// behind the camera.
pub fn velocity(world_position: Vec3, uniforms: &FrameUniforms) -> Vec2 {
    let current = project_to_uv(
        &uniforms.view_to_proj_unjittered,
        uniforms.convention,
        uniforms.world_to_view.transform_point3(world_position),
    );
    let previous = project_to_uv(
        &uniforms.view_to_proj_prev,
        uniforms.convention,
        uniforms.world_to_view_prev.transform_point3(world_position),
    );
    match (current, previous) {
        (Some(current), Some(previous)) => current - previous,
        _ => Vec2::ZERO,
    }
}

/// Resolved color of one pixel
pub fn resolve_pixel(
    current: &Rgb32FImage,
    history: &Rgb32FImage,
    velocity: &VelocityImage,
    pixel: UVec2,
    uniforms: &FrameUniforms,
) -> Vec3 {
    let center = fetch_clamped(current, pixel.as_ivec2());
    if !uniforms.have_previous {
        return center;
    }

    let color = if uniforms.apply_mitchell_filter {
        filter_current(current, pixel, uniforms.jitter_curr)
    } else {
        center
    };

    let (width, height) = current.dimensions();
    let size = UVec2::new(width, height);
    let motion = Vec2::from_array(velocity.get_pixel(pixel.x, pixel.y).0);
    let history_uv = pixel_uv(pixel, size) - motion;
    let (lo, hi) = uniforms.feedback_bounds();

    let on_screen = (0.0..=1.0).contains(&history_uv.x) && (0.0..=1.0).contains(&history_uv.y);
    if !on_screen {
        return color;
    }

    let (min, max) = neighbourhood_bounds(current, pixel);
    let previous = sample_bilinear(history, history_uv).clamp(min, max);
    let k = feedback_weight(color, previous, (motion * size.as_vec2()).length(), lo, hi);
    color.lerp(previous, k)
}

/// Resolve a whole frame
pub fn resolve(
    current: &Rgb32FImage,
    history: &Rgb32FImage,
    velocity: &VelocityImage,
    uniforms: &FrameUniforms,
) -> Rgb32FImage {
    let (width, height) = current.dimensions();
    Rgb32FImage::from_fn(width, height, |x, y| {
        Rgb(resolve_pixel(current, history, velocity, UVec2::new(x, y), uniforms).to_array())
    })
}

/// Gbuffer velocity buffer for a field of world positions
pub fn velocity_buffer(world_positions: &[Vec3], size: UVec2, uniforms: &FrameUniforms) -> VelocityImage {
    VelocityImage::from_fn(size.x, size.y, |x, y| {
        let index = (y * size.x + x) as usize;
        let v = world_positions
            .get(index)
            .map_or(Vec2::ZERO, |p| velocity(*p, uniforms));
        image::LumaA([v.x, v.y])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameInputs, FrameState};
    use crate::scene::{Camera, Light};
    use crate::settings::ShadowSettings;
    use glam::Vec3Swizzles;
    use rstest::rstest;

    const SIZE: UVec2 = UVec2::new(16, 16);

    fn txaa_settings() -> ShadowSettings {
        ShadowSettings {
            enable_txaa: true,
            apply_mitchell_filter: false,
            feedback_min: 0.8,
            feedback_max: 0.95,
            ..Default::default()
        }
    }

    fn frame(state: &mut FrameState, camera: &Camera, settings: &ShadowSettings) -> FrameUniforms {
        state.begin_frame(FrameInputs {
            camera,
            light: Light::Point {
                position: Vec3::new(0.0, 3.0, 0.0),
            },
            settings,
            width: SIZE.x,
            height: SIZE.y,
        })
    }

    fn still_frames(settings: &ShadowSettings) -> FrameUniforms {
        let camera = Camera::default();
        let mut state = FrameState::default();
        frame(&mut state, &camera, settings);
        state.end_frame();
        frame(&mut state, &camera, settings)
    }

    fn flat(color: Vec3) -> Rgb32FImage {
        Rgb32FImage::from_pixel(SIZE.x, SIZE.y, Rgb(color.to_array()))
    }

    fn still() -> VelocityImage {
        VelocityImage::new(SIZE.x, SIZE.y)
    }

    #[test]
    fn test_mitchell_weights() {
        assert!((mitchell_netravali(0.0) - 8.0 / 9.0).abs() < 1e-6);
        assert!((mitchell_netravali(1.0) - 1.0 / 18.0).abs() < 1e-6);
        assert_eq!(mitchell_netravali(2.0), 0.0);
        assert_eq!(mitchell_netravali(-0.7), mitchell_netravali(0.7));
        assert!(mitchell_netravali(1.5) < 0.0);
    }

    #[test]
    fn test_filter_preserves_flat_color() {
        let current = flat(Vec3::new(0.2, 0.4, 0.6));
        let filtered = filter_current(&current, UVec2::new(5, 5), Vec2::new(0.3, -0.2));
        assert!((filtered - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-5);
    }

    #[rstest]
    #[case::similar(Vec3::splat(0.5), Vec3::splat(0.5), 0.0)]
    #[case::different(Vec3::splat(1.0), Vec3::ZERO, 0.0)]
    #[case::fast(Vec3::splat(0.5), Vec3::splat(0.5), 1e6)]
    #[case::infinite(Vec3::splat(0.5), Vec3::splat(0.5), f32::INFINITY)]
    #[case::nan(Vec3::splat(f32::NAN), Vec3::splat(0.5), 0.0)]
    fn test_feedback_weight_stays_in_bounds(
        #[case] current: Vec3,
        #[case] history: Vec3,
        #[case] velocity: f32,
    ) {
        let k = feedback_weight(current, history, velocity, 0.8, 0.95);
        assert!((0.8..=0.95).contains(&k), "{k}");
    }

    #[test]
    fn test_feedback_weight_accepts_swapped_bounds() {
        let (current, history) = (Vec3::splat(0.5), Vec3::splat(0.4));
        for velocity in [0.0, 2.0, 50.0] {
            let ordered = feedback_weight(current, history, velocity, 0.8, 0.95);
            let swapped = feedback_weight(current, history, velocity, 0.95, 0.8);
            assert_eq!(swapped, ordered);
            assert!((0.8..=0.95).contains(&swapped));
        }
    }

    #[test]
    fn test_feedback_weight_drops_with_motion() {
        let color = Vec3::splat(0.5);
        assert!((feedback_weight(color, color, 0.0, 0.8, 0.95) - 0.95).abs() < 1e-6);
        let slow = feedback_weight(color, color, 1.0, 0.8, 0.95);
        let fast = feedback_weight(color, color, 10.0, 0.8, 0.95);
        assert!(slow < 0.94);
        assert!(fast < slow);
    }

    #[test]
    fn test_first_frame_outputs_current_color() {
        let camera = Camera::default();
        let mut state = FrameState::default();
        let uniforms = frame(&mut state, &camera, &txaa_settings());
        assert!(!uniforms.have_previous);

        let current = Rgb32FImage::from_fn(SIZE.x, SIZE.y, |x, y| Rgb([x as f32 / 16.0, y as f32 / 16.0, 0.5]));
        let history = flat(Vec3::ONE);
        assert_eq!(resolve(&current, &history, &still(), &uniforms), current);
    }

    #[test]
    fn test_history_is_blended_with_feedback_weight() {
        let uniforms = still_frames(&txaa_settings());
        assert!(uniforms.have_previous);

        let current = flat(Vec3::splat(0.5));
        let history = flat(Vec3::splat(0.5));
        let out = resolve(&current, &history, &still(), &uniforms);
        assert!((Vec3::from_array(out.get_pixel(8, 8).0) - Vec3::splat(0.5)).length() < 1e-6);
    }

    #[test]
    fn test_history_is_clamped_to_neighbourhood() {
        let uniforms = still_frames(&txaa_settings());
        let current = flat(Vec3::splat(0.25));
        let history = flat(Vec3::splat(1.0));
        let out = resolve(&current, &history, &still(), &uniforms);
        for p in out.pixels() {
            assert!((Vec3::from_array(p.0) - Vec3::splat(0.25)).length() < 1e-6);
        }
    }

    #[test]
    fn test_offscreen_history_keeps_current() {
        let uniforms = still_frames(&txaa_settings());
        let current = Rgb32FImage::from_fn(SIZE.x, SIZE.y, |x, _| Rgb([x as f32 / 16.0; 3]));
        let history = flat(Vec3::ZERO);
        let velocity = VelocityImage::from_pixel(SIZE.x, SIZE.y, image::LumaA([2.0, 0.0]));
        let out = resolve(&current, &history, &velocity, &uniforms);
        assert_eq!(out, current);
    }

    #[test]
    fn test_static_camera_has_zero_velocity() {
        let uniforms = still_frames(&ShadowSettings {
            enable_txaa: true,
            ..Default::default()
        });
        assert_eq!(velocity(Vec3::new(0.5, 0.2, 1.0), &uniforms), Vec2::ZERO);
    }

    #[test]
    fn test_velocity_points_back_to_previous_position() {
        let settings = txaa_settings();
        let mut camera = Camera::default();
        let mut state = FrameState::default();
        let first = frame(&mut state, &camera, &settings);
        state.end_frame();
        camera.position.x += 0.1;
        camera.target.x += 0.1;
        let second = frame(&mut state, &camera, &settings);

        let world = Vec3::new(0.3, 0.1, 1.0);
        let v = velocity(world, &second);
        assert!(v.length() > 1e-3);

        let now = project_to_uv(
            &second.view_to_proj_unjittered,
            second.convention,
            second.world_to_view.transform_point3(world),
        )
        .unwrap();
        let before = project_to_uv(
            &first.view_to_proj_unjittered,
            first.convention,
            first.world_to_view.transform_point3(world),
        )
        .unwrap();
        assert!((now - v - before).length() < 1e-6);
    }

    #[test]
    fn test_bilinear_sample_at_texel_center_is_exact() {
        let image = Rgb32FImage::from_fn(SIZE.x, SIZE.y, |x, y| Rgb([x as f32, y as f32, 0.0]));
        let c = sample_bilinear(&image, pixel_uv(UVec2::new(3, 9), SIZE));
        assert!((c.xy() - Vec2::new(3.0, 9.0)).length() < 1e-4);
        let mid = sample_bilinear(&image, (pixel_uv(UVec2::new(3, 9), SIZE) + pixel_uv(UVec2::new(4, 9), SIZE)) * 0.5);
        assert!((mid.x - 3.5).abs() < 1e-4);
    }
}
