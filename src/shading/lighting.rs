//! Deferred combine: Lambert shading scaled by the shadow term.

use glam::{UVec2, Vec3, Vec4, Vec4Swizzles};
use image::{Rgb, Rgb32FImage, Rgba32FImage};

use super::{direction_to_light, pixel_uv, ScalarImage};
use crate::frame::FrameUniforms;

/// Fraction of albedo that survives full shadow
pub const AMBIENT: f32 = 0.15;

/// Gbuffer normal texel: view-space normal in rgb, alpha 1 for lit geometry
pub fn encode_normal(normal: Vec3, lit: bool) -> Vec4 {
    (normal.normalize_or_zero() * 0.5 + 0.5).extend(if lit { 1.0 } else { 0.0 })
}

pub fn decode_normal(encoded: Vec4) -> (Vec3, bool) {
    ((encoded.xyz() * 2.0 - 1.0).normalize_or_zero(), encoded.w > 0.5)
}

/// Final color of one gbuffer texel
pub fn shade(
    albedo: Vec3,
    normal: Vec3,
    lit: bool,
    view_position: Vec3,
    shadow: f32,
    uniforms: &FrameUniforms,
) -> Vec3 {
    if uniforms.display_shadows_only {
        return Vec3::splat(shadow);
    }
    if !lit {
        return albedo;
    }
    let n_dot_l = direction_to_light(uniforms.light_position_view, view_position)
        .map_or(0.0, |l| normal.dot(l).max(0.0));
    albedo * (AMBIENT + (1.0 - AMBIENT) * n_dot_l * shadow)
}

/// Combine the gbuffer, linear depth and shadow buffers into the lit image
pub fn combine(
    albedo: &Rgb32FImage,
    normals: &Rgba32FImage,
    linear_depth: &ScalarImage,
    shadows: &ScalarImage,
    uniforms: &FrameUniforms,
) -> Rgb32FImage {
    let (width, height) = albedo.dimensions();
    let size = UVec2::new(width, height);
    Rgb32FImage::from_fn(width, height, |x, y| {
        let (normal, lit) = decode_normal(Vec4::from_array(normals.get_pixel(x, y).0));
        let view_position = uniforms
            .ndc_to_view
            .view_position(pixel_uv(UVec2::new(x, y), size), linear_depth.get_pixel(x, y)[0]);
        let color = shade(
            Vec3::from_array(albedo.get_pixel(x, y).0),
            normal,
            lit,
            view_position,
            shadows.get_pixel(x, y)[0],
            uniforms,
        );
        Rgb(color.to_array())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;
    use crate::settings::ShadowSettings;
    use crate::shading::test_scene::*;
    use image::Luma;

    const SIZE: UVec2 = UVec2::new(32, 32);
    const ALBEDO: Vec3 = Vec3::new(0.8, 0.5, 0.2);

    fn frame(settings: &ShadowSettings) -> FrameUniforms {
        let light = Light::Directional {
            direction: Vec3::Y,
        };
        uniforms(&overhead_camera(), light, settings, SIZE)
    }

    fn up_in_view(uniforms: &FrameUniforms) -> Vec3 {
        uniforms.world_to_view.transform_vector3(Vec3::Y)
    }

    #[test]
    fn test_normal_encoding_round_trip() {
        let n = Vec3::new(0.3, -0.8, 0.52).normalize();
        let (back, lit) = decode_normal(encode_normal(n, false));
        assert!((back - n).length() < 1e-5);
        assert!(!lit);
    }

    #[test]
    fn test_facing_light_unshadowed_is_full_albedo() {
        let uniforms = frame(&ShadowSettings::default());
        let color = shade(ALBEDO, up_in_view(&uniforms), true, Vec3::new(0.0, 0.0, -3.0), 1.0, &uniforms);
        assert!((color - ALBEDO).length() < 1e-5);
    }

    #[test]
    fn test_full_shadow_leaves_ambient() {
        let uniforms = frame(&ShadowSettings::default());
        let color = shade(ALBEDO, up_in_view(&uniforms), true, Vec3::new(0.0, 0.0, -3.0), 0.0, &uniforms);
        assert!((color - ALBEDO * AMBIENT).length() < 1e-6);

        let away = shade(ALBEDO, -up_in_view(&uniforms), true, Vec3::new(0.0, 0.0, -3.0), 1.0, &uniforms);
        assert!((away - ALBEDO * AMBIENT).length() < 1e-6);
    }

    #[test]
    fn test_unlit_geometry_keeps_albedo() {
        let uniforms = frame(&ShadowSettings::default());
        let color = shade(ALBEDO, Vec3::Z, false, Vec3::new(0.0, 0.0, -3.0), 0.0, &uniforms);
        assert_eq!(color, ALBEDO);
    }

    #[test]
    fn test_display_shadows_only_outputs_gray() {
        let uniforms = frame(&ShadowSettings {
            display_shadows_only: true,
            ..Default::default()
        });
        let color = shade(ALBEDO, Vec3::Z, true, Vec3::new(0.0, 0.0, -3.0), 0.375, &uniforms);
        assert_eq!(color, Vec3::splat(0.375));
    }

    #[test]
    fn test_combined_ground_darkens_only_where_shadowed() {
        let uniforms = frame(&ShadowSettings::default());
        let scene = TestScene {
            ground: true,
            spheres: Vec::new(),
        };
        let depth = scene.linear_depth(&uniforms);
        let normals = scene.normals(&uniforms);
        let albedo = Rgb32FImage::from_pixel(SIZE.x, SIZE.y, Rgb(ALBEDO.to_array()));
        let shadows = ScalarImage::from_fn(SIZE.x, SIZE.y, |x, _| Luma([if x < 16 { 0.0 } else { 1.0 }]));

        let lit = combine(&albedo, &normals, &depth, &shadows, &uniforms);
        let dark = Vec3::from_array(lit.get_pixel(4, 10).0);
        let bright = Vec3::from_array(lit.get_pixel(24, 10).0);
        assert!((dark - ALBEDO * AMBIENT).length() < 1e-4);
        assert!((bright - ALBEDO).length() < 1e-4);
    }
}
