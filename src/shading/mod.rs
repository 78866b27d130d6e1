//! CPU reference implementations of the screen-space passes.
//!
//! Each function mirrors the WGSL of the pass with the same name in
//! [`crate::pipeline`] and works on `image` buffers, one value per pixel.
//! Linear depth and shadow buffers stay in `f32` where the GPU stores `R16Float`.

pub mod depth;
pub mod lighting;
pub mod shadows;
pub mod temporal;

use glam::{UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use image::{ImageBuffer, Luma, LumaA, Pixel};

/// Single-channel `f32` image (device depth, linear depth, shadows)
pub type ScalarImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel screen motion in UV units
pub type VelocityImage = ImageBuffer<LumaA<f32>, Vec<f32>>;

/// UV of the center of `pixel`
pub fn pixel_uv(pixel: UVec2, size: UVec2) -> Vec2 {
    (pixel.as_vec2() + 0.5) / size.as_vec2()
}

/// Pixel containing `uv`, or `None` outside [0, 1]²
pub fn uv_to_pixel(uv: Vec2, size: UVec2) -> Option<UVec2> {
    if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
        return None;
    }
    let texel = (uv * size.as_vec2()).floor().as_uvec2();
    Some(texel.min(UVec2::new(size.x.saturating_sub(1), size.y.saturating_sub(1))))
}

/// Point sample without wrapping
pub fn sample_point<P: Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>, uv: Vec2) -> Option<P> {
    let (width, height) = image.dimensions();
    let pixel = uv_to_pixel(uv, UVec2::new(width, height))?;
    Some(*image.get_pixel(pixel.x, pixel.y))
}

/// Unit vector from `view_position` toward the light. `light.w` is 1 for a
/// point light and 0 for a direction.
pub fn direction_to_light(light: Vec4, view_position: Vec3) -> Option<Vec3> {
    let to_light = light.xyz() - view_position * light.w;
    let length = to_light.length();
    if length > 1e-6 && length.is_finite() {
        Some(to_light / length)
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_scene {
    //! Analytic ray-cast stand-in for the gbuffer pass.

    use glam::{UVec2, Vec3};
    use image::{Luma, Rgba};

    use super::*;
    use crate::frame::{FrameInputs, FrameState, FrameUniforms};
    use crate::scene::{Camera, Light, Projection};
    use crate::settings::ShadowSettings;

    /// Depth written where no geometry is hit
    pub const SKY_DEPTH: f32 = 100.0;

    pub struct TestScene {
        pub ground: bool,
        pub spheres: Vec<(Vec3, f32)>,
    }

    /// Camera 45 degrees above the origin; the ground fills the whole view
    pub fn overhead_camera() -> Camera {
        let mut camera = Camera::new(Vec3::new(0.0, 3.0, 3.0), Vec3::ZERO);
        camera.projection = Projection::perspective(45.0, 0.1, SKY_DEPTH);
        camera
    }

    pub fn uniforms(camera: &Camera, light: Light, settings: &ShadowSettings, size: UVec2) -> FrameUniforms {
        FrameState::default().begin_frame(FrameInputs {
            camera,
            light,
            settings,
            width: size.x,
            height: size.y,
        })
    }

    impl TestScene {
        /// Nearest hit along the camera ray through `pixel`, as linear depth
        /// and world normal
        fn trace(&self, uniforms: &FrameUniforms, pixel: UVec2) -> Option<(f32, Vec3)> {
            let uv = pixel_uv(pixel, uniforms.viewport);
            let view_to_world = uniforms.world_to_view.inverse();
            let origin = view_to_world.transform_point3(Vec3::ZERO);
            // One unit of t along this vector is one unit of linear depth
            let dir = view_to_world.transform_vector3(uniforms.ndc_to_view.view_position(uv, 1.0));

            let mut nearest: Option<(f32, Vec3)> = None;
            let mut consider = |t: f32, normal: Vec3| {
                if t > 0.0 && nearest.map_or(true, |(best, _)| t < best) {
                    nearest = Some((t, normal));
                }
            };

            if self.ground && dir.y < 0.0 {
                consider(-origin.y / dir.y, Vec3::Y);
            }
            for &(center, radius) in &self.spheres {
                let oc = origin - center;
                let a = dir.dot(dir);
                let b = 2.0 * dir.dot(oc);
                let c = oc.dot(oc) - radius * radius;
                let disc = b * b - 4.0 * a * c;
                if disc >= 0.0 {
                    let t = (-b - disc.sqrt()) / (2.0 * a);
                    consider(t, (origin + dir * t - center).normalize());
                }
            }
            nearest
        }

        pub fn linear_depth(&self, uniforms: &FrameUniforms) -> ScalarImage {
            ScalarImage::from_fn(uniforms.viewport.x, uniforms.viewport.y, |x, y| {
                Luma([self.trace(uniforms, UVec2::new(x, y)).map_or(SKY_DEPTH, |(t, _)| t)])
            })
        }

        /// View-space normals encoded like the gbuffer normal target
        pub fn normals(&self, uniforms: &FrameUniforms) -> image::Rgba32FImage {
            image::Rgba32FImage::from_fn(uniforms.viewport.x, uniforms.viewport.y, |x, y| {
                let normal = self
                    .trace(uniforms, UVec2::new(x, y))
                    .map_or(Vec3::Z, |(_, n)| uniforms.world_to_view.transform_vector3(n));
                Rgba(super::lighting::encode_normal(normal, true).to_array())
            })
        }
    }

    /// Pixel showing world point `p`
    pub fn pixel_of(uniforms: &FrameUniforms, p: Vec3) -> UVec2 {
        let view = uniforms.world_to_view.transform_point3(p);
        let uv = crate::frame::project_to_uv(&uniforms.view_to_proj, uniforms.convention, view)
            .unwrap_or_default();
        uv_to_pixel(uv, uniforms.viewport).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_to_pixel_rejects_outside() {
        let size = UVec2::new(8, 4);
        assert_eq!(uv_to_pixel(Vec2::new(-0.01, 0.5), size), None);
        assert_eq!(uv_to_pixel(Vec2::new(0.5, 1.01), size), None);
        assert_eq!(uv_to_pixel(Vec2::new(1.0, 1.0), size), Some(UVec2::new(7, 3)));
        assert_eq!(uv_to_pixel(pixel_uv(UVec2::new(5, 2), size), size), Some(UVec2::new(5, 2)));
    }

    #[test]
    fn test_direction_to_light() {
        let point = Vec4::new(0.0, 2.0, 0.0, 1.0);
        assert_eq!(direction_to_light(point, Vec3::ZERO), Some(Vec3::Y));
        assert_eq!(direction_to_light(point, Vec3::new(0.0, 2.0, 0.0)), None);

        let directional = Vec4::new(0.0, 0.0, 3.0, 0.0);
        assert_eq!(direction_to_light(directional, Vec3::new(5.0, 1.0, 2.0)), Some(Vec3::Z));
        assert_eq!(direction_to_light(Vec4::ZERO, Vec3::ONE), None);
    }
}
