//! Device depth to linear view depth.

use image::Luma;

use super::ScalarImage;
use crate::frame::DepthUnpack;

/// Linearize every texel of a [0, 1] device depth buffer
pub fn linearize_depth(device_depth: &ScalarImage, unpack: &DepthUnpack) -> ScalarImage {
    let (width, height) = device_depth.dimensions();
    ScalarImage::from_fn(width, height, |x, y| {
        Luma([unpack.linearize(device_depth.get_pixel(x, y)[0])])
    })
}

/// Device depth buffer holding the given linear depths; the inverse of
/// [`linearize_depth`]
pub fn device_depth_from_linear(linear_depth: &ScalarImage, unpack: &DepthUnpack) -> ScalarImage {
    let (width, height) = linear_depth.dimensions();
    ScalarImage::from_fn(width, height, |x, y| {
        Luma([unpack.device_depth(linear_depth.get_pixel(x, y)[0]).clamp(0.0, 1.0)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn test_linearized_buffer_matches_scalar_function() {
        let unpack = DepthUnpack::from_projection(&Mat4::perspective_rh(1.0, 1.0, 0.05, 40.0));
        let device = ScalarImage::from_fn(16, 1, |x, _| Luma([x as f32 / 15.0]));
        let linear = linearize_depth(&device, &unpack);

        assert!((linear.get_pixel(0, 0)[0] - 0.05).abs() < 1e-5);
        for x in 1..16 {
            assert!(linear.get_pixel(x, 0)[0] > linear.get_pixel(x - 1, 0)[0]);
        }
    }

    #[test]
    fn test_device_depth_round_trip() {
        let unpack = DepthUnpack::from_projection(&Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0));
        let linear = ScalarImage::from_fn(4, 4, |x, y| Luma([0.5 + (x + 4 * y) as f32 * 0.75]));
        let back = linearize_depth(&device_depth_from_linear(&linear, &unpack), &unpack);
        for (a, b) in linear.pixels().zip(back.pixels()) {
            assert!((a[0] - b[0]).abs() <= 1e-4 * a[0]);
        }
    }
}
