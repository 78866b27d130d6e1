//! Clip-space conventions of the target graphics API.
//!
//! Supplied once at startup and consulted wherever NDC is converted to
//! texture coordinates or a projection matrix is built.

use glam::{Mat4, Vec2, Vec4};

/// Direction of texture V relative to NDC Y
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YAxisDirection {
    /// Texture V grows with NDC Y (OpenGL: origin bottom-left)
    Up,
    /// Texture V grows against NDC Y (wgpu, Vulkan, D3D, Metal: origin top-left)
    Down,
}

/// Range of NDC depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthRange {
    ZeroToOne,
    NegOneToOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsBackendConvention {
    pub y_axis: YAxisDirection,
    pub depth_range: DepthRange,
}

impl GraphicsBackendConvention {
    /// What wgpu expects on every platform
    pub const WGPU: Self = Self {
        y_axis: YAxisDirection::Down,
        depth_range: DepthRange::ZeroToOne,
    };

    pub const OPENGL: Self = Self {
        y_axis: YAxisDirection::Up,
        depth_range: DepthRange::NegOneToOne,
    };

    /// Right-handed perspective projection in this convention's depth range
    pub fn perspective(&self, fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        match self.depth_range {
            DepthRange::ZeroToOne => Mat4::perspective_rh(fov_y, aspect, near, far),
            DepthRange::NegOneToOne => Mat4::perspective_rh_gl(fov_y, aspect, near, far),
        }
    }

    /// The same projection remapped so NDC depth lands in [0, 1]. Depth
    /// buffers store [0, 1] values in every convention.
    pub fn depth_zero_to_one(&self, proj: Mat4) -> Mat4 {
        match self.depth_range {
            DepthRange::ZeroToOne => proj,
            DepthRange::NegOneToOne => {
                let remap = Mat4::from_cols(
                    Vec4::X,
                    Vec4::Y,
                    Vec4::new(0.0, 0.0, 0.5, 0.0),
                    Vec4::new(0.0, 0.0, 0.5, 1.0),
                );
                remap * proj
            }
        }
    }

    /// Sign applied to NDC Y when mapping to texture V
    pub fn uv_y_sign(&self) -> f32 {
        match self.y_axis {
            YAxisDirection::Up => 1.0,
            YAxisDirection::Down => -1.0,
        }
    }

    pub fn ndc_to_uv(&self, ndc: Vec2) -> Vec2 {
        match self.y_axis {
            YAxisDirection::Up => Vec2::new(ndc.x * 0.5 + 0.5, ndc.y * 0.5 + 0.5),
            YAxisDirection::Down => Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5),
        }
    }

    pub fn uv_to_ndc(&self, uv: Vec2) -> Vec2 {
        match self.y_axis {
            YAxisDirection::Up => Vec2::new(uv.x * 2.0 - 1.0, uv.y * 2.0 - 1.0),
            YAxisDirection::Down => Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0),
        }
    }

    /// Convert an offset in texture space (pixels, +Y along texture V) to NDC
    pub fn pixel_offset_to_ndc(&self, offset: Vec2, width: u32, height: u32) -> Vec2 {
        let ndc = Vec2::new(2.0 * offset.x / width as f32, 2.0 * offset.y / height as f32);
        match self.y_axis {
            YAxisDirection::Up => ndc,
            YAxisDirection::Down => Vec2::new(ndc.x, -ndc.y),
        }
    }
}

impl Default for GraphicsBackendConvention {
    fn default() -> Self {
        Self::WGPU
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::wgpu(GraphicsBackendConvention::WGPU)]
    #[case::opengl(GraphicsBackendConvention::OPENGL)]
    fn test_uv_ndc_round_trip(#[case] convention: GraphicsBackendConvention) {
        for uv in [Vec2::new(0.1, 0.9), Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)] {
            let back = convention.ndc_to_uv(convention.uv_to_ndc(uv));
            assert!((back - uv).length() < 1e-6);
        }
    }

    #[test]
    fn test_top_of_screen_maps_to_first_row_when_y_down() {
        let uv = GraphicsBackendConvention::WGPU.ndc_to_uv(Vec2::new(0.0, 1.0));
        assert_eq!(uv, Vec2::new(0.5, 0.0));
        let uv = GraphicsBackendConvention::OPENGL.ndc_to_uv(Vec2::new(0.0, 1.0));
        assert_eq!(uv, Vec2::new(0.5, 1.0));
    }

    #[test]
    fn test_gl_projection_remaps_to_zero_to_one() {
        let gl = GraphicsBackendConvention::OPENGL.perspective(1.0, 1.5, 0.1, 50.0);
        let remapped = GraphicsBackendConvention::OPENGL.depth_zero_to_one(gl);
        let expected = Mat4::perspective_rh(1.0, 1.5, 0.1, 50.0);
        assert!(remapped.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_pixel_offset_moves_along_texture_v() {
        let convention = GraphicsBackendConvention::WGPU;
        let ndc = convention.pixel_offset_to_ndc(Vec2::new(0.5, 0.5), 100, 50);
        let start = convention.ndc_to_uv(Vec2::ZERO);
        let moved = convention.ndc_to_uv(ndc);
        assert!(((moved - start) * Vec2::new(100.0, 50.0) - Vec2::new(0.5, 0.5)).length() < 1e-5);
    }
}
