//! Per-frame uniform state.
//!
//! [`FrameState::begin_frame`] derives every constant the passes need from the
//! camera, light and settings exactly once per frame. [`FrameState::end_frame`]
//! keeps the frame's matrices and jitter around as "previous" for temporal
//! reprojection.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, UVec4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::convention::{GraphicsBackendConvention, YAxisDirection};
use crate::scene::{Camera, Light};
use crate::settings::{ContactShadowsMode, ShadowSettings};

/// Length of the jitter cycle
pub const JITTER_SEQUENCE_LENGTH: u32 = 8;

/// Mean of Halton(2, 3) over indices 1..=8, so the jitter averages to zero
pub const DEFAULT_JITTER_CENTER: Vec2 = Vec2::new(7.125 / 16.0, 0.5);

/// Radical inverse of `index` in `base`
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f32;
        result += fraction * (index % base) as f32;
        index /= base;
    }
    result
}

/// Sub-pixel camera offsets for temporal antialiasing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterSequence {
    pub center: Vec2,
}

impl Default for JitterSequence {
    fn default() -> Self {
        Self {
            center: DEFAULT_JITTER_CENTER,
        }
    }
}

impl JitterSequence {
    /// Offset in pixels (+Y along texture V) for a frame
    pub fn offset(&self, frame_index: u32) -> Vec2 {
        let i = frame_index % JITTER_SEQUENCE_LENGTH + 1;
        Vec2::new(halton(i, 2), halton(i, 3)) - self.center
    }
}

/// Reciprocal linearisation constants: `linear = 1 / (mul * device + add)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthUnpack {
    pub mul: f32,
    pub add: f32,
}

impl DepthUnpack {
    /// Constants for a projection whose NDC depth lies in [0, 1]
    pub fn from_projection(proj: &Mat4) -> Self {
        let m = -proj.col(3).z;
        let mut a = proj.col(2).z;
        if m * a < 0.0 {
            a = -a;
        }
        Self {
            mul: -1.0 / m,
            add: a / m,
        }
    }

    pub fn linearize(&self, device_depth: f32) -> f32 {
        1.0 / (self.mul * device_depth + self.add)
    }

    /// Inverse of [`linearize`](Self::linearize)
    pub fn device_depth(&self, linear_depth: f32) -> f32 {
        (1.0 / linear_depth - self.add) / self.mul
    }
}

/// Reconstruction of right-handed view positions from screen UV and linear
/// depth: `xy = (uv * mul + add) * linear`, `z = -linear`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdcToView {
    pub mul: Vec2,
    pub add: Vec2,
}

impl NdcToView {
    /// Constants for a (possibly jittered) right-handed perspective projection
    pub fn from_projection(proj: &Mat4, y_axis: YAxisDirection) -> Self {
        let tx = 1.0 / proj.col(0).x;
        let ty = 1.0 / proj.col(1).y;
        let offset = proj.col(2).xy();
        let x = (2.0 * tx, (offset.x - 1.0) * tx);
        let y = match y_axis {
            YAxisDirection::Up => (2.0 * ty, (offset.y - 1.0) * ty),
            YAxisDirection::Down => (-2.0 * ty, (offset.y + 1.0) * ty),
        };
        Self {
            mul: Vec2::new(x.0, y.0),
            add: Vec2::new(x.1, y.1),
        }
    }

    pub fn view_position(&self, uv: Vec2, linear_depth: f32) -> Vec3 {
        let xy = (uv * self.mul + self.add) * linear_depth;
        Vec3::new(xy.x, xy.y, -linear_depth)
    }
}

/// Project a view-space point to screen UV; `None` behind the camera
pub fn project_to_uv(
    view_to_proj: &Mat4,
    convention: GraphicsBackendConvention,
    view_position: Vec3,
) -> Option<Vec2> {
    let clip = *view_to_proj * view_position.extend(1.0);
    if clip.w <= 0.0 {
        return None;
    }
    Some(convention.ndc_to_uv(clip.xy() / clip.w))
}

/// Everything the passes read for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUniforms {
    pub frame_index: u32,
    pub noise_phase: u32,
    /// World units, or pixels when `use_screen_space_radius`
    pub shadow_radius: f32,
    pub use_screen_space_radius: bool,
    pub shadow_steps: u32,
    pub contact_shadows_mode: ContactShadowsMode,
    pub use_noise_offset: bool,
    pub dynamic_noise: bool,
    pub display_shadows_only: bool,
    pub depth_unpack: DepthUnpack,
    pub ndc_to_view: NdcToView,
    pub world_to_view: Mat4,
    /// Jittered when TXAA is on
    pub view_to_proj: Mat4,
    pub view_to_proj_unjittered: Mat4,
    pub light_position_view: Vec4,
    pub viewport: UVec2,
    pub tan_half_fov_y: f32,
    pub convention: GraphicsBackendConvention,
    pub txaa_enabled: bool,
    pub world_to_view_prev: Mat4,
    /// Unjittered
    pub view_to_proj_prev: Mat4,
    /// Pixels
    pub jitter_curr: Vec2,
    pub jitter_prev: Vec2,
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub apply_mitchell_filter: bool,
    pub have_previous: bool,
}

impl FrameUniforms {
    /// Feedback bounds ordered low to high
    pub fn feedback_bounds(&self) -> (f32, f32) {
        (
            self.feedback_min.min(self.feedback_max),
            self.feedback_min.max(self.feedback_max),
        )
    }

    pub fn viewport_size(&self) -> Vec2 {
        self.viewport.as_vec2()
    }

    /// Serialize into the layout of the WGSL `FrameUniforms` struct
    pub fn to_gpu(&self) -> FrameUniformsGpu {
        let size = self.viewport.max(UVec2::ONE).as_vec2();
        let (lo, hi) = self.feedback_bounds();
        FrameUniformsGpu {
            world_to_view: self.world_to_view,
            view_to_proj: self.view_to_proj,
            view_to_proj_unjittered: self.view_to_proj_unjittered,
            world_to_view_prev: self.world_to_view_prev,
            view_to_proj_prev: self.view_to_proj_prev,
            light_position_view: self.light_position_view,
            ndc_to_view: Vec4::new(
                self.ndc_to_view.mul.x,
                self.ndc_to_view.mul.y,
                self.ndc_to_view.add.x,
                self.ndc_to_view.add.y,
            ),
            depth_unpack: Vec4::new(
                self.depth_unpack.mul,
                self.depth_unpack.add,
                self.convention.uv_y_sign(),
                0.0,
            ),
            viewport: Vec4::new(size.x, size.y, 1.0 / size.x, 1.0 / size.y),
            shadow: Vec4::new(
                self.shadow_radius,
                self.shadow_steps as f32,
                self.noise_phase as f32,
                self.tan_half_fov_y,
            ),
            modes: UVec4::new(
                self.contact_shadows_mode.as_u32(),
                self.use_screen_space_radius as u32,
                self.use_noise_offset as u32,
                self.display_shadows_only as u32,
            ),
            temporal: Vec4::new(
                lo,
                hi,
                if self.have_previous { 1.0 } else { 0.0 },
                if self.apply_mitchell_filter { 1.0 } else { 0.0 },
            ),
            jitter: Vec4::new(
                self.jitter_curr.x,
                self.jitter_curr.y,
                self.jitter_prev.x,
                self.jitter_prev.y,
            ),
        }
    }
}

/// GPU layout of [`FrameUniforms`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniformsGpu {
    pub world_to_view: Mat4,
    pub view_to_proj: Mat4,
    pub view_to_proj_unjittered: Mat4,
    pub world_to_view_prev: Mat4,
    pub view_to_proj_prev: Mat4,
    pub light_position_view: Vec4,
    /// xy = mul, zw = add
    pub ndc_to_view: Vec4,
    /// x = mul, y = add, z = NDC Y to UV sign
    pub depth_unpack: Vec4,
    /// width, height, 1 / width, 1 / height
    pub viewport: Vec4,
    /// radius, steps, noise phase, tan(fov_y / 2)
    pub shadow: Vec4,
    /// contact mode, screen-space radius, noise offset, shadows only
    pub modes: UVec4,
    /// feedback low, feedback high, have previous, Mitchell filter
    pub temporal: Vec4,
    /// xy = current jitter, zw = previous jitter (pixels)
    pub jitter: Vec4,
}

/// Per-frame inputs from the application
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub camera: &'a Camera,
    pub light: Light,
    pub settings: &'a ShadowSettings,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CameraSnapshot {
    world_to_view: Mat4,
    view_to_proj_unjittered: Mat4,
    jitter: Vec2,
}

/// Owner of the frame counter and the previous-frame snapshot
#[derive(Debug, Clone)]
pub struct FrameState {
    convention: GraphicsBackendConvention,
    jitter: JitterSequence,
    frame_index: u32,
    current: Option<CameraSnapshot>,
    previous: Option<CameraSnapshot>,
}

impl FrameState {
    pub fn new(convention: GraphicsBackendConvention, jitter: JitterSequence) -> Self {
        Self {
            convention,
            jitter,
            frame_index: 0,
            current: None,
            previous: None,
        }
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn convention(&self) -> GraphicsBackendConvention {
        self.convention
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Compute this frame's uniforms
    pub fn begin_frame(&mut self, inputs: FrameInputs) -> FrameUniforms {
        let settings = inputs.settings.sanitized();
        let viewport = UVec2::new(inputs.width, inputs.height);
        let aspect = inputs.width.max(1) as f32 / inputs.height.max(1) as f32;

        let world_to_view = inputs.camera.view_matrix();
        let view_to_proj_unjittered = inputs.camera.projection_matrix(self.convention, aspect);

        let jitter_curr = if settings.enable_txaa {
            self.jitter.offset(self.frame_index)
        } else {
            Vec2::ZERO
        };
        let jitter_ndc = self
            .convention
            .pixel_offset_to_ndc(jitter_curr, inputs.width.max(1), inputs.height.max(1));
        let view_to_proj = Mat4::from_translation(jitter_ndc.extend(0.0)) * view_to_proj_unjittered;

        let current = CameraSnapshot {
            world_to_view,
            view_to_proj_unjittered,
            jitter: jitter_curr,
        };
        self.current = Some(current);
        let previous = self.previous.unwrap_or(current);

        let noise_phase = if settings.dynamic_noise {
            self.frame_index % JITTER_SEQUENCE_LENGTH
        } else {
            0
        };

        FrameUniforms {
            frame_index: self.frame_index,
            noise_phase,
            shadow_radius: settings.effective_radius(),
            use_screen_space_radius: settings.use_screen_space_radius,
            shadow_steps: settings.shadow_steps,
            contact_shadows_mode: settings.contact_shadows_mode,
            use_noise_offset: settings.use_noise_offset,
            dynamic_noise: settings.dynamic_noise,
            display_shadows_only: settings.display_shadows_only,
            depth_unpack: DepthUnpack::from_projection(&self.convention.depth_zero_to_one(view_to_proj)),
            ndc_to_view: NdcToView::from_projection(&view_to_proj, self.convention.y_axis),
            world_to_view,
            view_to_proj,
            view_to_proj_unjittered,
            light_position_view: world_to_view * inputs.light.homogeneous(),
            viewport,
            tan_half_fov_y: inputs.camera.projection.tan_half_fov_y(),
            convention: self.convention,
            txaa_enabled: settings.enable_txaa,
            world_to_view_prev: previous.world_to_view,
            view_to_proj_prev: previous.view_to_proj_unjittered,
            jitter_curr,
            jitter_prev: previous.jitter,
            feedback_min: settings.feedback_min,
            feedback_max: settings.feedback_max,
            apply_mitchell_filter: settings.apply_mitchell_filter,
            have_previous: self.previous.is_some(),
        }
    }

    /// Keep this frame as the previous one and advance the counter
    pub fn end_frame(&mut self) {
        if let Some(current) = self.current.take() {
            self.previous = Some(current);
        }
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    /// Forget the previous frame; the next frame reprojects onto itself
    pub fn reset_history(&mut self) {
        self.previous = None;
    }
}

impl Default for FrameState {
    fn default() -> Self {
        Self::new(GraphicsBackendConvention::default(), JitterSequence::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Projection;
    use rstest::rstest;

    fn test_camera() -> Camera {
        let mut camera = Camera::new(Vec3::new(0.5, 2.0, 3.0), Vec3::new(0.0, 0.2, 0.0));
        camera.projection = Projection::perspective(55.0, 0.1, 60.0);
        camera
    }

    fn begin(state: &mut FrameState, camera: &Camera, settings: &ShadowSettings) -> FrameUniforms {
        state.begin_frame(FrameInputs {
            camera,
            light: Light::Point {
                position: Vec3::new(1.0, 3.0, 0.0),
            },
            settings,
            width: 320,
            height: 180,
        })
    }

    #[rstest]
    #[case::default_planes(0.01, 100.0)]
    #[case::tight(0.5, 2.0)]
    #[case::far(1.0, 1000.0)]
    fn test_linearize_is_monotonic_and_finite(#[case] near: f32, #[case] far: f32) {
        let unpack = DepthUnpack::from_projection(&Mat4::perspective_rh(1.0, 1.0, near, far));
        assert!((unpack.linearize(0.0) - near).abs() <= near * 1e-4);
        assert!((unpack.linearize(1.0) - far).abs() <= far * 1e-2);

        let mut last = 0.0;
        for i in 0..=1000 {
            let linear = unpack.linearize(i as f32 / 1000.0);
            assert!(linear.is_finite());
            assert!(linear > last);
            last = linear;
        }
    }

    #[test]
    fn test_linearize_ignores_handedness() {
        let rh = DepthUnpack::from_projection(&Mat4::perspective_rh(1.0, 1.0, 0.1, 20.0));
        let lh = DepthUnpack::from_projection(&Mat4::perspective_lh(1.0, 1.0, 0.1, 20.0));
        assert!((rh.mul - lh.mul).abs() < 1e-4);
        assert!((rh.add - lh.add).abs() < 1e-4);
    }

    #[test]
    fn test_device_depth_inverts_linearize() {
        let unpack = DepthUnpack::from_projection(&Mat4::perspective_rh(1.0, 1.0, 0.1, 20.0));
        for linear in [0.2, 1.0, 7.5] {
            assert!((unpack.linearize(unpack.device_depth(linear)) - linear).abs() < 1e-4 * linear);
        }
    }

    #[rstest]
    #[case::wgpu(GraphicsBackendConvention::WGPU, false)]
    #[case::wgpu_jittered(GraphicsBackendConvention::WGPU, true)]
    #[case::opengl(GraphicsBackendConvention::OPENGL, false)]
    #[case::opengl_jittered(GraphicsBackendConvention::OPENGL, true)]
    fn test_view_position_round_trip(
        #[case] convention: GraphicsBackendConvention,
        #[case] txaa: bool,
    ) {
        let camera = test_camera();
        let settings = ShadowSettings {
            enable_txaa: txaa,
            ..Default::default()
        };
        let mut state = FrameState::new(convention, JitterSequence::default());
        // Land on a frame with a non-trivial jitter
        for _ in 0..3 {
            begin(&mut state, &camera, &settings);
            state.end_frame();
        }
        let uniforms = begin(&mut state, &camera, &settings);
        assert_eq!(uniforms.jitter_curr != Vec2::ZERO, txaa);

        let depth_proj = convention.depth_zero_to_one(uniforms.view_to_proj);
        for point in [
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.4, -0.3, -2.5),
            Vec3::new(-1.5, 0.8, -6.0),
            Vec3::new(2.0, 1.0, -8.0),
        ] {
            let uv = project_to_uv(&uniforms.view_to_proj, convention, point).unwrap();
            let clip = depth_proj * point.extend(1.0);
            let device = clip.z / clip.w;
            let linear = uniforms.depth_unpack.linearize(device);
            let back = uniforms.ndc_to_view.view_position(uv, linear);
            assert!(
                (back - point).length() <= 1e-4 * point.length(),
                "{point} came back as {back}"
            );
        }
    }

    #[test]
    fn test_jitter_is_zero_mean_and_sub_pixel() {
        let jitter = JitterSequence::default();
        let mut sum = Vec2::ZERO;
        for frame in 0..JITTER_SEQUENCE_LENGTH {
            let offset = jitter.offset(frame);
            assert!(offset.abs().max_element() < 0.5);
            sum += offset;
        }
        assert!(sum.length() < 1e-5);
        assert_eq!(jitter.offset(3), jitter.offset(3 + JITTER_SEQUENCE_LENGTH));
    }

    #[test]
    fn test_halton_first_terms() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(4, 3) - 4.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_jitter_without_txaa() {
        let camera = test_camera();
        let mut state = FrameState::default();
        let uniforms = begin(&mut state, &camera, &ShadowSettings::default());
        assert_eq!(uniforms.jitter_curr, Vec2::ZERO);
        assert_eq!(uniforms.view_to_proj, uniforms.view_to_proj_unjittered);
    }

    #[test]
    fn test_previous_snapshot_follows_end_frame() {
        let mut camera = test_camera();
        let settings = ShadowSettings {
            enable_txaa: true,
            ..Default::default()
        };
        let mut state = FrameState::default();

        let first = begin(&mut state, &camera, &settings);
        assert!(!first.have_previous);
        assert_eq!(first.world_to_view_prev, first.world_to_view);
        assert_eq!(first.jitter_prev, first.jitter_curr);
        state.end_frame();

        camera.position.x += 0.25;
        let second = begin(&mut state, &camera, &settings);
        assert!(second.have_previous);
        assert_eq!(second.frame_index, 1);
        assert_eq!(second.world_to_view_prev, first.world_to_view);
        assert_eq!(second.view_to_proj_prev, first.view_to_proj_unjittered);
        assert_eq!(second.jitter_prev, first.jitter_curr);
        assert_ne!(second.world_to_view, second.world_to_view_prev);
        state.end_frame();

        state.reset_history();
        let third = begin(&mut state, &camera, &settings);
        assert!(!third.have_previous);
        assert_eq!(third.world_to_view_prev, third.world_to_view);
    }

    #[test]
    fn test_noise_phase_cycles_only_when_dynamic() {
        let camera = test_camera();
        let mut dynamic = FrameState::default();
        let mut fixed = FrameState::default();
        let still = ShadowSettings {
            dynamic_noise: false,
            ..Default::default()
        };
        for frame in 0..20 {
            let u = begin(&mut dynamic, &camera, &ShadowSettings::default());
            assert_eq!(u.noise_phase, frame % 8);
            dynamic.end_frame();

            let u = begin(&mut fixed, &camera, &still);
            assert_eq!(u.noise_phase, 0);
            fixed.end_frame();
        }
    }

    #[test]
    fn test_light_is_transformed_into_view_space() {
        let camera = test_camera();
        let mut state = FrameState::default();
        let uniforms = begin(&mut state, &camera, &ShadowSettings::default());
        let expected = camera.view_matrix().transform_point3(Vec3::new(1.0, 3.0, 0.0));
        assert!((uniforms.light_position_view.xyz() - expected).length() < 1e-5);
        assert_eq!(uniforms.light_position_view.w, 1.0);
    }

    #[test]
    fn test_gpu_block_layout() {
        assert_eq!(std::mem::size_of::<FrameUniformsGpu>(), 448);

        let camera = test_camera();
        let mut state = FrameState::default();
        let settings = ShadowSettings {
            contact_shadows_mode: ContactShadowsMode::VerySoft,
            display_shadows_only: true,
            feedback_min: 0.9,
            feedback_max: 0.5,
            ..Default::default()
        };
        let gpu = begin(&mut state, &camera, &settings).to_gpu();
        assert_eq!(gpu.modes, UVec4::new(2, 0, 1, 1));
        assert_eq!(gpu.temporal.x, 0.5);
        assert_eq!(gpu.temporal.y, 0.9);
        assert_eq!(gpu.depth_unpack.z, -1.0);
        assert_eq!(gpu.viewport, Vec4::new(320.0, 180.0, 1.0 / 320.0, 1.0 / 180.0));
    }
}
