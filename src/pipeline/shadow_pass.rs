//! Contact shadow pass
//!
//! Marches a short view-space ray from every pixel toward the light against
//! the linear depth buffer. Output is R16Float: 1 lit, 0 occluded.
//! CPU mirror: [`march_shadow`](crate::shading::shadows::march_shadow).

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shading::shadows::{DEPTH_BIAS_SCALE, MIN_DEPTH_BIAS, SOFT_BAND_SCALE, VERY_SOFT_BAND_SCALE};
use std::any::Any;

pub const SHADOW_FORMAT: TextureFormat = TextureFormat::R16Float;

pub struct ShadowPass {
    linear_depth: ResourceId,
    output: Option<ResourceId>,
    objects: Option<PassObjects>,
}

impl ShadowPass {
    pub fn new(linear_depth: ResourceId) -> Self {
        Self {
            linear_depth,
            output: None,
            objects: None,
        }
    }

    pub fn output(&self) -> Option<ResourceId> {
        self.output
    }
}

/// Fragment shader with the march constants shared with the CPU path
pub fn shadow_shader() -> String {
    format!(
        "
const DEPTH_BIAS_SCALE: f32 = {DEPTH_BIAS_SCALE:?};
const MIN_DEPTH_BIAS: f32 = {MIN_DEPTH_BIAS:?};
const SOFT_BAND_SCALE: f32 = {SOFT_BAND_SCALE:?};
const VERY_SOFT_BAND_SCALE: f32 = {VERY_SOFT_BAND_SCALE:?};
{SHADOW_WGSL}"
    )
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.linear_depth, ResourceUsage::TextureRead);

        let output = ctx.create_texture_relative(
            "shadows",
            TextureSize::default(),
            SHADOW_FORMAT,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        ctx.write(output, ResourceUsage::RenderTarget);
        self.output = Some(output);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        if let Some(old) = self.objects.take() {
            old.destroy(ctx.backend);
        }

        let entries = [
            uniforms_entry(ctx.bindings.uniforms),
            (1, BindGroupEntry::Texture(ctx.view(self.linear_depth)?)),
        ];
        self.objects = Some(prepare_fullscreen(
            ctx,
            "Shadow Pipeline",
            &shadow_shader(),
            &[
                uniforms_layout_entry(),
                texture_layout_entry(1, TextureSampleType::Float { filterable: false }),
            ],
            &entries,
            SHADOW_FORMAT,
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let (Some(output), Some(objects)) = (self.output, self.objects) else {
            return Ok(());
        };
        let target = ctx.view(output)?;
        draw_fullscreen(ctx, "Shadow Pass", target, objects);
        Ok(())
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(objects) = self.objects.take() {
            objects.destroy(backend);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

const SHADOW_WGSL: &str = r#"
@group(0) @binding(1) var linear_depth: texture_2d<f32>;

fn interleaved_gradient_noise(pixel: vec2<f32>, phase: f32) -> f32 {
    let p = pixel + vec2<f32>(5.588238 * phase);
    return fract(52.9829189 * fract(dot(p, vec2<f32>(0.06711056, 0.00583715))));
}

fn ray_length(depth: f32) -> f32 {
    if frame.modes.y != 0u {
        return frame.shadow.x * 2.0 * frame.shadow.w * depth / max(frame.viewport.y, 1.0);
    }
    return frame.shadow.x;
}

fn occlusion_amount(delta: f32, bias: f32, ray_len: f32) -> f32 {
    if !(delta > bias) {
        return 0.0;
    }
    switch frame.modes.x {
        case 0u: {
            return select(0.0, 1.0, delta < ray_len);
        }
        case 1u: {
            return saturate(1.0 - (delta - bias) / (ray_len * SOFT_BAND_SCALE));
        }
        default: {
            return saturate(1.0 - (delta - bias) / (ray_len * VERY_SOFT_BAND_SCALE));
        }
    }
}

fn march_shadow(pixel: vec2<f32>) -> f32 {
    let depth = textureLoad(linear_depth, vec2<i32>(pixel), 0).r;
    if !(depth > 0.0) || depth > 3.0e38 {
        return 1.0;
    }

    let origin = view_position(pixel_uv(pixel + 0.5), depth);
    let light = frame.light_position_view;
    let to_light = light.xyz - origin * light.w;
    let light_distance = length(to_light);
    if !(light_distance > 1e-6) {
        return 1.0;
    }
    let direction = to_light / light_distance;

    let ray_len = ray_length(depth);
    let steps = max(u32(frame.shadow.y), 1u);
    let step_len = ray_len / f32(steps);
    var offset = 0.0;
    if frame.modes.z != 0u {
        offset = interleaved_gradient_noise(pixel, frame.shadow.z);
    }
    let bias = max(depth * DEPTH_BIAS_SCALE, MIN_DEPTH_BIAS);

    var occlusion = 0.0;
    for (var i = 0u; i < steps; i = i + 1u) {
        let sample_pos = origin + direction * (step_len * (f32(i) + 1.0 - offset));
        let ray_depth = -sample_pos.z;
        if ray_depth <= 0.0 {
            break;
        }
        let projected = project_to_uv(frame.view_to_proj, sample_pos);
        if projected.z == 0.0 || !inside_unit_square(projected.xy) {
            break;
        }
        let scene_depth = textureLoad(linear_depth, uv_to_texel(projected.xy), 0).r;
        occlusion = max(occlusion, occlusion_amount(ray_depth - scene_depth, bias, ray_len));
        if occlusion >= 1.0 {
            break;
        }
    }
    return 1.0 - occlusion;
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(march_shadow(floor(position.xy)), 0.0, 0.0, 1.0);
}
"#;
