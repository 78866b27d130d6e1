//! Temporal resolve pass
//!
//! Reprojects last frame's output through the gbuffer velocity, clamps it to
//! the current neighbourhood and blends it with the (optionally Mitchell
//! filtered) current color. Owns the persistent history texture; the
//! [`HistoryCopyPass`](super::HistoryCopyPass) refills it afterwards.
//! CPU mirror: [`resolve_pixel`](crate::shading::temporal::resolve_pixel).

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shading::temporal::MOTION_SENSITIVITY;
use std::any::Any;

pub struct TxaaPass {
    current_color: ResourceId,
    velocity: ResourceId,
    format: TextureFormat,
    history: Option<ResourceId>,
    output: Option<ResourceId>,
    objects: Option<PassObjects>,
}

impl TxaaPass {
    pub fn new(current_color: ResourceId, velocity: ResourceId, format: TextureFormat) -> Self {
        Self {
            current_color,
            velocity,
            format,
            history: None,
            output: None,
            objects: None,
        }
    }

    pub fn output(&self) -> Option<ResourceId> {
        self.output
    }

    pub fn history(&self) -> Option<ResourceId> {
        self.history
    }
}

pub fn txaa_shader() -> String {
    format!("\nconst MOTION_SENSITIVITY: f32 = {MOTION_SENSITIVITY:?};\n{TXAA_WGSL}")
}

impl RenderPass for TxaaPass {
    fn name(&self) -> &str {
        "TXAA Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.current_color, ResourceUsage::TextureRead);
        ctx.read(self.velocity, ResourceUsage::TextureRead);

        let history = ctx.create_history_texture(
            "txaa_history",
            self.format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        );
        ctx.read(history, ResourceUsage::HistoryRead);
        self.history = Some(history);

        let output = ctx.create_texture_relative(
            "txaa_output",
            TextureSize::default(),
            self.format,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_SRC,
        );
        ctx.write(output, ResourceUsage::RenderTarget);
        self.output = Some(output);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        if let Some(old) = self.objects.take() {
            old.destroy(ctx.backend);
        }
        let history = self.history.ok_or(GraphError::MissingResource(self.current_color))?;

        let entries = [
            uniforms_entry(ctx.bindings.uniforms),
            (1, BindGroupEntry::Texture(ctx.view(self.current_color)?)),
            (2, BindGroupEntry::Texture(ctx.view(self.velocity)?)),
            (3, BindGroupEntry::Texture(ctx.view(history)?)),
            (4, BindGroupEntry::Sampler(ctx.bindings.linear_sampler)),
        ];
        let layout = [
            uniforms_layout_entry(),
            texture_layout_entry(1, TextureSampleType::Float { filterable: false }),
            texture_layout_entry(2, TextureSampleType::Float { filterable: false }),
            texture_layout_entry(3, TextureSampleType::Float { filterable: true }),
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { filtering: true },
            },
        ];
        self.objects = Some(prepare_fullscreen(
            ctx,
            "TXAA Pipeline",
            &txaa_shader(),
            &layout,
            &entries,
            self.format,
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let (Some(output), Some(objects)) = (self.output, self.objects) else {
            return Ok(());
        };
        let target = ctx.view(output)?;
        draw_fullscreen(ctx, "TXAA Pass", target, objects);
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

const TXAA_WGSL: &str = r#"
@group(0) @binding(1) var current_color: texture_2d<f32>;
@group(0) @binding(2) var velocity: texture_2d<f32>;
@group(0) @binding(3) var history: texture_2d<f32>;
@group(0) @binding(4) var linear_sampler: sampler;

const LUMINANCE_FLOOR: f32 = 0.2;
const MITCHELL_B: f32 = 0.33333334;
const MITCHELL_C: f32 = 0.33333334;

fn luminance(color: vec3<f32>) -> f32 {
    return dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
}

fn mitchell_netravali(d: f32) -> f32 {
    let b = MITCHELL_B;
    let c = MITCHELL_C;
    let x = abs(d);
    let x2 = x * x;
    let x3 = x2 * x;
    if x < 1.0 {
        return ((12.0 - 9.0 * b - 6.0 * c) * x3 + (-18.0 + 12.0 * b + 6.0 * c) * x2 + (6.0 - 2.0 * b)) / 6.0;
    }
    if x < 2.0 {
        return ((-b - 6.0 * c) * x3 + (6.0 * b + 30.0 * c) * x2 + (-12.0 * b - 48.0 * c) * x + (8.0 * b + 24.0 * c)) / 6.0;
    }
    return 0.0;
}

fn fetch_current(texel: vec2<i32>) -> vec3<f32> {
    let size = vec2<i32>(frame.viewport.xy);
    let t = clamp(texel, vec2<i32>(0), max(size - vec2<i32>(1), vec2<i32>(0)));
    return textureLoad(current_color, t, 0).rgb;
}

fn filter_current(pixel: vec2<i32>) -> vec3<f32> {
    var sum = vec3<f32>(0.0);
    var weight_sum = 0.0;
    for (var y = -1; y <= 1; y = y + 1) {
        for (var x = -1; x <= 1; x = x + 1) {
            let offset = vec2<i32>(x, y);
            let weight = mitchell_netravali(length(vec2<f32>(offset) - frame.jitter.xy));
            sum = sum + fetch_current(pixel + offset) * weight;
            weight_sum = weight_sum + weight;
        }
    }
    if abs(weight_sum) < 1e-6 {
        return fetch_current(pixel);
    }
    return max(sum / weight_sum, vec3<f32>(0.0));
}

fn feedback_weight(current: vec3<f32>, previous: vec3<f32>, velocity_pixels: f32) -> f32 {
    let lo = frame.temporal.x;
    let hi = frame.temporal.y;
    let lum_current = luminance(current);
    let lum_history = luminance(previous);
    let difference = abs(lum_current - lum_history) / max(max(lum_current, lum_history), LUMINANCE_FLOOR);
    let similarity = saturate(1.0 - difference);
    let motion_confidence = 1.0 / (1.0 + abs(velocity_pixels) * MOTION_SENSITIVITY);
    let k = lo + (hi - lo) * similarity * similarity * motion_confidence;
    return select(lo, clamp(k, lo, hi), k == k);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(position.xy);
    let center = fetch_current(pixel);
    if frame.temporal.z == 0.0 {
        return vec4<f32>(center, 1.0);
    }

    var color = center;
    if frame.temporal.w != 0.0 {
        color = filter_current(pixel);
    }

    let motion = textureLoad(velocity, pixel, 0).xy;
    let history_uv = pixel_uv(position.xy) - motion;
    if !inside_unit_square(history_uv) {
        return vec4<f32>(color, 1.0);
    }

    var lo = vec3<f32>(3.0e38);
    var hi = vec3<f32>(-3.0e38);
    for (var y = -1; y <= 1; y = y + 1) {
        for (var x = -1; x <= 1; x = x + 1) {
            let c = fetch_current(pixel + vec2<i32>(x, y));
            lo = min(lo, c);
            hi = max(hi, c);
        }
    }

    let previous = clamp(textureSampleLevel(history, linear_sampler, history_uv, 0.0).rgb, lo, hi);
    let k = feedback_weight(color, previous, length(motion * frame.viewport.xy));
    return vec4<f32>(mix(color, previous, k), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::{PassType, RenderGraph, VirtualResource};

    #[test]
    fn test_shader_uses_cpu_motion_sensitivity() {
        assert!(txaa_shader().contains("const MOTION_SENSITIVITY: f32 = 0.125;"));
    }

    #[test]
    fn test_history_is_persistent_and_read_as_history() {
        let mut graph = RenderGraph::new(16, 16);
        let current = graph.register_external("current_color");
        let velocity = graph.register_external("velocity");
        let id = graph.add_pass(TxaaPass::new(current, velocity, TEMPORAL_COLOR_FORMAT), PassType::Graphics);

        let pass = graph.pass_as::<TxaaPass>(id).unwrap();
        let history = pass.history().unwrap();
        let node = graph.get_pass_node(id).unwrap();
        assert_eq!(node.history_reads().collect::<Vec<_>>(), [history]);
        assert!(!node.writes_resource(history));
        assert!(node.writes_resource(pass.output().unwrap()));

        let persistent = graph.resources().iter().any(|r| match r {
            VirtualResource::Texture(t) => t.id == history && t.persistent,
            _ => false,
        });
        assert!(persistent);
    }
}
