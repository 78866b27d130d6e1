//! Deferred combine pass
//!
//! Lambert shading of the gbuffer scaled by the shadow term. Writes the
//! swapchain directly, or the `current_color` target when TXAA follows.
//! CPU mirror: [`shade`](crate::shading::lighting::shade).

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shading::lighting::AMBIENT;
use std::any::Any;

pub struct CombinePass {
    color: ResourceId,
    normal: ResourceId,
    linear_depth: ResourceId,
    shadows: ResourceId,
    /// External target (swapchain), or `None` to create `current_color`
    target: Option<ResourceId>,
    /// Format of `current_color` when there is no external target
    color_format: TextureFormat,
    output: Option<ResourceId>,
    objects: Option<PassObjects>,
}

impl CombinePass {
    pub fn new(
        color: ResourceId,
        normal: ResourceId,
        linear_depth: ResourceId,
        shadows: ResourceId,
        target: Option<ResourceId>,
    ) -> Self {
        Self {
            color,
            normal,
            linear_depth,
            shadows,
            target,
            color_format: TEMPORAL_COLOR_FORMAT,
            output: None,
            objects: None,
        }
    }

    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    pub fn output(&self) -> Option<ResourceId> {
        self.output
    }

    pub fn writes_swapchain(&self) -> bool {
        self.target.is_some()
    }
}

pub fn combine_shader() -> String {
    format!("\nconst AMBIENT: f32 = {AMBIENT:?};\n{COMBINE_WGSL}")
}

impl RenderPass for CombinePass {
    fn name(&self) -> &str {
        "Combine Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for input in [self.color, self.normal, self.linear_depth, self.shadows] {
            ctx.read(input, ResourceUsage::TextureRead);
        }

        let output = self.target.unwrap_or_else(|| {
            ctx.create_texture_relative(
                "current_color",
                TextureSize::default(),
                self.color_format,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            )
        });
        ctx.write(output, ResourceUsage::RenderTarget);
        self.output = Some(output);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        if let Some(old) = self.objects.take() {
            old.destroy(ctx.backend);
        }

        let format = if self.writes_swapchain() {
            ctx.bindings.surface_format
        } else {
            self.color_format
        };
        let entries = [
            uniforms_entry(ctx.bindings.uniforms),
            (1, BindGroupEntry::Texture(ctx.view(self.color)?)),
            (2, BindGroupEntry::Texture(ctx.view(self.normal)?)),
            (3, BindGroupEntry::Texture(ctx.view(self.linear_depth)?)),
            (4, BindGroupEntry::Texture(ctx.view(self.shadows)?)),
        ];
        let texture = |binding| texture_layout_entry(binding, TextureSampleType::Float { filterable: false });
        self.objects = Some(prepare_fullscreen(
            ctx,
            "Combine Pipeline",
            &combine_shader(),
            &[uniforms_layout_entry(), texture(1), texture(2), texture(3), texture(4)],
            &entries,
            format,
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let (Some(output), Some(objects)) = (self.output, self.objects) else {
            return Ok(());
        };
        let target = ctx.view(output)?;
        draw_fullscreen(ctx, "Combine Pass", target, objects);
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

const COMBINE_WGSL: &str = r#"
@group(0) @binding(1) var gbuffer_color: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(3) var linear_depth: texture_2d<f32>;
@group(0) @binding(4) var shadows: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(position.xy);
    let albedo = textureLoad(gbuffer_color, texel, 0).rgb;
    let shadow = textureLoad(shadows, texel, 0).r;

    if frame.modes.w != 0u {
        return vec4<f32>(vec3<f32>(shadow), 1.0);
    }

    let encoded = textureLoad(gbuffer_normal, texel, 0);
    if encoded.a <= 0.5 {
        return vec4<f32>(albedo, 1.0);
    }
    let normal = normalize(encoded.xyz * 2.0 - 1.0);

    let depth = textureLoad(linear_depth, texel, 0).r;
    let view = view_position(pixel_uv(position.xy), depth);
    let light = frame.light_position_view;
    let to_light = light.xyz - view * light.w;
    var n_dot_l = 0.0;
    if length(to_light) > 1e-6 {
        n_dot_l = max(dot(normal, normalize(to_light)), 0.0);
    }

    return vec4<f32>(albedo * (AMBIENT + (1.0 - AMBIENT) * n_dot_l * shadow), 1.0);
}
"#;
