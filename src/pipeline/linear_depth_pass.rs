//! Linear depth pass
//!
//! Converts the gbuffer device depth into view-space linear depth with the
//! per-frame `depth_unpack` constants. CPU mirror:
//! [`linearize_depth`](crate::shading::depth::linearize_depth).

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

pub const LINEAR_DEPTH_FORMAT: TextureFormat = TextureFormat::R16Float;

pub struct LinearDepthPass {
    device_depth: ResourceId,
    output: Option<ResourceId>,
    objects: Option<PassObjects>,
}

impl LinearDepthPass {
    pub fn new(device_depth: ResourceId) -> Self {
        Self {
            device_depth,
            output: None,
            objects: None,
        }
    }

    pub fn output(&self) -> Option<ResourceId> {
        self.output
    }
}

impl RenderPass for LinearDepthPass {
    fn name(&self) -> &str {
        "Linear Depth Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.device_depth, ResourceUsage::TextureRead);

        let output = ctx.create_texture_relative(
            "linear_depth",
            TextureSize::default(),
            LINEAR_DEPTH_FORMAT,
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
            (1, BindGroupEntry::Texture(ctx.view(self.device_depth)?)),
        ];
        self.objects = Some(prepare_fullscreen(
            ctx,
            "Linear Depth Pipeline",
            LINEAR_DEPTH_WGSL,
            &[
                uniforms_layout_entry(),
                texture_layout_entry(1, TextureSampleType::Depth),
            ],
            &entries,
            LINEAR_DEPTH_FORMAT,
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let (Some(output), Some(objects)) = (self.output, self.objects) else {
            return Ok(());
        };
        let target = ctx.view(output)?;
        draw_fullscreen(ctx, "Linear Depth Pass", target, objects);
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

const LINEAR_DEPTH_WGSL: &str = r#"
@group(0) @binding(1) var device_depth: texture_depth_2d;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let depth = textureLoad(device_depth, vec2<i32>(position.xy), 0);
    return vec4<f32>(linearize_depth(depth), 0.0, 0.0, 1.0);
}
"#;
