//! History copy and present passes
//!
//! After the TXAA resolve its output is copied into the persistent history
//! texture for the next frame, then drawn to the swapchain.

use crate::backend::traits::*;
use crate::pipeline::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

/// Copies this frame's TXAA output into the history texture
pub struct HistoryCopyPass {
    source: ResourceId,
    history: ResourceId,
}

impl HistoryCopyPass {
    pub fn new(source: ResourceId, history: ResourceId) -> Self {
        Self { source, history }
    }
}

impl RenderPass for HistoryCopyPass {
    fn name(&self) -> &str {
        "History Copy"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.source, ResourceUsage::CopySrc);
        ctx.write(self.history, ResourceUsage::CopyDst);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let src = ctx.texture(self.source)?;
        let dst = ctx.texture(self.history)?;
        ctx.backend.copy_texture_to_texture(src, dst, ctx.width, ctx.height);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Draws a color target to the swapchain
pub struct PresentPass {
    source: ResourceId,
    swapchain: ResourceId,
    objects: Option<PassObjects>,
}

impl PresentPass {
    pub fn new(source: ResourceId, swapchain: ResourceId) -> Self {
        Self {
            source,
            swapchain,
            objects: None,
        }
    }
}

impl RenderPass for PresentPass {
    fn name(&self) -> &str {
        "Present Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.source, ResourceUsage::TextureRead);
        ctx.write(self.swapchain, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        if let Some(old) = self.objects.take() {
            old.destroy(ctx.backend);
        }

        let entries = [
            uniforms_entry(ctx.bindings.uniforms),
            (1, BindGroupEntry::Texture(ctx.view(self.source)?)),
        ];
        let format = ctx.bindings.surface_format;
        self.objects = Some(prepare_fullscreen(
            ctx,
            "Present Pipeline",
            PRESENT_WGSL,
            &[
                uniforms_layout_entry(),
                texture_layout_entry(1, TextureSampleType::Float { filterable: false }),
            ],
            &entries,
            format,
        )?);
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let Some(objects) = self.objects else {
            return Ok(());
        };
        let target = ctx.view(self.swapchain)?;
        draw_fullscreen(ctx, "Present Pass", target, objects);
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

const PRESENT_WGSL: &str = r#"
@group(0) @binding(1) var source: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(textureLoad(source, vec2<i32>(position.xy), 0).rgb, 1.0);
}
"#;
