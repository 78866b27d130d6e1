//! G-Buffer generation pass
//!
//! Renders every instanced draw batch to multiple render targets (MRT):
//! - Albedo color, alpha unused
//! - View-space normal encoded to [0, 1], alpha 1 for lit geometry
//! - Screen velocity in UV units (TXAA only)
//! - Depth buffer

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{uniforms_entry, uniforms_layout_entry, PassObjects, FRAME_UNIFORMS_WGSL};
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::InstanceData;
use std::any::Any;

/// Background color for pixels without geometry
pub const CLEAR_COLOR: [f32; 4] = [0.32, 0.4, 0.5, 1.0];
/// Normal target clear: alpha 0 so the background stays unlit
const CLEAR_NORMAL: [f32; 4] = [0.5, 0.5, 1.0, 0.0];

pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const VELOCITY_FORMAT: TextureFormat = TextureFormat::Rg16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

/// Targets written by [`GBufferPass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTargets {
    pub color: ResourceId,
    pub normal: ResourceId,
    pub velocity: Option<ResourceId>,
    pub depth: ResourceId,
}

/// G-Buffer generation pass
pub struct GBufferPass {
    write_velocity: bool,
    targets: Option<GBufferTargets>,
    objects: Option<PassObjects>,
}

impl GBufferPass {
    pub fn new(write_velocity: bool) -> Self {
        Self {
            write_velocity,
            targets: None,
            objects: None,
        }
    }

    pub fn targets(&self) -> Option<GBufferTargets> {
        self.targets
    }

    fn color_targets(&self) -> Vec<ColorTargetState> {
        let mut targets = vec![
            ColorTargetState::replace(COLOR_FORMAT),
            ColorTargetState::replace(NORMAL_FORMAT),
        ];
        if self.write_velocity {
            targets.push(ColorTargetState::replace(VELOCITY_FORMAT));
        }
        targets
    }

    fn shader(&self) -> String {
        let fragment = if self.write_velocity {
            GBUFFER_VELOCITY_FRAGMENT_WGSL
        } else {
            GBUFFER_FRAGMENT_WGSL
        };
        format!("{FRAME_UNIFORMS_WGSL}{GBUFFER_VERTEX_WGSL}{fragment}")
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        let size = TextureSize::default();

        let color = ctx.create_texture_relative("gbuffer_color", size, COLOR_FORMAT, usage);
        ctx.write(color, ResourceUsage::RenderTarget);

        let normal = ctx.create_texture_relative("gbuffer_normal", size, NORMAL_FORMAT, usage);
        ctx.write(normal, ResourceUsage::RenderTarget);

        let velocity = self.write_velocity.then(|| {
            let velocity = ctx.create_texture_relative("gbuffer_velocity", size, VELOCITY_FORMAT, usage);
            ctx.write(velocity, ResourceUsage::RenderTarget);
            velocity
        });

        let depth = ctx.create_texture_relative("gbuffer_depth", size, DEPTH_FORMAT, usage);
        ctx.write(depth, ResourceUsage::DepthStencilWrite);

        self.targets = Some(GBufferTargets {
            color,
            normal,
            velocity,
            depth,
        });
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        if let Some(old) = self.objects.take() {
            old.destroy(ctx.backend);
        }

        let layout = ctx.backend.create_bind_group_layout(&[uniforms_layout_entry()])?;
        let bind_group = ctx
            .backend
            .create_bind_group(layout, &[uniforms_entry(ctx.bindings.uniforms)])?;

        let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("G-Buffer Pipeline".into()),
            shader: self.shader(),
            vertex_layouts: vec![Vertex::layout(), InstanceData::layout()],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: self.color_targets(),
        });
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                ctx.backend.destroy_bind_group(bind_group);
                return Err(e.into());
            }
        };

        self.objects = Some(PassObjects { pipeline, bind_group });
        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError> {
        let (Some(targets), Some(objects)) = (self.targets, self.objects) else {
            return Ok(());
        };

        let mut color_attachments = vec![
            ColorAttachment::clear(ctx.view(targets.color)?, CLEAR_COLOR),
            ColorAttachment::clear(ctx.view(targets.normal)?, CLEAR_NORMAL),
        ];
        if let Some(velocity) = targets.velocity {
            color_attachments.push(ColorAttachment::clear(ctx.view(velocity)?, [0.0; 4]));
        }
        let depth_view = ctx.view(targets.depth)?;

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("G-Buffer Pass".into()),
            color_attachments,
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });

        ctx.backend
            .set_viewport(0.0, 0.0, ctx.width as f32, ctx.height as f32, 0.0, 1.0);
        ctx.backend.set_render_pipeline(objects.pipeline);
        ctx.backend.set_bind_group(0, objects.bind_group);

        for draw in ctx.draws {
            ctx.backend.set_vertex_buffer(0, draw.vertex_buffer, 0);
            ctx.backend.set_vertex_buffer(1, draw.instance_buffer, 0);
            ctx.backend
                .set_index_buffer(draw.index_buffer, 0, IndexFormat::Uint32);
            ctx.backend.draw_indexed(
                0..draw.index_count,
                0,
                draw.instance_offset..draw.instance_offset + draw.instance_count,
            );
        }

        ctx.backend.end_render_pass();
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

const GBUFFER_VERTEX_WGSL: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
    @location(7) albedo: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) view_normal: vec3<f32>,
    @location(1) albedo: vec4<f32>,
    @location(2) clip_current: vec4<f32>,
    @location(3) clip_previous: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let model = mat4x4<f32>(input.model_0, input.model_1, input.model_2, input.model_3);
    let world = model * vec4<f32>(input.position, 1.0);

    var output: VertexOutput;
    output.clip_position = frame.view_to_proj * frame.world_to_view * world;
    output.view_normal = (frame.world_to_view * model * vec4<f32>(input.normal, 0.0)).xyz;
    output.albedo = input.albedo;
    output.clip_current = frame.view_to_proj_unjittered * frame.world_to_view * world;
    output.clip_previous = frame.view_to_proj_prev * frame.world_to_view_prev * world;
    return output;
}

fn encode_normal(input: VertexOutput) -> vec4<f32> {
    return vec4<f32>(normalize(input.view_normal) * 0.5 + 0.5, input.albedo.w);
}
"#;

const GBUFFER_FRAGMENT_WGSL: &str = r#"
struct GBufferOutput {
    @location(0) color: vec4<f32>,
    @location(1) normal: vec4<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;
    output.color = vec4<f32>(input.albedo.rgb, 1.0);
    output.normal = encode_normal(input);
    return output;
}
"#;

const GBUFFER_VELOCITY_FRAGMENT_WGSL: &str = r#"
struct GBufferOutput {
    @location(0) color: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) velocity: vec4<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;
    output.color = vec4<f32>(input.albedo.rgb, 1.0);
    output.normal = encode_normal(input);

    var velocity = vec2<f32>(0.0);
    if input.clip_current.w > 0.0 && input.clip_previous.w > 0.0 {
        let current = ndc_to_uv(input.clip_current.xy / input.clip_current.w);
        let previous = ndc_to_uv(input.clip_previous.xy / input.clip_previous.w);
        velocity = current - previous;
    }
    output.velocity = vec4<f32>(velocity, 0.0, 0.0);
    return output;
}
"#;
