//! Screen-space shadow pipeline
//!
//! The frame is a render graph of fullscreen passes over a gbuffer:
//! 1. G-Buffer pass - color, view-space normal, velocity (TXAA) and depth
//! 2. Linear depth pass - device depth to view-space depth
//! 3. Shadow pass - contact shadow ray march toward the light
//! 4. Combine pass - Lambert shading scaled by the shadow term
//! 5. TXAA - temporal resolve, history copy and present
//!
//! Without TXAA the combine pass writes straight to the swapchain.
//! Every shader includes [`FRAME_UNIFORMS_WGSL`], the WGSL mirror of
//! [`FrameUniformsGpu`](crate::frame::FrameUniformsGpu), bound at group 0
//! binding 0 of every pass.

pub mod combine_pass;
pub mod gbuffer_pass;
pub mod history_pass;
pub mod linear_depth_pass;
pub mod shadow_pass;
pub mod txaa_pass;

pub use combine_pass::CombinePass;
pub use gbuffer_pass::{GBufferPass, GBufferTargets};
pub use history_pass::{HistoryCopyPass, PresentPass};
pub use linear_depth_pass::LinearDepthPass;
pub use shadow_pass::ShadowPass;
pub use txaa_pass::TxaaPass;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::{
    GraphError, PassExecuteContext, PassId, PassPrepareContext, PassType, RenderGraph, ResourceId,
};

/// Name of the external swapchain resource
pub const SWAPCHAIN: &str = "swapchain";

/// Preferred format of the TXAA color targets
pub const TEMPORAL_COLOR_FORMAT: TextureFormat = TextureFormat::Rg11b10Float;

/// Used when the backend cannot render to [`TEMPORAL_COLOR_FORMAT`]
pub const TEMPORAL_COLOR_FALLBACK: TextureFormat = TextureFormat::Rgba16Float;

/// Pick the TXAA color format the backend can render to
pub fn temporal_color_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    if backend.supports_render_target(TEMPORAL_COLOR_FORMAT) {
        TEMPORAL_COLOR_FORMAT
    } else {
        TEMPORAL_COLOR_FALLBACK
    }
}

/// Configuration for the shadow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowGraphConfig {
    pub width: u32,
    pub height: u32,
    pub enable_txaa: bool,
    /// Format of `current_color`, the TXAA output and the history
    pub color_format: TextureFormat,
}

/// Resources created by the shadow graph
#[derive(Debug, Clone, Copy)]
pub struct ShadowGraphResources {
    pub swapchain: ResourceId,
    pub gbuffer: GBufferTargets,
    pub linear_depth: ResourceId,
    pub shadows: ResourceId,
    /// Combine output; the swapchain when TXAA is off
    pub lit_color: ResourceId,
    pub txaa_output: Option<ResourceId>,
    pub history: Option<ResourceId>,
}

fn created<T>(value: Option<T>, pass: PassId) -> Result<T, GraphError> {
    value.ok_or(GraphError::UnknownPass(pass))
}

/// Build the render graph for one screen size and TXAA setting
pub fn build_shadow_graph(config: &ShadowGraphConfig) -> Result<(RenderGraph, ShadowGraphResources), GraphError> {
    let mut graph = RenderGraph::new(config.width, config.height);
    let swapchain = graph.register_external(SWAPCHAIN);

    let gbuffer_pass = graph.add_pass(GBufferPass::new(config.enable_txaa), PassType::Graphics);
    let gbuffer = created(
        graph.pass_as::<GBufferPass>(gbuffer_pass).and_then(|p| p.targets()),
        gbuffer_pass,
    )?;

    let linear_depth_pass = graph.add_pass(LinearDepthPass::new(gbuffer.depth), PassType::Graphics);
    let linear_depth = created(
        graph
            .pass_as::<LinearDepthPass>(linear_depth_pass)
            .and_then(|p| p.output()),
        linear_depth_pass,
    )?;

    let shadow_pass = graph.add_pass(ShadowPass::new(linear_depth), PassType::Graphics);
    let shadows = created(
        graph.pass_as::<ShadowPass>(shadow_pass).and_then(|p| p.output()),
        shadow_pass,
    )?;

    let combine_target = if config.enable_txaa { None } else { Some(swapchain) };
    let combine_pass = graph.add_pass(
        CombinePass::new(gbuffer.color, gbuffer.normal, linear_depth, shadows, combine_target)
            .with_color_format(config.color_format),
        PassType::Graphics,
    );
    let lit_color = created(
        graph.pass_as::<CombinePass>(combine_pass).and_then(|p| p.output()),
        combine_pass,
    )?;

    let mut resources = ShadowGraphResources {
        swapchain,
        gbuffer,
        linear_depth,
        shadows,
        lit_color,
        txaa_output: None,
        history: None,
    };

    if config.enable_txaa {
        let velocity = created(gbuffer.velocity, gbuffer_pass)?;
        let txaa_pass = graph.add_pass(
            TxaaPass::new(lit_color, velocity, config.color_format),
            PassType::Graphics,
        );
        let (txaa_output, history) = created(
            graph
                .pass_as::<TxaaPass>(txaa_pass)
                .and_then(|p| Some((p.output()?, p.history()?))),
            txaa_pass,
        )?;

        let copy_pass = graph.add_pass(HistoryCopyPass::new(txaa_output, history), PassType::Transfer);
        let present_pass = graph.add_pass(PresentPass::new(txaa_output, swapchain), PassType::Graphics);
        graph.add_dependency(copy_pass, present_pass);

        resources.txaa_output = Some(txaa_output);
        resources.history = Some(history);
    }

    Ok((graph, resources))
}

/// Pipeline and bind group created by a pass in `prepare`
#[derive(Debug, Clone, Copy)]
pub struct PassObjects {
    pub pipeline: RenderPipelineHandle,
    pub bind_group: BindGroupHandle,
}

impl PassObjects {
    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_bind_group(self.bind_group);
        backend.destroy_render_pipeline(self.pipeline);
    }
}

/// Layout entry for the frame uniform block at binding 0
pub fn uniforms_layout_entry() -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStageFlags::VERTEX_FRAGMENT,
        ty: BindingType::UniformBuffer,
    }
}

/// Layout entry for a texture read with `textureLoad`
pub fn texture_layout_entry(binding: u32, sample_type: TextureSampleType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::FRAGMENT,
        ty: BindingType::Texture { sample_type },
    }
}

pub fn uniforms_entry(buffer: BufferHandle) -> (u32, BindGroupEntry) {
    (
        0,
        BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        },
    )
}

/// Build a fullscreen-triangle pipeline from a fragment shader written
/// against [`FRAME_UNIFORMS_WGSL`]
pub fn create_fullscreen_pipeline(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    fragment: &str,
    layout: BindGroupLayoutHandle,
    format: TextureFormat,
) -> BackendResult<RenderPipelineHandle> {
    backend.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(label.to_string()),
        shader: format!("{FRAME_UNIFORMS_WGSL}{FULLSCREEN_VERTEX_WGSL}{fragment}"),
        vertex_layouts: Vec::new(),
        bind_group_layouts: vec![layout],
        primitive_topology: PrimitiveTopology::TriangleList,
        front_face: FrontFace::Ccw,
        cull_mode: CullMode::None,
        depth_stencil: None,
        color_targets: vec![ColorTargetState::replace(format)],
    })
}

/// Create the bind group and pipeline of a fullscreen pass
pub fn prepare_fullscreen(
    ctx: &mut PassPrepareContext,
    label: &str,
    fragment: &str,
    layout_entries: &[BindGroupLayoutEntry],
    entries: &[(u32, BindGroupEntry)],
    format: TextureFormat,
) -> Result<PassObjects, GraphError> {
    let layout = ctx.backend.create_bind_group_layout(layout_entries)?;
    let bind_group = ctx.backend.create_bind_group(layout, entries)?;
    match create_fullscreen_pipeline(ctx.backend, label, fragment, layout, format) {
        Ok(pipeline) => Ok(PassObjects { pipeline, bind_group }),
        Err(e) => {
            ctx.backend.destroy_bind_group(bind_group);
            Err(e.into())
        }
    }
}

/// Record one fullscreen draw into `target`
pub fn draw_fullscreen(
    ctx: &mut PassExecuteContext,
    label: &str,
    target: TextureViewHandle,
    objects: PassObjects,
) {
    ctx.backend.begin_render_pass(&RenderPassDescriptor {
        label: Some(label.to_string()),
        color_attachments: vec![ColorAttachment::clear(target, [0.0, 0.0, 0.0, 1.0])],
        depth_stencil_attachment: None,
    });
    ctx.backend
        .set_viewport(0.0, 0.0, ctx.width as f32, ctx.height as f32, 0.0, 1.0);
    ctx.backend.set_render_pipeline(objects.pipeline);
    ctx.backend.set_bind_group(0, objects.bind_group);
    ctx.backend.draw(0..3, 0..1);
    ctx.backend.end_render_pass();
}

/// Frame uniform block and the helpers shared by every shader
pub const FRAME_UNIFORMS_WGSL: &str = r#"
struct FrameUniforms {
    world_to_view: mat4x4<f32>,
    view_to_proj: mat4x4<f32>,
    view_to_proj_unjittered: mat4x4<f32>,
    world_to_view_prev: mat4x4<f32>,
    view_to_proj_prev: mat4x4<f32>,
    light_position_view: vec4<f32>,
    // xy = mul, zw = add
    ndc_to_view: vec4<f32>,
    // x = mul, y = add, z = NDC Y to UV sign
    depth_unpack: vec4<f32>,
    // width, height, 1 / width, 1 / height
    viewport: vec4<f32>,
    // radius, steps, noise phase, tan(fov_y / 2)
    shadow: vec4<f32>,
    // contact mode, screen-space radius, noise offset, shadows only
    modes: vec4<u32>,
    // feedback low, feedback high, have previous, Mitchell filter
    temporal: vec4<f32>,
    // xy = current jitter, zw = previous jitter (pixels)
    jitter: vec4<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameUniforms;

fn pixel_uv(position: vec2<f32>) -> vec2<f32> {
    return position * frame.viewport.zw;
}

fn ndc_to_uv(ndc: vec2<f32>) -> vec2<f32> {
    return ndc * vec2<f32>(0.5, 0.5 * frame.depth_unpack.z) + 0.5;
}

fn linearize_depth(device_depth: f32) -> f32 {
    return 1.0 / (frame.depth_unpack.x * device_depth + frame.depth_unpack.y);
}

fn view_position(uv: vec2<f32>, linear_depth: f32) -> vec3<f32> {
    let xy = (uv * frame.ndc_to_view.xy + frame.ndc_to_view.zw) * linear_depth;
    return vec3<f32>(xy, -linear_depth);
}

// xy = uv, z = 1 when the point is in front of the camera
fn project_to_uv(view_to_proj: mat4x4<f32>, view: vec3<f32>) -> vec3<f32> {
    let clip = view_to_proj * vec4<f32>(view, 1.0);
    if clip.w <= 0.0 {
        return vec3<f32>(0.0);
    }
    return vec3<f32>(ndc_to_uv(clip.xy / clip.w), 1.0);
}

fn inside_unit_square(uv: vec2<f32>) -> bool {
    return all(uv >= vec2<f32>(0.0)) && all(uv <= vec2<f32>(1.0));
}

fn uv_to_texel(uv: vec2<f32>) -> vec2<i32> {
    let size = vec2<i32>(frame.viewport.xy);
    return min(vec2<i32>(floor(uv * frame.viewport.xy)), size - vec2<i32>(1));
}
"#;

/// Fullscreen triangle; fragment shaders derive UVs from the pixel position
pub const FULLSCREEN_VERTEX_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
}
"#;

/// Bindings backed by headless objects for pass tests
#[cfg(test)]
pub(crate) fn test_bindings(backend: &mut dyn GraphicsBackend) -> crate::render_graph::FrameBindings {
    let uniforms = backend
        .create_buffer(&BufferDescriptor {
            label: Some("frame uniforms".into()),
            size: std::mem::size_of::<crate::frame::FrameUniformsGpu>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })
        .unwrap();
    crate::render_graph::FrameBindings {
        uniforms,
        point_sampler: backend.create_sampler(&SamplerDescriptor::point_clamp("point")).unwrap(),
        linear_sampler: backend.create_sampler(&SamplerDescriptor::default()).unwrap(),
        surface_format: backend.swapchain_format(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameUniformsGpu;

    fn pass_names(graph: &RenderGraph) -> Vec<String> {
        let compiled = graph.compile().unwrap();
        compiled
            .pass_order
            .iter()
            .map(|&id| graph.get_pass_node(id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_graph_without_txaa_ends_in_combine() {
        let (graph, resources) = build_shadow_graph(&ShadowGraphConfig {
            width: 64,
            height: 32,
            enable_txaa: false,
            color_format: TEMPORAL_COLOR_FORMAT,
        })
        .unwrap();

        assert_eq!(
            pass_names(&graph),
            ["G-Buffer Pass", "Linear Depth Pass", "Shadow Pass", "Combine Pass"]
        );
        assert_eq!(resources.lit_color, resources.swapchain);
        assert!(resources.gbuffer.velocity.is_none());
        assert!(resources.history.is_none());
    }

    #[test]
    fn test_txaa_graph_copies_history_before_present() {
        let (graph, resources) = build_shadow_graph(&ShadowGraphConfig {
            width: 64,
            height: 32,
            enable_txaa: true,
            color_format: TEMPORAL_COLOR_FORMAT,
        })
        .unwrap();

        assert_eq!(
            pass_names(&graph),
            [
                "G-Buffer Pass",
                "Linear Depth Pass",
                "Shadow Pass",
                "Combine Pass",
                "TXAA Pass",
                "History Copy",
                "Present Pass",
            ]
        );
        assert_ne!(resources.lit_color, resources.swapchain);
        assert!(resources.gbuffer.velocity.is_some());
        assert!(resources.history.is_some());
    }

    #[test]
    fn test_uniform_block_fields_match_gpu_struct() {
        let fields = FRAME_UNIFORMS_WGSL
            .lines()
            .map(str::trim)
            .filter(|l| l.ends_with(">,"))
            .count();
        // 5 matrices and 8 vectors of 16 bytes
        assert_eq!(fields, 13);
        assert_eq!(std::mem::size_of::<FrameUniformsGpu>(), 5 * 64 + 8 * 16);
    }

    #[test]
    fn test_temporal_color_falls_back_to_half_float() {
        let backend = crate::backend::HeadlessBackend::new(8, 8);
        assert_eq!(temporal_color_format(&backend), TextureFormat::Rg11b10Float);

        let backend = backend.without_render_format(TextureFormat::Rg11b10Float);
        assert_eq!(temporal_color_format(&backend), TextureFormat::Rgba16Float);
    }
}
