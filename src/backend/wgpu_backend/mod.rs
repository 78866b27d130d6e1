//! wgpu backend implementation

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    current_view_id: u64,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    texture_views: HashMap<u64, wgpu::TextureView>,
    samplers: HashMap<u64, wgpu::Sampler>,
    bind_group_layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_sampler_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_render_pipeline_id: u64,

    encoder: Option<wgpu::CommandEncoder>,

    // Commands are buffered here and replayed on end_render_pass
    pending_render_pass: Option<PendingRenderPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::Rg11b10Float => wgpu::TextureFormat::Rg11b10Float,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> TextureFormat {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
        }
    }

    fn convert_load_op(op: &LoadOp) -> wgpu::LoadOp<wgpu::Color> {
        match op {
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            }),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_store_op(op: StoreOp) -> wgpu::StoreOp {
        match op {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    fn clamp_to_limits(&self, width: u32, height: u32) -> (u32, u32) {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width, height)
        }
    }
}

impl WgpuBackend {
    /// Create the backend for a window, blocking on adapter and device requests.
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| BackendError::SurfaceCreationFailed("Surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let mut backend = Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            current_view_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_sampler_id: 1,
            next_layout_id: 1,
            next_bind_group_id: 1,
            next_render_pipeline_id: 1,
            encoder: None,
            pending_render_pass: None,
        };

        let (width, height) = backend.clamp_to_limits(size.width.max(1), size.height.max(1));
        backend.surface_config.width = width;
        backend.surface_config.height = height;
        backend.surface.configure(&backend.device, &backend.surface_config);

        Ok(backend)
    }

    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // Temporal color prefers Rg11b10Float
        let required_features = adapter.features() & wgpu::Features::RG11B10UFLOAT_RENDERABLE;
        if required_features.is_empty() {
            log::warn!("Adapter cannot render to Rg11b10Float; temporal color falls back to Rgba16Float");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Screen-Space Shadows Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn view_for<'a>(
        &'a self,
        handle: TextureViewHandle,
        swapchain_view: Option<&'a wgpu::TextureView>,
    ) -> Option<&'a wgpu::TextureView> {
        if handle.0 == self.current_view_id {
            swapchain_view
        } else {
            self.texture_views.get(&handle.0)
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (width, height) = self.clamp_to_limits(width, height);
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::Outdated => BackendError::SurfaceOutdated,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        });
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                if e.is_recoverable() {
                    self.surface.configure(&self.device, &self.surface_config);
                }
                return Err(e);
            }
        };

        // The swapchain view is created on demand when a pass targets this id
        let view_id = self.next_view_id;
        self.next_view_id += 1;
        self.current_view_id = view_id;

        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.surface_config.width,
            height: self.surface_config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        let encoder = self.encoder.take().ok_or(BackendError::NoFrameInFlight)?;
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
    }

    fn supports_render_target(&self, format: TextureFormat) -> bool {
        match format {
            TextureFormat::Rg11b10Float => self
                .device
                .features()
                .contains(wgpu::Features::RG11B10UFLOAT_RENDERABLE),
            _ => true,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} has zero extent",
                desc.label.as_deref().unwrap_or("texture")
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, texture);

        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(id, view);

        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.address_mode_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: f32::MAX,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });

        let id = self.next_sampler_id;
        self.next_sampler_id += 1;
        self.samplers.insert(id, sampler);

        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match &e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::Texture { sample_type } => wgpu::BindingType::Texture {
                        sample_type: match sample_type {
                            TextureSampleType::Float { filterable } => {
                                wgpu::TextureSampleType::Float { filterable: *filterable }
                            }
                            TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingType::Sampler { filtering } => wgpu::BindingType::Sampler(
                        if *filtering {
                            wgpu::SamplerBindingType::Filtering
                        } else {
                            wgpu::SamplerBindingType::NonFiltering
                        },
                    ),
                };

                let mut visibility = wgpu::ShaderStages::empty();
                if e.visibility.contains(ShaderStageFlags::VERTEX) {
                    visibility |= wgpu::ShaderStages::VERTEX;
                }
                if e.visibility.contains(ShaderStageFlags::FRAGMENT) {
                    visibility |= wgpu::ShaderStages::FRAGMENT;
                }

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility,
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });

        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.bind_group_layouts.insert(id, layout);

        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;

        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let resource = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let buf = self.buffers.get(&buffer.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Buffer for binding {binding} not found"))
                    })?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: *offset,
                        size: size.and_then(std::num::NonZeroU64::new),
                    })
                }
                BindGroupEntry::Texture(view) => {
                    let v = self.texture_views.get(&view.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Texture view for binding {binding} not found"))
                    })?;
                    wgpu::BindingResource::TextureView(v)
                }
                BindGroupEntry::Sampler(sampler) => {
                    let s = self.samplers.get(&sampler.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Sampler for binding {binding} not found"))
                    })?;
                    wgpu::BindingResource::Sampler(s)
                }
            };
            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });

        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, bind_group);

        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
            });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();
        if layouts.len() != desc.bind_group_layouts.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{}: bind group layout not found",
                desc.label.as_deref().unwrap_or("pipeline")
            )));
        }

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let vertex_attrs: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: Self::convert_vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(vertex_attrs.iter())
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(target.format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::from_bits_truncate(target.write_mask.bits()),
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: match desc.primitive_topology {
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            strip_index_format: None,
            front_face: match desc.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: Self::convert_texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: Self::convert_compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        let id = self.next_render_pipeline_id;
        self.next_render_pipeline_id += 1;
        self.render_pipelines.insert(id, pipeline);

        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };

        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        let swapchain_view: Option<wgpu::TextureView> = self.current_texture.as_ref().map(|tex| {
            tex.texture.create_view(&wgpu::TextureViewDescriptor::default())
        });

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .descriptor
                .color_attachments
                .iter()
                .filter_map(|att| {
                    let view = self.view_for(att.view, swapchain_view.as_ref())?;
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: Self::convert_load_op(&att.load_op),
                            store: Self::convert_store_op(att.store_op),
                        },
                    }))
                })
                .collect();

            let depth_attachment = pending.descriptor.depth_stencil_attachment.as_ref().and_then(|att| {
                let view = self.view_for(att.view, swapchain_view.as_ref())?;
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match &att.depth_load_op {
                            LoadOp::Clear(_) => wgpu::LoadOp::Clear(att.depth_clear_value),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: Self::convert_store_op(att.depth_store_op),
                    }),
                    stencil_ops: None,
                })
            });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.render_pipelines.get(&handle.0) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = self.bind_groups.get(&bind_group.0) {
                            render_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(*offset..), wgpu_format);
                        }
                    }
                    RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth } => {
                        render_pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth);
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn copy_texture_to_texture(&mut self, src: TextureHandle, dst: TextureHandle, width: u32, height: u32) {
        debug_assert!(self.pending_render_pass.is_none(), "texture copy inside a render pass");
        let (Some(src), Some(dst), Some(encoder)) = (
            self.textures.get(&src.0),
            self.textures.get(&dst.0),
            self.encoder.as_mut(),
        ) else {
            log::warn!("Skipping texture copy with unknown textures or no frame in flight");
            return;
        };

        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: src,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(&texture.0) {
            texture.destroy();
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }
}

// Additional methods for egui integration
impl WgpuBackend {
    /// Get reference to the wgpu device (for egui-wgpu Renderer creation)
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Get the surface format as wgpu type (for egui-wgpu Renderer creation)
    pub fn wgpu_surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    /// Get device, queue, and encoder together for operations that need all three.
    /// The encoder is only present between `begin_frame` and `end_frame`.
    pub fn device_queue_encoder(&mut self) -> (&wgpu::Device, &wgpu::Queue, Option<&mut wgpu::CommandEncoder>) {
        (&self.device, &self.queue, self.encoder.as_mut())
    }

    /// Render egui paint jobs on top of the current swapchain image.
    pub fn render_egui(
        &mut self,
        renderer: &egui_wgpu::Renderer,
        paint_jobs: &[egui::ClippedPrimitive],
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
    ) {
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };

        let Some(view) = self.current_texture.as_ref().map(|tex| {
            tex.texture.create_view(&wgpu::TextureViewDescriptor::default())
        }) else {
            return;
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("egui Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        renderer.render(&mut render_pass, paint_jobs, screen_descriptor);
    }
}
