//! Headless backend that records every call instead of touching a GPU.
//!
//! Used by the unit tests and for dry runs of the frame graph. Resource
//! handles are real (unique, tracked) so lifecycle bugs such as leaked or
//! double-destroyed targets show up as assertion failures.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    BeginRenderPass { label: Option<String>, color_targets: Vec<TextureViewHandle> },
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Draw { vertices: u32, instances: u32 },
    DrawIndexed { indices: u32, instances: u32 },
    CopyTexture { src: TextureHandle, dst: TextureHandle },
    WriteBuffer { buffer: BufferHandle, len: usize },
}

/// Recording backend.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    format: TextureFormat,
    next_id: u64,
    frame_in_flight: bool,
    in_render_pass: bool,
    commands: Vec<RecordedCommand>,
    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, TextureHandle>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    pipelines: HashMap<u64, Option<String>>,
    submitted_frames: u64,
    begin_frame_error: Option<BackendError>,
    unrenderable_formats: Vec<TextureFormat>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8UnormSrgb,
            next_id: 1,
            frame_in_flight: false,
            in_render_pass: false,
            commands: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            submitted_frames: 0,
            begin_frame_error: None,
            unrenderable_formats: Vec::new(),
        }
    }

    /// Reject render attachments of `format`, like an adapter lacking the
    /// matching feature.
    pub fn without_render_format(mut self, format: TextureFormat) -> Self {
        self.unrenderable_formats.push(format);
        self
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of the render passes recorded since the last clear, in order.
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    /// Make the next `begin_frame` fail with `error`.
    pub fn fail_next_frame(&mut self, error: BackendError) {
        self.begin_frame_error = Some(error);
    }

    pub fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_texture_views(&self) -> usize {
        self.views.len()
    }

    pub fn live_bind_groups(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// Texture descriptors of all live textures carrying `label`.
    pub fn textures_labeled(&self, label: &str) -> Vec<&TextureDescriptor> {
        self.textures
            .values()
            .filter(|d| d.label.as_deref() == Some(label))
            .collect()
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        log::trace!("HeadlessBackend: resize to {}x{}", width, height);
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if let Some(error) = self.begin_frame_error.take() {
            return Err(error);
        }
        let view = self.next_id();
        self.frame_in_flight = true;
        self.commands.push(RecordedCommand::BeginFrame);
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if !self.frame_in_flight {
            return Err(BackendError::NoFrameInFlight);
        }
        self.frame_in_flight = false;
        self.submitted_frames += 1;
        self.commands.push(RecordedCommand::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn supports_render_target(&self, format: TextureFormat) -> bool {
        !self.unrenderable_formats.contains(&format)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.next_id();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        if data.len() as u64 > desc.size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: {} bytes do not fit in {}",
                desc.label,
                data.len(),
                desc.size
            )));
        }
        self.create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, _offset: u64, data: &[u8]) {
        self.commands.push(RecordedCommand::WriteBuffer {
            buffer,
            len: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        if desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) && !self.supports_render_target(desc.format) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {:?} is not renderable",
                desc.label, desc.format
            )));
        }
        let id = self.next_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let id = self.next_id();
        self.views.insert(id, texture);
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.next_id()))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.next_id()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        for (binding, entry) in entries {
            if let BindGroupEntry::Texture(view) = entry {
                if !self.views.contains_key(&view.0) {
                    return Err(BackendError::PipelineCreationFailed(format!(
                        "Texture view for binding {binding} not found"
                    )));
                }
            }
        }
        let id = self.next_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("HeadlessBackend: creating pipeline {:?}", desc.label);
        if let Some(target) = desc
            .color_targets
            .iter()
            .find(|t| !self.supports_render_target(t.format))
        {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: {:?} is not renderable",
                desc.label, target.format
            )));
        }
        let id = self.next_id();
        self.pipelines.insert(id, desc.label.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        debug_assert!(!self.in_render_pass, "nested render pass");
        self.in_render_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_targets: desc.color_attachments.iter().map(|a| a.view).collect(),
        });
    }

    fn end_render_pass(&mut self) {
        self.in_render_pass = false;
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.commands.push(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.commands.push(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _format: IndexFormat) {}

    fn set_viewport(&mut self, _x: f32, _y: f32, _width: f32, _height: f32, _min_depth: f32, _max_depth: f32) {}

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.commands.push(RecordedCommand::Draw {
            vertices: vertices.len() as u32,
            instances: instances.len() as u32,
        });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.commands.push(RecordedCommand::DrawIndexed {
            indices: indices.len() as u32,
            instances: instances.len() as u32,
        });
    }

    fn copy_texture_to_texture(&mut self, src: TextureHandle, dst: TextureHandle, _width: u32, _height: u32) {
        debug_assert!(!self.in_render_pass, "texture copy inside a render pass");
        self.commands.push(RecordedCommand::CopyTexture { src, dst });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_none() {
            log::warn!("HeadlessBackend: destroying unknown texture {:?}", texture);
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }
}
