//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::graph::GraphError;
use crate::render_graph::resource::*;
use crate::render_graph::target::RenderTargets;
use crate::scene::DrawBatch;
use std::any::Any;
use std::collections::HashMap;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a mut Vec<VirtualResource>,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) next_resource_id: &'a mut u32,
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl<'a> PassSetupContext<'a> {
    fn push_texture(&mut self, name: &str, desc: TextureDescriptor, persistent: bool) -> ResourceId {
        let id = ResourceId(*self.next_resource_id);
        *self.next_resource_id += 1;

        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            desc,
            name: name.to_string(),
            persistent,
        }));

        id
    }

    /// Create a texture with size relative to screen
    pub fn create_texture_relative(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let (width, height) = size.resolve(self.screen_width, self.screen_height);

        self.push_texture(
            name,
            TextureDescriptor {
                label: Some(name.to_string()),
                width,
                height,
                format,
                usage,
            },
            false,
        )
    }

    /// Create a full-screen texture whose content is carried over between frames
    pub fn create_history_texture(
        &mut self,
        name: &str,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let desc = TextureDescriptor {
            label: Some(name.to_string()),
            width: self.screen_width,
            height: self.screen_height,
            format,
            usage,
        };
        self.push_texture(name, desc, true)
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }

    /// Get screen dimensions
    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }
}

/// Objects shared by every pass, owned outside the graph
#[derive(Debug, Clone, Copy)]
pub struct FrameBindings {
    pub uniforms: BufferHandle,
    pub point_sampler: SamplerHandle,
    pub linear_sampler: SamplerHandle,
    pub surface_format: TextureFormat,
}

/// Context for creating pipelines and bind groups once targets exist
pub struct PassPrepareContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub bindings: FrameBindings,
    pub(crate) targets: &'a RenderTargets,
}

impl<'a> PassPrepareContext<'a> {
    /// View of an allocated target
    pub fn view(&self, resource: ResourceId) -> Result<TextureViewHandle, GraphError> {
        self.targets
            .get(resource)
            .map(|t| t.view())
            .ok_or(GraphError::MissingResource(resource))
    }
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub draws: &'a [DrawBatch],
    pub width: u32,
    pub height: u32,
    pub(crate) targets: &'a RenderTargets,
    pub(crate) external_views: &'a HashMap<ResourceId, TextureViewHandle>,
}

impl<'a> PassExecuteContext<'a> {
    /// Get a texture view handle for an allocated or external resource
    pub fn view(&self, resource: ResourceId) -> Result<TextureViewHandle, GraphError> {
        self.targets
            .get(resource)
            .map(|t| t.view())
            .or_else(|| self.external_views.get(&resource).copied())
            .ok_or(GraphError::MissingResource(resource))
    }

    /// Get the texture behind an allocated resource
    pub fn texture(&self, resource: ResourceId) -> Result<TextureHandle, GraphError> {
        self.targets
            .get(resource)
            .map(|t| t.texture())
            .ok_or(GraphError::MissingResource(resource))
    }
}

/// Trait for render passes
pub trait RenderPass {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Create GPU objects that depend on allocated targets
    fn prepare(&mut self, _ctx: &mut PassPrepareContext) -> Result<(), GraphError> {
        Ok(())
    }

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), GraphError>;

    /// Destroy GPU objects created in `prepare`
    fn release(&mut self, _backend: &mut dyn GraphicsBackend) {}

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Graphics render pass
    Graphics,
    /// Transfer/copy pass
    Transfer,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.inputs.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource && a.is_write())
    }

    pub fn history_reads(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.inputs
            .iter()
            .filter(|a| a.is_history_read())
            .map(|a| a.resource)
    }
}
