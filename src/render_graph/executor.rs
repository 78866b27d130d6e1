//! Render graph executor

use crate::backend::traits::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::render_graph::target::{RenderTarget, RenderTargets};
use crate::scene::DrawBatch;
use std::collections::HashMap;

/// Executor for running the compiled render graph.
///
/// Owns every render target of the graph. Targets are created by
/// [`allocate_resources`](Self::allocate_resources) and only released by
/// [`cleanup`](Self::cleanup); there is no partial reallocation.
pub struct RenderGraphExecutor {
    targets: RenderTargets,

    /// External texture views (like swapchain)
    external_views: HashMap<ResourceId, TextureViewHandle>,

    prepared: bool,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            targets: RenderTargets::new(),
            external_views: HashMap::new(),
            prepared: false,
        }
    }

    /// Set an external texture view (e.g., swapchain image)
    pub fn set_external_view(&mut self, resource: ResourceId, view: TextureViewHandle) {
        self.external_views.insert(resource, view);
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Allocate a render target for every virtual texture of the graph
    pub fn allocate_resources(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<(), GraphError> {
        for resource in graph.resources() {
            if let VirtualResource::Texture(tex) = resource {
                if self.targets.contains(tex.id) {
                    continue;
                }
                let target = RenderTarget::create(backend, &tex.desc)?;
                log::debug!(
                    "Allocated '{}' {}x{} {:?}{}",
                    tex.name,
                    tex.desc.width,
                    tex.desc.height,
                    tex.desc.format,
                    if tex.persistent { " (history)" } else { "" }
                );
                self.targets.insert(backend, tex.id, target);
            }
        }

        Ok(())
    }

    /// Let every pass build pipelines and bind groups against the allocated targets
    pub fn prepare(
        &mut self,
        graph: &mut RenderGraph,
        backend: &mut dyn GraphicsBackend,
        bindings: FrameBindings,
    ) -> Result<(), GraphError> {
        let mut ctx = PassPrepareContext {
            backend,
            bindings,
            targets: &self.targets,
        };
        for pass in graph.passes_mut() {
            pass.prepare(&mut ctx)?;
        }
        self.prepared = true;
        Ok(())
    }

    /// Execute the render graph
    pub fn execute(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphicsBackend,
        draws: &[DrawBatch],
    ) -> Result<(), GraphError> {
        let (width, height) = graph.screen_size();

        for &pass_id in &compiled.pass_order {
            let pass = graph.get_pass(pass_id).ok_or(GraphError::UnknownPass(pass_id))?;
            log::trace!("Executing pass '{}'", pass.name());

            let mut ctx = PassExecuteContext {
                backend: &mut *backend,
                draws,
                width,
                height,
                targets: &self.targets,
                external_views: &self.external_views,
            };

            pass.execute(&mut ctx)?;
        }

        Ok(())
    }

    /// Release pass GPU objects and destroy every render target
    pub fn cleanup(&mut self, graph: &mut RenderGraph, backend: &mut dyn GraphicsBackend) {
        for pass in graph.passes_mut() {
            pass.release(backend);
        }
        self.targets.destroy_all(backend);
        self.external_views.clear();
        self.prepared = false;
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}
